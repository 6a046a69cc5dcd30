//! Core types and shared functionality for prayerline.
//!
//! This crate provides:
//! - Query cache with request coalescing and per-kind cache policies
//! - Unified error types
//! - Configuration structures
//! - Host signal bus and duplicate suppression
//! - The remote gateway contract

pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod gateway;
pub mod models;

pub use cache::{CacheKey, QueryCache, ResourceKind};
pub use config::AppConfig;
pub use error::{Error, GatewayError};
pub use events::{LocalBus, Signal, SignalBus, SignalKind};
pub use gateway::PrayerGateway;
pub use models::{AvatarUrls, NewPrayer, Prayer};
