//! Client side of prayerline.
//!
//! This crate provides the REST gateway, the prayer feeds and their write
//! pipeline, avatar synchronization and the session that ties them together.

pub mod avatar;
pub mod feed;
pub mod mutations;
pub mod preload;
pub mod rest;
pub mod session;

#[cfg(test)]
mod testing;

pub use avatar::{AvatarConfig, AvatarState, AvatarSync};
pub use feed::{PrayerFeed, feed_key};
pub use mutations::{MutationKind, MutationState, PrayerMutations};
pub use preload::{HttpImageLoader, ImageLoader, PreloadError};
pub use rest::{RestConfig, RestGateway};
pub use session::{Session, SessionError};
