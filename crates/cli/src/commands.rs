//! Subcommand handlers.

use anyhow::{Context, Result};
use prayerline_client::{AvatarState, Session};
use prayerline_core::{NewPrayer, Signal};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::args::Command;

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(session: &Session, command: Command) -> Result<()> {
    match command {
        Command::Feed { author } => {
            let prayers = session.feed().fetch(author.as_deref()).await?;
            tracing::info!(count = prayers.len(), author = author.as_deref(), "feed loaded");
            print_json(&prayers)
        }
        Command::Post { content, author, anonymous } => {
            let input = NewPrayer { content, author_id: author, is_anonymous: anonymous, ..Default::default() };
            print_json(&session.mutations().create(input).await?)
        }
        Command::Edit { id, content } => print_json(&session.mutations().update(&id, &content).await?),
        Command::Delete { id } => {
            session.mutations().delete(&id).await?;
            print_json(&json!({ "deleted": id }))
        }
        Command::Like { id } => print_json(&session.mutations().set_liked(&id, true).await?),
        Command::Unlike { id } => print_json(&session.mutations().set_liked(&id, false).await?),
        Command::Avatar { user_id } => follow_avatar(session, &user_id).await,
    }
}

fn avatar_json(user_id: &str, state: &AvatarState) -> serde_json::Value {
    json!({
        "userId": user_id,
        "urls": state.urls,
        "isLoading": state.is_loading,
        "error": state.error.as_ref().map(ToString::to_string),
        "lastEvent": state.last_event,
    })
}

/// Relay avatar signals from stdin, one JSON object per line, printing the
/// avatar state whenever it changes.
async fn follow_avatar(session: &Session, user_id: &str) -> Result<()> {
    let avatars = session.avatars();
    let mut states = avatars.subscribe(user_id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = states.borrow_and_update().clone();
                println!("{}", avatar_json(user_id, &current));
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading signals from stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Signal>(line) {
                    Ok(signal) if signal.user_id() == user_id => avatars.apply(signal).await,
                    Ok(signal) => tracing::debug!(user_id = signal.user_id(), "signal for another user, skipped"),
                    Err(err) => tracing::warn!(error = %err, "skipping malformed signal"),
                }
            }
        }
    }

    let settled = states.wait_for(|s| !s.is_loading).await?.clone();
    println!("{}", avatar_json(user_id, &settled));
    Ok(())
}
