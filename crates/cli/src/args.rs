//! Command-line surface for `prayerline`.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "prayerline", version, about = "Prayer feed client", long_about = None)]
pub struct Cli {
    /// Override the gateway base URL from the configuration
    #[arg(long)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the global feed, or one author's prayers
    Feed {
        #[arg(long)]
        author: Option<String>,
    },
    /// Create a prayer
    Post {
        content: String,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        anonymous: bool,
    },
    /// Replace a prayer's content
    Edit { id: String, content: String },
    /// Delete a prayer
    Delete { id: String },
    /// Like a prayer
    Like { id: String },
    /// Remove a like
    Unlike { id: String },
    /// Follow a user's avatar, reading avatar signals as JSON lines from stdin
    Avatar { user_id: String },
}
