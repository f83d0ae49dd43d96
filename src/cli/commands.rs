use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::settings::ThemeSetting;

#[derive(Parser)]
#[command(name = "chatter", version, about = "Terminal chat client with local history", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file path globally
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Enter the interactive chat REPL
    Chat {
        /// Continue a stored conversation instead of starting a new one
        #[arg(short = 'C', long)]
        conversation: Option<Uuid>,
    },

    /// Browse and manage stored conversations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Generate images from a prompt and print their URLs
    Images {
        prompt: String,
        /// Number of images, defaults to images.count from the config
        #[arg(short = 'n', long)]
        count: Option<u32>,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List conversations, most recent first
    List,

    /// Print every message of a conversation
    Show { id: Uuid },

    /// Change the title of a conversation
    Rename { id: Uuid, title: String },

    /// Delete a conversation and all of its messages
    Delete { id: Uuid },
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print the current settings
    Show,

    /// Choose the theme
    Theme { theme: ThemeSetting },

    /// Select the model used for chat
    Model { name: String },

    /// List the models offered by the provider
    Models {
        /// Fetch the list again instead of using the cached one
        #[arg(long)]
        refresh: bool,
    },
}
