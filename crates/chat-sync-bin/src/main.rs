//! chat-sync - drive the conversation sync core from the command line.

mod demo;

use std::path::PathBuf;

use chat_config_and_utils::{init_logging, Config, Paths};
use clap::{Parser, Subcommand};
use conversation_sync_core::UserId;

/// Chat sync command-line interface.
#[derive(Parser)]
#[command(name = "chat-sync")]
#[command(about = "Run conversations through the chat sync core against an in-process store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.chat-sync
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Exchange messages between two users and print both views
    Demo {
        /// Sending user
        #[arg(long, default_value = "alice")]
        from: String,
        /// Receiving user
        #[arg(long, default_value = "bob")]
        to: String,
        /// Message to send; repeat for several
        #[arg(short, long = "message")]
        messages: Vec<String>,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, Some(paths.log_file()));

    match cli.command {
        Commands::Demo { from, to, messages } => {
            config.require_memory_store()?;
            let messages = if messages.is_empty() {
                vec!["hi".to_string(), "is the loft still available?".to_string()]
            } else {
                messages
            };
            demo::run(
                config.to_sync_config(),
                UserId::from(from),
                UserId::from(to),
                messages,
            )
            .await?;
        }
        Commands::Config { action: ConfigAction::Show } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Config { action: ConfigAction::Init } => {
            if paths.config_file().exists() {
                println!("config already exists at {}", paths.config_file().display());
            } else {
                Config::default().save(&paths)?;
                println!("wrote {}", paths.config_file().display());
            }
        }
    }

    Ok(())
}
