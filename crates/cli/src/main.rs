//! SalesDesk CLI, the main entry point.
//!
//! Commands:
//! - `serve`     Start the chat gateway
//! - `chat`      Stream one exchange to the terminal
//! - `sessions`  List sessions or print a transcript
//! - `config`    Show the effective configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "salesdesk",
    about = "SalesDesk: streaming sales-assistant chat with tool orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one message and stream the answer
    Chat {
        /// Bearer token of the sales rep
        #[arg(short, long, env = "SALESDESK_TOKEN")]
        token: String,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<i64>,

        /// Gateway base URL (defaults to the configured host and port)
        #[arg(long)]
        url: Option<String>,

        /// The message to send
        message: String,
    },

    /// List your sessions, or print one transcript
    Sessions {
        #[arg(short, long, env = "SALESDESK_TOKEN")]
        token: String,

        /// Print this session's messages
        #[arg(long)]
        id: Option<i64>,

        #[arg(long)]
        url: Option<String>,
    },

    /// Print the effective configuration (secrets redacted)
    Config {
        /// Print the default configuration instead
        #[arg(long)]
        default: bool,

        /// Print the configuration file path
        #[arg(long, conflicts_with = "default")]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            token,
            session,
            url,
            message,
        } => commands::chat::run(url, token, session, message).await?,
        Commands::Sessions { token, id, url } => commands::sessions::run(url, token, id).await?,
        Commands::Config { default, path } => {
            if path {
                commands::config_cmd::path()?
            } else if default {
                commands::config_cmd::default()?
            } else {
                commands::config_cmd::show()?
            }
        }
    }

    Ok(())
}
