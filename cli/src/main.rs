use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::connect::ConnectArgs;
use commands::envelope::{FrameCommands, HeaderCommands};
use commands::send::SendArgs;
use commands::session::SessionCommands;
use commands::terma::TermaCommands;
use commands::token::TokenCommands;

#[derive(Parser)]
#[command(name = "lri", version, about = "LRI CLI: sessions, termas, envelope tooling and live WebSocket sessions")]
struct Cli {
    /// API base URL
    #[arg(long, env = "LRI_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Session operations
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Post one message (envelope built from flags) to a thread
    Send(SendArgs),
    /// Terma operations
    Terma {
        #[command(subcommand)]
        command: TermaCommands,
    },
    /// LCE header codec (local)
    Header {
        #[command(subcommand)]
        command: HeaderCommands,
    },
    /// Validate an envelope JSON document (local)
    Validate {
        /// Envelope JSON file (use '-' for stdin)
        file: String,
    },
    /// Frame codec (local)
    Frame {
        #[command(subcommand)]
        command: FrameCommands,
    },
    /// Open a WebSocket session; stdin lines are sent as envelopes
    Connect(ConnectArgs),
    /// Bind token tooling (local)
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Session { command } => commands::session::run(&cli.api_url, command).await,
        Commands::Send(args) => commands::send::run(&cli.api_url, args).await,
        Commands::Terma { command } => commands::terma::run(&cli.api_url, command).await,
        Commands::Header { command } => commands::envelope::header(command),
        Commands::Validate { file } => commands::envelope::validate(&file),
        Commands::Frame { command } => commands::envelope::frame(command),
        Commands::Connect(args) => commands::connect::run(args).await,
        Commands::Token { command } => commands::token::run(command),
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_commands() {
        let cli = Cli::try_parse_from(["lri", "terma", "hide", "t-1", "later", "--type", "warning"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Terma {
                command: TermaCommands::Hide { .. }
            }
        ));
        let cli = Cli::try_parse_from(["lri", "send", "t-1", "--pad", "-0.5,0,0.2"]).unwrap();
        assert!(matches!(cli.command, Commands::Send(_)));
        let cli = Cli::try_parse_from(["lri", "token", "hash", "lri_bt_abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Token {
                command: TokenCommands::Hash { .. }
            }
        ));
    }
}
