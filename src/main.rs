// Krypton - routed chat agents with tool calling
// Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use krypton::cli::Repl;
use krypton::config::{load_config, Config};
use krypton::errors::RouterError;
use krypton::providers::create_backends;
use krypton::router::Router;
use krypton::server::AgentServer;
use krypton::speech::SpeechService;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "krypton")]
#[command(about = "Routed chat agents with tool calling, over HTTP or the terminal", version)]
struct Args {
    /// Config file (default: ~/.krypton/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Send one message through a route and print the answer
    Chat {
        #[arg(long, default_value = "krypton")]
        route: String,
        /// Print the full transcript as JSON instead of the answer
        #[arg(long)]
        transcript: bool,
        /// Message text (read from stdin when omitted)
        message: Option<String>,
    },
    /// Interactive chat on one route
    Repl {
        #[arg(long, default_value = "krypton")]
        route: String,
    },
    /// List configured routes
    Routes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = load_config(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Repl {
        route: "krypton".to_string(),
    }) {
        Command::Serve { bind } => run_server(config, bind).await,
        Command::Chat {
            route,
            transcript,
            message,
        } => run_chat(&config, &route, message, transcript).await,
        Command::Repl { route } => {
            let router = build_router(&config)?;
            Repl::new(router, route)?.run().await
        }
        Command::Routes => {
            let router = build_router(&config)?;
            println!("{}", serde_json::to_string_pretty(&router.describe())?);
            Ok(())
        }
    }
}

/// Initialize tracing: RUST_LOG wins, KRYPTON_DEBUG=1 forces debug, else info
fn init_tracing() {
    let default_level = if std::env::var("KRYPTON_DEBUG").map(|v| v == "1").unwrap_or(false) {
        "debug"
    } else {
        "info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    // Bridge crates that still log through `log`
    tracing_log::LogTracer::init().ok();
}

fn build_router(config: &Config) -> Result<Router> {
    let backends = create_backends(config)?;
    Router::from_config(config, &backends)
}

/// Run HTTP server
async fn run_server(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    let router = build_router(&config)?;
    let speech = SpeechService::from_config(&config.speech)?;
    tracing::info!(routes = ?router.route_names(), "Routes ready");

    AgentServer::new(router, speech, config.server).serve().await
}

/// One message, one session; ctrl-c cancels it
async fn run_chat(config: &Config, route: &str, message: Option<String>, transcript: bool) -> Result<()> {
    let message = match message {
        Some(message) => message,
        None if !io::stdin().is_terminal() => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read message from stdin")?;
            input
        }
        None => anyhow::bail!("No message given"),
    };
    let message = message.trim();
    if message.is_empty() {
        anyhow::bail!("Message is empty");
    }

    let router = build_router(config)?;
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match router.dispatch_until_cancelled(route, message, token).await {
        Ok(outcome) if transcript => {
            println!("{}", serde_json::to_string_pretty(outcome.transcript.messages())?);
            Ok(())
        }
        Ok(outcome) => {
            println!("{}", outcome.answer);
            Ok(())
        }
        Err(RouterError::Session(err)) => {
            if let Some(partial) = err.transcript().filter(|_| transcript) {
                eprintln!("{}", serde_json::to_string_pretty(partial.messages())?);
            }
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}
