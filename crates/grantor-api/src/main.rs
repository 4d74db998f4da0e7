//! grantor entry point.
//!
//! Binary name: `grantor`. Parses the CLI, initializes tracing and
//! application state, then dispatches to the command handler or starts the
//! HTTP server. Exit code 0 on success, 1 on unrecoverable local failure.

mod cli;
mod config;
mod http;
mod state;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use config::AppConfig;
use state::AppState;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,grantor=info",
        1 => "info,grantor=debug",
        _ => "trace",
    };
    if cli.otel {
        if let Err(e) = grantor_observe::tracing_setup::init_tracing(true) {
            eprintln!("failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
            )
            .with_target(false)
            .init();
    }

    let exit = match run(cli).await {
        Ok(()) => 0,
        Err(error) => {
            match error.downcast_ref::<grantor_types::error::Problem>() {
                Some(problem) => cli::print_problem(problem),
                None => eprintln!("{}", console::style(format!("{error:#}")).red()),
            }
            1
        }
    };

    grantor_observe::tracing_setup::shutdown_tracing();
    std::process::exit(exit);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Version => {
            println!("grantor {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        Commands::Config => {
            let rendered = serde_yaml_ng::to_string(&config)?;
            println!("{rendered}");
            Ok(())
        }

        Commands::Server { agent } => {
            let state = AppState::init(config).await?;
            cli::server::run(state, agent).await
        }

        Commands::Login { provider } => {
            let state = AppState::init(config).await?;
            cli::login::run(state, provider).await
        }

        Commands::Request {
            reason,
            role,
            providers,
            duration,
            workflow,
        } => {
            let state = AppState::init(config).await?;
            cli::request::run(
                state,
                cli::request::RequestArgs {
                    reason: reason.join(" "),
                    role,
                    providers,
                    duration,
                    workflow,
                },
            )
            .await
        }

        Commands::Roles { provider } => {
            let state = AppState::init(config).await?;
            cli::roles::run(state, provider).await
        }
    }
}
