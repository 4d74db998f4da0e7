//! CLI definition and shared output helpers.

pub mod login;
pub mod request;
pub mod roles;
pub mod server;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use grantor_types::error::Problem;

#[derive(Parser)]
#[command(
    name = "grantor",
    about = "Just-in-time access broker",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Export traces via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the broker HTTP server (or the local agent daemon).
    Server {
        /// Run in agent mode: the local session daemon instead of the broker.
        #[arg(long)]
        agent: bool,
    },

    /// Log in to an identity provider and store the session locally.
    Login {
        /// Identity provider to authenticate with.
        #[arg(long)]
        provider: Option<String>,
    },

    /// Request a temporary elevation.
    Request {
        /// Why the access is needed.
        reason: Vec<String>,

        #[arg(long)]
        role: String,

        /// Providers the grant applies to (repeatable).
        #[arg(long = "provider")]
        providers: Vec<String>,

        /// How long the elevation should last (e.g. 1h, PT30M).
        #[arg(long, default_value = "1h")]
        duration: String,

        /// Explicit workflow override.
        #[arg(long, default_value = "")]
        workflow: String,
    },

    /// List the roles available to request.
    Roles {
        /// Only roles grantable on this provider.
        #[arg(long)]
        provider: Option<String>,
    },

    /// Print the effective configuration.
    Config,

    /// Print version information.
    Version,
}

/// Render a problem the way operators see failures: title in red, detail
/// underneath.
pub fn print_problem(problem: &Problem) {
    eprintln!("{}", console::style(&problem.title).red().bold());
    if !problem.detail.is_empty() {
        eprintln!("  {}", problem.detail);
    }
    if !problem.instance.is_empty() {
        eprintln!("  {}", console::style(format!("at {}", problem.instance)).dim());
    }
}
