//! `grantor server`: run the broker (or the agent daemon).

use crate::http::router::{build_agent_router, build_router};
use crate::state::AppState;

pub async fn run(state: AppState, agent: bool) -> anyhow::Result<()> {
    let addr = state.config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let mode = if agent { "agent" } else { "broker" };
    println!(
        "  {} grantor {} listening on {}",
        console::style("⚡").bold(),
        mode,
        console::style(format!("http://{addr}")).cyan()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let shutdown = state.shutdown.clone();
    let router = if agent {
        build_agent_router(state)
    } else {
        build_router(state)
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then fan the shutdown out to background
/// loops (signal pump, schedulers).
async fn shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    shutdown.cancel();
}
