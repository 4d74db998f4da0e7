//! `grantor login`: the CLI side of the browser rendezvous.
//!
//! Starts the local agent daemon, prints the login URL for the user's
//! browser, then blocks on the session manager until the broker's redirect
//! lands the session in the local store (or the wait times out).

use std::time::Duration;

use crate::http::router::build_agent_router;
use crate::state::AppState;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn run(state: AppState, provider: Option<String>) -> anyhow::Result<()> {
    let provider = provider.unwrap_or_else(|| "default".to_string());

    let addr = state.config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let callback = format!(
        "http://{}{}/sessions/callback",
        addr, state.config.server.base_path
    );
    let login_url = format!(
        "{}{}/auth?callback={}&provider={}",
        state.config.broker_url, state.config.server.base_path, callback, provider
    );

    println!();
    println!(
        "  {} Open this URL in your browser to sign in:",
        console::style("🔑").bold()
    );
    println!();
    println!("  {}", console::style(&login_url).cyan().underlined());
    println!();
    println!(
        "  {}",
        console::style("Waiting for the browser to complete the login...").dim()
    );

    // Serve the callback endpoint while the rendezvous waits.
    let sessions = state.sessions.clone();
    let shutdown = state.shutdown.clone();
    let server_shutdown = shutdown.clone();
    let router = build_agent_router(state);
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
    });

    let result = sessions.await_provider_refresh(&provider, LOGIN_TIMEOUT).await;
    shutdown.cancel();
    let _ = server.await;

    let session = result?;
    println!(
        "  {} Logged in via '{}' (session valid until {})",
        console::style("✓").green(),
        provider,
        session.expiry.to_rfc3339()
    );
    Ok(())
}
