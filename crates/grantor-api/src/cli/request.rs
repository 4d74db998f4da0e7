//! `grantor request`: submit an elevation to the broker.

use grantor_core::encoding::encode_local_session;
use grantor_types::elevate::{ElevateResponse, ElevateStaticRequest};
use grantor_types::error::Problem;
use grantor_types::task::TaskStatus;

use crate::state::AppState;

pub struct RequestArgs {
    pub reason: String,
    pub role: String,
    pub providers: Vec<String>,
    pub duration: String,
    pub workflow: String,
}

pub async fn run(state: AppState, args: RequestArgs) -> anyhow::Result<()> {
    if args.reason.is_empty() {
        return Err(Problem::validation("a reason is required").into());
    }

    let request = ElevateStaticRequest {
        role: args.role,
        providers: args.providers,
        workflow: args.workflow,
        reason: args.reason,
        duration: args.duration,
        identities: Vec::new(),
        session: None,
    };

    // Present whatever session we already hold as a bearer credential.
    let bearer = match state.sessions.load().await?.sessions.into_iter().next() {
        Some((_, session)) if !session.is_expired() => {
            Some(encode_local_session(&session)?)
        }
        _ => None,
    };

    let client = reqwest::Client::new();
    let url = format!(
        "{}{}/elevate",
        state.config.broker_url, state.config.server.base_path
    );
    let mut http_request = client.post(&url).json(&request);
    if let Some(bearer) = bearer {
        http_request = http_request.bearer_auth(bearer);
    }

    let response = http_request
        .send()
        .await
        .map_err(|e| Problem::communication(format!("broker unreachable: {e}")))?;

    if !response.status().is_success() {
        let problem: Problem = response.json().await.unwrap_or_else(|_| {
            Problem::communication("broker returned an unreadable error")
        });
        return Err(problem.into());
    }

    let elevation: ElevateResponse = response
        .json()
        .await
        .map_err(|e| Problem::communication(format!("invalid broker response: {e}")))?;

    render(&elevation);
    Ok(())
}

fn render(elevation: &ElevateResponse) {
    match elevation.status {
        TaskStatus::Completed => {
            println!(
                "  {} Elevation {}",
                console::style("✓").green(),
                console::style("granted").green().bold()
            );
        }
        TaskStatus::Waiting => {
            println!(
                "  {} Elevation {} (awaiting approval or expiry)",
                console::style("⏳").bold(),
                console::style("in progress").yellow()
            );
        }
        TaskStatus::Faulted => {
            println!(
                "  {} Elevation {}",
                console::style("✗").red(),
                console::style("failed").red().bold()
            );
        }
        other => {
            println!("  Elevation status: {other}");
        }
    }

    if let Some(url) = &elevation.url {
        println!();
        println!("  Continue in your browser:");
        println!("  {}", console::style(url).cyan().underlined());
    }

    if let Some(output) = &elevation.output {
        if let Some(revocation_at) = output.get("revocation_at").and_then(|v| v.as_str()) {
            println!("  Access will be revoked at {revocation_at}");
        }
        if let Some(detail) = output.get("detail").and_then(|v| v.as_str()) {
            println!("  {detail}");
        }
    }
}
