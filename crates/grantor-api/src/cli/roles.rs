//! `grantor roles`: list the requestable roles.

use std::collections::BTreeMap;

use grantor_types::error::Problem;
use grantor_types::role::Role;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct RolesResponse {
    #[allow(dead_code)]
    version: String,
    roles: BTreeMap<String, Role>,
}

pub async fn run(state: AppState, provider: Option<String>) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let mut url = format!(
        "{}{}/roles",
        state.config.broker_url, state.config.server.base_path
    );
    if let Some(provider) = &provider {
        url.push_str(&format!("?provider={provider}"));
    }

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Problem::communication(format!("broker unreachable: {e}")))?;
    if !response.status().is_success() {
        return Err(Problem::communication(format!(
            "broker returned status {}",
            response.status().as_u16()
        ))
        .into());
    }
    let listing: RolesResponse = response
        .json()
        .await
        .map_err(|e| Problem::communication(format!("invalid broker response: {e}")))?;

    if listing.roles.is_empty() {
        println!("  No roles available.");
        return Ok(());
    }

    println!();
    for (name, role) in &listing.roles {
        println!(
            "  {}  {}",
            console::style(name).cyan().bold(),
            role.description
        );
        if !role.providers.is_empty() {
            println!(
                "      providers: {}",
                console::style(role.providers.join(", ")).dim()
            );
        }
        if !role.workflows.is_empty() {
            println!(
                "      workflows: {}",
                console::style(role.workflows.join(", ")).dim()
            );
        }
    }
    println!();
    Ok(())
}
