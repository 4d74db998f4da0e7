//! Concrete provider clients and the config-to-client factory.

pub mod memory;
pub mod oauth2;
pub mod remote;
pub mod slack;

use std::sync::Arc;

use grantor_core::provider::Provider;
use grantor_types::error::Problem;
use grantor_types::provider::ProviderConfig;

pub use memory::MemoryProvider;
pub use oauth2::OAuth2Provider;
pub use remote::RemoteProvider;
pub use slack::SlackProvider;

/// Build a provider from operator configuration. The `provider` kind picks
/// the client; cloud SDK kinds are reached through the remote proxy or a
/// broker-side deployment that registers them explicitly.
pub fn build_provider(config: ProviderConfig) -> Result<Provider, Problem> {
    let client: Arc<dyn grantor_core::provider::ProviderClient> = match config.provider.as_str() {
        "oauth2" => Arc::new(OAuth2Provider::from_value(&config.config)?),
        "slack" => Arc::new(SlackProvider::from_value(&config.config)?),
        "memory" => Arc::new(MemoryProvider::from_value(&config.config)?),
        "remote" => {
            let base_url = config
                .config
                .get("url")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    Problem::configuration("remote provider requires a 'url' setting")
                })?;
            Arc::new(RemoteProvider::new(base_url, config.name.clone())?)
        }
        other => {
            return Err(Problem::configuration(format!(
                "unknown provider kind: {other}"
            )));
        }
    };
    Ok(Provider::new(config, client))
}
