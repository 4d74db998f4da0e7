//! Remote provider proxy.
//!
//! In agent (thin-client) mode the local process has no cloud credentials:
//! every provider operation is forwarded over HTTPS to the broker, which
//! holds the real clients. The proxy authenticates with the caller's
//! encoded local session as a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use grantor_core::provider::{Authorizor, Notifier, ProviderClient, Rbac};
use grantor_types::error::Problem;
use grantor_types::provider::{NotificationRequest, ProviderPermission, ProviderRole};
use grantor_types::role::Role;
use grantor_types::session::Session;
use grantor_types::user::{AuthorizeRedirect, AuthorizeUser, User};
use serde_json::{json, Value};

pub struct RemoteProvider {
    client: reqwest::Client,
    /// Broker API origin incl. base path, e.g. `https://broker/api/v1`.
    base_url: String,
    provider: String,
    /// Encoded local session presented as a bearer token.
    bearer: Option<String>,
}

impl RemoteProvider {
    pub fn new(base_url: impl Into<String>, provider: impl Into<String>) -> Result<Self, Problem> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Problem::configuration(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider: provider.into(),
            bearer: None,
        })
    }

    pub fn with_bearer(mut self, bearer: impl Into<String>) -> Self {
        self.bearer = Some(bearer.into());
        self
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/provider/{}/{}", self.base_url, self.provider, suffix)
    }

    async fn post(&self, suffix: &str, body: Value) -> Result<Value, Problem> {
        let mut request = self.client.post(self.url(suffix)).json(&body);
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Problem::communication(format!("broker request failed: {e}")))?;
        read_response(response).await
    }

    async fn get(&self, suffix: &str, query: &[(&str, &str)]) -> Result<Value, Problem> {
        let mut request = self.client.get(self.url(suffix)).query(query);
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Problem::communication(format!("broker request failed: {e}")))?;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<Value, Problem> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Problem::authentication("broker rejected the session"));
    }
    if !status.is_success() {
        let detail = body
            .get("detail")
            .and_then(Value::as_str)
            .unwrap_or("broker call failed")
            .to_string();
        return Err(Problem::communication(detail).with_status(status.as_u16()));
    }
    Ok(body)
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, Problem> {
    serde_json::from_value(value)
        .map_err(|e| Problem::communication(format!("invalid {what} payload from broker: {e}")))
}

impl ProviderClient for RemoteProvider {
    fn authorizor(&self) -> Option<&dyn Authorizor> {
        Some(self)
    }

    fn rbac(&self) -> Option<&dyn Rbac> {
        Some(self)
    }

    fn notifier(&self) -> Option<&dyn Notifier> {
        Some(self)
    }
}

#[async_trait]
impl Authorizor for RemoteProvider {
    async fn authorize_session(
        &self,
        request: &AuthorizeUser,
    ) -> Result<AuthorizeRedirect, Problem> {
        let body = serde_json::to_value(request)
            .map_err(|e| Problem::runtime(format!("request serialization failed: {e}")))?;
        decode(self.post("authorizeSession", body).await?, "redirect")
    }

    async fn create_session(&self, request: &AuthorizeUser) -> Result<Session, Problem> {
        let body = serde_json::to_value(request)
            .map_err(|e| Problem::runtime(format!("request serialization failed: {e}")))?;
        decode(self.post("createSession", body).await?, "session")
    }

    async fn validate_session(&self, session: &Session) -> Result<(), Problem> {
        let body = serde_json::to_value(session)
            .map_err(|e| Problem::runtime(format!("session serialization failed: {e}")))?;
        self.post("validateSession", body).await.map(|_| ())
    }

    async fn renew_session(&self, session: &Session) -> Result<Session, Problem> {
        let body = serde_json::to_value(session)
            .map_err(|e| Problem::runtime(format!("session serialization failed: {e}")))?;
        decode(self.post("renewSession", body).await?, "session")
    }
}

#[async_trait]
impl Rbac for RemoteProvider {
    async fn authorize_role(&self, user: &User, role: &Role) -> Result<Value, Problem> {
        self.post("authorizeRole", json!({"user": user, "role": role}))
            .await
    }

    async fn revoke_role(
        &self,
        user: &User,
        role: &Role,
        metadata: &Value,
    ) -> Result<Value, Problem> {
        self.post(
            "revokeRole",
            json!({"user": user, "role": role, "metadata": metadata}),
        )
        .await
    }

    async fn list_roles(&self, filter: Option<&str>) -> Result<Vec<ProviderRole>, Problem> {
        let query = filter.map(|f| vec![("filter", f)]).unwrap_or_default();
        decode(self.get("roles", &query).await?, "roles")
    }

    async fn get_role(&self, name: &str) -> Result<ProviderRole, Problem> {
        decode(self.get(&format!("role/{name}"), &[]).await?, "role")
    }

    async fn list_permissions(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<ProviderPermission>, Problem> {
        let query = filter.map(|f| vec![("filter", f)]).unwrap_or_default();
        decode(self.get("permissions", &query).await?, "permissions")
    }

    async fn get_permission(&self, name: &str) -> Result<ProviderPermission, Problem> {
        decode(
            self.get(&format!("permission/{name}"), &[]).await?,
            "permission",
        )
    }
}

#[async_trait]
impl Notifier for RemoteProvider {
    async fn send_notification(&self, payload: &NotificationRequest) -> Result<(), Problem> {
        let body = serde_json::to_value(payload)
            .map_err(|e| Problem::runtime(format!("payload serialization failed: {e}")))?;
        self.post("notify", body).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn forwards_role_grant_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/provider/aws/authorizeRole"))
            .and(header("authorization", "Bearer sealed-session"))
            .and(body_partial_json(json!({"role": {"name": "ops"}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"assignment": "aws/ops"})),
            )
            .mount(&server)
            .await;

        let provider = RemoteProvider::new(format!("{}/api/v1", server.uri()), "aws")
            .unwrap()
            .with_bearer("sealed-session");
        let metadata = provider
            .authorize_role(
                &User {
                    email: "ada@example.com".into(),
                    ..Default::default()
                },
                &Role {
                    name: "ops".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(metadata["assignment"], json!("aws/ops"));
    }

    #[tokio::test]
    async fn broker_401_is_authentication_problem() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/provider/aws/roles"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider =
            RemoteProvider::new(format!("{}/api/v1", server.uri()), "aws").unwrap();
        let err = provider.list_roles(None).await.unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Authentication);
    }
}
