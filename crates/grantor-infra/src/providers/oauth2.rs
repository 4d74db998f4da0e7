//! Generic OAuth2 authorization-code provider.
//!
//! Drives the three-legged flow against any compliant identity provider:
//! authorize URL with the sealed `state`, code-for-token exchange, a
//! userinfo fetch to build the principal, and refresh-token renewal. The
//! client secret never appears in logs or Debug output.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use grantor_core::provider::{Authorizor, ProviderClient};
use grantor_types::error::Problem;
use grantor_types::session::Session;
use grantor_types::user::{AuthorizeRedirect, AuthorizeUser, User};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use uuid::Uuid;

/// Provider `config` block for an oauth2 provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

pub struct OAuth2Provider {
    client: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    authorize_url: String,
    token_url: String,
    userinfo_url: String,
    scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    preferred_username: String,
    #[serde(default)]
    email_verified: Option<bool>,
}

impl OAuth2Provider {
    pub fn new(config: OAuth2Config) -> Result<Self, Problem> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Problem::configuration(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            client_id: config.client_id,
            client_secret: SecretString::from(config.client_secret),
            authorize_url: config.authorize_url,
            token_url: config.token_url,
            userinfo_url: config.userinfo_url,
            scopes: config.scopes,
        })
    }

    pub fn from_value(config: &serde_json::Value) -> Result<Self, Problem> {
        let parsed: OAuth2Config = serde_json::from_value(config.clone())
            .map_err(|e| Problem::configuration(format!("invalid oauth2 config: {e}")))?;
        Self::new(parsed)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, Problem> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Problem::communication(format!("userinfo request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Problem::authentication("identity provider rejected the token"));
        }
        if !response.status().is_success() {
            return Err(Problem::communication(format!(
                "userinfo returned status {}",
                response.status().as_u16()
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| Problem::communication(format!("invalid userinfo payload: {e}")))?;
        Ok(User {
            id: info.sub,
            username: info.preferred_username,
            email: info.email,
            name: info.name,
            verified: info.email_verified,
            source: "oauth2".into(),
            groups: Vec::new(),
        })
    }

    async fn exchange(&self, form: &[(&str, &str)]) -> Result<TokenResponse, Problem> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| Problem::communication(format!("token exchange failed: {e}")))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::BAD_REQUEST
        {
            return Err(Problem::authentication(
                "identity provider rejected the authorization grant",
            ));
        }
        if !response.status().is_success() {
            return Err(Problem::communication(format!(
                "token endpoint returned status {}",
                response.status().as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Problem::communication(format!("invalid token payload: {e}")))
    }

    fn session_from_token(&self, token: TokenResponse, user: User) -> Session {
        let expiry = Utc::now() + chrono::Duration::seconds(token.expires_in.unwrap_or(3600));
        Session {
            uuid: Uuid::new_v4(),
            user,
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or_default(),
            expiry,
        }
    }
}

impl ProviderClient for OAuth2Provider {
    fn authorizor(&self) -> Option<&dyn Authorizor> {
        Some(self)
    }
}

#[async_trait]
impl Authorizor for OAuth2Provider {
    async fn authorize_session(
        &self,
        request: &AuthorizeUser,
    ) -> Result<AuthorizeRedirect, Problem> {
        let mut url = url::Url::parse(&self.authorize_url)
            .map_err(|e| Problem::configuration(format!("invalid authorize_url: {e}")))?;
        let scopes = if request.scopes.is_empty() {
            self.scopes.join(" ")
        } else {
            request.scopes.join(" ")
        };
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &request.redirect_uri)
            .append_pair("scope", &scopes)
            .append_pair("state", &request.state);
        Ok(AuthorizeRedirect {
            url: url.to_string(),
        })
    }

    async fn create_session(&self, request: &AuthorizeUser) -> Result<Session, Problem> {
        if request.code.is_empty() {
            return Err(Problem::authentication("missing authorization code"));
        }
        let secret = self.client_secret.expose_secret().to_string();
        let token = self
            .exchange(&[
                ("grant_type", "authorization_code"),
                ("code", &request.code),
                ("redirect_uri", &request.redirect_uri),
                ("client_id", &self.client_id),
                ("client_secret", &secret),
            ])
            .await?;
        let user = self.fetch_user(&token.access_token).await?;
        Ok(self.session_from_token(token, user))
    }

    async fn validate_session(&self, session: &Session) -> Result<(), Problem> {
        if session.is_expired() {
            return Err(Problem::authentication("session expired"));
        }
        self.fetch_user(&session.access_token).await.map(|_| ())
    }

    async fn renew_session(&self, session: &Session) -> Result<Session, Problem> {
        if session.refresh_token.is_empty() {
            return Err(Problem::authentication("session has no refresh token"));
        }
        let secret = self.client_secret.expose_secret().to_string();
        let token = self
            .exchange(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &session.refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &secret),
            ])
            .await?;
        let user = self.fetch_user(&token.access_token).await?;
        Ok(self.session_from_token(token, user))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OAuth2Provider {
        OAuth2Provider::new(OAuth2Config {
            client_id: "grantor".into(),
            client_secret: "shhh".into(),
            authorize_url: format!("{}/authorize", server.uri()),
            token_url: format!("{}/token", server.uri()),
            userinfo_url: format!("{}/userinfo", server.uri()),
            scopes: vec!["openid".into(), "email".into()],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn authorize_session_carries_state_untouched() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);

        let redirect = provider
            .authorize_session(&AuthorizeUser {
                scopes: Vec::new(),
                state: "sealed-state-blob".into(),
                redirect_uri: "https://broker.test/api/v1/auth/callback/google".into(),
                code: String::new(),
            })
            .await
            .unwrap();

        assert!(redirect.url.contains("state=sealed-state-blob"));
        assert!(redirect.url.contains("response_type=code"));
        assert!(redirect.url.contains("scope=openid+email"));
    }

    #[tokio::test]
    async fn create_session_exchanges_code_and_fetches_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-123",
                "refresh_token": "rt-456",
                "expires_in": 1800,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "u-1",
                "email": "ada@example.com",
                "name": "Ada",
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let session = provider
            .create_session(&AuthorizeUser {
                scopes: Vec::new(),
                state: String::new(),
                redirect_uri: "https://broker.test/cb".into(),
                code: "one-time-code".into(),
            })
            .await
            .unwrap();

        assert_eq!(session.user.email, "ada@example.com");
        assert_eq!(session.access_token, "at-123");
        assert_eq!(session.refresh_token, "rt-456");
        assert!(!session.is_expired());
    }

    #[tokio::test]
    async fn rejected_code_is_authentication_problem() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .create_session(&AuthorizeUser {
                code: "bad".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn validate_session_consults_userinfo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let session = Session {
            uuid: Uuid::new_v4(),
            user: User::default(),
            access_token: "stale".into(),
            refresh_token: String::new(),
            expiry: Utc::now() + chrono::Duration::hours(1),
        };
        let err = provider.validate_session(&session).await.unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Authentication);
    }
}
