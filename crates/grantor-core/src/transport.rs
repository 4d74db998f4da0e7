//! Built-in call transports: the seam between the dispatcher and the HTTP
//! stack.
//!
//! The runner hands the transport an already-interpolated argument value;
//! the implementation parses it into the typed argument struct for the
//! transport kind. `grpc` and `asyncapi` parse but are not executable;
//! they fail with a `configuration` problem naming the transport.

use async_trait::async_trait;
use grantor_types::error::Problem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Transports the dispatcher recognizes without consulting the function
/// registry.
pub const BUILTIN_TRANSPORTS: [&str; 4] = ["http", "grpc", "openapi", "asyncapi"];

pub fn is_builtin_transport(name: &str) -> bool {
    BUILTIN_TRANSPORTS.contains(&name)
}

/// Arguments for `call: http`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpArguments {
    pub method: String,
    /// Endpoint URI; `{placeholders}` are filled from `query` before the
    /// remainder is appended as a query string.
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Output projection: `content` (default; parsed body), `response`
    /// (status/headers/body envelope) or `raw` (body as string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl HttpArguments {
    pub fn parse(args: &Value) -> Result<Self, Problem> {
        serde_json::from_value(args.clone())
            .map_err(|e| Problem::validation(format!("invalid http call arguments: {e}")))
    }
}

/// Arguments for `call: openapi`: a spec document plus an operation id,
/// resolved to a concrete http call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenApiArguments {
    pub document: DocumentRef,
    #[serde(rename = "operationId")]
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub endpoint: String,
}

impl OpenApiArguments {
    pub fn parse(args: &Value) -> Result<Self, Problem> {
        serde_json::from_value(args.clone())
            .map_err(|e| Problem::validation(format!("invalid openapi call arguments: {e}")))
    }
}

/// Executes built-in transports. The production implementation lives in the
/// infra crate (reqwest); [`UnsupportedTransport`] declines everything and
/// serves engine-only deployments and tests.
#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn execute(&self, kind: &str, args: &Value) -> Result<Value, Problem>;
}

/// Transport stub that parses arguments (so documents fail fast) but
/// declines to perform I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedTransport;

#[async_trait]
impl CallTransport for UnsupportedTransport {
    async fn execute(&self, kind: &str, args: &Value) -> Result<Value, Problem> {
        match kind {
            "http" => {
                HttpArguments::parse(args)?;
            }
            "openapi" => {
                OpenApiArguments::parse(args)?;
            }
            _ => {}
        }
        Err(Problem::configuration(format!(
            "transport '{kind}' is not available in this deployment"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn http_arguments_parse_minimal_and_full() {
        let args = HttpArguments::parse(&json!({
            "method": "get",
            "endpoint": "https://api.example.com/pets/{petId}",
        }))
        .unwrap();
        assert_eq!(args.method, "get");
        assert!(args.headers.is_empty());

        let args = HttpArguments::parse(&json!({
            "method": "post",
            "endpoint": "https://api.example.com/grants",
            "headers": {"authorization": "Bearer x"},
            "query": {"dry_run": true},
            "body": {"role": "ops"},
            "output": "response",
        }))
        .unwrap();
        assert_eq!(args.output.as_deref(), Some("response"));
    }

    #[test]
    fn missing_method_is_validation_problem() {
        let err =
            HttpArguments::parse(&json!({"endpoint": "https://x.example"})).unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn unsupported_transport_is_configuration_problem() {
        let transport = UnsupportedTransport;
        let err = transport
            .execute("grpc", &json!({"service": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Configuration);
        assert!(err.detail.contains("grpc"));
    }
}
