//! reqwest-backed implementation of the built-in call transports.
//!
//! `http` performs the request directly; `openapi` fetches the spec
//! document, resolves the operation id to a concrete method/path, then
//! delegates to `http`. `grpc` and `asyncapi` are parsed but rejected.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use grantor_core::transport::{CallTransport, HttpArguments, OpenApiArguments};
use grantor_types::error::Problem;
use serde_json::{json, Value};

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, Problem> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Problem::configuration(format!("http client init failed: {e}")))?;
        Ok(Self { client })
    }

    async fn execute_http(&self, args: HttpArguments) -> Result<Value, Problem> {
        let method: reqwest::Method = args
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| Problem::validation(format!("invalid http method: {}", args.method)))?;

        // Fill `{placeholder}` segments from query args; whatever is left
        // becomes the query string.
        let mut endpoint = args.endpoint.clone();
        let mut query: Vec<(String, String)> = Vec::new();
        for (key, value) in &args.query {
            let placeholder = format!("{{{key}}}");
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if endpoint.contains(&placeholder) {
                endpoint = endpoint.replace(&placeholder, &rendered);
            } else {
                query.push((key.clone(), rendered));
            }
        }

        let mut request = self.client.request(method, &endpoint).query(&query);
        for (name, value) in &args.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &args.body {
            request = request.json(body);
        }

        tracing::debug!(endpoint = %endpoint, "dispatching http call");
        let response = request
            .send()
            .await
            .map_err(|e| Problem::communication(format!("http call failed: {e}")))?;

        let status = response.status();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body_text = response
            .text()
            .await
            .map_err(|e| Problem::communication(format!("failed to read response body: {e}")))?;
        let content: Value =
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text.clone()));

        match args.output.as_deref() {
            Some("response") => Ok(json!({
                "status_code": status.as_u16(),
                "headers": headers,
                "body": content,
            })),
            Some("raw") => Ok(Value::String(body_text)),
            _ => {
                // Default projection is the parsed content; a failing status
                // becomes a communication problem the caller can retry.
                if !status.is_success() {
                    return Err(Problem::communication(format!(
                        "http call returned status {}",
                        status.as_u16()
                    ))
                    .with_status(status.as_u16()));
                }
                Ok(content)
            }
        }
    }

    async fn execute_openapi(&self, args: OpenApiArguments) -> Result<Value, Problem> {
        let document: Value = self
            .client
            .get(&args.document.endpoint)
            .send()
            .await
            .map_err(|e| Problem::communication(format!("failed to fetch openapi document: {e}")))?
            .json()
            .await
            .map_err(|e| {
                Problem::validation(format!("openapi document is not valid JSON: {e}"))
            })?;

        let (method, path) = find_operation(&document, &args.operation_id).ok_or_else(|| {
            Problem::validation(format!(
                "operationId '{}' not found in openapi document",
                args.operation_id
            ))
        })?;

        let base = base_url(&args.document.endpoint, &document);
        let http_args = HttpArguments {
            method,
            endpoint: format!("{base}{path}"),
            headers: BTreeMap::new(),
            query: args.parameters,
            body: args.body,
            output: None,
        };
        self.execute_http(http_args).await
    }
}

/// Locate an operation id inside `paths`, returning (method, path).
fn find_operation(document: &Value, operation_id: &str) -> Option<(String, String)> {
    let paths = document.get("paths")?.as_object()?;
    for (path, operations) in paths {
        let Some(operations) = operations.as_object() else {
            continue;
        };
        for (method, operation) in operations {
            if operation.get("operationId").and_then(Value::as_str) == Some(operation_id) {
                return Some((method.to_uppercase(), path.clone()));
            }
        }
    }
    None
}

/// The request origin: the document's first server entry resolved against
/// the document URL, or the document URL's origin.
fn base_url(document_url: &str, document: &Value) -> String {
    if let Some(server) = document
        .get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str)
    {
        if server.starts_with("http") {
            return server.trim_end_matches('/').to_string();
        }
    }
    match url::Url::parse(document_url) {
        Ok(parsed) => {
            let mut origin = format!(
                "{}://{}",
                parsed.scheme(),
                parsed.host_str().unwrap_or_default()
            );
            if let Some(port) = parsed.port() {
                origin.push_str(&format!(":{port}"));
            }
            origin
        }
        Err(_) => String::new(),
    }
}

#[async_trait]
impl CallTransport for HttpTransport {
    async fn execute(&self, kind: &str, args: &Value) -> Result<Value, Problem> {
        match kind {
            "http" => self.execute_http(HttpArguments::parse(args)?).await,
            "openapi" => self.execute_openapi(OpenApiArguments::parse(args)?).await,
            other => Err(Problem::configuration(format!(
                "transport '{other}' is not supported"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn http_get_returns_parsed_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pets/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "rex"})))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let out = transport
            .execute(
                "http",
                &json!({
                    "method": "get",
                    "endpoint": format!("{}/pets/{{petId}}", server.uri()),
                    "query": {"petId": 42},
                }),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"name": "rex"}));
    }

    #[tokio::test]
    async fn http_post_sends_json_body_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/grants"))
            .and(query_param("dry_run", "true"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"granted": true})))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let out = transport
            .execute(
                "http",
                &json!({
                    "method": "post",
                    "endpoint": format!("{}/grants", server.uri()),
                    "query": {"dry_run": true},
                    "body": {"role": "ops"},
                }),
            )
            .await
            .unwrap();
        assert_eq!(out["granted"], json!(true));
    }

    #[tokio::test]
    async fn failing_status_is_communication_problem() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .execute(
                "http",
                &json!({"method": "get", "endpoint": format!("{}/broken", server.uri())}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Communication);
        assert_eq!(err.status, 503);
    }

    #[tokio::test]
    async fn response_projection_keeps_status_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let out = transport
            .execute(
                "http",
                &json!({
                    "method": "get",
                    "endpoint": format!("{}/meta", server.uri()),
                    "output": "response",
                }),
            )
            .await
            .unwrap();
        assert_eq!(out["status_code"], json!(404));
        assert_eq!(out["body"], json!("missing"));
    }

    #[tokio::test]
    async fn openapi_resolves_operation_and_calls_it() {
        let server = MockServer::start().await;
        let spec = json!({
            "openapi": "3.0.0",
            "paths": {
                "/pets": {
                    "get": {"operationId": "listPets"}
                }
            }
        });
        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(spec))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "rex"}])))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let out = transport
            .execute(
                "openapi",
                &json!({
                    "document": {"endpoint": format!("{}/openapi.json", server.uri())},
                    "operationId": "listPets",
                }),
            )
            .await
            .unwrap();
        assert_eq!(out[0]["name"], json!("rex"));
    }

    #[tokio::test]
    async fn unknown_operation_is_validation_problem() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"paths": {}})),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .execute(
                "openapi",
                &json!({
                    "document": {"endpoint": format!("{}/openapi.json", server.uri())},
                    "operationId": "nope",
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn grpc_is_rejected_with_configuration() {
        let transport = HttpTransport::new().unwrap();
        let err = transport
            .execute("grpc", &json!({"service": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Configuration);
    }
}
