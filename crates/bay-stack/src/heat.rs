//! JSON-over-HTTP adapter for a Heat-style orchestration API.
//!
//! Stacks are addressed as `{stack_name}/{id}`, which is what
//! [`HeatClient::create_stack`] returns. A bare name is accepted by
//! [`HeatClient::get_stack`]; the backend answers it with a redirect to the
//! full identifier, which is followed once.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bay_core::ConductorConfig;
use bay_template::StackDefinition;
use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{StackError, StackResult};
use crate::service::{StackInfo, StackService, StackStatus};

const USER_AGENT: &str = "baygrid-conductor/0.1";

/// Longest backend error text carried into a `Rejected` error.
const MAX_ERROR_TEXT: usize = 512;

pub struct HeatClient {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: String,
    auth_token: Option<String>,
    timeout: Duration,
}

struct Response {
    status: StatusCode,
    location: Option<String>,
    body: Bytes,
}

#[derive(Deserialize)]
struct CreateResponse {
    stack: CreatedStack,
}

#[derive(Deserialize)]
struct CreatedStack {
    id: String,
}

#[derive(Deserialize)]
struct ShowResponse {
    stack: ShowStack,
}

#[derive(Deserialize)]
struct ShowStack {
    id: String,
    stack_name: String,
    stack_status: String,
    #[serde(default)]
    stack_status_reason: Option<String>,
    #[serde(default)]
    outputs: Option<Vec<StackOutput>>,
}

#[derive(Deserialize)]
struct StackOutput {
    output_key: String,
    #[serde(default)]
    output_value: serde_json::Value,
}

impl HeatClient {
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            auth_token,
            timeout,
        }
    }

    pub fn from_config(config: &ConductorConfig) -> Self {
        Self::new(
            config.heat.endpoint.clone(),
            config.heat.auth_token.clone(),
            config.request_timeout(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request, bounded by the client timeout.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> StackResult<Response> {
        let uri = format!("{}{path}", self.endpoint);

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, USER_AGENT);
        if let Some(ref token) = self.auth_token {
            builder = builder.header("x-auth-token", token);
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                let bytes = serde_json::to_vec(&value)
                    .map_err(|e| StackError::Rejected(format!("encoding request: {e}")))?;
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder
            .body(body)
            .map_err(|e| StackError::Rejected(format!("invalid request for {uri}: {e}")))?;

        let result = tokio::time::timeout(self.timeout, async {
            let response = self.client.request(request).await.map_err(|e| {
                if e.is_connect() {
                    StackError::Unavailable(format!("{uri}: {e}"))
                } else {
                    StackError::Interrupted(format!("{uri}: {e}"))
                }
            })?;
            let status = response.status();
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| StackError::Interrupted(format!("{uri}: reading body: {e}")))?
                .to_bytes();
            Ok(Response {
                status,
                location,
                body,
            })
        })
        .await;

        match result {
            Ok(Ok(response)) => {
                debug!(%method, %uri, status = %response.status, "stack service responded");
                Ok(response)
            }
            Ok(Err(e)) => {
                debug!(%method, %uri, error = %e, "stack service request failed");
                Err(e)
            }
            Err(_) => {
                warn!(%method, %uri, timeout = ?self.timeout, "stack service request timed out");
                Err(StackError::Timeout(self.timeout))
            }
        }
    }

    async fn show(&self, identifier: &str) -> StackResult<StackInfo> {
        let response = self.send(Method::GET, &format!("/stacks/{identifier}"), None).await?;
        let response = match (response.status, response.location.as_deref()) {
            (status, Some(location)) if status.is_redirection() => {
                let target = identifier_from_location(location).ok_or_else(|| {
                    StackError::Interrupted(format!("unusable redirect for {identifier}: {location}"))
                })?;
                self.send(Method::GET, &format!("/stacks/{target}"), None).await?
            }
            _ => response,
        };
        if !response.status.is_success() {
            return Err(classify(identifier, &response));
        }

        let shown: ShowResponse = serde_json::from_slice(&response.body)
            .map_err(|e| StackError::Interrupted(format!("decoding stack {identifier}: {e}")))?;
        let stack = shown.stack;
        let outputs = stack
            .outputs
            .unwrap_or_default()
            .into_iter()
            .map(|o| (o.output_key, o.output_value))
            .collect::<BTreeMap<_, _>>();
        Ok(StackInfo {
            id: format!("{}/{}", stack.stack_name, stack.id),
            name: stack.stack_name,
            status: StackStatus::parse(&stack.stack_status),
            reason: stack.stack_status_reason.filter(|r| !r.is_empty()),
            outputs,
        })
    }
}

#[async_trait]
impl StackService for HeatClient {
    async fn create_stack(
        &self,
        name: &str,
        definition: &StackDefinition,
        timeout_mins: u32,
    ) -> StackResult<String> {
        let body = json!({
            "stack_name": name,
            "template": definition.template,
            "parameters": definition.parameters,
            "timeout_mins": timeout_mins,
            "disable_rollback": true,
        });
        let response = self.send(Method::POST, "/stacks", Some(body)).await?;
        if !response.status.is_success() {
            return Err(classify(name, &response));
        }
        let created: CreateResponse = serde_json::from_slice(&response.body)
            .map_err(|e| StackError::Interrupted(format!("decoding created stack {name}: {e}")))?;
        Ok(format!("{name}/{}", created.stack.id))
    }

    async fn update_stack(&self, stack_id: &str, definition: &StackDefinition) -> StackResult<()> {
        let body = json!({
            "template": definition.template,
            "parameters": definition.parameters,
        });
        let response = self
            .send(Method::PUT, &format!("/stacks/{stack_id}"), Some(body))
            .await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(classify(stack_id, &response))
        }
    }

    async fn delete_stack(&self, stack_id: &str) -> StackResult<()> {
        let response = self
            .send(Method::DELETE, &format!("/stacks/{stack_id}"), None)
            .await?;
        if response.status.is_success() || response.status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(classify(stack_id, &response))
        }
    }

    async fn get_stack(&self, stack_id_or_name: &str) -> StackResult<StackInfo> {
        self.show(stack_id_or_name).await
    }
}

/// Map a non-success response onto an error category.
///
/// A 500 may have been raised after the backend acted on the request, so it
/// is reported as an unknown outcome. Other 5xx answers mean the request was
/// not taken.
fn classify(subject: &str, response: &Response) -> StackError {
    let status = response.status;
    let message = error_message(&response.body);
    match status {
        StatusCode::NOT_FOUND => StackError::NotFound(subject.to_string()),
        StatusCode::INTERNAL_SERVER_ERROR => {
            StackError::Interrupted(format!("{subject}: {status}: {message}"))
        }
        s if s.is_server_error() => StackError::Unavailable(format!("{subject}: {status}: {message}")),
        _ => StackError::Rejected(format!("{subject}: {status}: {message}")),
    }
}

/// Pull the human-readable message out of a backend error body.
fn error_message(body: &[u8]) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let text = parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("explanation"))
                .or_else(|| v.get("title"))
        })
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    truncate(text, MAX_ERROR_TEXT)
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// `.../stacks/{name}/{id}` → `{name}/{id}`.
fn identifier_from_location(location: &str) -> Option<String> {
    let (_, rest) = location.rsplit_once("/stacks/")?;
    let rest = rest.trim_end_matches('/');
    let mut parts = rest.splitn(3, '/');
    let name = parts.next().filter(|s| !s.is_empty())?;
    let id = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{name}/{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Recorded {
        method: String,
        path: String,
        headers: Vec<(String, String)>,
        body: String,
    }

    impl Recorded {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        }

        fn json(&self) -> serde_json::Value {
            serde_json::from_str(&self.body).unwrap()
        }
    }

    fn reply(status: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n{extra_headers}\r\n{body}",
            body.len()
        )
    }

    /// Serve the canned replies in order, one connection each.
    async fn canned(replies: Vec<String>) -> (String, Arc<Mutex<Vec<Recorded>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                log.lock().await.push(request);
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/v1/tenant"), seen)
    }

    async fn read_request(socket: &mut TcpStream) -> Recorded {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a full request");
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let mut lines = head.lines();
            let mut request_line = lines.next().unwrap().split_whitespace();
            let method = request_line.next().unwrap().to_string();
            let path = request_line.next().unwrap().to_string();
            let headers: Vec<(String, String)> = lines
                .filter_map(|l| l.split_once(':'))
                .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                .collect();
            let len = headers
                .iter()
                .find(|(k, _)| k == "content-length")
                .map(|(_, v)| v.parse::<usize>().unwrap())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                let body = String::from_utf8_lossy(&buf[end + 4..end + 4 + len]).to_string();
                return Recorded {
                    method,
                    path,
                    headers,
                    body,
                };
            }
        }
    }

    fn definition() -> StackDefinition {
        StackDefinition {
            template_name: "swarm-fedora-atomic.yaml",
            template: "heat_template_version: 2014-10-16\n",
            parameters: BTreeMap::from([
                ("number_of_nodes".to_string(), "3".to_string()),
                ("ssh_key_name".to_string(), "default".to_string()),
            ]),
        }
    }

    fn client(endpoint: &str) -> HeatClient {
        HeatClient::new(endpoint, Some("secret".to_string()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn create_posts_template_and_returns_identifier() {
        let (endpoint, seen) = canned(vec![reply(
            "201 Created",
            "",
            r#"{"stack": {"id": "0f5c", "links": []}}"#,
        )])
        .await;

        let id = client(&endpoint)
            .create_stack("bay-k8s-b1", &definition(), 60)
            .await
            .unwrap();
        assert_eq!(id, "bay-k8s-b1/0f5c");

        let seen = seen.lock().await;
        let request = &seen[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/v1/tenant/stacks");
        assert_eq!(request.header("x-auth-token"), Some("secret"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        let body = request.json();
        assert_eq!(body["stack_name"], "bay-k8s-b1");
        assert_eq!(body["timeout_mins"], 60);
        assert_eq!(body["disable_rollback"], true);
        assert_eq!(body["parameters"]["number_of_nodes"], "3");
        assert_eq!(body["template"], "heat_template_version: 2014-10-16\n");
    }

    #[tokio::test]
    async fn get_maps_status_reason_and_outputs() {
        let (endpoint, _) = canned(vec![reply(
            "200 OK",
            "",
            r#"{"stack": {
                "id": "0f5c",
                "stack_name": "bay-b1",
                "stack_status": "CREATE_COMPLETE",
                "stack_status_reason": "Stack CREATE completed successfully",
                "outputs": [
                    {"output_key": "api_address", "output_value": "tcp://10.0.0.5:2376"},
                    {"output_key": "swarm_nodes", "output_value": ["10.0.0.6", "10.0.0.7"]}
                ]
            }}"#,
        )])
        .await;

        let info = client(&endpoint).get_stack("bay-b1/0f5c").await.unwrap();
        assert_eq!(info.id, "bay-b1/0f5c");
        assert_eq!(info.status, StackStatus::CreateComplete);
        assert_eq!(
            info.reason.as_deref(),
            Some("Stack CREATE completed successfully")
        );
        assert_eq!(
            info.output_string("api_address").as_deref(),
            Some("tcp://10.0.0.5:2376")
        );
        assert_eq!(info.output_list("swarm_nodes"), ["10.0.0.6", "10.0.0.7"]);
    }

    #[tokio::test]
    async fn get_by_name_follows_redirect() {
        let (endpoint, seen) = canned(vec![
            reply(
                "302 Found",
                "location: http://heat.example/v1/tenant/stacks/bay-b1/0f5c\r\n",
                "",
            ),
            reply(
                "200 OK",
                "",
                r#"{"stack": {"id": "0f5c", "stack_name": "bay-b1", "stack_status": "CREATE_IN_PROGRESS", "outputs": null}}"#,
            ),
        ])
        .await;

        let info = client(&endpoint).get_stack("bay-b1").await.unwrap();
        assert_eq!(info.id, "bay-b1/0f5c");
        assert_eq!(info.status, StackStatus::CreateInProgress);
        assert!(info.outputs.is_empty());

        let seen = seen.lock().await;
        assert_eq!(seen[0].path, "/v1/tenant/stacks/bay-b1");
        assert_eq!(seen[1].path, "/v1/tenant/stacks/bay-b1/0f5c");
    }

    #[tokio::test]
    async fn client_errors_are_rejections_with_backend_message() {
        let (endpoint, _) = canned(vec![reply(
            "400 Bad Request",
            "",
            r#"{"code": 400, "error": {"message": "Quota exceeded for instances", "type": "StackValidationFailed"}, "title": "Bad Request"}"#,
        )])
        .await;

        let err = client(&endpoint)
            .create_stack("bay-b1", &definition(), 60)
            .await
            .unwrap_err();
        match err {
            StackError::Rejected(msg) => assert!(msg.contains("Quota exceeded for instances")),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_stacks() {
        let (endpoint, _) = canned(vec![
            reply("404 Not Found", "", r#"{"title": "Not Found"}"#),
            reply("404 Not Found", "", r#"{"title": "Not Found"}"#),
        ])
        .await;
        let client = client(&endpoint);

        assert_eq!(
            client.get_stack("bay-b1/0f5c").await,
            Err(StackError::NotFound("bay-b1/0f5c".to_string()))
        );
        // Deleting something already gone is success.
        client.delete_stack("bay-b1/0f5c").await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let (endpoint, _) = canned(vec![
            reply("503 Service Unavailable", "", "overloaded"),
            reply("500 Internal Server Error", "", r#"{"explanation": "boom"}"#),
        ])
        .await;
        let client = client(&endpoint);

        let unavailable = client.update_stack("bay-b1/0f5c", &definition()).await.unwrap_err();
        assert!(matches!(unavailable, StackError::Unavailable(_)));
        assert!(!unavailable.outcome_unknown());

        let internal = client.update_stack("bay-b1/0f5c", &definition()).await.unwrap_err();
        assert!(matches!(internal, StackError::Interrupted(ref m) if m.contains("boom")));
        assert!(internal.outcome_unknown());
    }

    #[tokio::test]
    async fn update_and_delete_address_the_stack() {
        let (endpoint, seen) = canned(vec![
            reply("202 Accepted", "", ""),
            reply("204 No Content", "", ""),
        ])
        .await;
        let client = client(&endpoint);

        client.update_stack("bay-b1/0f5c", &definition()).await.unwrap();
        client.delete_stack("bay-b1/0f5c").await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen[0].method, "PUT");
        assert_eq!(seen[0].path, "/v1/tenant/stacks/bay-b1/0f5c");
        assert_eq!(seen[0].json()["parameters"]["ssh_key_name"], "default");
        assert_eq!(seen[1].method, "DELETE");
    }

    #[tokio::test]
    async fn unresponsive_backend_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without answering.
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let client = HeatClient::new(format!("http://{addr}"), None, Duration::from_millis(200));
        let err = client
            .create_stack("bay-b1", &definition(), 60)
            .await
            .unwrap_err();
        assert_eq!(err, StackError::Timeout(Duration::from_millis(200)));
        assert!(err.outcome_unknown());
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"))
            .get_stack("bay-b1/0f5c")
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::Unavailable(_)), "got {err:?}");
    }

    #[test]
    fn identifiers_from_redirects() {
        assert_eq!(
            identifier_from_location("http://h:8004/v1/t/stacks/bay-b1/0f5c").as_deref(),
            Some("bay-b1/0f5c")
        );
        assert_eq!(
            identifier_from_location("/v1/t/stacks/bay-b1/0f5c/resources").as_deref(),
            Some("bay-b1/0f5c")
        );
        assert_eq!(identifier_from_location("/v1/t/stacks/bay-b1"), None);
    }

    #[test]
    fn error_text_is_bounded() {
        let long = "x".repeat(2000);
        assert_eq!(error_message(long.as_bytes()).len(), MAX_ERROR_TEXT);
    }
}
