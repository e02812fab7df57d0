//! Upstream forwarding.
//!
//! The gateway hands every routed request to a [`Forwarder`] together with
//! the selected instance and the matched route. [`HttpForwarder`] sends it
//! over HTTP; [`NoopForwarder`] acknowledges without any network traffic.

use std::time::Duration;

use aegis_core::{Headers, Request, Response};
use aegis_traffic::{RouteConfig, ServiceInstance};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::error::ForwardError;

/// Header carrying the gateway's request id to upstreams.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying the original method when it is not an HTTP verb.
pub const ORIGINAL_METHOD_HEADER: &str = "x-aegis-method";

/// Trait for upstream communication.
///
/// This trait abstracts the transport, allowing for dry-run and test
/// implementations.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send `request` to `instance` and return its response.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::Transport` if the instance cannot be reached,
    /// `ForwardError::Timeout` if it does not answer within the route
    /// timeout, `ForwardError::InvalidRequest` if the request cannot be sent
    /// as HTTP, or `ForwardError::InvalidResponse` for an unusable answer.
    async fn forward(
        &self,
        instance: &ServiceInstance,
        request: &Request,
        route: &RouteConfig,
    ) -> Result<Response, ForwardError>;
}

/// Forwarder that answers every call with a 200 acknowledgement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopForwarder;

#[async_trait]
impl Forwarder for NoopForwarder {
    async fn forward(
        &self,
        instance: &ServiceInstance,
        request: &Request,
        _route: &RouteConfig,
    ) -> Result<Response, ForwardError> {
        tracing::debug!(
            request_id = %request.id(),
            instance = %instance.address(),
            "Dry-run forward"
        );
        Ok(Response::ok(
            request.id(),
            json!({"status": "ok", "message": "Request forwarded successfully"}),
        ))
    }
}

/// HTTP client for upstream instances.
///
/// Requests go to `http://<host>:<port><path>` with the canonical body as
/// JSON. Methods that are not HTTP verbs are sent as `POST` with the original
/// method in the `x-aegis-method` header.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    /// Create a forwarder with the given connect timeout.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::Transport` if the HTTP client cannot be built.
    pub fn new(connect_timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ForwardError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Create a forwarder with a custom reqwest client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn url(instance: &ServiceInstance, path: &str) -> String {
        if path.starts_with('/') {
            format!("http://{}{path}", instance.address())
        } else {
            format!("http://{}/{path}", instance.address())
        }
    }

    fn method(request: &Request) -> (reqwest::Method, bool) {
        let method = match request.method.to_ascii_uppercase().as_str() {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "PATCH" => reqwest::Method::PATCH,
            "DELETE" => reqwest::Method::DELETE,
            "HEAD" => reqwest::Method::HEAD,
            "OPTIONS" => reqwest::Method::OPTIONS,
            _ => return (reqwest::Method::POST, true),
        };
        (method, false)
    }

    /// Build the upstream header map from the request headers.
    ///
    /// Connection-level and framing headers are dropped. The caller's
    /// request id is replaced with the gateway's.
    fn headers(
        request: &Request,
        tunnelled: bool,
        sends_json: bool,
    ) -> Result<HeaderMap, ForwardError> {
        let mut headers = HeaderMap::with_capacity(request.headers.len() + 2);
        for (name, value) in &request.headers {
            if is_hop_by_hop_header(name)
                || name.eq_ignore_ascii_case(REQUEST_ID_HEADER)
                || name.eq_ignore_ascii_case(ORIGINAL_METHOD_HEADER)
                || (sends_json && name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
            {
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ForwardError::InvalidRequest(format!("invalid header name {name:?}")))?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                ForwardError::InvalidRequest(format!("invalid value for header {name:?}"))
            })?;
            headers.append(header_name, header_value);
        }

        if tunnelled {
            let method = HeaderValue::from_str(&request.method).map_err(|_| {
                ForwardError::InvalidRequest(format!("invalid method {:?}", request.method))
            })?;
            headers.insert(HeaderName::from_static(ORIGINAL_METHOD_HEADER), method);
        }
        let id = HeaderValue::from_str(&request.id().to_string())
            .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), id);
        Ok(headers)
    }
}

/// Headers that describe one connection or one message framing and must not
/// be copied onto the upstream request.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        instance: &ServiceInstance,
        request: &Request,
        route: &RouteConfig,
    ) -> Result<Response, ForwardError> {
        let url = Self::url(instance, &request.path);
        let (method, tunnelled) = Self::method(request);
        let sends_json = !matches!(method, reqwest::Method::GET | reqwest::Method::HEAD)
            && !request.body.is_null();
        let headers = Self::headers(request, tunnelled, sends_json)?;

        let mut builder = self
            .client
            .request(method, &url)
            .timeout(route.timeout())
            .headers(headers);
        if sends_json {
            builder = builder.json(&request.body);
        }

        let upstream = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::Timeout(route.timeout())
            } else if e.is_builder() {
                ForwardError::InvalidRequest(e.to_string())
            } else {
                ForwardError::Transport(e.to_string())
            }
        })?;

        let status = upstream.status().as_u16();
        let headers: Headers = upstream
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = upstream.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::Timeout(route.timeout())
            } else {
                ForwardError::InvalidResponse(e.to_string())
            }
        })?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        tracing::debug!(
            request_id = %request.id(),
            url = %url,
            status,
            "Upstream responded"
        );

        let mut response = Response::new(request.id(), status);
        response.headers = headers;
        response.body = body;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use aegis_core::{Protocol, RequestId};

    use super::*;

    fn request(method: &str, path: &str) -> Request {
        Request::new(RequestId::generate(), Protocol::Rest, method, path)
    }

    #[tokio::test]
    async fn noop_acknowledges() {
        let request = request("GET", "/x");
        let response = NoopForwarder
            .forward(
                &ServiceInstance::new("a", "localhost", 1),
                &request,
                &RouteConfig::new("/x", "svc"),
            )
            .await
            .unwrap();
        assert_eq!(response.request_id, request.id());
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body["message"], "Request forwarded successfully");
    }

    #[test]
    fn url_joins_address_and_path() {
        let instance = ServiceInstance::new("a", "10.0.0.1", 9000);
        assert_eq!(
            HttpForwarder::url(&instance, "/v1/chat"),
            "http://10.0.0.1:9000/v1/chat"
        );
        assert_eq!(
            HttpForwarder::url(&instance, "inference.Chat"),
            "http://10.0.0.1:9000/inference.Chat"
        );
    }

    #[test]
    fn non_http_methods_tunnel_through_post() {
        assert_eq!(
            HttpForwarder::method(&request("get", "/")),
            (reqwest::Method::GET, false)
        );
        assert_eq!(
            HttpForwarder::method(&request("MESSAGE", "chat")),
            (reqwest::Method::POST, true)
        );
        assert_eq!(
            HttpForwarder::method(&request("summarize", "tools")),
            (reqwest::Method::POST, true)
        );
    }

    #[test]
    fn framing_headers_and_caller_request_id_are_dropped() {
        let mut request = request("POST", "/v1/chat");
        for (name, value) in [
            ("Content-Length", "3"),
            ("Transfer-Encoding", "chunked"),
            ("Connection", "close"),
            ("Host", "elsewhere.example"),
            ("X-Request-Id", "caller-chosen"),
            ("Content-Type", "text/plain"),
            ("Authorization", "Bearer t"),
        ] {
            request.headers.insert(name.to_string(), value.to_string());
        }

        let headers = HttpForwarder::headers(&request, false, true).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["authorization"], "Bearer t");
        let ids: Vec<_> = headers.get_all(REQUEST_ID_HEADER).iter().collect();
        assert_eq!(ids, [request.id().to_string().as_str()]);

        let without_body = HttpForwarder::headers(&request, false, false).unwrap();
        assert_eq!(without_body["content-type"], "text/plain");
    }

    #[test]
    fn malformed_headers_are_invalid_requests() {
        let mut request = request("POST", "/v1/chat");
        request
            .headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            HttpForwarder::headers(&request, false, true),
            Err(ForwardError::InvalidRequest(_))
        ));

        let mut request = self::request("POST", "/v1/chat");
        request
            .headers
            .insert("x-note".to_string(), "line\nbreak".to_string());
        assert!(matches!(
            HttpForwarder::headers(&request, false, true),
            Err(ForwardError::InvalidRequest(_))
        ));
    }
}
