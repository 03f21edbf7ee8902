//! Forward path: proxy a request to the remote origin and relay the answer.

use crate::admin::RelayMetrics;
use crate::error::RelayError;
use crate::headers::{strip_framing_headers, strip_hop_by_hop};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, Response, StatusCode},
    response::IntoResponse,
};
use http_body_util::LengthLimitError;
use std::error::Error as StdError;
use std::sync::{atomic::Ordering, Arc};
use tracing::{debug, warn};

/// Reverse proxy towards a single remote origin.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    remote_origin: String,
    stripped_headers: Arc<Vec<String>>,
    max_request_body_bytes: usize,
    metrics: Arc<RelayMetrics>,
}

impl Forwarder {
    pub fn new(
        remote_origin: &str,
        stripped_headers: Vec<String>,
        max_request_body_bytes: usize,
        metrics: Arc<RelayMetrics>,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| RelayError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        url::Url::parse(remote_origin)
            .map_err(|e| RelayError::Configuration(format!("Invalid remote origin: {}", e)))?;

        Ok(Self {
            client,
            remote_origin: remote_origin.trim_end_matches('/').to_string(),
            stripped_headers: Arc::new(stripped_headers),
            max_request_body_bytes,
            metrics,
        })
    }

    /// Absolute upstream URL for a local path and query.
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.remote_origin, path_and_query)
    }

    /// Forward `req` unchanged except for hop-by-hop headers and `Host`.
    ///
    /// Transport failures become `502 Bad Gateway` instead of a hung frame.
    pub async fn forward(&self, req: Request<Body>) -> Response<Body> {
        match self.try_forward(req).await {
            Ok(response) => response,
            Err(ForwardError::BodyTooLarge) => {
                warn!(
                    "Request body exceeds {} bytes, not forwarding",
                    self.max_request_body_bytes
                );
                (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
            }
            Err(ForwardError::BadRequest(e)) => {
                warn!("Failed to read request body: {}", e);
                (StatusCode::BAD_REQUEST, "unreadable request body").into_response()
            }
            Err(ForwardError::Upstream(e)) => {
                self.metrics.upstream_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Upstream request failed: {}", e);
                (StatusCode::BAD_GATEWAY, format!("upstream request failed: {}", e)).into_response()
            }
        }
    }

    async fn try_forward(&self, req: Request<Body>) -> Result<Response<Body>, ForwardError> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = self.upstream_url(path_and_query);

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_request_body_bytes) {
            return Err(ForwardError::BodyTooLarge);
        }

        let body = to_bytes(body, self.max_request_body_bytes)
            .await
            .map_err(ForwardError::from_body)?;

        // reqwest derives Host from the upstream URL.
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::HOST);

        debug!("Forwarding {} {}", parts.method, url);

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ForwardError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);
        let removed = strip_framing_headers(&mut response_headers, &self.stripped_headers);
        if removed > 0 {
            debug!("Stripped {} framing header value(s) from {}", removed, url);
        }

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;

        self.metrics.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(response)
    }
}

#[derive(Debug)]
enum ForwardError {
    BodyTooLarge,
    BadRequest(String),
    Upstream(String),
}

impl ForwardError {
    /// Only an exceeded length limit is a 413; any other body failure is the client's.
    fn from_body(err: axum::Error) -> Self {
        if exceeds_length_limit(&err) {
            ForwardError::BodyTooLarge
        } else {
            ForwardError::BadRequest(err.to_string())
        }
    }
}

fn exceeds_length_limit(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}
