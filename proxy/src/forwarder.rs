use crate::errors::ProxyError;
use futures_util::TryStreamExt;
use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, Method, Version};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::Response;
use hyper::body::{Bytes, Frame};
use shared::http::filter_hop_by_hop;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Sends a request upstream and relays the answer without touching the body.
///
/// Redirects are handed back to the caller instead of being followed. The
/// timeout covers connecting and receiving the response head; the body is
/// streamed afterwards.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

/// A request ready to leave the proxy.
pub struct Outbound {
    pub method: Method,
    pub target: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(ProxyError::Client)?;

        Ok(Self { client, timeout })
    }

    pub async fn forward(
        &self,
        outbound: Outbound,
    ) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError> {
        let Outbound {
            method,
            target,
            version,
            mut headers,
            body,
        } = outbound;
        let upstream_host = target.host_str().unwrap_or(target.as_str()).to_string();

        filter_hop_by_hop(&mut headers, version);
        // Both are derived from the target URL and the body by the client.
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        let request = self
            .client
            .request(method, target)
            .headers(headers)
            .body(body)
            .build()
            .map_err(|e| ProxyError::UpstreamRequestFailed {
                host: upstream_host.clone(),
                reason: e.to_string(),
            })?;

        let upstream = match timeout(self.timeout, self.client.execute(request)).await {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(e)) if e.is_timeout() => {
                tracing::warn!(upstream = %upstream_host, "upstream timed out");
                return Err(ProxyError::UpstreamTimeout(upstream_host));
            }
            Ok(Err(e)) => {
                tracing::warn!(upstream = %upstream_host, error = %e, "upstream request failed");
                return Err(ProxyError::UpstreamRequestFailed {
                    host: upstream_host,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(upstream = %upstream_host, "upstream timed out");
                return Err(ProxyError::UpstreamTimeout(upstream_host));
            }
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        filter_hop_by_hop(&mut headers, upstream.version());

        let body = StreamBody::new(
            upstream
                .bytes_stream()
                .map_ok(Frame::data)
                .map_err(|e| ProxyError::UpstreamBody(e.to_string())),
        );

        let mut response = Response::new(body.boxed());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
