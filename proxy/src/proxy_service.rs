use crate::auth::{X_API_KEY, extract_api_key, strip_credentials};
use crate::errors::ProxyError;
use crate::forwarder::{Forwarder, Outbound};
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::utils::{json_response, query_params, read_body};
use engine::dispatcher::Dispatcher;
use engine::errors::AuthError;
use engine::injector::{ChaosProfile, FailRate, Injector, Verdict};
use engine::keys::KeyStore;
use engine::model::{CollectionId, validate_error_code};
use engine::usage::{UsageHit, UsageSink};
use http::Method;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN};
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response, StatusCode};
use shared::http::make_error_response;
use shared::{gauge, histogram};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::Service;
use tower_http::cors::{Any, CorsLayer};
use url::Url;

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Health,
    Sandbox,
    Collection(CollectionId),
    ConfigKey { key: String, rest: String },
    NotFound,
}

impl Route {
    fn parse(path: &str) -> Self {
        match path {
            "/health" => return Route::Health,
            "/sandbox" => return Route::Sandbox,
            _ => {}
        }

        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return Route::NotFound;
        }

        if let Some(id) = trimmed.strip_prefix("proxy/") {
            return id
                .trim_end_matches('/')
                .parse()
                .map(Route::Collection)
                .unwrap_or(Route::NotFound);
        }

        let (key, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        Route::ConfigKey {
            key: key.to_string(),
            rest: rest.to_string(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Route::Health => "health",
            Route::Sandbox => "sandbox",
            Route::Collection(_) => "collection",
            Route::ConfigKey { .. } => "config_key",
            Route::NotFound => "not_found",
        }
    }
}

/// Target of a config-key request: the key's base URL, the path remainder and
/// the inbound query, joined verbatim.
pub fn config_key_target(base: &Url, rest: &str, query: Option<&str>) -> String {
    let mut target = base.as_str().trim_end_matches('/').to_string();
    if !rest.is_empty() {
        target.push('/');
        target.push_str(rest.trim_start_matches('/'));
    }
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }
    target
}

fn parse_target(target: &str) -> Result<Url, ProxyError> {
    let url = Url::parse(target).map_err(|e| ProxyError::InvalidTarget {
        target: target.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::InvalidTarget {
            target: target.to_string(),
            reason: format!("unsupported scheme {:?}", url.scheme()),
        });
    }
    Ok(url)
}

fn parse_param<T>(
    params: &HashMap<String, String>,
    name: &'static str,
) -> Result<Option<T>, ProxyError>
where
    T: FromStr,
    T::Err: Display,
{
    match params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ProxyError::InvalidParameter {
                name,
                reason: e.to_string(),
            }),
    }
}

/// Chaos parameters passed on the sandbox query string. `maxLatency`
/// defaults to `minLatency`.
fn sandbox_profile(params: &HashMap<String, String>) -> Result<ChaosProfile, ProxyError> {
    let fail_rate = parse_param::<f64>(params, "failrate")?
        .map(FailRate::from_fraction)
        .transpose()?
        .unwrap_or(FailRate::NEVER);

    let mut error_codes = Vec::new();
    if let Some(codes) = params.get("failCodes") {
        for code in codes.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let code: u16 = code.parse().map_err(|_| ProxyError::InvalidParameter {
                name: "failCodes",
                reason: format!("{code:?} is not a status code"),
            })?;
            validate_error_code(code)?;
            let status = StatusCode::from_u16(code).map_err(|e| ProxyError::InvalidParameter {
                name: "failCodes",
                reason: e.to_string(),
            })?;
            error_codes.push(status);
        }
    }

    let min_latency_ms = parse_param::<u64>(params, "minLatency")?.unwrap_or(0);
    let max_latency_ms = parse_param::<u64>(params, "maxLatency")?.unwrap_or(min_latency_ms);

    Ok(ChaosProfile::new(
        min_latency_ms,
        max_latency_ms,
        fail_rate,
        error_codes,
    )?)
}

struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

struct ProxyState {
    dispatcher: Dispatcher,
    keys: Arc<KeyStore>,
    injector: Injector,
    usage: Arc<dyn UsageSink>,
    forwarder: Forwarder,
}

/// Serves proxied traffic: collection routing, config keys, the sandbox and
/// the health check.
#[derive(Clone)]
pub struct ProxyService {
    inner: Arc<ProxyState>,
}

impl ProxyService {
    pub fn new(
        dispatcher: Dispatcher,
        keys: Arc<KeyStore>,
        injector: Injector,
        usage: Arc<dyn UsageSink>,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyState {
                dispatcher,
                keys,
                injector,
                usage,
                forwarder,
            }),
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<BoxBody<Bytes, ProxyError>>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let _inflight = InflightGuard::new();
        let started = Instant::now();
        let route = Route::parse(req.uri().path());
        let route_name = route.name();

        let result = match route {
            Route::Health => Ok(json_response(
                StatusCode::OK,
                &serde_json::json!({ "status": "ok" }),
            )),
            Route::Sandbox => self.sandbox(req).await,
            Route::Collection(collection_id) => self.proxy_collection(collection_id, req).await,
            Route::ConfigKey { key, rest } => self.proxy_config_key(&key, &rest, req).await,
            Route::NotFound => Err(ProxyError::NotFound),
        };

        let response = result.unwrap_or_else(|e| {
            tracing::debug!(
                route = route_name,
                status = e.status_code().as_u16(),
                error = %e,
                "request not forwarded"
            );
            e.to_response()
        });

        histogram!(
            REQUEST_DURATION,
            "route" => route_name,
            "status" => response.status().as_str().to_string()
        )
        .record(started.elapsed().as_secs_f64());
        response
    }

    async fn proxy_collection<B>(
        &self,
        collection_id: CollectionId,
        req: Request<B>,
    ) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let params = query_params(parts.uri.query());

        let presented = extract_api_key(params.get("api_key").map(String::as_str), &parts.headers);
        let api_key = self.inner.keys.authorize(
            presented.as_ref().map(|key| key.value.as_str()),
            collection_id,
        )?;

        let target_str = params
            .get("url")
            .filter(|url| !url.is_empty())
            .ok_or(ProxyError::MissingParameter("url"))?;
        let target = parse_target(target_str)?;

        let rule = self
            .inner
            .dispatcher
            .resolve(collection_id, target_str, &parts.method)?;
        let profile = ChaosProfile::from_endpoint(rule.endpoint())?;
        let body = read_body(body).await?;

        let mut headers = parts.headers;
        strip_credentials(&mut headers, presented.as_ref());

        tracing::debug!(
            collection_id,
            endpoint_id = rule.id(),
            url_pattern = %rule.pattern(),
            target = %target,
            "endpoint matched"
        );
        self.inner
            .usage
            .record(UsageHit::endpoint(collection_id, rule.id(), api_key.id));

        self.inject_and_forward(
            &profile,
            Outbound {
                method: parts.method,
                target,
                version: parts.version,
                headers,
                body,
            },
        )
        .await
    }

    async fn proxy_config_key<B>(
        &self,
        key: &str,
        rest: &str,
        req: Request<B>,
    ) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();

        let config_key = self.inner.keys.config_key(key).ok_or(AuthError::InvalidKey)?;
        if !config_key.is_active {
            return Err(AuthError::InactiveKey.into());
        }

        let base = config_key
            .target_url
            .as_ref()
            .ok_or(ProxyError::MissingTarget)?;
        let target = parse_target(&config_key_target(base, rest, parts.uri.query()))?;

        if !config_key.method.matches(&parts.method) {
            return Err(ProxyError::MethodNotAllowed {
                method: parts.method.to_string(),
                allowed: config_key.method.as_str(),
            });
        }

        let profile = ChaosProfile::from_config_key(config_key)?;
        let body = read_body(body).await?;

        self.inner.usage.record(UsageHit::config_key(config_key.id));

        self.inject_and_forward(
            &profile,
            Outbound {
                method: parts.method,
                target,
                version: parts.version,
                headers: parts.headers,
                body,
            },
        )
        .await
    }

    /// Caller-supplied chaos parameters, no rule and no usage counting.
    async fn sandbox<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let (parts, _body) = req.into_parts();
        if parts.method != Method::GET {
            return Err(ProxyError::MethodNotAllowed {
                method: parts.method.to_string(),
                allowed: "GET",
            });
        }

        let params = query_params(parts.uri.query());
        let target = params
            .get("url")
            .filter(|url| !url.is_empty())
            .ok_or(ProxyError::MissingParameter("url"))?;
        let target = parse_target(target)?;
        let profile = sandbox_profile(&params)?;

        self.inject_and_forward(
            &profile,
            Outbound {
                method: Method::GET,
                target,
                version: parts.version,
                headers: parts.headers,
                body: Bytes::new(),
            },
        )
        .await
    }

    async fn inject_and_forward(
        &self,
        profile: &ChaosProfile,
        outbound: Outbound,
    ) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError> {
        match self.inner.injector.inject(profile).await {
            Verdict::Fail(status) => Ok(make_error_response(status)),
            Verdict::Proceed => self.inner.forwarder.forward(outbound).await,
        }
    }
}

impl<B> Service<Request<B>> for ProxyService
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Display,
{
    type Response = Response<BoxBody<Bytes, ProxyError>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

/// CORS for browser callers of the proxy listener. `OPTIONS` requests are
/// answered here and never routed.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([ORIGIN, CONTENT_TYPE, ACCEPT, AUTHORIZATION, X_API_KEY])
}
