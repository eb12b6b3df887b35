use crate::errors::ProxyError;
use crate::metrics_defs::ENDPOINT_WRITES;
use crate::utils::{empty_response, json_response, read_body};
use engine::errors::RuleError;
use engine::model::{CollectionId, EndpointId};
use engine::rules::{RuleStore, WriteOutcome};
use engine::usage::UsageCounter;
use http::Method;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use shared::counter;
use shared::http::full_body;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq)]
enum AdminRoute {
    Health,
    Ready,
    Usage,
    Endpoints(CollectionId),
    CollectionActive(CollectionId),
    Endpoint(EndpointId),
    EndpointActive(EndpointId),
    NotFound,
}

impl AdminRoute {
    fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["health"] => AdminRoute::Health,
            ["ready"] => AdminRoute::Ready,
            ["usage"] => AdminRoute::Usage,
            ["collections", id, "endpoints"] => Self::with_id(id, AdminRoute::Endpoints),
            ["collections", id, "active"] => Self::with_id(id, AdminRoute::CollectionActive),
            ["endpoints", id] => Self::with_id(id, AdminRoute::Endpoint),
            ["endpoints", id, "active"] => Self::with_id(id, AdminRoute::EndpointActive),
            _ => AdminRoute::NotFound,
        }
    }

    fn allowed_methods(&self) -> &'static str {
        match self {
            AdminRoute::Health | AdminRoute::Ready | AdminRoute::Usage => "GET",
            AdminRoute::Endpoints(_) => "GET, POST",
            AdminRoute::Endpoint(_) => "PUT, DELETE",
            AdminRoute::CollectionActive(_) | AdminRoute::EndpointActive(_) => "PUT",
            AdminRoute::NotFound => "",
        }
    }

    fn with_id(id: &str, route: fn(u64) -> AdminRoute) -> Self {
        id.parse().map(route).unwrap_or(AdminRoute::NotFound)
    }
}

#[derive(Deserialize)]
struct ActiveToggle {
    is_active: bool,
}

/// Health checks, the endpoint write path and usage totals.
#[derive(Clone)]
pub struct AdminService {
    store: Arc<RuleStore>,
    usage: UsageCounter,
}

impl AdminService {
    pub fn new(store: Arc<RuleStore>, usage: UsageCounter) -> Self {
        Self { store, usage }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<BoxBody<Bytes, ProxyError>>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let route = AdminRoute::parse(req.uri().path());
        let method = req.method().clone();

        let result = match (&method, route) {
            (&Method::GET, AdminRoute::Health | AdminRoute::Ready) => {
                Ok(Response::new(full_body("ok\n")))
            }
            (&Method::GET, AdminRoute::Usage) => {
                self.usage.flush().await;
                Ok(json_response(StatusCode::OK, &self.usage.report()))
            }
            (&Method::GET, AdminRoute::Endpoints(collection_id)) => self.list(collection_id),
            (&Method::POST, AdminRoute::Endpoints(collection_id)) => {
                let outcome = parse_json(req.into_body()).await.and_then(|spec| {
                    self.store
                        .create_endpoint(collection_id, spec)
                        .map_err(ProxyError::from)
                });
                written("create", StatusCode::CREATED, outcome)
            }
            (&Method::PUT, AdminRoute::Endpoint(endpoint_id)) => {
                let outcome = parse_json(req.into_body()).await.and_then(|spec| {
                    self.store
                        .update_endpoint(endpoint_id, spec)
                        .map_err(ProxyError::from)
                });
                written("update", StatusCode::OK, outcome)
            }
            (&Method::PUT, AdminRoute::EndpointActive(endpoint_id)) => {
                let outcome = parse_json::<_, ActiveToggle>(req.into_body())
                    .await
                    .and_then(|toggle| {
                        self.store
                            .set_endpoint_active(endpoint_id, toggle.is_active)
                            .map_err(ProxyError::from)
                    });
                written("toggle", StatusCode::OK, outcome)
            }
            (&Method::DELETE, AdminRoute::Endpoint(endpoint_id)) => {
                match self.store.delete_endpoint(endpoint_id) {
                    Ok(_) => {
                        record_write("delete", StatusCode::NO_CONTENT);
                        Ok(empty_response(StatusCode::NO_CONTENT))
                    }
                    Err(e) => {
                        let e = ProxyError::from(e);
                        record_write("delete", e.status_code());
                        Err(e)
                    }
                }
            }
            (&Method::PUT, AdminRoute::CollectionActive(collection_id)) => {
                let toggle = parse_json::<_, ActiveToggle>(req.into_body()).await;
                toggle.and_then(|toggle| {
                    let collection = self
                        .store
                        .set_collection_active(collection_id, toggle.is_active)?;
                    Ok(json_response(StatusCode::OK, &collection))
                })
            }
            (_, AdminRoute::NotFound) => Err(ProxyError::NotFound),
            (_, route) => Err(ProxyError::MethodNotAllowed {
                method: method.to_string(),
                allowed: route.allowed_methods(),
            }),
        };

        result.unwrap_or_else(|e| error_response(&e))
    }

    fn list(
        &self,
        collection_id: CollectionId,
    ) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError> {
        let rule_set = self
            .store
            .snapshot(collection_id)
            .ok_or(RuleError::CollectionNotFound(collection_id))?;
        let endpoints: Vec<_> = rule_set.rules().iter().map(|rule| rule.endpoint()).collect();
        Ok(json_response(
            StatusCode::OK,
            &serde_json::json!({
                "collection": rule_set.collection(),
                "endpoints": endpoints,
            }),
        ))
    }
}

async fn parse_json<B, T>(body: B) -> Result<T, ProxyError>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
    T: DeserializeOwned,
{
    let bytes = read_body(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn record_write(operation: &'static str, status: StatusCode) {
    counter!(
        ENDPOINT_WRITES,
        "operation" => operation,
        "status" => status.as_str().to_string()
    )
    .increment(1);
}

fn written(
    operation: &'static str,
    status: StatusCode,
    outcome: Result<WriteOutcome, ProxyError>,
) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError> {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            record_write(operation, e.status_code());
            return Err(e);
        }
    };
    record_write(operation, status);

    for warning in &outcome.warnings {
        tracing::warn!(
            endpoint_id = outcome.endpoint.id,
            conflicting_endpoint_id = warning.endpoint_id,
            "endpoint {warning}"
        );
    }

    Ok(json_response(
        status,
        &serde_json::json!({
            "endpoint": outcome.endpoint,
            "warnings": outcome.warnings,
        }),
    ))
}

/// Like [`ProxyError::to_response`], but an exact conflict also lists the
/// endpoints it collides with.
fn error_response(error: &ProxyError) -> Response<BoxBody<Bytes, ProxyError>> {
    match error {
        ProxyError::Rule(RuleError::Conflict { conflicts, .. }) => json_response(
            error.status_code(),
            &serde_json::json!({
                "error": error.to_string(),
                "conflicts": conflicts,
            }),
        ),
        _ => error.to_response(),
    }
}

impl Service<Request<Incoming>> for AdminService {
    type Response = Response<BoxBody<Bytes, ProxyError>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}
