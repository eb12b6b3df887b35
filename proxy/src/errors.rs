use crate::config::ValidationError as ConfigValidationError;
use crate::utils::json_response;
use engine::errors::{AuthError, DispatchError, RuleError, ValidationError};
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("could not build upstream client: {0}")]
    Client(reqwest::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("invalid chaos parameters: {0}")]
    InvalidProfile(#[from] ValidationError),

    #[error("{0} parameter is required")]
    MissingParameter(&'static str),

    #[error("invalid {name} parameter: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("config key has no target URL")]
    MissingTarget,

    #[error("invalid target URL {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("method {method} not allowed, expected {allowed}")]
    MethodNotAllowed { method: String, allowed: &'static str },

    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("not found")]
    NotFound,

    #[error("upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("upstream request failed for {host}: {reason}")]
    UpstreamRequestFailed { host: String, reason: String },

    #[error("upstream response body failed: {0}")]
    UpstreamBody(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Io(_) | ProxyError::Config(_) | ProxyError::Client(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Auth(AuthError::MissingKey | AuthError::InvalidKey) => {
                StatusCode::UNAUTHORIZED
            }
            ProxyError::Auth(AuthError::InactiveKey | AuthError::OutOfScope(_)) => {
                StatusCode::FORBIDDEN
            }
            ProxyError::Dispatch(DispatchError::CollectionInactive(_)) => StatusCode::FORBIDDEN,
            ProxyError::Dispatch(
                DispatchError::CollectionNotFound(_) | DispatchError::NoMatch { .. },
            ) => StatusCode::NOT_FOUND,
            ProxyError::Rule(RuleError::CollectionNotFound(_) | RuleError::EndpointNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ProxyError::Rule(RuleError::Conflict { .. }) => StatusCode::CONFLICT,
            ProxyError::Rule(_)
            | ProxyError::InvalidProfile(_)
            | ProxyError::MissingParameter(_)
            | ProxyError::InvalidParameter { .. }
            | ProxyError::MissingTarget
            | ProxyError::InvalidTarget { .. }
            | ProxyError::RequestBody(_)
            | ProxyError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ProxyError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamRequestFailed { .. } | ProxyError::UpstreamBody(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// `{"error": "..."}` with the mapped status.
    pub fn to_response<E>(&self) -> Response<BoxBody<Bytes, E>> {
        json_response(
            self.status_code(),
            &serde_json::json!({ "error": self.to_string() }),
        )
    }
}
