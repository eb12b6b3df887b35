use crate::errors::ProxyError;
use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes};
use hyper::{Response, StatusCode};
use serde::Serialize;
use shared::http::full_body;
use std::collections::HashMap;
use std::fmt::Display;

pub fn json_response<E, T: Serialize + ?Sized>(
    status_code: StatusCode,
    value: &T,
) -> Response<BoxBody<Bytes, E>> {
    // Serializing plain data structures into a Vec cannot fail.
    let body = serde_json::to_vec(value).unwrap_or_default();

    let mut response = Response::new(full_body(body));
    *response.status_mut() = status_code;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn empty_response<E>(status_code: StatusCode) -> Response<BoxBody<Bytes, E>> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = status_code;
    response
}

/// Decoded query parameters. The first occurrence of a name wins.
pub fn query_params(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = query {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(name.into_owned())
                .or_insert_with(|| value.into_owned());
        }
    }
    params
}

/// Buffers a request body in full.
pub async fn read_body<B>(body: B) -> Result<Bytes, ProxyError>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| ProxyError::RequestBody(e.to_string()))
}
