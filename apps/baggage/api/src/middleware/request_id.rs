use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span};
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Request identifier, available to handlers as an extension
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

fn caller_supplied(request: &Request) -> Option<String> {
    request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(String::from)
}

/// Tag every request with an `X-Request-ID`, generating `req_<uuid>` when absent
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = caller_supplied(&request).unwrap_or_else(|| format!("req_{}", Uuid::new_v4()));
    request.extensions_mut().insert(RequestId(id.clone()));

    let span = info_span!("request", request_id = %id);
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}
