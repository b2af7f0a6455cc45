//! API Middleware
//!
//! Request context extraction and request logging. There is no
//! authentication here: callers are trusted to identify themselves.

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::domain::{Actor, OperationContext};
use crate::error::AppError;

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const INVESTOR_HEADER: &str = "x-investor-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// =========================================================================
// Request Context Middleware
// =========================================================================

/// Build the `OperationContext` from identity headers.
///
/// `X-Investor-Id` makes the caller an investor acting on their own
/// requests; otherwise `X-Actor-Id` names an admin. One of the two is
/// required. `X-Request-Id` becomes the correlation id when it is a UUID.
pub async fn context_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let context = context_from_headers(request.headers()).map_err(IntoResponse::into_response)?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

pub fn context_from_headers(headers: &HeaderMap) -> Result<OperationContext, AppError> {
    let investor = header_str(headers, INVESTOR_HEADER)?;
    let actor = header_str(headers, ACTOR_HEADER)?;

    let actor = match (investor, actor) {
        (Some(raw), _) => {
            let id = raw.parse::<i64>().map_err(|_| {
                AppError::InvalidRequest(format!("{} must be an integer", INVESTOR_HEADER))
            })?;
            Actor::Investor(id)
        }
        (None, Some(name)) if !name.trim().is_empty() => Actor::Admin(name.trim().to_string()),
        _ => {
            return Err(AppError::MissingHeader(format!(
                "{} or {}",
                ACTOR_HEADER, INVESTOR_HEADER
            )))
        }
    };

    let mut context = OperationContext::new(actor);
    match header_str(headers, REQUEST_ID_HEADER)?.and_then(|v| Uuid::parse_str(v).ok()) {
        Some(id) => context = context.with_correlation_id(id),
        None => {
            context.ensure_correlation_id();
        }
    }
    Ok(context)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| AppError::InvalidRequest(format!("{} is not valid text", name))),
        None => Ok(None),
    }
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Headers never written to logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());

    let context = request.extensions().get::<OperationContext>();
    let correlation_id = context.and_then(|ctx| ctx.correlation_id);
    let actor = context.map(|ctx| ctx.actor_name());

    let start = std::time::Instant::now();

    tracing::debug!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        actor = ?actor,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;
    let status = response.status();
    let duration_ms = start.elapsed().as_millis();

    if status.is_server_error() {
        tracing::error!(method = %method, uri = %uri, status = %status, duration_ms, correlation_id = ?correlation_id, "Request failed");
    } else {
        tracing::info!(method = %method, uri = %uri, status = %status, duration_ms, correlation_id = ?correlation_id, "Request completed");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_investor_header_wins() {
        let ctx = context_from_headers(&headers(&[
            ("x-investor-id", "42"),
            ("x-actor-id", "ops.alice"),
        ]))
        .unwrap();
        assert_eq!(ctx.actor, Actor::Investor(42));
        assert!(ctx.correlation_id.is_some());
    }

    #[test]
    fn test_actor_header_is_admin() {
        let request_id = "6f1c2d4e-8a7b-4c3d-9e0f-112233445566";
        let ctx = context_from_headers(&headers(&[
            ("x-actor-id", "ops.alice"),
            ("x-request-id", request_id),
        ]))
        .unwrap();
        assert_eq!(ctx.actor, Actor::Admin("ops.alice".to_string()));
        assert_eq!(ctx.correlation_id, Some(Uuid::parse_str(request_id).unwrap()));
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let err = context_from_headers(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, AppError::MissingHeader(_)));

        let err = context_from_headers(&headers(&[("x-actor-id", "  ")])).unwrap_err();
        assert!(matches!(err, AppError::MissingHeader(_)));
    }

    #[test]
    fn test_non_numeric_investor_id() {
        let err = context_from_headers(&headers(&[("x-investor-id", "abc")])).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn test_mask_headers_for_logging() {
        let masked = mask_headers_for_logging(&headers(&[
            ("content-type", "application/json"),
            ("authorization", "Bearer secret"),
            ("x-investor-id", "42"),
        ]));

        let find = |name: &str| masked.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
        assert_eq!(find("authorization"), Some("[REDACTED]"));
        assert_eq!(find("content-type"), Some("application/json"));
        assert_eq!(find("x-investor-id"), Some("42"));
    }
}
