use crate::config::RecordPolicy;
use crate::error::ApiError;
use crate::rate_limiter::RateLimiter;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request identifier, taken from `x-request-id` or generated.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Tag every request with an id and echo it back on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    info!(
        target: "shortener::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        request_id = %request_id,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "shortener::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        request_id = %request_id,
        "Request completed"
    );

    response
}

fn get_client_ip(request: &Request) -> String {
    // Try to get real IP from headers first
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    // Fallback to connection info
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}

/// Limiter and recording policy shared by the admission middleware.
#[derive(Clone)]
pub struct AdmissionControl {
    limiter: Arc<RateLimiter>,
    policy: RecordPolicy,
}

impl AdmissionControl {
    pub fn new(limiter: Arc<RateLimiter>, policy: RecordPolicy) -> Self {
        Self { limiter, policy }
    }

    fn should_record(&self, status: StatusCode) -> bool {
        match self.policy {
            RecordPolicy::Attempts => true,
            RecordPolicy::Successes => status.is_success() || status.is_redirection(),
        }
    }
}

/// Records an admitted request when dropped, so requests cut short by a
/// timeout or a client disconnect still count.
struct PendingRecord<'a> {
    limiter: &'a RateLimiter,
    armed: bool,
}

impl Drop for PendingRecord<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.limiter.add();
        }
    }
}

/// Admission control for the write endpoints. Denied requests get a 503 with
/// a `Retry-After` of the limiter's window; admitted requests are forwarded
/// and then recorded according to the policy.
pub async fn admission_middleware(
    State(control): State<AdmissionControl>,
    request: Request,
    next: Next,
) -> Response {
    let admission = control.limiter.allow();
    if !admission.allowed {
        warn!(
            target: "shortener::middleware",
            rate = admission.rate,
            "rate limit exceeded"
        );
        return ApiError::RateLimitExceeded {
            retry_after_secs: control.limiter.limit().as_secs(),
        }
        .into_response();
    }

    // Under `Successes` an abandoned request has no status and is not recorded.
    let mut pending = PendingRecord {
        limiter: &control.limiter,
        armed: control.policy == RecordPolicy::Attempts,
    };

    let response = next.run(request).await;
    pending.armed = control.should_record(response.status());

    response
}
