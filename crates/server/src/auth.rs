//! Static-secret authentication middleware: every request to `/v1/*` must present the
//! configured client secret as a bearer token or an `x-api-key` header.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response, StatusCode, header},
};
use secrecy::{ExposeSecret, SecretString};
use tower::{Layer, Service};

/// Layer that wraps an inner service with secret-comparing authentication.
#[derive(Clone)]
pub struct AuthLayer {
    secret: Arc<SecretString>,
}

impl AuthLayer {
    /// Creates a new layer comparing incoming credentials against `secret`.
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            secret: self.secret.clone(),
        }
    }
}

/// The `tower::Service` installed by [`AuthLayer`].
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    secret: Arc<SecretString>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if credential_matches(request.headers(), self.secret.expose_secret()) {
            let mut inner = self.inner.clone();
            Box::pin(async move { inner.call(request).await })
        } else {
            Box::pin(async move { Ok(unauthorized_response()) })
        }
    }
}

fn credential_matches(headers: &http::HeaderMap, expected: &str) -> bool {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        return token == expected;
    }

    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return value == expected;
    }

    false
}

fn unauthorized_response() -> Response<Body> {
    let body = serde_json::json!({
        "error": {
            "type": "authentication_error",
            "message": "missing or invalid credentials",
        }
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    #[test]
    fn accepts_matching_bearer_token() {
        let mut headers = http::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cr3t"));
        assert!(credential_matches(&headers, "s3cr3t"));
    }

    #[test]
    fn accepts_matching_api_key_header() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("s3cr3t"));
        assert!(credential_matches(&headers, "s3cr3t"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let mut headers = http::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(!credential_matches(&headers, "s3cr3t"));
    }

    #[test]
    fn rejects_missing_credentials() {
        let headers = http::HeaderMap::new();
        assert!(!credential_matches(&headers, "s3cr3t"));
    }

    #[tokio::test]
    async fn service_rejects_unauthenticated_request() {
        use tower::ServiceExt;

        async fn handler(_req: Request<Body>) -> Response<Body> {
            Response::new(Body::from("ok"))
        }

        let svc = tower::service_fn(|req| async { Ok::<_, std::convert::Infallible>(handler(req).await) });
        let mut service = AuthLayer::new(SecretString::from("s3cr3t".to_string())).layer(svc);

        let request = Request::builder().uri("/v1/messages").body(Body::empty()).unwrap();
        let response = service.ready().await.unwrap().call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
