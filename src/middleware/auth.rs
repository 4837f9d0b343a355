//! Shared-token authentication for the orchestrator API.
//!
//! The orchestrator is reached only by the wallet's own UI and content
//! bridge. When `INTERNAL_SERVICE_TOKEN` is required every route except
//! health and build info must present it.

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::{Error, ResponseError};
use futures_util::future::{LocalBoxFuture, Ready, ready};

use crate::config::Settings;
use crate::error::KeyringError;

#[derive(Clone)]
pub struct InternalAuth {
    required: bool,
    token: Option<String>,
}

impl InternalAuth {
    pub fn new(settings: &Settings) -> Self {
        Self {
            required: settings.internal_token_required(),
            token: settings.internal_token().map(ToString::to_string),
        }
    }

    pub fn from_config(required: bool, token: Option<String>) -> Self {
        Self { required, token }
    }

    fn is_public_path(path: &str) -> bool {
        matches!(path, "/health" | "/build-info")
    }

    /// `Authorization: Bearer` first, then `X-Internal-Token`.
    fn extract_token(req: &ServiceRequest) -> Option<String> {
        let headers = req.headers();

        if let Some(value) = headers.get("authorization")
            && let Ok(value) = value.to_str()
            && let Some(token) = value.strip_prefix("Bearer ")
        {
            return Some(token.trim().to_string());
        }

        headers
            .get("x-internal-token")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
    }

    fn authorized(required: bool, expected: Option<&str>, provided: Option<&str>) -> bool {
        match (expected, provided) {
            // A configured token must match whenever one is sent.
            (Some(expected), Some(provided)) => provided == expected,
            _ => !required,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for InternalAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = InternalAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(InternalAuthMiddleware {
            service,
            required: self.required,
            token: self.token.clone(),
        }))
    }
}

pub struct InternalAuthMiddleware<S> {
    service: S,
    required: bool,
    token: Option<String>,
}

impl<S, B> Service<ServiceRequest> for InternalAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if !InternalAuth::is_public_path(req.path()) {
            let provided = InternalAuth::extract_token(&req);
            if !InternalAuth::authorized(self.required, self.token.as_deref(), provided.as_deref())
            {
                tracing::warn!(path = %req.path(), "Rejected unauthenticated request");
                let (req, _pl) = req.into_parts();
                let response = KeyringError::Unauthorized.error_response();
                return Box::pin(async move {
                    Ok(ServiceResponse::new(req, response.map_into_right_body()))
                });
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}
