//! Access control guard.
//!
//! Two stages, composable per route:
//!
//! 1. `require_auth` extracts the bearer token, verifies it and inserts the
//!    caller's [`AuthUser`] into the request extensions.
//! 2. `require_publisher` checks the role of that caller.
//!
//! Both only read request headers and extensions; neither touches stored data.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::error::ApiError;
use super::tokens::TokenService;
use crate::models::{Role, UserId};

/// Authenticated caller, added to request extensions after auth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

/// Role a route demands from its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredRole {
    Any,
    Only(Role),
}

/// Returns the token carried in the `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("Authorization header required".to_string()))?;
    let value = value.to_str().map_err(|_| {
        ApiError::Unauthorized("Authorization header is not valid text".to_string())
    })?;

    match value.strip_prefix("Bearer ").map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token),
        Some(_) => Err(ApiError::Unauthorized("Bearer token is empty".to_string())),
        None => Err(ApiError::Unauthorized(
            "Authorization header must use Bearer scheme".to_string(),
        )),
    }
}

/// Verifies the request's bearer token.
pub fn authenticate(tokens: &TokenService, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let token = bearer_token(headers)?;

    match tokens.verify(token) {
        Ok(claims) => Ok(AuthUser {
            user_id: claims.subject_id,
            role: claims.role,
        }),
        Err(e) => {
            tracing::warn!("Rejected token: {}", e);
            Err(e.into())
        }
    }
}

/// Checks the caller's role against what the route requires.
pub fn authorize(user: &AuthUser, required: RequiredRole) -> Result<(), ApiError> {
    match required {
        RequiredRole::Any => Ok(()),
        RequiredRole::Only(role) if role == user.role => Ok(()),
        RequiredRole::Only(role) => {
            tracing::warn!(
                "User {} with role {} denied access requiring {}",
                user.user_id,
                user.role,
                role
            );
            Err(ApiError::Forbidden(format!("Access denied. {} role required", role)))
        }
    }
}

/// Authentication middleware
pub async fn require_auth(
    State(tokens): State<Arc<TokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&tokens, request.headers()) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Publisher-only middleware. Must run inside `require_auth`.
pub async fn require_publisher(request: Request, next: Next) -> Response {
    let Some(user) = request.extensions().get::<AuthUser>().copied() else {
        return ApiError::Unauthorized("Authentication required".to_string()).into_response();
    };

    match authorize(&user, RequiredRole::Only(Role::Publisher)) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
