// Axum extractor that authenticates a request from a JWT, generalizing the
// teacher's single-admin-token `AuthBearer` extractor (api/auth.rs) to
// per-user, per-role identity. Accepts the token from the `Authorization:
// Bearer` header, falling back to a `?token=` query parameter so WebSocket
// upgrade requests (which cannot set arbitrary headers from a browser) can
// authenticate the same way.

use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use super::jwt::{Claims, JwtHandler};
use crate::types::Role;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

impl From<Claims> for AuthUser {
    fn from(c: Claims) -> Self {
        Self {
            user_id: c.sub,
            username: c.username,
            role: c.role,
        }
    }
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Returns `None` for admins (no owner filter — see every `db::*`
    /// accessor's `owner_id: Option<&str>` convention) and `Some(user_id)`
    /// otherwise.
    pub fn owner_filter(&self) -> Option<&str> {
        if self.is_admin() {
            None
        } else {
            Some(&self.user_id)
        }
    }

    pub fn require_admin(&self) -> Result<(), crate::error::AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(crate::error::AppError::Forbidden)
        }
    }

    /// True if `self` may act on a resource owned by `owner_id` — either the
    /// caller owns it, or the caller is an admin (spec's multi-tenant
    /// isolation invariant).
    pub fn can_access(&self, owner_id: &str) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": { "kind": "auth", "message": self.message } });
        (self.status, axum::Json(body)).into_response()
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<JwtHandler>: axum::extract::FromRef<S>,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jwt_handler = Arc::<JwtHandler>::from_ref(state);

        let token_from_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string());

        let token = match token_from_header {
            Some(t) => t,
            None => {
                let query = Query::<TokenQuery>::try_from_uri(&parts.uri.clone())
                    .ok()
                    .and_then(|q| q.0.token);
                query.ok_or(AuthRejection {
                    status: StatusCode::UNAUTHORIZED,
                    message: "missing authorization token",
                })?
            }
        };

        let claims = jwt_handler.validate_token(&token).map_err(|e| {
            warn!(error = %e, "jwt validation failed");
            AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                message: "invalid or expired token",
            }
        })?;

        Ok(AuthUser::from(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_filter_none_for_admin() {
        let u = AuthUser {
            user_id: "u1".into(),
            username: "a".into(),
            role: Role::Admin,
        };
        assert_eq!(u.owner_filter(), None);
    }

    #[test]
    fn owner_filter_some_for_user() {
        let u = AuthUser {
            user_id: "u1".into(),
            username: "a".into(),
            role: Role::User,
        };
        assert_eq!(u.owner_filter(), Some("u1"));
    }

    #[test]
    fn can_access_own_resource_only() {
        let u = AuthUser {
            user_id: "u1".into(),
            username: "a".into(),
            role: Role::User,
        };
        assert!(u.can_access("u1"));
        assert!(!u.can_access("u2"));
    }

    #[test]
    fn admin_can_access_any_resource() {
        let u = AuthUser {
            user_id: "u1".into(),
            username: "a".into(),
            role: Role::Admin,
        };
        assert!(u.can_access("u2"));
    }
}
