//! Session-token authentication middleware

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
    Extension,
};
use uuid::Uuid;

use plume_shared::UserRole;

use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated user attached to the request after `require_auth`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

/// Require a valid, unexpired session token. Inserts [`AuthUser`] as a
/// request extension for downstream handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req).ok_or(ApiError::Unauthorized)?;

    let row: Option<(Uuid, String, String)> = sqlx::query_as(
        r#"
        SELECT u.id, u.email, u.role
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token = $1 AND s.expires_at > NOW()
        "#,
    )
    .bind(token)
    .fetch_optional(&state.pool)
    .await?;

    let (id, email, role) = row.ok_or(ApiError::InvalidToken)?;

    req.extensions_mut().insert(AuthUser {
        id,
        email,
        role: UserRole::from_str_lossy(&role),
    });

    Ok(next.run(req).await)
}

/// Require the authenticated user to be an admin. Layered after
/// `require_auth`, which provides the extension.
pub async fn require_admin(
    Extension(auth_user): Extension<AuthUser>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !auth_user.role.can_administer() {
        tracing::warn!(
            user_id = %auth_user.id,
            "Non-admin user attempted admin operation"
        );
        return Err(ApiError::Forbidden);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    fn request_with_auth(value: &str) -> Request {
        HttpRequest::builder()
            .uri("/")
            .header(AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_bearer_token_extraction() {
        let req = request_with_auth("Bearer abc123");
        assert_eq!(bearer_token(&req), Some("abc123"));
    }

    #[test]
    fn test_bearer_token_rejects_other_schemes() {
        let req = request_with_auth("Basic abc123");
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn test_bearer_token_rejects_empty() {
        let req = request_with_auth("Bearer ");
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn test_missing_header() {
        let req = HttpRequest::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), None);
    }
}
