use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::extract::CookieJar;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::auth::token::validate_session_token;

use super::app_state::AppState;

/// Name of the cookie carrying the session JWT.
pub const SESSION_COOKIE: &str = "tutorlink_session";

/// Extractor that validates the session JWT from the `tutorlink_session`
/// cookie or an `Authorization: Bearer` header.
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let from_cookie = CookieJar::from_headers(&parts.headers)
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string());
        let token = match from_cookie {
            Some(token) => token,
            None => TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map(|TypedHeader(auth)| auth.token().to_string())
                .map_err(|_| (StatusCode::UNAUTHORIZED, "Not authenticated").into_response())?,
        };

        let claims = validate_session_token(&token, &state.auth_config.jwt_secret).map_err(|_| {
            (StatusCode::UNAUTHORIZED, "Invalid or expired session").into_response()
        })?;

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}
