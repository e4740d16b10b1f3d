use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::models::user::User;
use crate::responses::{redirect_to_login, JsonResponse};
use crate::state::AppState;
use crate::utils::jwt::decode_jwt;

pub const AUTH_COOKIE: &str = "auth_token";

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Claims {
    pub id: String, // user UUID
    pub email: String,
    pub exp: usize, // expiration (as UNIX timestamp)
    pub iss: String,
    pub aud: String,
}

enum AuthFailure {
    Unauthenticated,
    Internal,
}

async fn resolve_user(parts: &Parts, state: &AppState) -> Result<User, AuthFailure> {
    let jar = CookieJar::from_headers(&parts.headers);
    let token = jar.get(AUTH_COOKIE).ok_or(AuthFailure::Unauthenticated)?;
    let data = decode_jwt(
        token.value(),
        &state.jwt_keys,
        &state.config.jwt_issuer,
        &state.config.jwt_audience,
    )
    .map_err(|_| AuthFailure::Unauthenticated)?;
    let user_id =
        Uuid::parse_str(&data.claims.id).map_err(|_| AuthFailure::Unauthenticated)?;

    match state.users.find_user_by_id(user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(AuthFailure::Unauthenticated),
        Err(err) => {
            error!(?err, %user_id, "failed to load authenticated user");
            Err(AuthFailure::Internal)
        }
    }
}

/// Signed-in user. Anyone else is sent to the login page.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match resolve_user(parts, state).await {
            Ok(user) => Ok(AuthUser(user)),
            Err(AuthFailure::Unauthenticated) => Err(redirect_to_login(&state.config.login_path)),
            Err(AuthFailure::Internal) => {
                Err(JsonResponse::server_error("Failed to load user").into_response())
            }
        }
    }
}

/// Signed-in user when there is one; pages that work for guests take this.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<User>);

impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(resolve_user(parts, state).await.ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubscribeFlow;
    use crate::db::mock_db::MockDb;
    use crate::routes::test_support::{auth_cookie, test_state};
    use crate::services::stripe::MockStripeService;
    use axum::http::{header, Request, StatusCode};

    fn parts_with_cookie(cookie: Option<String>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn valid_cookie_resolves_user() {
        let (db, user) = MockDb::default().with_user("a@example.com", None);
        let state = test_state(db, MockStripeService::new(), SubscribeFlow::Checkout).0;
        let mut parts = parts_with_cookie(Some(auth_cookie(&state, &user)));

        let AuthUser(resolved) = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn missing_cookie_redirects_to_login() {
        let state = test_state(MockDb::default(), MockStripeService::new(), SubscribeFlow::Checkout).0;
        let mut parts = parts_with_cookie(None);

        let rejection = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(rejection.status(), StatusCode::FOUND);
        assert_eq!(rejection.headers().get(header::LOCATION).unwrap(), "/login");
    }

    #[tokio::test]
    async fn token_for_unknown_user_is_anonymous() {
        let (db, _user) = MockDb::default().with_user("a@example.com", None);
        let state = test_state(db, MockStripeService::new(), SubscribeFlow::Checkout).0;
        let ghost = User {
            id: Uuid::new_v4(),
            email: "ghost@example.com".into(),
            stripe_customer_id: None,
            created_at: chrono::Utc::now(),
        };
        let mut parts = parts_with_cookie(Some(auth_cookie(&state, &ghost)));

        let MaybeAuthUser(user) = MaybeAuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn garbage_token_is_anonymous() {
        let state = test_state(MockDb::default(), MockStripeService::new(), SubscribeFlow::Checkout).0;
        let mut parts = parts_with_cookie(Some(format!("{AUTH_COOKIE}=invalid.token.here")));

        let MaybeAuthUser(user) = MaybeAuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(user.is_none());
    }
}
