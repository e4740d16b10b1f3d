use axum::{
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    fn build(status: StatusCode, msg: &str) -> Response {
        let success = status.is_success();
        (
            status,
            Json(JsonResponse {
                status: if success { "success" } else { "error" }.to_string(),
                success,
                message: msg.to_string(),
            }),
        )
            .into_response()
    }

    pub fn success(msg: &str) -> Response {
        Self::build(StatusCode::OK, msg)
    }

    pub fn forbidden(msg: &str) -> Response {
        Self::build(StatusCode::FORBIDDEN, msg)
    }

    pub fn server_error(msg: &str) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn too_many_requests(msg: &str) -> Response {
        Self::build(StatusCode::TOO_MANY_REQUESTS, msg)
    }
}

/// 302 to the login entry point, used for unauthenticated access.
pub fn redirect_to_login(login_path: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, login_path.to_string())]).into_response()
}

/// 303 See Other, used after every form POST.
pub fn see_other(location: &str) -> Response {
    Redirect::to(location).into_response()
}
