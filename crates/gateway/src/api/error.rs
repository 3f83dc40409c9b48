//! Maps `gwy_domain::error::Error` onto an HTTP response (spec §7).
//!
//! `gwy-domain` carries no axum dependency, so the `IntoResponse` impl
//! lives here rather than on the error type itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use gwy_domain::error::{Error, ErrorBody};

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody::from(&self.0);
        let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
