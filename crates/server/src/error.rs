use anyhow::Error;
use got_ocr_core::OcrError;
use rocket::{
    Request,
    http::Status,
    response::{Responder, status::Custom},
    serde::json::Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}

impl From<OcrError> for ApiError {
    fn from(err: OcrError) -> Self {
        if err.is_client_error() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'static> {
        let status = match self {
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::Internal(_) => Status::InternalServerError,
        };
        let body = ErrorBody {
            detail: self.to_string(),
        };
        Custom(status, Json(body)).respond_to(request)
    }
}

/// Keeps framework-level failures (unknown routes, oversized bodies) in the
/// `{detail}` shape.
#[catch(default)]
pub fn default_catcher(status: Status, _request: &Request<'_>) -> Custom<Json<ErrorBody>> {
    let detail = status.reason().unwrap_or("request failed").to_string();
    Custom(status, Json(ErrorBody { detail }))
}
