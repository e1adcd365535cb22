//! Adapter for third-party service hosts that call OCR with a JSON payload.
//!
//! Runs with a fixed configuration (plain OCR, tiled, no render) and reports
//! every failure as a `code: 400` envelope, server-side ones included.

use std::time::Instant;

use got_ocr_core::{ImageSource, Method, OcrRequest, OcrType};
use rocket::{
    Route, State,
    http::Status,
    response::status::Custom,
    serde::json::{self, Json},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{routes::recognize, state::AppState};

/// Request body. Any `auth` member is ignored.
#[derive(Debug, Deserialize)]
pub struct ServiceRequest {
    #[serde(default)]
    pub base64_image: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    pub code: u16,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ServiceData>,
}

#[derive(Debug, Serialize)]
pub struct ServiceData {
    pub text: String,
    pub confidence: f32,
    /// Seconds spent handling the call.
    pub time_cost: f64,
}

impl ServiceResponse {
    fn success(text: String, time_cost: f64) -> Self {
        Self {
            code: 0,
            msg: "success".into(),
            data: Some(ServiceData {
                text,
                confidence: 1.0,
                time_cost,
            }),
        }
    }

    fn failure(msg: String) -> Self {
        Self {
            code: 400,
            msg,
            data: None,
        }
    }
}

fn service_request() -> OcrRequest {
    OcrRequest {
        ocr_type: OcrType::Ocr,
        method: Method::ChatCrop,
        render: false,
        render_target: None,
        ocr_box: None,
        ocr_color: None,
    }
}

#[post("/ocr", data = "<payload>")]
pub async fn service_ocr(
    state: &State<AppState>,
    payload: Result<Json<ServiceRequest>, json::Error<'_>>,
) -> Custom<Json<ServiceResponse>> {
    let started = Instant::now();
    let outcome = async {
        let payload = payload.map_err(|err| format!("invalid request body: {err}"))?;
        let source = ImageSource::from_inputs(None, Some(payload.into_inner().base64_image))
            .map_err(|err| err.to_string())?;
        recognize(state.dispatcher().clone(), source, service_request())
            .await
            .map_err(|err| err.to_string())
    }
    .await;

    match outcome {
        Ok(output) => Custom(
            Status::Ok,
            Json(ServiceResponse::success(
                output.into_string(),
                started.elapsed().as_secs_f64(),
            )),
        ),
        Err(msg) => {
            warn!(error = %msg, "Service OCR call failed");
            Custom(Status::BadRequest, Json(ServiceResponse::failure(msg)))
        }
    }
}

pub fn routes() -> Vec<Route> {
    routes![service_ocr]
}
