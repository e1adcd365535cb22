use got_ocr_core::{
    ImageSource, OcrDispatcher, OcrError, OcrOutput, OcrRequest, OcrResult, RequestFields,
    TempWorkspace, normalize,
};
use rocket::{
    Either, Route, State,
    form::{self, Form},
    fs::TempFile,
    response::content::RawHtml,
    serde::json::Json,
    tokio::{self, io::AsyncReadExt, task},
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub result: String,
}

/// Fields of `POST /ocr`; camelCase aliases are accepted as well.
#[derive(Debug, FromForm)]
pub struct OcrForm<'r> {
    by_file: Option<TempFile<'r>>,
    by_base64: Option<String>,
    #[field(name = "ocr_type")]
    #[field(name = "ocrType")]
    ocr_type: Option<String>,
    method: Option<String>,
    render: bool,
    #[field(name = "ocr_box")]
    #[field(name = "ocrBox")]
    ocr_box: Option<String>,
    #[field(name = "ocr_color")]
    #[field(name = "ocrColor")]
    ocr_color: Option<String>,
}

#[get("/")]
pub fn index() -> Json<IndexResponse> {
    Json(IndexResponse {
        message: "GOT OCR 2.0 API Server",
    })
}

#[get("/health")]
pub fn health() -> &'static str {
    "ok"
}

#[post("/ocr", data = "<form>")]
pub async fn ocr_endpoint(
    state: &State<AppState>,
    form: Result<Form<OcrForm<'_>>, form::Errors<'_>>,
) -> Result<Either<Json<OcrResponse>, RawHtml<String>>, ApiError> {
    let form = form
        .map_err(|errs| ApiError::BadRequest(format!("invalid form data: {errs}")))?
        .into_inner();
    let request = OcrRequest::parse(RequestFields {
        ocr_type: form.ocr_type.as_deref(),
        method: form.method.as_deref(),
        render: form.render,
        ocr_box: form.ocr_box.as_deref(),
        ocr_color: form.ocr_color.as_deref(),
    })?;
    let has_upload = form.by_file.as_ref().is_some_and(|file| file.len() > 0);
    let has_base64 = form
        .by_base64
        .as_deref()
        .is_some_and(|text| !text.trim().is_empty());
    ImageSource::check_inputs(has_upload, has_base64)?;
    let upload = match &form.by_file {
        Some(file) if has_upload => Some(read_upload(file).await?),
        _ => None,
    };
    let source = ImageSource::from_inputs(upload, form.by_base64)?;
    debug!(
        source = source.kind(),
        ocr_type = %request.ocr_type,
        method = %request.method,
        render = request.render,
        "OCR request"
    );

    match recognize(state.dispatcher().clone(), source, request).await? {
        OcrOutput::Rendered(html) => Ok(Either::Right(RawHtml(html))),
        OcrOutput::Text(result) => Ok(Either::Left(Json(OcrResponse { result }))),
    }
}

/// Bodies that are neither urlencoded nor multipart carry no usable input.
#[post("/ocr", rank = 2)]
pub fn ocr_without_form() -> ApiError {
    ApiError::from(OcrError::InputMissing)
}

async fn read_upload(file: &TempFile<'_>) -> Result<Vec<u8>, ApiError> {
    let reader = file
        .open()
        .await
        .map_err(|err| ApiError::Internal(format!("failed to open uploaded file: {err}")))?;
    tokio::pin!(reader);
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(|err| ApiError::Internal(format!("failed to read uploaded file: {err}")))?;
    Ok(bytes)
}

/// Decodes and recognizes on the blocking pool. A render workspace is
/// created only when needed and removed when the task ends.
pub(crate) async fn recognize(
    dispatcher: OcrDispatcher,
    source: ImageSource,
    request: OcrRequest,
) -> Result<OcrOutput, ApiError> {
    let outcome = task::spawn_blocking(move || -> OcrResult<OcrOutput> {
        let image = normalize(source)?;
        let workspace = request.render.then(TempWorkspace::new).transpose()?;
        dispatcher.run(&image, &request, workspace.as_ref())
    })
    .await
    .map_err(|err| ApiError::Internal(format!("ocr task failed: {err}")))?;
    outcome.map_err(|err| {
        warn!(kind = err.kind(), error = %err, "OCR request failed");
        ApiError::from(err)
    })
}

pub fn routes() -> Vec<Route> {
    routes![index, health, ocr_endpoint, ocr_without_form]
}
