use thiserror::Error;

/// Failure taxonomy shared by every transport.
///
/// The first three variants are caller mistakes and map to client errors;
/// the remaining two are server-side conditions.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("either an image file or base64 data must be provided")]
    InputMissing,
    #[error("invalid image input: {0}")]
    InputInvalid(String),
    #[error("{0}")]
    RequestInvalid(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("error processing image: {0}")]
    InferenceFailure(String),
}

impl OcrError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OcrError::InputMissing | OcrError::InputInvalid(_) | OcrError::RequestInvalid(_)
        )
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::InputMissing => "input_missing",
            OcrError::InputInvalid(_) => "input_invalid",
            OcrError::RequestInvalid(_) => "request_invalid",
            OcrError::ModelUnavailable(_) => "model_unavailable",
            OcrError::InferenceFailure(_) => "inference_failure",
        }
    }
}

pub type OcrResult<T> = std::result::Result<T, OcrError>;
