use std::{fmt, fs, io, path::Path, sync::Arc, time::Instant};

use tracing::{debug, info, warn};

use crate::{
    cache::ModelCache,
    engine::ChatOptions,
    error::{OcrError, OcrResult},
    ingest::DecodedImage,
    request::{Method, OcrRequest},
    workspace::TempWorkspace,
};

/// Text produced by one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutput {
    Text(String),
    /// Contents of the render artifact (an HTML document).
    Rendered(String),
}

impl OcrOutput {
    pub fn as_str(&self) -> &str {
        match self {
            OcrOutput::Text(text) | OcrOutput::Rendered(text) => text,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            OcrOutput::Text(text) | OcrOutput::Rendered(text) => text,
        }
    }

    pub fn is_rendered(&self) -> bool {
        matches!(self, OcrOutput::Rendered(_))
    }
}

impl fmt::Display for OcrOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routes validated requests to the cached model.
#[derive(Clone)]
pub struct OcrDispatcher {
    cache: Arc<ModelCache>,
}

impl OcrDispatcher {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Runs one recognition request.
    ///
    /// When rendering, the engine writes into the caller's workspace, or a
    /// workspace private to this call. The artifact is copied to
    /// `request.render_target` only after a successful call, so a failed run
    /// leaves any existing target untouched.
    pub fn run(
        &self,
        image: &DecodedImage,
        request: &OcrRequest,
        workspace: Option<&TempWorkspace>,
    ) -> OcrResult<OcrOutput> {
        request.validate()?;
        let handle = self.cache.acquire()?;

        let scratch;
        let render_file: Option<&Path> = if request.render {
            let path = match workspace {
                Some(workspace) => workspace.render_path(),
                None => {
                    scratch = TempWorkspace::new()?;
                    scratch.render_path()
                }
            };
            discard_stale(path)?;
            Some(path)
        } else {
            None
        };

        let options = ChatOptions {
            ocr_type: request.ocr_type,
            ocr_box: request.ocr_box,
            ocr_color: request.ocr_color,
            render: request.render,
            render_file,
        };
        debug!(
            method = %request.method,
            ocr_type = %request.ocr_type,
            render = request.render,
            ocr_box = ?request.ocr_box,
            ocr_color = ?request.ocr_color,
            "Dispatching OCR request"
        );

        let start = Instant::now();
        let text = handle
            .with_engine(|engine, tokenizer| match request.method {
                Method::Chat => engine.chat(tokenizer, image, &options),
                Method::ChatCrop => engine.chat_crop(tokenizer, image, &options),
            })?
            .map_err(|err| classify_failure(request.method, err))?;
        info!(
            method = %request.method,
            chars = text.chars().count(),
            "OCR finished in {:.2?}",
            start.elapsed()
        );

        if let Some(path) = render_file {
            match fs::read_to_string(path) {
                Ok(html) => {
                    if let Some(target) = request.render_target.as_deref() {
                        publish(target, &html)?;
                    }
                    return Ok(OcrOutput::Rendered(html));
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "Render artifact missing; returning text");
                }
                Err(err) => {
                    return Err(OcrError::InferenceFailure(format!(
                        "failed to read render output {}: {err}",
                        path.display()
                    )));
                }
            }
        }
        Ok(OcrOutput::Text(text))
    }
}

fn discard_stale(path: &Path) -> OcrResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(OcrError::InferenceFailure(format!(
            "failed to clear render target {}: {err}",
            path.display()
        ))),
    }
}

fn publish(target: &Path, html: &str) -> OcrResult<()> {
    fs::write(target, html).map_err(|err| {
        OcrError::InferenceFailure(format!(
            "failed to write render output {}: {err}",
            target.display()
        ))
    })
}

fn classify_failure(method: Method, err: anyhow::Error) -> OcrError {
    match err.downcast::<OcrError>() {
        Ok(err) if err.is_client_error() => err,
        Ok(err) => OcrError::InferenceFailure(format!("{method}: {err}")),
        Err(err) => OcrError::InferenceFailure(format!("{method}: {err:#}")),
    }
}
