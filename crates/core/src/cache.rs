use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use tokenizers::Tokenizer;
use tracing::{error, info};

use crate::{
    engine::{ModelLoader, OcrEngine},
    error::{OcrError, OcrResult},
};

/// Loaded model plus tokenizer, treated as one resource.
pub struct ModelHandle {
    engine: Mutex<Box<dyn OcrEngine>>,
    tokenizer: Tokenizer,
    source: String,
}

impl ModelHandle {
    pub fn new(engine: Box<dyn OcrEngine>, mut tokenizer: Tokenizer, source: String) -> Self {
        align_padding(&mut tokenizer, engine.eos_token_id());
        Self {
            engine: Mutex::new(engine),
            tokenizer,
            source,
        }
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Runs `f` with exclusive access to the engine.
    pub fn with_engine<T>(&self, f: impl FnOnce(&dyn OcrEngine, &Tokenizer) -> T) -> OcrResult<T> {
        let guard = self
            .engine
            .lock()
            .map_err(|_| OcrError::InferenceFailure("model lock poisoned".into()))?;
        Ok(f(guard.as_ref(), &self.tokenizer))
    }
}

fn align_padding(tokenizer: &mut Tokenizer, eos_id: Option<u32>) {
    let Some(pad_id) = eos_id else {
        return;
    };
    let Some(pad_token) = tokenizer.id_to_token(pad_id) else {
        return;
    };
    let mut params = tokenizer.get_padding().cloned().unwrap_or_default();
    params.pad_id = pad_id;
    params.pad_token = pad_token;
    tokenizer.with_padding(Some(params));
}

/// Lazily constructed, process-wide model handle.
///
/// The first `acquire` builds the handle through the loader while holding the
/// slot lock, so concurrent first callers construct it exactly once. Failed
/// constructions are not remembered; the next caller tries again.
pub struct ModelCache {
    loader: Box<dyn ModelLoader>,
    slot: Mutex<Option<Arc<ModelHandle>>>,
}

impl ModelCache {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            slot: Mutex::new(None),
        }
    }

    pub fn acquire(&self) -> OcrResult<Arc<ModelHandle>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let source = self.loader.describe();
        info!("Loading model `{source}`");
        let start = Instant::now();
        let (engine, tokenizer) = self.loader.load().map_err(|err| {
            error!(error = %format!("{err:#}"), "Model construction failed");
            OcrError::ModelUnavailable(format!("failed to load `{source}`: {err:#}"))
        })?;
        let handle = Arc::new(ModelHandle::new(engine, tokenizer, source));
        info!("Model ready in {:.2?}", start.elapsed());
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Drops the cached handle; in-flight holders keep their clone alive.
    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            info!("Released model `{}`", handle.source());
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
