use std::sync::Arc;

use got_ocr_core::{ModelCache, OcrDispatcher};

pub struct AppState {
    dispatcher: OcrDispatcher,
}

impl AppState {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self {
            dispatcher: OcrDispatcher::new(cache),
        }
    }

    pub fn dispatcher(&self) -> &OcrDispatcher {
        &self.dispatcher
    }
}
