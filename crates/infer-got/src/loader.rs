use std::time::Instant;

use anyhow::{Result, anyhow};
use got_ocr_assets::{FileOverrides, ModelSource, resolve_model_files};
use got_ocr_config::AppConfig;
use got_ocr_core::{
    ModelLoader, OcrEngine,
    runtime::{DeviceKind, Precision},
};
use tokenizers::Tokenizer;
use tracing::info;

use crate::{
    config::GotOcrConfig,
    model::{DecodeSettings, GotOcrModel},
    prompt::IM_END,
    runtime::prepare_device_and_dtype,
};

/// Resolves, downloads and loads a GOT-OCR 2.0 checkpoint on demand.
#[derive(Debug, Clone)]
pub struct GotModelLoader {
    source: ModelSource,
    overrides: FileOverrides,
    device: DeviceKind,
    precision: Option<Precision>,
    settings: DecodeSettings,
}

impl GotModelLoader {
    pub fn new(source: ModelSource) -> Self {
        Self {
            source,
            overrides: FileOverrides::default(),
            device: DeviceKind::default(),
            precision: None,
            settings: DecodeSettings::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let inference = &config.inference;
        Self {
            source: ModelSource::parse(&config.model.source),
            overrides: FileOverrides {
                config: config.model.config.clone(),
                tokenizer: config.model.tokenizer.clone(),
                weights: config.model.weights.clone(),
            },
            device: inference.device,
            precision: inference.precision,
            settings: DecodeSettings {
                max_new_tokens: inference.max_new_tokens,
                no_repeat_ngram_size: inference.no_repeat_ngram_size,
                max_tiles: u32::try_from(inference.max_tiles).unwrap_or(u32::MAX),
            },
        }
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub fn settings(&self) -> DecodeSettings {
        self.settings
    }
}

impl ModelLoader for GotModelLoader {
    fn describe(&self) -> String {
        self.source.to_string()
    }

    fn load(&self) -> Result<(Box<dyn OcrEngine>, Tokenizer)> {
        let started = Instant::now();
        let files = resolve_model_files(&self.source, &self.overrides)?;
        let (device, dtype) = prepare_device_and_dtype(self.device, self.precision)?;
        info!(
            "Loading model from {} on {:?} ({:?})",
            files.weights.display(),
            device,
            dtype
        );

        let config = GotOcrConfig::from_file(&files.config)?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|err| {
            anyhow!(
                "failed to load tokenizer from {}: {err}",
                files.tokenizer.display()
            )
        })?;
        let model = GotOcrModel::load(config, &files.weights, &device, dtype, self.settings)?
            .with_eos_token(tokenizer.token_to_id(IM_END));

        info!("Model ready in {:.2?}", started.elapsed());
        Ok((Box::new(model), tokenizer))
    }
}
