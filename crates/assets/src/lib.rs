mod hugging_face;

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};
use tracing::info;

pub use hugging_face::HuggingFaceProvider;

pub const CONFIG_FILENAME: &str = "config.json";
pub const TOKENIZER_FILENAME: &str = "tokenizer.json";
pub const WEIGHTS_FILENAME: &str = "model.safetensors";

/// Something that can fetch a named file of a remote model repository.
pub trait AssetProvider {
    fn display_name(&self) -> &'static str;
    fn fetch(&self, repo_id: &str, remote_name: &str) -> Result<PathBuf>;
}

/// Where the model files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Hub(String),
    Local(PathBuf),
}

impl ModelSource {
    /// Existing directories are local sources; anything else is a hub repo id.
    pub fn parse(source: &str) -> Self {
        let path = Path::new(source);
        if path.is_dir() {
            ModelSource::Local(path.to_path_buf())
        } else {
            ModelSource::Hub(source.to_string())
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Hub(repo) => f.write_str(repo),
            ModelSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Explicit per-file paths that win over the source.
#[derive(Debug, Clone, Default)]
pub struct FileOverrides {
    pub config: Option<PathBuf>,
    pub tokenizer: Option<PathBuf>,
    pub weights: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

pub fn resolve_model_files(source: &ModelSource, overrides: &FileOverrides) -> Result<ModelFiles> {
    resolve_model_files_with(source, overrides, &HuggingFaceProvider)
}

pub fn resolve_model_files_with(
    source: &ModelSource,
    overrides: &FileOverrides,
    provider: &dyn AssetProvider,
) -> Result<ModelFiles> {
    let resolve = |custom: Option<&PathBuf>, name: &str| -> Result<PathBuf> {
        if let Some(path) = custom {
            if path.is_file() {
                return Ok(path.clone());
            }
            bail!("{name} not found at custom path {}", path.display());
        }
        match source {
            ModelSource::Local(dir) => {
                let path = dir.join(name);
                if !path.is_file() {
                    bail!("{name} not found in model directory {}", dir.display());
                }
                Ok(path)
            }
            ModelSource::Hub(repo_id) => {
                info!("Fetching {name} from {repo_id} via {}", provider.display_name());
                provider.fetch(repo_id, name)
            }
        }
    };

    Ok(ModelFiles {
        config: resolve(overrides.config.as_ref(), CONFIG_FILENAME)?,
        tokenizer: resolve(overrides.tokenizer.as_ref(), TOKENIZER_FILENAME)?,
        weights: resolve(overrides.weights.as_ref(), WEIGHTS_FILENAME)?,
    })
}
