use std::path::PathBuf;

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;

use crate::AssetProvider;

/// Downloads into the shared Hugging Face cache (`HF_HOME`).
pub struct HuggingFaceProvider;

impl AssetProvider for HuggingFaceProvider {
    fn display_name(&self) -> &'static str {
        "Hugging Face Hub"
    }

    fn fetch(&self, repo_id: &str, remote_name: &str) -> Result<PathBuf> {
        let api = Api::new().context("failed to initialise Hugging Face API client")?;
        api.model(repo_id.to_string())
            .get(remote_name)
            .with_context(|| format!("failed to download {remote_name} from {repo_id}"))
    }
}
