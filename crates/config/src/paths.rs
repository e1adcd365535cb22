use std::{env, path::PathBuf};

const APP_NAME: &str = "got-ocr";

/// `$GOT_OCR_CONFIG_DIR/config.toml`, else the platform config directory.
pub fn default_config_path() -> PathBuf {
    env::var("GOT_OCR_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::config_dir()
                .unwrap_or_else(|| fallback_home(".config"))
                .join(APP_NAME)
        })
        .join("config.toml")
}

fn fallback_home(component: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(component)
}
