pub mod config;
pub mod paths;

pub use config::{
    AppConfig, ConfigDescriptor, ConfigOverride, ConfigOverrides, DEFAULT_MODEL_SOURCE,
    InferenceOverride, InferenceSettings, MODEL_SOURCE_ENV, ModelSettings, ServerOverride,
    ServerSettings,
};
pub use paths::default_config_path;
