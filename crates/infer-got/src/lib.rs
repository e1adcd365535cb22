pub mod config;
pub mod loader;
pub mod model;
pub mod preprocess;
pub mod prompt;
pub mod render;
pub mod runtime;
mod sampling;
mod text;
mod vision;

pub use config::GotOcrConfig;
pub use loader::GotModelLoader;
pub use model::{DecodeSettings, GotOcrModel};
