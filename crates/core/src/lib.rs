pub mod cache;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod request;
pub mod runtime;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use cache::{ModelCache, ModelHandle};
pub use dispatch::{OcrDispatcher, OcrOutput};
pub use engine::{ChatOptions, ModelLoader, OcrEngine};
pub use error::{OcrError, OcrResult};
pub use ingest::{DecodedImage, ImageSource, normalize};
pub use request::{Method, OcrBox, OcrColor, OcrRequest, OcrType, RequestFields};
pub use workspace::TempWorkspace;
