use std::{
    io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OcrError, OcrResult};

/// Request-scoped scratch directory.
///
/// The directory and everything in it are removed when the workspace is
/// dropped or closed, whichever happens first.
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
    render_file: PathBuf,
}

impl TempWorkspace {
    pub fn new() -> OcrResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("got-ocr-")
            .tempdir()
            .map_err(|err| {
                OcrError::InferenceFailure(format!("failed to create temp workspace: {err}"))
            })?;
        let render_file = dir.path().join(format!("{}.html", Uuid::new_v4()));
        debug!(path = %dir.path().display(), "Created temp workspace");
        Ok(Self { dir, render_file })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Unique location for the render artifact of this request.
    pub fn render_path(&self) -> &Path {
        &self.render_file
    }

    /// Removes the workspace now. Missing files are not an error.
    pub fn close(self) -> OcrResult<()> {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to remove temp workspace");
                Err(OcrError::InferenceFailure(format!(
                    "failed to remove temp workspace {}: {err}",
                    path.display()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn drop_removes_directory_and_artifacts() {
        let workspace = TempWorkspace::new().unwrap();
        let root = workspace.path().to_path_buf();
        fs::write(workspace.render_path(), "<html></html>").unwrap();
        assert!(root.exists());
        drop(workspace);
        assert!(!root.exists());
    }

    #[test]
    fn render_paths_are_unique_and_inside_workspace() {
        let a = TempWorkspace::new().unwrap();
        let b = TempWorkspace::new().unwrap();
        assert_ne!(a.render_path(), b.render_path());
        assert!(a.render_path().starts_with(a.path()));
        assert_eq!(a.render_path().extension().unwrap(), "html");
    }

    #[test]
    fn close_tolerates_already_removed_directory() {
        let workspace = TempWorkspace::new().unwrap();
        fs::remove_dir_all(workspace.path()).unwrap();
        workspace.close().unwrap();
    }
}
