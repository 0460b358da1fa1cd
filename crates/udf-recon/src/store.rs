//! Storage collaborator for request inputs and outputs.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ReconError, ReconResult};

/// Directory, relative to the store root, that receives uploaded meshes.
pub const UPLOAD_PREFIX: &str = "prediction_history/ply";

/// Source and sink for the files a request touches.
pub trait MeshStore: Send + Sync {
    /// Make the object named by `reference` available locally.
    fn download(&self, reference: &str) -> ReconResult<PathBuf>;

    /// Publish a local file and return its reference.
    fn upload(&self, local_path: &Path) -> ReconResult<String>;
}

/// Store backed by a directory on the local filesystem.
///
/// References are paths relative to the root. Uploads are copied to
/// `<root>/prediction_history/ply/<file name>`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`. The directory is not created until
    /// the first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of a reference.
    pub fn resolve(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }
}

impl MeshStore for LocalStore {
    fn download(&self, reference: &str) -> ReconResult<PathBuf> {
        let path = self.resolve(reference);
        match path.metadata() {
            Ok(meta) if meta.is_file() => {
                debug!(reference, path = ?path, "Resolved source");
                Ok(path)
            }
            Ok(_) => Err(ReconError::MissingSource {
                reference: reference.to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ReconError::MissingSource {
                reference: reference.to_string(),
            }),
            Err(source) => Err(ReconError::DownloadFailed {
                reference: reference.to_string(),
                source,
            }),
        }
    }

    fn upload(&self, local_path: &Path) -> ReconResult<String> {
        let upload_failed = |source| ReconError::UploadFailed {
            path: local_path.to_path_buf(),
            source,
        };

        let file_name = local_path.file_name().ok_or_else(|| {
            upload_failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path has no file name",
            ))
        })?;
        let reference = format!("{}/{}", UPLOAD_PREFIX, file_name.to_string_lossy());
        let target = self.resolve(&reference);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(upload_failed)?;
        }
        let bytes = std::fs::copy(local_path, &target).map_err(upload_failed)?;

        info!(reference = %reference, bytes, "Uploaded mesh");
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_download_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cloud.xyz"), "0 0 0\n").unwrap();
        let store = LocalStore::new(dir.path());

        let path = store.download("cloud.xyz").unwrap();
        assert_eq!(path, dir.path().join("cloud.xyz"));
    }

    #[test]
    fn test_download_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        let err = store.download("nope.ply").unwrap_err();
        assert!(matches!(err, ReconError::MissingSource { ref reference } if reference == "nope.ply"));
        // A directory is not a source either
        assert!(store.download(".").is_err());
    }

    #[test]
    fn test_upload_copies_under_prefix() {
        let dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let local = scratch.path().join("mesh.ply");
        std::fs::write(&local, b"ply\n").unwrap();

        let store = LocalStore::new(dir.path());
        let reference = store.upload(&local).unwrap();

        assert_eq!(reference, "prediction_history/ply/mesh.ply");
        assert_eq!(std::fs::read(store.resolve(&reference)).unwrap(), b"ply\n");
    }

    #[test]
    fn test_upload_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        let err = store.upload(Path::new("/nonexistent/mesh.ply")).unwrap_err();
        assert_eq!(err.code().as_str(), "RECON-5002");
    }
}
