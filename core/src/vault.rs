use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument};

/// Filesystem access rooted at the vault directory.
///
/// All paths handed to a `Vault` are vault-relative, `/`-separated strings;
/// the vault resolves them against its root and refuses paths that would
/// escape it. Every call maps onto a single `tokio::fs` operation with no
/// handle held across await points.
#[derive(Debug)]
pub struct Vault {
    // Canonicalized root directory
    absolute_path: PathBuf,
    name: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid vault-relative path: {0}")]
    InvalidPath(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Vault {
    /// Opens an existing vault root directory.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Vault> {
        let path = path.as_ref();
        let meta = fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::DirectoryNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(path.to_path_buf()));
        }

        // Canonicalization keeps resolved paths stable regardless of how the
        // root was spelled by the caller.
        let absolute_path = fs::canonicalize(path).await.map_err(Error::Io)?;
        let name = absolute_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        debug!("Vault opened");
        Ok(Vault { absolute_path, name })
    }

    /// Returns the vault root directory.
    pub fn path(&self) -> &Path {
        &self.absolute_path
    }

    /// Name of the vault, i.e. the root directory's file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves a vault-relative path against the root.
    ///
    /// Absolute paths and paths containing `..` are rejected so callers
    /// cannot address files outside the vault.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return Err(Error::InvalidPath(rel.to_string()));
        }
        for component in rel_path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(Error::InvalidPath(rel.to_string())),
            }
        }
        Ok(self.absolute_path.join(rel_path))
    }

    /// Whether a file or directory exists at the vault-relative path.
    /// Unresolvable paths count as absent.
    pub async fn exists(&self, rel: &str) -> bool {
        match self.resolve(rel) {
            Ok(abs) => fs::try_exists(&abs).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn read_to_string(&self, rel: &str) -> Result<String> {
        let abs = self.resolve(rel)?;
        fs::read_to_string(&abs)
            .await
            .map_err(|e| map_not_found(e, abs))
    }

    pub async fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let abs = self.resolve(rel)?;
        fs::read(&abs).await.map_err(|e| map_not_found(e, abs))
    }

    pub async fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let abs = self.resolve(rel)?;
        fs::write(&abs, contents).await.map_err(Error::Io)
    }

    pub async fn write_bytes(&self, rel: &str, contents: &[u8]) -> Result<()> {
        let abs = self.resolve(rel)?;
        fs::write(&abs, contents).await.map_err(Error::Io)
    }

    /// Creates a directory and any missing parents. Succeeds if it already
    /// exists.
    pub async fn create_dir_all(&self, rel: &str) -> Result<()> {
        let abs = self.resolve(rel)?;
        fs::create_dir_all(&abs).await.map_err(Error::Io)
    }

    pub async fn remove_file(&self, rel: &str) -> Result<()> {
        let abs = self.resolve(rel)?;
        fs::remove_file(&abs)
            .await
            .map_err(|e| map_not_found(e, abs))
    }

    /// Removes a directory and everything under it.
    pub async fn remove_dir_all(&self, rel: &str) -> Result<()> {
        let abs = self.resolve(rel)?;
        fs::remove_dir_all(&abs)
            .await
            .map_err(|e| map_not_found(e, abs))
    }

    /// Lists the plain files directly inside a vault directory,
    /// non-recursive, sorted by name.
    pub async fn list_files(&self, rel: &str) -> Result<Vec<String>> {
        let abs = self.resolve(rel)?;
        let mut names = Vec::new();
        let mut read_dir = fs::read_dir(&abs).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::DirectoryNotFound(abs.clone())
            } else {
                Error::Io(e)
            }
        })?;
        while let Some(entry) = read_dir.next_entry().await.map_err(Error::Io)? {
            let path = entry.path();
            if path.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Size in bytes of a vault file.
    pub async fn file_size(&self, rel: &str) -> Result<u64> {
        let abs = self.resolve(rel)?;
        let meta = fs::metadata(&abs).await.map_err(|e| map_not_found(e, abs))?;
        Ok(meta.len())
    }

    /// Copies a file from an arbitrary location (typically outside the
    /// vault) to a vault-relative destination. Returns the copied length.
    pub async fn copy_into(&self, source: &Path, rel_dest: &str) -> Result<u64> {
        let abs_dest = self.resolve(rel_dest)?;
        fs::copy(source, &abs_dest)
            .await
            .map_err(|e| map_not_found(e, source.to_path_buf()))
    }

    /// Copies a file between two vault-relative paths.
    pub async fn copy(&self, rel_source: &str, rel_dest: &str) -> Result<u64> {
        let abs_source = self.resolve(rel_source)?;
        let abs_dest = self.resolve(rel_dest)?;
        fs::copy(&abs_source, &abs_dest)
            .await
            .map_err(|e| map_not_found(e, abs_source))
    }
}

fn map_not_found(e: std::io::Error, path: PathBuf) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::FileNotFound(path)
    } else {
        Error::Io(e)
    }
}
