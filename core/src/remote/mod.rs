//! Collaborators that move images between the vault and remote storage.
//!
//! Uploading is delegated to the host-configured mechanism (typically an
//! external command) behind the [`Uploader`] trait; re-downloading goes
//! through [`Fetcher`], with [`HttpFetcher`] as the stock implementation.

use std::error::Error as StdError;
use std::path::PathBuf;

use async_trait::async_trait;
use mime::Mime;
use thiserror::Error;

pub use self::http::HttpFetcher;

mod http;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Uploader returned {received} URLs for {sent} files")]
    UrlCountMismatch { sent: usize, received: usize },

    #[error("Remote returned status {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(#[source] Box<dyn StdError + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Transfers local files to remote storage.
///
/// Implementations must return one URL per input file, in input order; the
/// caller treats any other count as [`RemoteError::UrlCountMismatch`].
/// Progress reporting is the implementation's concern (typically via
/// `tracing`); the external command mechanics live behind this seam.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, files: &[PathBuf]) -> Result<Vec<String>>;
}

/// Fetches a remote image for re-download into the vault.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Fetched>;
}

/// A fetched remote resource: body bytes plus the Content-Type, when the
/// remote reported one.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub data: Vec<u8>,
    pub content_type: Option<Mime>,
}

impl Fetched {
    /// File extension implied by the Content-Type, e.g. `png` for
    /// `image/png`. `None` for non-image or unrecognized types.
    pub fn extension(&self) -> Option<&'static str> {
        let mime = self.content_type.as_ref()?;
        if mime.type_() != mime::IMAGE {
            return None;
        }
        match mime.subtype().as_str() {
            "png" => Some("png"),
            "jpeg" => Some("jpg"),
            "gif" => Some("gif"),
            "webp" => Some("webp"),
            "bmp" => Some("bmp"),
            "svg+xml" => Some("svg"),
            _ => None,
        }
    }
}
