//! Per-document image bookkeeping.
//!
//! Every document that embeds images gets an asset folder next to it (its
//! location resolved from the configured folder template) holding copies of
//! those images plus a JSON sidecar describing each one. This module owns
//! that bookkeeping:
//!
//! *   [`ImageRecord`]: the persisted state of one managed image — local
//!     path, remote URL, upload flag, descriptive metadata.
//! *   [`ImageManager`]: the per-document manager. It owns the mapping from
//!     local path to record, mirrors it to the sidecar file, and implements
//!     add/remove/upload/download/rename.
//! *   [`ManagerRegistry`]: a cache of managers keyed by document path,
//!     constructing and loading each one lazily.
//!
//! # Sidecar convention
//!
//! The sidecar lives inside the asset folder and is named after the
//! document: `notes/a.md` with folder template `_assets.{{filename}}`
//! produces `notes/_assets.a/a.images.json`. Sidecar and asset folder exist
//! exactly while the manager tracks at least one image; removing the last
//! record deletes both, adding the first creates both.
//!
//! # Consistency
//!
//! Operations are single-flight per manager: the host dispatches one user
//! action at a time, and every mutating operation persists the sidecar
//! before returning. There is no locking; two operations racing on the same
//! manager before either persists is a known, accepted hazard. Batch
//! operations (upload/download all) isolate per-record failures and report
//! an aggregate outcome instead of aborting on the first.

pub use self::manager::ImageManager;
pub use self::record::{Align, ImageRecord};
pub use self::registry::ManagerRegistry;

mod manager;
mod record;
mod registry;

use std::path::PathBuf;
use thiserror::Error;

use crate::remote::RemoteError;
use crate::vault;

/// Suffix appended to the document's file stem to name its sidecar file.
pub const SIDECAR_SUFFIX: &str = ".images.json";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path does not have a valid file stem: {0}")]
    NoFileStem(PathBuf),

    #[error("Sidecar serialization/deserialization error")]
    Sidecar(#[from] serde_json::Error),

    #[error("Vault error")]
    Vault(#[from] vault::Error),

    #[error("Remote transfer error")]
    Remote(#[from] RemoteError),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// Relative-path helpers. Vault paths are `/`-separated strings; these keep
// the string handling in one place.

pub(crate) fn rel_parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

pub(crate) fn rel_file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub(crate) fn rel_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Splits `img.png` into `("img", ".png")`; dotfiles and extension-less
/// names keep the whole name as the stem.
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Last path segment of a URL, without query or fragment.
pub(crate) fn url_file_name(url: &str) -> &str {
    let tail = rel_file_name(url);
    tail.split(['?', '#']).next().unwrap_or(tail)
}

/// Base file name without extension, used as the display label of embed
/// references.
pub(crate) fn display_label(path: &str) -> &str {
    split_extension(url_file_name(path)).0
}
