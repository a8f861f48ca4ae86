use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::remote::{Fetched, Fetcher, RemoteError, Uploader};
use crate::settings::Settings;
use crate::template::{self, TemplateContext};
use crate::vault::Vault;

use super::{
    Error, ImageRecord, Result, SIDECAR_SUFFIX, display_label, rel_file_name, rel_join,
    rel_parent, split_extension, url_file_name,
};

/// On-disk shape of the sidecar file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    #[serde(default)]
    md_path: String,
    #[serde(default)]
    images: BTreeMap<String, ImageRecord>,
}

/// Borrowed counterpart of [`Sidecar`] for writing.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SidecarRef<'a> {
    md_path: &'a str,
    images: &'a BTreeMap<String, ImageRecord>,
}

/// Bookkeeping for the images of a single document.
///
/// The manager owns the in-memory map from vault-relative local path to
/// [`ImageRecord`] and mirrors it to the document's sidecar file; the
/// in-memory map is the source of truth. Asset folder and sidecar locations
/// are always derived from the current document path, never stored, so they
/// cannot drift.
pub struct ImageManager {
    vault: Arc<Vault>,
    settings: Arc<Settings>,
    uploader: Arc<dyn Uploader>,
    fetcher: Arc<dyn Fetcher>,
    md_path: String,
    images: BTreeMap<String, ImageRecord>,
}

impl ImageManager {
    pub fn new(
        vault: Arc<Vault>,
        settings: Arc<Settings>,
        uploader: Arc<dyn Uploader>,
        fetcher: Arc<dyn Fetcher>,
        md_path: impl Into<String>,
    ) -> Self {
        ImageManager {
            vault,
            settings,
            uploader,
            fetcher,
            md_path: md_path.into(),
            images: BTreeMap::new(),
        }
    }

    /// Path of the owning document.
    pub fn md_path(&self) -> &str {
        &self.md_path
    }

    /// The tracked records, keyed by vault-relative local path.
    pub fn images(&self) -> &BTreeMap<String, ImageRecord> {
        &self.images
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Vault-relative asset folder for the current document path: the
    /// document's directory joined with the resolved folder template.
    pub fn image_folder_path(&self) -> String {
        let ctx = TemplateContext::for_document(&self.md_path, self.vault.name());
        let folder = template::substitute(&self.settings.folder_template, &ctx);
        if folder.is_empty() {
            rel_parent(&self.md_path).to_string()
        } else {
            rel_join(rel_parent(&self.md_path), &folder)
        }
    }

    fn sidecar_path(&self) -> Result<String> {
        let stem = Path::new(&self.md_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::NoFileStem(PathBuf::from(&self.md_path)))?;
        Ok(rel_join(
            &self.image_folder_path(),
            &format!("{stem}{SIDECAR_SUFFIX}"),
        ))
    }

    /// Loads the sidecar if it exists, replacing the in-memory map with its
    /// contents.
    ///
    /// Returns `Ok(false)` when there is no sidecar — the normal state for
    /// a document without images. Malformed sidecar content is an error and
    /// leaves the map untouched.
    #[instrument(skip(self), fields(md_path = %self.md_path))]
    pub async fn load_from_json(&mut self) -> Result<bool> {
        let sidecar = self.sidecar_path()?;
        if !self.vault.exists(&sidecar).await {
            debug!("No sidecar to load");
            return Ok(false);
        }
        let content = self.vault.read_to_string(&sidecar).await?;
        let parsed: Sidecar = serde_json::from_str(&content)?;
        if !parsed.md_path.is_empty() && parsed.md_path != self.md_path {
            warn!(recorded = %parsed.md_path, "sidecar records a different document path");
        }
        let mut images = parsed.images;
        for (key, record) in images.iter_mut() {
            record.normalize(key);
        }
        self.images = images;
        debug!(count = self.images.len(), "Sidecar loaded");
        Ok(true)
    }

    /// Persists the map, or removes sidecar and asset folder when the map
    /// is empty. Sidecar and folder exist exactly while at least one image
    /// is tracked; both directions are idempotent.
    #[instrument(skip(self), fields(md_path = %self.md_path))]
    pub async fn save_to_json(&self) -> Result<()> {
        let folder = self.image_folder_path();
        let sidecar = self.sidecar_path()?;
        if self.images.is_empty() {
            if self.vault.exists(&sidecar).await {
                self.vault.remove_file(&sidecar).await?;
            }
            if self.vault.exists(&folder).await {
                self.vault.remove_dir_all(&folder).await?;
            }
            debug!("Empty map; sidecar and asset folder removed");
            return Ok(());
        }
        self.vault.create_dir_all(&folder).await?;
        let content = serde_json::to_string_pretty(&SidecarRef {
            md_path: &self.md_path,
            images: &self.images,
        })?;
        self.vault.write(&sidecar, &content).await?;
        debug!(count = self.images.len(), "Sidecar saved");
        Ok(())
    }

    /// Copies `source` into the asset folder and starts tracking it.
    ///
    /// The original filename is preserved; a name collision is resolved by
    /// appending a timestamp before the extension — an existing image is
    /// never overwritten. Returns the reference to embed in the document:
    /// the remote URL when auto-upload is enabled and succeeds, otherwise
    /// the path relative to the document's directory. Copy failures are
    /// returned to the caller.
    #[instrument(skip(self, source), fields(md_path = %self.md_path, source = %source.display()))]
    pub async fn add_image(&mut self, source: &Path) -> Result<String> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidPath(source.display().to_string()))?;

        let folder = self.image_folder_path();
        self.vault.create_dir_all(&folder).await?;
        let dest = self.free_destination(&folder, file_name).await;
        self.vault.copy_into(source, &dest).await?;

        // Size is descriptive metadata; failing to stat it is not fatal.
        let size = self.vault.file_size(&dest).await.ok();
        let record = ImageRecord::new(dest.clone(), file_name, size);
        self.images.insert(dest.clone(), record);
        self.save_to_json().await?;
        debug!(local_path = %dest, "Image added");

        if self.settings.auto_upload {
            match self.upload_image(&dest).await {
                Ok(url) => return Ok(url),
                Err(e) => {
                    warn!(error = %e, "auto-upload failed; falling back to local reference")
                }
            }
        }
        Ok(self.doc_relative(&dest))
    }

    /// First non-colliding destination for `file_name` inside `folder`.
    async fn free_destination(&self, folder: &str, file_name: &str) -> String {
        let direct = rel_join(folder, file_name);
        if !self.vault.exists(&direct).await {
            return direct;
        }
        let (stem, ext) = split_extension(file_name);
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let mut candidate = rel_join(folder, &format!("{stem}-{stamp}{ext}"));
        let mut n = 1u32;
        while self.vault.exists(&candidate).await {
            candidate = rel_join(folder, &format!("{stem}-{stamp}-{n}{ext}"));
            n += 1;
        }
        candidate
    }

    /// Removes an image from bookkeeping, deleting the local file
    /// best-effort. Returns `Ok(false)` for an unknown path. A physical
    /// deletion failure never blocks the bookkeeping update.
    #[instrument(skip(self), fields(md_path = %self.md_path))]
    pub async fn remove_image(&mut self, local_path: &str) -> Result<bool> {
        if !self.images.contains_key(local_path) {
            return Ok(false);
        }
        if self.vault.exists(local_path).await {
            if let Err(e) = self.vault.remove_file(local_path).await {
                warn!(local_path, error = %e, "could not delete image file; record removed anyway");
            }
        }
        self.images.remove(local_path);
        self.save_to_json().await?;
        debug!(local_path, "Image removed");
        Ok(true)
    }

    /// Uploads a single tracked image and persists the new state
    /// immediately. Returns the assigned URL.
    #[instrument(skip(self), fields(md_path = %self.md_path))]
    pub async fn upload_image(&mut self, local_path: &str) -> Result<String> {
        if !self.images.contains_key(local_path) {
            return Err(Error::InvalidPath(local_path.to_string()));
        }
        let abs = self.vault.resolve(local_path)?;
        let mut urls = self.uploader.upload(std::slice::from_ref(&abs)).await?;
        if urls.len() != 1 {
            return Err(RemoteError::UrlCountMismatch {
                sent: 1,
                received: urls.len(),
            }
            .into());
        }
        let url = urls.remove(0);

        if let Some(record) = self.images.get_mut(local_path) {
            record.mark_uploaded(url.as_str());
        }
        self.save_to_json().await?;

        if self.settings.delete_after_upload && self.vault.exists(local_path).await {
            // The record keeps its local path; a later download restores
            // the file in place.
            if let Err(e) = self.vault.remove_file(local_path).await {
                warn!(local_path, error = %e, "could not delete local copy after upload");
            }
        }
        debug!(local_path, url = %url, "Image uploaded");
        Ok(url)
    }

    /// Uploads every record not yet uploaded. Failures are isolated per
    /// record and each success is persisted immediately, so a failure loses
    /// no completed uploads. `Ok(true)` only if every upload succeeded.
    #[instrument(skip(self), fields(md_path = %self.md_path))]
    pub async fn upload_all_images(&mut self) -> Result<bool> {
        let pending: Vec<String> = self
            .images
            .iter()
            .filter(|(_, record)| !record.is_uploaded)
            .map(|(key, _)| key.clone())
            .collect();
        if pending.is_empty() {
            debug!("Nothing to upload");
            return Ok(true);
        }
        let mut all_ok = true;
        for local_path in pending {
            if let Err(e) = self.upload_image(&local_path).await {
                warn!(local_path = %local_path, error = %e, "upload failed");
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    /// Restores local copies for uploaded records whose file is missing or
    /// was never recorded. Fetches run concurrently; results are applied
    /// per record (failures isolated) and persisted once at the end.
    /// `Ok(true)` only if every download succeeded.
    #[instrument(skip(self), fields(md_path = %self.md_path))]
    pub async fn download_all_images(&mut self) -> Result<bool> {
        let mut candidates: Vec<(String, String)> = Vec::new();
        for (key, record) in &self.images {
            if !record.is_uploaded || record.remote_path.is_empty() {
                continue;
            }
            if record.local_path.is_empty() || !self.vault.exists(&record.local_path).await {
                candidates.push((key.clone(), record.remote_path.clone()));
            }
        }
        if candidates.is_empty() {
            debug!("Nothing to download");
            return Ok(true);
        }

        let fetches = join_all(candidates.iter().map(|(_, url)| {
            let fetcher = Arc::clone(&self.fetcher);
            let url = url.clone();
            async move { fetcher.fetch(&url).await }
        }))
        .await;

        let folder = self.image_folder_path();
        let mut all_ok = true;
        for ((key, _), fetched) in candidates.into_iter().zip(fetches) {
            let fetched = match fetched {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(local_path = %key, error = %e, "download failed");
                    all_ok = false;
                    continue;
                }
            };
            if let Err(e) = self.apply_download(&key, &folder, fetched).await {
                warn!(local_path = %key, error = %e, "could not store downloaded image");
                all_ok = false;
            }
        }
        self.save_to_json().await?;
        Ok(all_ok)
    }

    /// Writes a fetched image to disk and updates (possibly re-keys) its
    /// record.
    async fn apply_download(&mut self, key: &str, folder: &str, fetched: Fetched) -> Result<()> {
        let Some(record) = self.images.get(key) else {
            return Ok(());
        };
        let dest = if !record.local_path.is_empty() {
            let dest = record.local_path.clone();
            let parent = rel_parent(&dest);
            if !parent.is_empty() {
                self.vault.create_dir_all(parent).await?;
            }
            dest
        } else {
            self.vault.create_dir_all(folder).await?;
            let name = download_file_name(record, &fetched);
            self.free_destination(folder, &name).await
        };
        self.vault.write_bytes(&dest, &fetched.data).await?;

        if let Some(mut record) = self.images.remove(key) {
            record.size = Some(fetched.data.len() as u64);
            record.mark_downloaded(dest.clone());
            self.images.insert(dest, record);
        }
        Ok(())
    }

    /// Moves the asset folder and sidecar to the location implied by the
    /// document's new path.
    ///
    /// On failure the document path (and with it the derived folder and
    /// sidecar locations) and the in-memory map roll back; files already
    /// copied to the new location are not removed.
    #[instrument(skip(self), fields(old = %self.md_path, new = new_md_path))]
    pub async fn rename_image_folder(&mut self, new_md_path: &str) -> Result<()> {
        if self.images.is_empty() {
            debug!("No images; rename is bookkeeping only");
            self.md_path = new_md_path.to_string();
            return Ok(());
        }
        let old_folder = self.image_folder_path();
        let old_sidecar = self.sidecar_path()?;
        let old_md_path = std::mem::replace(&mut self.md_path, new_md_path.to_string());
        let saved_images = self.images.clone();
        match self.relocate(&old_folder, &old_sidecar).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.md_path = old_md_path;
                self.images = saved_images;
                Err(e)
            }
        }
    }

    async fn relocate(&mut self, old_folder: &str, old_sidecar: &str) -> Result<()> {
        let new_folder = self.image_folder_path();
        let new_sidecar = self.sidecar_path()?;

        if !self.vault.exists(old_folder).await {
            // Recoverable inconsistency: records exist but their folder is
            // gone. Converge on the new location instead of failing.
            warn!(old_folder, "asset folder missing on rename; nothing to move");
            self.images = rekeyed(std::mem::take(&mut self.images), old_folder, &new_folder);
            self.save_to_json().await?;
            return Ok(());
        }

        if new_folder == old_folder {
            // The folder template did not depend on the renamed component;
            // only the sidecar filename changes.
            self.save_to_json().await?;
            if new_sidecar != old_sidecar && self.vault.exists(old_sidecar).await {
                self.vault.remove_file(old_sidecar).await?;
            }
            debug!("Asset folder unchanged; sidecar relocated");
            return Ok(());
        }

        self.vault.create_dir_all(&new_folder).await?;
        let old_sidecar_name = rel_file_name(old_sidecar).to_string();
        for name in self.vault.list_files(old_folder).await? {
            if name == old_sidecar_name {
                continue; // re-persisted at the new location below
            }
            self.vault
                .copy(&rel_join(old_folder, &name), &rel_join(&new_folder, &name))
                .await?;
        }

        self.images = rekeyed(std::mem::take(&mut self.images), old_folder, &new_folder);
        self.save_to_json().await?;
        self.vault.remove_dir_all(old_folder).await?;
        debug!(new_folder = %new_folder, "Asset folder moved");
        Ok(())
    }

    /// Embed reference for a tracked image: the remote URL when uploaded,
    /// otherwise the path relative to the document's directory. `None` for
    /// an unknown path. The label is the image's base name without
    /// extension.
    pub fn markdown_reference(&self, local_path: &str) -> Option<String> {
        let record = self.images.get(local_path)?;
        if record.is_uploaded && !record.remote_path.is_empty() {
            Some(format!(
                "![{}]({})",
                display_label(&record.remote_path),
                record.remote_path
            ))
        } else {
            Some(format!(
                "![{}]({})",
                display_label(&record.local_path),
                self.doc_relative(&record.local_path)
            ))
        }
    }

    /// A path relative to the document's directory, suitable for embedding
    /// directly in document text. Paths outside the document's directory
    /// stay vault-relative.
    fn doc_relative(&self, local_path: &str) -> String {
        let dir = rel_parent(&self.md_path);
        if dir.is_empty() {
            return local_path.to_string();
        }
        match local_path.strip_prefix(&format!("{dir}/")) {
            Some(rest) => rest.to_string(),
            None => local_path.to_string(),
        }
    }
}

/// Rebuilds the map with keys under `old_folder` rewritten to `new_folder`,
/// in one pass. Records keep every other field.
fn rekeyed(
    images: BTreeMap<String, ImageRecord>,
    old_folder: &str,
    new_folder: &str,
) -> BTreeMap<String, ImageRecord> {
    let prefix = format!("{old_folder}/");
    images
        .into_iter()
        .map(|(key, mut record)| match key.strip_prefix(&prefix) {
            Some(rest) => {
                let new_key = rel_join(new_folder, rest);
                record.local_path = new_key.clone();
                (new_key, record)
            }
            None => (key, record),
        })
        .collect()
}

/// Filename for a download that has no recorded local path: the original
/// name, else the URL's basename, else a generated token; the remote
/// Content-Type supplies an extension when the name lacks one.
fn download_file_name(record: &ImageRecord, fetched: &Fetched) -> String {
    let mut name = record
        .original_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| url_file_name(&record.remote_path).to_string());
    if name.is_empty() {
        name = format!("image-{}", template::random_token());
    }
    let (_, ext) = split_extension(&name);
    if ext.is_empty() {
        if let Some(ext) = fetched.extension() {
            name = format!("{name}.{ext}");
        }
    }
    name
}
