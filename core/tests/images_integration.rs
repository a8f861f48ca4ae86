use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::{TempDir, tempdir};
use tokio::fs;

use magpie_core::images::ManagerRegistry;
use magpie_core::remote::{Fetched, Fetcher, RemoteError, Uploader};
use magpie_core::settings::Settings;
use magpie_core::vault::Vault;

/// Uploader double: hands out deterministic URLs and records every call.
struct FakeUploader {
    calls: Mutex<usize>,
}

impl FakeUploader {
    fn new() -> Arc<Self> {
        Arc::new(FakeUploader {
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, files: &[PathBuf]) -> Result<Vec<String>, RemoteError> {
        *self.calls.lock().unwrap() += 1;
        Ok(files
            .iter()
            .map(|f| {
                format!(
                    "https://img.example/{}",
                    f.file_name().unwrap().to_string_lossy()
                )
            })
            .collect())
    }
}

/// Fetcher double serving fixed bytes for any URL.
struct FakeFetcher {
    data: Vec<u8>,
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> Result<Fetched, RemoteError> {
        Ok(Fetched {
            data: self.data.clone(),
            content_type: Some("image/png".parse().unwrap()),
        })
    }
}

async fn setup_vault() -> (TempDir, Arc<Vault>) {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("notes")).await.unwrap();
    fs::write(dir.path().join("notes/a.md"), "# note a")
        .await
        .unwrap();
    let vault = Arc::new(Vault::open(dir.path()).await.unwrap());
    (dir, vault)
}

fn setup_registry(
    vault: &Arc<Vault>,
    settings: Settings,
    uploader: Arc<FakeUploader>,
) -> ManagerRegistry {
    ManagerRegistry::new(
        Arc::clone(vault),
        Arc::new(settings),
        uploader,
        Arc::new(FakeFetcher {
            data: b"fetched-bytes".to_vec(),
        }),
    )
}

async fn write_source(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, bytes).await.unwrap();
    path
}

#[tokio::test]
async fn integration_full_image_lifecycle() {
    let (dir, vault) = setup_vault().await;
    let source_dir = tempdir().unwrap();
    let uploader = FakeUploader::new();
    let mut registry = setup_registry(&vault, Settings::default(), uploader.clone());

    // 1. Add an image: folder, file, and sidecar appear.
    let source = write_source(&source_dir, "img.png", b"png-bytes").await;
    let manager = registry.manager("notes/a.md").await;
    let reference = manager.add_image(&source).await.unwrap();
    assert_eq!(reference, "_assets.a/img.png");
    assert!(dir.path().join("notes/_assets.a/img.png").exists());
    assert!(dir.path().join("notes/_assets.a/a.images.json").exists());
    assert_eq!(
        manager
            .markdown_reference("notes/_assets.a/img.png")
            .as_deref(),
        Some("![img](_assets.a/img.png)")
    );

    // 2. Upload everything; the reference switches to the remote URL.
    assert!(manager.upload_all_images().await.unwrap());
    assert_eq!(uploader.calls(), 1);
    assert_eq!(
        manager
            .markdown_reference("notes/_assets.a/img.png")
            .as_deref(),
        Some("![img](https://img.example/img.png)")
    );
    // Uploading again is a no-op.
    assert!(manager.upload_all_images().await.unwrap());
    assert_eq!(uploader.calls(), 1);

    // 3. Rename the document; assets and cache key follow.
    assert!(registry.rename("notes/a.md", "notes/b.md").await.unwrap());
    assert!(!dir.path().join("notes/_assets.a").exists());
    assert!(dir.path().join("notes/_assets.b/img.png").exists());
    assert!(dir.path().join("notes/_assets.b/b.images.json").exists());

    // 4. Delete the local copy, then download it back.
    fs::remove_file(dir.path().join("notes/_assets.b/img.png"))
        .await
        .unwrap();
    let manager = registry.manager("notes/b.md").await;
    assert!(manager.download_all_images().await.unwrap());
    let restored = fs::read(dir.path().join("notes/_assets.b/img.png"))
        .await
        .unwrap();
    assert_eq!(restored, b"fetched-bytes");

    // 5. Remove the last image: sidecar and folder disappear.
    assert!(manager
        .remove_image("notes/_assets.b/img.png")
        .await
        .unwrap());
    assert!(!dir.path().join("notes/_assets.b").exists());
}

#[tokio::test]
async fn integration_sidecar_survives_restart() {
    let (dir, vault) = setup_vault().await;
    let source_dir = tempdir().unwrap();
    let uploader = FakeUploader::new();

    {
        let mut registry = setup_registry(&vault, Settings::default(), uploader.clone());
        let manager = registry.manager("notes/a.md").await;
        manager
            .add_image(&write_source(&source_dir, "one.png", b"1").await)
            .await
            .unwrap();
        manager
            .add_image(&write_source(&source_dir, "two.png", b"22").await)
            .await
            .unwrap();
        manager.upload_all_images().await.unwrap();
    }

    // A fresh registry (a new session) sees the persisted state.
    let mut registry = setup_registry(&vault, Settings::default(), FakeUploader::new());
    let manager = registry.manager("notes/a.md").await;
    assert_eq!(manager.images().len(), 2);
    assert!(manager.images().values().all(|r| r.is_uploaded));
    assert_eq!(
        manager
            .markdown_reference("notes/_assets.a/two.png")
            .as_deref(),
        Some("![two](https://img.example/two.png)")
    );

    // The sidecar itself is stable, indented JSON with the expected shape.
    let sidecar = fs::read_to_string(dir.path().join("notes/_assets.a/a.images.json"))
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&sidecar).unwrap();
    assert_eq!(parsed["mdPath"], "notes/a.md");
    assert!(parsed["images"]["notes/_assets.a/one.png"]["isUploaded"]
        .as_bool()
        .unwrap());
    assert!(sidecar.contains("\n  "), "sidecar should be pretty-printed");
}

#[tokio::test]
async fn integration_auto_upload_with_local_deletion() {
    let (dir, vault) = setup_vault().await;
    let source_dir = tempdir().unwrap();
    let uploader = FakeUploader::new();
    let settings = Settings {
        auto_upload: true,
        delete_after_upload: true,
        ..Settings::default()
    };
    let mut registry = setup_registry(&vault, settings, uploader.clone());

    let source = write_source(&source_dir, "shot.png", b"png-bytes").await;
    let manager = registry.manager("notes/a.md").await;
    let reference = manager.add_image(&source).await.unwrap();

    assert_eq!(reference, "https://img.example/shot.png");
    assert_eq!(uploader.calls(), 1);
    // The local copy is gone but still tracked for later re-download.
    assert!(!dir.path().join("notes/_assets.a/shot.png").exists());
    let record = &manager.images()["notes/_assets.a/shot.png"];
    assert!(record.is_uploaded);
    assert_eq!(record.local_path, "notes/_assets.a/shot.png");

    assert!(manager.download_all_images().await.unwrap());
    assert!(dir.path().join("notes/_assets.a/shot.png").exists());
}

#[tokio::test]
async fn integration_two_documents_are_independent() {
    let (dir, vault) = setup_vault().await;
    fs::write(dir.path().join("notes/c.md"), "# note c")
        .await
        .unwrap();
    let source_dir = tempdir().unwrap();
    let mut registry = setup_registry(&vault, Settings::default(), FakeUploader::new());

    let source = write_source(&source_dir, "img.png", b"x").await;
    registry
        .manager("notes/a.md")
        .await
        .add_image(&source)
        .await
        .unwrap();
    registry
        .manager("notes/c.md")
        .await
        .add_image(&source)
        .await
        .unwrap();

    assert!(dir.path().join("notes/_assets.a/img.png").exists());
    assert!(dir.path().join("notes/_assets.c/img.png").exists());

    // Emptying one document leaves the other untouched.
    registry
        .manager("notes/a.md")
        .await
        .remove_image("notes/_assets.a/img.png")
        .await
        .unwrap();
    assert!(!dir.path().join("notes/_assets.a").exists());
    assert!(dir.path().join("notes/_assets.c/img.png").exists());
}
