//! Content-directory editor adapter
//!
//! Treats a directory tree as the editor's content browser. Each imported
//! asset gets a `<asset>.manifest.json` sidecar recording the representation
//! it came from, which is what `list_assets` reads back.

use async_trait::async_trait;
use bridge_traits::{
    editor::{EditorAsset, EditorBridge, ImportManifest, ImportRequest},
    error::{BridgeError, Result},
};
use bytes::Bytes;
use core_async::fs;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

const MANIFEST_SUFFIX: &str = ".manifest.json";
const PARTIAL_SUFFIX: &str = ".partial";

/// File-backed [`EditorBridge`].
///
/// Asset paths are `/`-separated and relative to the content directory.
pub struct FileSystemEditor {
    content_dir: PathBuf,
}

impl FileSystemEditor {
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
        }
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    fn resolve(&self, asset_path: &str) -> Result<PathBuf> {
        let relative = Path::new(asset_path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BridgeError::OperationFailed(format!(
                "Asset path escapes the content directory: {}",
                asset_path
            )));
        }
        Ok(self.content_dir.join(relative))
    }

    fn asset_path_of(&self, file: &Path) -> Option<String> {
        let relative = file.strip_prefix(&self.content_dir).ok()?;
        let parts: Vec<_> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    fn manifest_path(file: &Path) -> PathBuf {
        let mut name = file.as_os_str().to_owned();
        name.push(MANIFEST_SUFFIX);
        PathBuf::from(name)
    }

    fn fingerprint(data: &[u8]) -> String {
        let digest = Sha256::digest(data);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    async fn read_manifest(file: &Path) -> Option<ImportManifest> {
        let raw = fs::read(Self::manifest_path(file)).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(path = ?file, error = %e, "Ignoring unreadable import manifest");
                None
            }
        }
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);
        fs::write(&partial, data).await?;
        fs::rename(&partial, path).await?;
        Ok(())
    }

    fn is_sidecar(file: &Path) -> bool {
        file.to_str()
            .map(|s| s.ends_with(MANIFEST_SUFFIX) || s.ends_with(PARTIAL_SUFFIX))
            .unwrap_or(true)
    }
}

fn not_found_or_io(e: std::io::Error, what: &str) -> BridgeError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BridgeError::NotFound(what.to_string())
    } else {
        BridgeError::Io(e)
    }
}

#[async_trait]
impl EditorBridge for FileSystemEditor {
    async fn import_file(&self, request: ImportRequest) -> Result<EditorAsset> {
        let destination = self.resolve(&request.destination)?;

        if !request.options.replace_existing && fs::metadata(&destination).await.is_ok() {
            return Err(BridgeError::OperationFailed(format!(
                "Asset already exists: {}",
                request.destination
            )));
        }

        let content = fs::read(&request.source_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BridgeError::OperationFailed(format!(
                    "Published file missing: {}",
                    request.source_path
                ))
            } else {
                BridgeError::Io(e)
            }
        })?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        Self::write_atomic(&destination, &content).await?;

        let manifest = serde_json::to_vec_pretty(&request.manifest)
            .map_err(|e| BridgeError::OperationFailed(format!("Manifest encoding: {}", e)))?;
        Self::write_atomic(&Self::manifest_path(&destination), &manifest).await?;

        info!(
            destination = %request.destination,
            format = %request.format,
            size = content.len(),
            "Imported asset"
        );

        Ok(EditorAsset {
            path: request.destination,
            fingerprint: Self::fingerprint(&content),
            manifest: Some(request.manifest),
        })
    }

    async fn export_asset(&self, path: &str) -> Result<Bytes> {
        let file = self.resolve(path)?;
        let data = fs::read(&file)
            .await
            .map_err(|e| not_found_or_io(e, path))?;
        debug!(path, size = data.len(), "Exported asset");
        Ok(Bytes::from(data))
    }

    async fn list_assets(&self, root: &str) -> Result<Vec<EditorAsset>> {
        let root_dir = self.resolve(root)?;
        if fs::metadata(&root_dir).await.is_err() {
            return Ok(Vec::new());
        }

        let mut assets = Vec::new();
        let mut pending = vec![root_dir];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(file);
                    continue;
                }
                if Self::is_sidecar(&file) {
                    continue;
                }
                let Some(path) = self.asset_path_of(&file) else {
                    continue;
                };
                let content = fs::read(&file).await?;
                assets.push(EditorAsset {
                    path,
                    fingerprint: Self::fingerprint(&content),
                    manifest: Self::read_manifest(&file).await,
                });
            }
        }

        assets.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(assets)
    }

    async fn remove_asset(&self, path: &str) -> Result<()> {
        let file = self.resolve(path)?;
        fs::remove_file(&file)
            .await
            .map_err(|e| not_found_or_io(e, path))?;
        if let Err(e) = fs::remove_file(Self::manifest_path(&file)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(BridgeError::Io(e));
            }
        }

        // Drop the containing directory once it is empty.
        if let Some(parent) = file.parent() {
            if parent != self.content_dir {
                let mut entries = fs::read_dir(parent).await?;
                if entries.next_entry().await?.is_none() {
                    fs::remove_dir(parent).await?;
                }
            }
        }

        info!(path, "Removed asset");
        Ok(())
    }
}
