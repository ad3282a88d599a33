//! Media library sink
//!
//! Finished media is handed off here: a movie file once the backend closes
//! it, or encoded still-image bytes straight from a capture. The session
//! core only depends on the trait; `FolderLibrary` is the bundled
//! implementation that files assets into a directory with a JSON metadata
//! sidecar.

use crate::capture::traits::VideoOrientation;
use crate::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Reference to a saved asset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    /// Library-assigned asset id
    pub id: Uuid,

    /// Where the asset landed
    pub path: PathBuf,
}

/// Sink for finished media
///
/// Contract: `write_video` consumes a closed file on disk; the caller owns
/// (and deletes) the source file after the call returns, success or failure.
/// Writes are not retried by the core.
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    async fn write_video(&self, path: &Path) -> CaptureResult<AssetRef>;

    async fn write_image(
        &self,
        bytes: &[u8],
        orientation: VideoOrientation,
    ) -> CaptureResult<AssetRef>;
}

/// Sidecar metadata written next to each saved asset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetMetadata {
    id: Uuid,
    kind: String,
    byte_size: u64,
    saved_at: DateTime<Utc>,
    orientation: Option<VideoOrientation>,
}

/// Filesystem-backed media library
pub struct FolderLibrary {
    root: PathBuf,
}

impl FolderLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn write_failure(err: impl std::fmt::Display) -> CaptureError {
        CaptureError::LibraryWriteFailure(err.to_string())
    }

    async fn write_sidecar(&self, asset_path: &Path, metadata: &AssetMetadata) -> CaptureResult<()> {
        let sidecar = asset_path.with_extension("json");
        let json = serde_json::to_vec_pretty(metadata).map_err(Self::write_failure)?;
        tokio::fs::write(&sidecar, json)
            .await
            .map_err(Self::write_failure)
    }

    fn stamp() -> String {
        Utc::now().format("%Y%m%d-%H%M%S%3f").to_string()
    }
}

#[async_trait]
impl MediaLibrary for FolderLibrary {
    async fn write_video(&self, path: &Path) -> CaptureResult<AssetRef> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(Self::write_failure)?;

        let dest = self.root.join(format!("movie-{}.mov", Self::stamp()));
        let byte_size = tokio::fs::copy(path, &dest)
            .await
            .map_err(Self::write_failure)?;

        let asset = AssetRef {
            id: Uuid::new_v4(),
            path: dest.clone(),
        };
        self.write_sidecar(
            &dest,
            &AssetMetadata {
                id: asset.id,
                kind: "video".to_string(),
                byte_size,
                saved_at: Utc::now(),
                orientation: None,
            },
        )
        .await?;

        tracing::info!(path = %dest.display(), bytes = byte_size, "movie saved to library");
        Ok(asset)
    }

    async fn write_image(
        &self,
        bytes: &[u8],
        orientation: VideoOrientation,
    ) -> CaptureResult<AssetRef> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(Self::write_failure)?;

        let dest = self.root.join(format!("photo-{}.png", Self::stamp()));
        tokio::fs::write(&dest, bytes)
            .await
            .map_err(Self::write_failure)?;

        let asset = AssetRef {
            id: Uuid::new_v4(),
            path: dest.clone(),
        };
        self.write_sidecar(
            &dest,
            &AssetMetadata {
                id: asset.id,
                kind: "image".to_string(),
                byte_size: bytes.len() as u64,
                saved_at: Utc::now(),
                orientation: Some(orientation),
            },
        )
        .await?;

        tracing::info!(path = %dest.display(), bytes = bytes.len(), "still image saved to library");
        Ok(asset)
    }
}
