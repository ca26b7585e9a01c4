use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::future::try_join_all;
use serde::Serialize;

use crate::error::ClientError;

/// Atomic counter for unique image filenames.
static IMAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque handle to an image written into the host's file system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FileHandle(pub PathBuf);

impl FileHandle {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// A generated image as the caller sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ImageRef {
    /// Data URI or URL exactly as the service returned it.
    Inline(String),
    File(FileHandle),
}

impl ImageRef {
    pub fn is_data_uri(&self) -> bool {
        matches!(self, Self::Inline(s) if s.starts_with("data:"))
    }
}

/// Host capability turning an inline data URI into a file handle.
#[async_trait]
pub trait ImageMaterializer: Send + Sync {
    async fn materialize(&self, data_uri: &str) -> Result<FileHandle, ClientError>;
}

/// A decoded `data:<mime>;base64,<payload>` URI.
#[derive(Debug, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    pub fn parse(value: &str) -> Result<Self, ClientError> {
        let rest = value
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| ClientError::DataUri("missing data: prefix".into()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| ClientError::DataUri("missing ',' separator".into()))?;

        let mut parts = meta.split(';');
        let mime_type = parts
            .next()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("image/png")
            .to_string();
        if !parts.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
            return Err(ClientError::DataUri("only base64 payloads are supported".into()));
        }

        let bytes = BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|e| ClientError::DataUri(format!("base64 decode failed: {e}")))?;

        Ok(Self { mime_type, bytes })
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            _ => "png",
        }
    }
}

/// Writes decoded images into a directory, one file per image.
#[derive(Clone, Debug)]
pub struct DirMaterializer {
    dir: PathBuf,
}

impl DirMaterializer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ImageMaterializer for DirMaterializer {
    async fn materialize(&self, data_uri: &str) -> Result<FileHandle, ClientError> {
        let decoded = DataUri::parse(data_uri)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = IMAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = self
            .dir
            .join(format!("plot_{ts}_{seq}.{}", decoded.extension()));

        tokio::fs::write(&path, &decoded.bytes).await?;
        Ok(FileHandle(path))
    }
}

/// Convert every image to a file handle, all or nothing.
pub async fn materialize_all(
    materializer: &dyn ImageMaterializer,
    images: &[String],
) -> Result<Vec<ImageRef>, ClientError> {
    let handles = try_join_all(images.iter().map(|d| materializer.materialize(d))).await?;
    Ok(handles.into_iter().map(ImageRef::File).collect())
}
