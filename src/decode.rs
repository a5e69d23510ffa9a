//! Source fetching, decoding and the per-placement image cache.
//!
//! Every appended placement gets its source decoded once, off the event loop.
//! Until that finishes the placement is `Pending` in the [`ImageCache`]; the
//! exporter only draws `Ready` entries. Embedded sources decode straight from
//! their bytes, and so do `data:` URLs (base64 or percent-encoded). Other URL
//! sources are read from disk when they are `file://` URLs or bare paths;
//! remote URLs are never fetched and end up `Failed`.

#[cfg(test)]
#[path = "decode_test.rs"]
mod decode_test;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::RgbaImage;
use percent_encoding::percent_decode_str;

use crate::store::{ImageSource, PlacementId};

/// Why a source could not be turned into pixels.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("reading source failed: {0}")]
    Read(#[from] io::Error),

    #[error("unsupported source URL: {0}")]
    UnsupportedUrl(String),

    #[error("malformed data URL: {0}")]
    DataUrl(String),

    #[error("decode task aborted: {0}")]
    Aborted(String),
}

impl DecodeError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Image(_) => "E_DECODE",
            Self::Read(_) => "E_SOURCE_READ",
            Self::UnsupportedUrl(_) => "E_UNSUPPORTED_URL",
            Self::DataUrl(_) => "E_DATA_URL",
            Self::Aborted(_) => "E_DECODE_ABORTED",
        }
    }
}

/// Local path a URL source points at, if it is one we can read.
///
/// `file://` URLs are percent-decoded; bare paths are taken literally.
#[must_use]
pub fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(percent_decode_str(path).decode_utf8_lossy().into_owned()));
    }
    if url.contains("://") || url.starts_with("data:") {
        return None;
    }
    Some(PathBuf::from(url))
}

/// Fetch the encoded bytes of a source.
///
/// # Errors
///
/// [`DecodeError::UnsupportedUrl`] for remote URLs, [`DecodeError::DataUrl`]
/// for a malformed `data:` URL, or [`DecodeError::Read`] if a local file
/// cannot be read.
pub async fn fetch_source(source: &ImageSource) -> Result<Arc<[u8]>, DecodeError> {
    match source {
        ImageSource::Embedded { bytes, .. } => Ok(Arc::clone(bytes)),
        ImageSource::Url(url) => {
            if let Some(rest) = url.trim().strip_prefix("data:") {
                return Ok(data_url_payload(rest)?.into());
            }
            let Some(path) = local_path(url) else {
                return Err(DecodeError::UnsupportedUrl(url.clone()));
            };
            Ok(tokio::fs::read(path).await?.into())
        }
    }
}

/// Payload of a `data:` URL, given everything after the `data:` prefix.
///
/// # Errors
///
/// [`DecodeError::DataUrl`] when there is no `,` separator or the base64
/// payload is invalid.
pub fn data_url_payload(rest: &str) -> Result<Vec<u8>, DecodeError> {
    let Some((meta, payload)) = rest.split_once(',') else {
        return Err(DecodeError::DataUrl("missing ',' separator".into()));
    };
    let raw: Vec<u8> = percent_decode_str(payload).collect();
    if !meta.split(';').any(|param| param.trim().eq_ignore_ascii_case("base64")) {
        return Ok(raw);
    }
    let compact: Vec<u8> = raw.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
    STANDARD.decode(compact).map_err(|e| DecodeError::DataUrl(e.to_string()))
}

/// Decode encoded image bytes to RGBA pixels. CPU-bound.
///
/// # Errors
///
/// [`DecodeError::Image`] when the bytes are not a supported image.
pub fn decode_bytes(bytes: &[u8]) -> Result<RgbaImage, DecodeError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Fetch and decode a source. Decoding runs on the blocking pool.
///
/// # Errors
///
/// Any [`DecodeError`] from fetching or decoding.
pub async fn load_source(source: ImageSource) -> Result<Arc<RgbaImage>, DecodeError> {
    let bytes = fetch_source(&source).await?;
    match tokio::task::spawn_blocking(move || decode_bytes(&bytes)).await {
        Ok(decoded) => Ok(Arc::new(decoded?)),
        Err(e) => Err(DecodeError::Aborted(e.to_string())),
    }
}

/// Decode state of one placement's source.
#[derive(Debug, Clone)]
pub enum Decoded {
    Pending,
    Ready(Arc<RgbaImage>),
    Failed(String),
}

/// Decoded pixels keyed by placement id.
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: HashMap<PlacementId, Decoded>,
}

impl ImageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a decode was started.
    pub fn mark_pending(&mut self, id: PlacementId) {
        self.entries.insert(id, Decoded::Pending);
    }

    /// Store a decode result. Results for ids never marked pending are dropped.
    ///
    /// Returns `true` when the result was stored.
    pub fn resolve(
        &mut self,
        id: PlacementId,
        result: Result<Arc<RgbaImage>, DecodeError>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        *entry = match result {
            Ok(image) => Decoded::Ready(image),
            Err(e) => Decoded::Failed(e.to_string()),
        };
        true
    }

    #[must_use]
    pub fn get(&self, id: &PlacementId) -> Option<&Decoded> {
        self.entries.get(id)
    }

    /// Decoded pixels, only when ready.
    #[must_use]
    pub fn ready(&self, id: &PlacementId) -> Option<&Arc<RgbaImage>> {
        match self.entries.get(id) {
            Some(Decoded::Ready(image)) => Some(image),
            _ => None,
        }
    }

    /// Number of decodes still running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.values().filter(|d| matches!(d, Decoded::Pending)).count()
    }
}
