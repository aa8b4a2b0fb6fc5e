//! Optical character recognition for attached images
//!
//! OCR is best-effort: nothing in this module returns an error. Undecodable
//! payloads, missing binaries, timeouts and empty output all come back as
//! `OcrOutcome::NoTextFound`, and the orchestrator carries on with the
//! question alone.

use crate::config::OcrConfig;
use crate::metrics;
use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::Engine;
use image::ImageFormat;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Result of running OCR on an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutcome {
    Extracted(String),
    NoTextFound,
}

impl OcrOutcome {
    /// Collapse to plain text, empty when nothing was recognized
    pub fn into_text(self) -> String {
        match self {
            OcrOutcome::Extracted(text) => text,
            OcrOutcome::NoTextFound => String::new(),
        }
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self, OcrOutcome::Extracted(_))
    }
}

/// Base64-encoded image as received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload(String);

impl ImagePayload {
    /// Wrap a base64 string; blank input means "no image"
    pub fn from_base64(encoded: impl Into<String>) -> Option<Self> {
        let encoded = encoded.into();
        if encoded.trim().is_empty() {
            None
        } else {
            Some(Self(encoded))
        }
    }

    /// Encode raw bytes (multipart uploads)
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        Some(Self(base64::engine::general_purpose::STANDARD.encode(bytes)))
    }

    pub fn as_base64(&self) -> &str {
        &self.0
    }

    /// Decode to raw bytes, `None` when the payload is not valid base64
    pub fn decode(&self) -> Option<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.0.trim())
            .ok()
    }
}

/// Image-to-text engine
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> OcrOutcome;
}

/// Decode `payload` and run `extractor` on it
pub async fn extract_payload(extractor: &dyn TextExtractor, payload: &ImagePayload) -> OcrOutcome {
    let outcome = match payload.decode() {
        Some(bytes) => extractor.extract(&bytes).await,
        None => {
            debug!("Image payload is not valid base64");
            OcrOutcome::NoTextFound
        }
    };

    metrics::record_ocr(outcome.is_extracted());
    outcome
}

/// Runs the `tesseract` binary on a PNG copy of the image
pub struct TesseractExtractor {
    binary: PathBuf,
    language: String,
    timeout: Duration,
}

impl TesseractExtractor {
    pub fn new(binary: PathBuf, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary,
            language: language.into(),
            timeout,
        }
    }

    async fn run(&self, image: &[u8]) -> anyhow::Result<String> {
        let bytes = image.to_vec();

        // Decode whatever format we were sent and hand tesseract a grayscale PNG
        let file = tokio::task::spawn_blocking(move || -> anyhow::Result<tempfile::NamedTempFile> {
            let decoded = image::load_from_memory(&bytes).context("image could not be decoded")?;
            let file = tempfile::Builder::new()
                .prefix("askdocs-ocr-")
                .suffix(".png")
                .tempfile()?;
            decoded
                .to_luma8()
                .save_with_format(file.path(), ImageFormat::Png)
                .context("failed to write temporary image")?;
            Ok(file)
        })
        .await??;

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .arg(file.path())
                .arg("stdout")
                .arg("-l")
                .arg(&self.language)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context("tesseract timed out")?
        .context("failed to run tesseract")?;

        if !output.status.success() {
            bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract(&self, image: &[u8]) -> OcrOutcome {
        match self.run(image).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    debug!("OCR found no text");
                    OcrOutcome::NoTextFound
                } else {
                    debug!(chars = text.len(), "OCR extracted text");
                    OcrOutcome::Extracted(text.to_string())
                }
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "OCR failed, continuing without image text");
                OcrOutcome::NoTextFound
            }
        }
    }
}

/// Extractor used when OCR is off or unavailable
pub struct DisabledExtractor;

#[async_trait]
impl TextExtractor for DisabledExtractor {
    async fn extract(&self, _image: &[u8]) -> OcrOutcome {
        OcrOutcome::NoTextFound
    }
}

/// Create an extractor based on configuration
pub fn create_extractor(config: &OcrConfig, timeout: Duration) -> Arc<dyn TextExtractor> {
    if !config.enabled {
        info!("OCR disabled by configuration");
        return Arc::new(DisabledExtractor);
    }

    match which::which(&config.binary) {
        Ok(path) => {
            info!(binary = %path.display(), language = %config.language, "OCR enabled");
            Arc::new(TesseractExtractor::new(path, config.language.clone(), timeout))
        }
        Err(e) => {
            warn!(binary = %config.binary, error = %e, "Tesseract not found, images will be ignored");
            Arc::new(DisabledExtractor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png_bytes() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(8, 8)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    struct CountingExtractor(AtomicUsize);

    #[async_trait]
    impl TextExtractor for CountingExtractor {
        async fn extract(&self, _image: &[u8]) -> OcrOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            OcrOutcome::Extracted("seen".to_string())
        }
    }

    #[test]
    fn test_outcome_into_text() {
        assert_eq!(OcrOutcome::Extracted("abc".into()).into_text(), "abc");
        assert_eq!(OcrOutcome::NoTextFound.into_text(), "");
    }

    #[test]
    fn test_blank_payload_is_no_image() {
        assert!(ImagePayload::from_base64("").is_none());
        assert!(ImagePayload::from_base64("   ").is_none());
        assert!(ImagePayload::from_bytes(&[]).is_none());
    }

    #[test]
    fn test_payload_from_bytes_decodes_back() {
        let payload = ImagePayload::from_bytes(b"\x89PNG raw").unwrap();
        assert_eq!(payload.decode().unwrap(), b"\x89PNG raw");
    }

    #[tokio::test]
    async fn test_invalid_base64_skips_extractor() {
        let extractor = CountingExtractor(AtomicUsize::new(0));
        let payload = ImagePayload::from_base64("%%% not base64 %%%").unwrap();

        let outcome = extract_payload(&extractor, &payload).await;

        assert_eq!(outcome, OcrOutcome::NoTextFound);
        assert_eq!(extractor.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_payload_reaches_extractor() {
        let extractor = CountingExtractor(AtomicUsize::new(0));
        let payload = ImagePayload::from_bytes(&png_bytes()).unwrap();

        let outcome = extract_payload(&extractor, &payload).await;

        assert_eq!(outcome, OcrOutcome::Extracted("seen".to_string()));
        assert_eq!(extractor.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undecodable_image_is_no_text() {
        let extractor = TesseractExtractor::new(
            PathBuf::from("/nonexistent/tesseract"),
            "eng",
            Duration::from_secs(5),
        );
        assert_eq!(extractor.extract(b"definitely not an image").await, OcrOutcome::NoTextFound);
    }

    #[tokio::test]
    async fn test_missing_binary_is_no_text() {
        let extractor = TesseractExtractor::new(
            PathBuf::from("/nonexistent/tesseract"),
            "eng",
            Duration::from_secs(5),
        );
        assert_eq!(extractor.extract(&png_bytes()).await, OcrOutcome::NoTextFound);
    }

    #[tokio::test]
    async fn test_disabled_extractor() {
        assert_eq!(DisabledExtractor.extract(&png_bytes()).await, OcrOutcome::NoTextFound);

        let config = OcrConfig {
            enabled: false,
            ..OcrConfig::default()
        };
        let extractor = create_extractor(&config, Duration::from_secs(1));
        assert_eq!(extractor.extract(&png_bytes()).await, OcrOutcome::NoTextFound);
    }

    #[cfg(unix)]
    fn fake_tesseract(dir: &tempfile::TempDir, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("tesseract");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tesseract_output_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_tesseract(&dir, r"printf '  Week 4 assignment\n\f'");
        let extractor = TesseractExtractor::new(binary, "eng", Duration::from_secs(5));

        assert_eq!(
            extractor.extract(&png_bytes()).await,
            OcrOutcome::Extracted("Week 4 assignment".to_string())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tesseract_failure_is_no_text() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_tesseract(&dir, "echo 'bad language' >&2; exit 1");
        let extractor = TesseractExtractor::new(binary, "xyz", Duration::from_secs(5));

        assert_eq!(extractor.extract(&png_bytes()).await, OcrOutcome::NoTextFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tesseract_timeout_is_no_text() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_tesseract(&dir, "sleep 5");
        let extractor = TesseractExtractor::new(binary, "eng", Duration::from_millis(200));

        assert_eq!(extractor.extract(&png_bytes()).await, OcrOutcome::NoTextFound);
    }
}
