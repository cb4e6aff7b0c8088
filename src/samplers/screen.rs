use std::io::Cursor;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use xcap::Monitor;

use crate::error::{MnemosyneError, Result};
use crate::models::{NewCapture, Source};

use super::{PollOutcome, Sampler, SamplerContext};

const TARGET_WIDTH: u32 = 1280;
const TARGET_HEIGHT: u32 = 720;
const HASH_SIZE: u32 = 8;

/// A difference hash computed by hand to avoid pulling in a second image
/// crate version just for perceptual hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DHash {
    pub bits: u64,
}

impl DHash {
    pub fn compute(img: &DynamicImage) -> Self {
        let small = img.resize_exact(HASH_SIZE + 1, HASH_SIZE, FilterType::Lanczos3);
        let gray = small.to_luma8();

        let mut bits: u64 = 0;
        for y in 0..HASH_SIZE {
            for x in 0..HASH_SIZE {
                let left = gray.get_pixel(x, y)[0];
                let right = gray.get_pixel(x + 1, y)[0];
                if left > right {
                    bits |= 1 << (y * HASH_SIZE + x);
                }
            }
        }
        DHash { bits }
    }

    pub fn distance(&self, other: &DHash) -> u32 {
        (self.bits ^ other.bits).count_ones()
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.bits)
    }
}

fn capture_primary() -> anyhow::Result<(Vec<u8>, DHash)> {
    let monitors = Monitor::all()?;
    let monitor = monitors
        .into_iter()
        .find(|m| m.is_primary().unwrap_or(false))
        .or_else(|| Monitor::all().ok()?.into_iter().next())
        .ok_or_else(|| anyhow::anyhow!("no monitor found"))?;

    let raw_image = monitor.capture_image()?;
    let dynamic = DynamicImage::ImageRgba8(raw_image);
    let resized = dynamic.resize(TARGET_WIDTH, TARGET_HEIGHT, FilterType::Lanczos3);
    let hash = DHash::compute(&resized);

    let mut jpeg_buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut jpeg_buf, 85);
    resized.to_rgb8().write_with_encoder(encoder)?;

    Ok((jpeg_buf.into_inner(), hash))
}

/// Periodic screenshot capture with perceptual-hash dedup, per `spec.md`
/// §4.3. Text extraction happens later, in the OCR pipeline — this sampler
/// only ever produces a `raw_data_path`, never `text_data`.
pub struct ScreenSampler {
    last_hash: Option<DHash>,
}

impl ScreenSampler {
    pub fn new() -> Self {
        Self { last_hash: None }
    }
}

impl Default for ScreenSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sampler for ScreenSampler {
    fn source(&self) -> Source {
        Source::Screen
    }

    async fn poll(&mut self, ctx: &SamplerContext<'_>) -> Result<PollOutcome> {
        let (jpeg_data, hash) =
            tokio::task::spawn_blocking(capture_primary)
                .await
                .map_err(|e| MnemosyneError::Other(e.into()))?
                .map_err(MnemosyneError::Other)?;

        if let Some(prev) = &self.last_hash {
            if prev.distance(&hash) < ctx.dedup_hash_threshold {
                return Ok(PollOutcome::Skipped);
            }
        }
        self.last_hash = Some(hash.clone());

        let path = ctx
            .blobs
            .write(Source::Screen, "jpg", &jpeg_data)
            .map_err(MnemosyneError::Other)?;

        let capture = NewCapture::new(Source::Screen)
            .with_blob(path.to_string_lossy().to_string())
            .with_meta("dhash", hash.to_hex());
        Ok(PollOutcome::Captured(capture))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_hashes_have_zero_distance() {
        let img = DynamicImage::new_rgb8(16, 16);
        let a = DHash::compute(&img);
        let b = DHash::compute(&img);
        assert_eq!(a.distance(&b), 0);
    }
}
