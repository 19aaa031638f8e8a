//! Noise images: PNG and animated GIF.
//!
//! Image codecs need the whole frame in memory, so pixels are rendered and
//! compressed on the blocking pool and the finished file is then streamed to
//! the sink. Dimensions are capped, which keeps large units bounded in memory
//! at the cost of undershooting their target size.

use super::{Encoder, unit_rng};
use crate::error::EncodeError;
use async_trait::async_trait;
use datamold_core::Format;
use image::codecs::gif::{GifEncoder as GifWriter, Repeat};
use image::codecs::png::{CompressionType, FilterType, PngEncoder as PngWriter};
use image::{Delay, ExtendedColorType, Frame, ImageEncoder as _, Rgba, RgbaImage};
use rand::Rng;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Largest PNG edge in pixels.
const MAX_PNG_SIDE: u32 = 4096;

/// Largest GIF frame edge in pixels.
const MAX_GIF_SIDE: u32 = 512;

/// Most frames in one GIF.
const MAX_GIF_FRAMES: u64 = 64;

/// Colours in a GIF palette. At most 256 so frames skip quantization.
const GIF_PALETTE_SIZE: usize = 16;

fn isqrt(value: u64) -> u64 {
    (value as f64).sqrt() as u64
}

/// Width and height of an RGB image holding about `target_bytes` of pixels.
fn png_dimensions(target_bytes: u64) -> (u32, u32) {
    let pixels = (target_bytes / 3).max(1);
    let side = isqrt(pixels).clamp(1, u64::from(MAX_PNG_SIDE));
    let height = (pixels / side).clamp(1, u64::from(MAX_PNG_SIDE));
    (side as u32, height as u32)
}

/// Frame edge and frame count for a GIF of about `target_bytes`.
///
/// Random 16-colour pixels compress to roughly half a byte each.
fn gif_layout(target_bytes: u64) -> (u32, u64) {
    let pixels = target_bytes.saturating_mul(2).max(1);
    let side = isqrt(pixels).clamp(16, u64::from(MAX_GIF_SIDE));
    let frames = pixels.div_ceil(side * side).clamp(1, MAX_GIF_FRAMES);
    (side as u32, frames)
}

fn render_png(index: u64, target_bytes: u64) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = png_dimensions(target_bytes);
    let mut rng = unit_rng(index);
    let mut pixels = vec![0u8; width as usize * height as usize * 3];
    rng.fill(&mut pixels[..]);

    let mut buf = Vec::with_capacity(pixels.len() + 1024);
    let encoder = PngWriter::new_with_quality(&mut buf, CompressionType::Fast, FilterType::NoFilter);
    encoder.write_image(&pixels, width, height, ExtendedColorType::Rgb8)?;
    Ok(buf)
}

fn render_gif(index: u64, target_bytes: u64) -> Result<Vec<u8>, EncodeError> {
    let (side, frame_count) = gif_layout(target_bytes);
    let mut rng = unit_rng(index);
    let palette: Vec<Rgba<u8>> = (0..GIF_PALETTE_SIZE)
        .map(|_| Rgba([rng.r#gen(), rng.r#gen(), rng.r#gen(), 255]))
        .collect();

    let mut buf = Vec::new();
    {
        let mut encoder = GifWriter::new_with_speed(&mut buf, 30);
        encoder.set_repeat(Repeat::Infinite)?;
        for _ in 0..frame_count {
            let image = RgbaImage::from_fn(side, side, |_, _| {
                palette[rng.gen_range(0..GIF_PALETTE_SIZE)]
            });
            let frame = Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(100, 1));
            encoder.encode_frame(frame)?;
        }
    }
    Ok(buf)
}

async fn encode_blocking<F>(
    index: u64,
    target_bytes: u64,
    sink: &mut (dyn AsyncWrite + Send + Unpin),
    render: F,
) -> Result<u64, EncodeError>
where
    F: FnOnce(u64, u64) -> Result<Vec<u8>, EncodeError> + Send + 'static,
{
    let bytes = tokio::task::spawn_blocking(move || render(index, target_bytes))
        .await
        .map_err(|e| EncodeError::Task(e.to_string()))??;

    sink.write_all(&bytes).await?;
    sink.flush().await?;
    Ok(bytes.len() as u64)
}

/// Random RGB noise as a PNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngEncoder;

#[async_trait]
impl Encoder for PngEncoder {
    fn format(&self) -> Format {
        Format::Png
    }

    async fn encode(
        &self,
        index: u64,
        target_bytes: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EncodeError> {
        encode_blocking(index, target_bytes, sink, render_png).await
    }
}

/// Looping GIF animation of palette noise.
#[derive(Clone, Copy, Debug, Default)]
pub struct GifEncoder;

#[async_trait]
impl Encoder for GifEncoder {
    fn format(&self) -> Format {
        Format::Gif
    }

    async fn encode(
        &self,
        index: u64,
        target_bytes: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EncodeError> {
        encode_blocking(index, target_bytes, sink, render_gif).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_dimensions_track_target() {
        assert_eq!(png_dimensions(0), (1, 1));
        assert_eq!(png_dimensions(3 * 100 * 100), (100, 100));
        let (w, h) = png_dimensions(u64::MAX);
        assert_eq!((w, h), (MAX_PNG_SIDE, MAX_PNG_SIDE));
    }

    #[test]
    fn gif_layout_is_capped() {
        assert_eq!(gif_layout(0), (16, 1));
        let (side, frames) = gif_layout(u64::MAX);
        assert_eq!(side, MAX_GIF_SIDE);
        assert_eq!(frames, MAX_GIF_FRAMES);
    }

    #[tokio::test]
    async fn png_has_signature_and_decodes() {
        let mut sink = Vec::new();
        let written = PngEncoder.encode(5, 30_000, &mut sink).await.unwrap();

        assert_eq!(written, sink.len() as u64);
        assert_eq!(&sink[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory_with_format(&sink, image::ImageFormat::Png).unwrap();
        assert_eq!(decoded.width(), 100);
        // Noise does not compress, so the file lands near the target.
        assert!(written >= 30_000);
    }

    #[tokio::test]
    async fn gif_has_signature_and_decodes() {
        let mut sink = Vec::new();
        let written = GifEncoder.encode(5, 20_000, &mut sink).await.unwrap();

        assert_eq!(written, sink.len() as u64);
        assert_eq!(&sink[..6], b"GIF89a");
        let decoded = image::load_from_memory_with_format(&sink, image::ImageFormat::Gif).unwrap();
        assert_eq!(decoded.width(), 200);
    }
}
