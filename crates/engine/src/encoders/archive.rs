//! Gzip-compressed text archive.

use super::text::paragraph;
use super::{CHUNK_SIZE, Encoder, unit_rng};
use crate::error::EncodeError;
use async_trait::async_trait;
use datamold_core::Format;
use flate2::Compression;
use flate2::write::GzEncoder as GzWriter;
use std::io::Write;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Gzip stream of text paragraphs.
///
/// `target_bytes` bounds the compressed size. Compressed output is drained
/// to the sink as it is produced, so memory stays at about one chunk.
#[derive(Clone, Copy, Debug, Default)]
pub struct GzEncoder;

#[async_trait]
impl Encoder for GzEncoder {
    fn format(&self) -> Format {
        Format::Gz
    }

    async fn encode(
        &self,
        index: u64,
        target_bytes: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EncodeError> {
        let mut rng = unit_rng(index);
        let mut gz = GzWriter::new(Vec::with_capacity(CHUNK_SIZE), Compression::fast());
        let mut text = String::new();
        let mut written = 0u64;

        loop {
            let pending = gz.get_ref().len() as u64;
            if written + pending >= target_bytes {
                break;
            }

            text.clear();
            while text.len() < CHUNK_SIZE {
                paragraph(&mut rng, &mut text);
            }
            gz.write_all(text.as_bytes())?;

            let compressed = std::mem::take(gz.get_mut());
            if !compressed.is_empty() {
                sink.write_all(&compressed).await?;
                written += compressed.len() as u64;
            }
        }

        let tail = gz.finish()?;
        sink.write_all(&tail).await?;
        sink.flush().await?;
        Ok(written + tail.len() as u64)
    }
}
