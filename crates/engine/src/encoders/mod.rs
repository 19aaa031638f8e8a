//! Artifact encoders.
//!
//! One encoder per [`Format`]. Each writes roughly `target_bytes` of seeded
//! pseudo-random content into an async sink, so the same unit index always
//! produces the same artifact.

mod archive;
mod raster;
mod records;
mod text;

pub use self::archive::GzEncoder;
pub use self::raster::{GifEncoder, PngEncoder};
pub use self::records::{CsvEncoder, JsonEncoder, XmlEncoder};
pub use self::text::TxtEncoder;

use crate::error::EncodeError;
use async_trait::async_trait;
use datamold_core::Format;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Bytes accumulated before each write to the sink.
const CHUNK_SIZE: usize = 64 * 1024;

/// Produces one artifact per unit index.
#[async_trait]
pub trait Encoder: Send + Sync {
    fn format(&self) -> Format;

    /// File extension for produced artifacts.
    fn extension(&self) -> &'static str {
        self.format().extension()
    }

    /// Write one artifact to `sink`, returning the number of bytes written.
    async fn encode(
        &self,
        index: u64,
        target_bytes: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EncodeError>;
}

/// Encoder for `format`.
pub fn encoder_for(format: Format) -> Arc<dyn Encoder> {
    match format {
        Format::Txt => Arc::new(TxtEncoder),
        Format::Csv => Arc::new(CsvEncoder),
        Format::Json => Arc::new(JsonEncoder),
        Format::Xml => Arc::new(XmlEncoder),
        Format::Png => Arc::new(PngEncoder),
        Format::Gif => Arc::new(GifEncoder),
        Format::Gz => Arc::new(GzEncoder),
    }
}

/// Deterministic generator for the unit at `index`.
fn unit_rng(index: u64) -> StdRng {
    StdRng::seed_from_u64(index.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0xD1B5_4A32_D192_ED03)
}

/// Buffers small writes and tracks how many bytes reached the sink.
struct ChunkWriter<'a> {
    sink: &'a mut (dyn AsyncWrite + Send + Unpin),
    buf: Vec<u8>,
    written: u64,
}

impl<'a> ChunkWriter<'a> {
    fn new(sink: &'a mut (dyn AsyncWrite + Send + Unpin)) -> Self {
        Self {
            sink,
            buf: Vec::with_capacity(CHUNK_SIZE),
            written: 0,
        }
    }

    /// Bytes accepted so far, buffered or not.
    fn len(&self) -> u64 {
        self.written + self.buf.len() as u64
    }

    async fn push(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() >= CHUNK_SIZE {
            self.flush_buf().await?;
        }
        Ok(())
    }

    async fn flush_buf(&mut self) -> std::io::Result<()> {
        if !self.buf.is_empty() {
            self.sink.write_all(&self.buf).await?;
            self.written += self.buf.len() as u64;
            self.buf.clear();
        }
        Ok(())
    }

    async fn finish(mut self) -> std::io::Result<u64> {
        self.flush_buf().await?;
        self.sink.flush().await?;
        Ok(self.written)
    }
}
