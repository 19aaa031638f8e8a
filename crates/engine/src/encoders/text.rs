//! Plain-text paragraphs.

use super::{ChunkWriter, Encoder, unit_rng};
use crate::error::EncodeError;
use async_trait::async_trait;
use datamold_core::Format;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::io::AsyncWrite;

pub(crate) const WORDS: &[&str] = &[
    "artisan", "bespoke", "biodiesel", "bitters", "brunch", "cardigan", "chambray", "cliche",
    "cornhole", "craft", "denim", "distillery", "dreamcatcher", "echo", "ethical", "flannel",
    "forage", "gastropub", "gentrify", "hashtag", "heirloom", "hoodie", "iceland", "irony",
    "jianbing", "kale", "kombucha", "lomo", "lumbersexual", "meditation", "mixtape", "mustache",
    "normcore", "offal", "organic", "paleo", "pickled", "pinterest", "poutine", "quinoa",
    "raclette", "ramps", "readymade", "salvia", "schlitz", "seitan", "selvage", "shoreditch",
    "skateboard", "slow-carb", "sriracha", "sustainable", "synth", "tattooed", "thundercats",
    "tofu", "tote", "truffaut", "typewriter", "umami", "vegan", "vinyl", "wayfarers", "yuccie",
];

/// Append one sentence of 10 to 20 words to `out`.
pub(crate) fn sentence<R: Rng>(rng: &mut R, out: &mut String) {
    let count = rng.gen_range(10..=20);
    for i in 0..count {
        let word = WORDS.choose(rng).copied().unwrap_or("lorem");
        if i == 0 {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        } else {
            out.push(' ');
            out.push_str(word);
        }
    }
    out.push('.');
}

/// Append one paragraph of up to ten sentences, newline terminated.
pub(crate) fn paragraph<R: Rng>(rng: &mut R, out: &mut String) {
    let count = rng.gen_range(3..=10);
    for i in 0..count {
        if i > 0 {
            out.push(' ');
        }
        sentence(rng, out);
    }
    out.push('\n');
}

/// Free-form text, one paragraph per line.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxtEncoder;

#[async_trait]
impl Encoder for TxtEncoder {
    fn format(&self) -> Format {
        Format::Txt
    }

    async fn encode(
        &self,
        index: u64,
        target_bytes: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EncodeError> {
        let mut rng = unit_rng(index);
        let mut writer = ChunkWriter::new(sink);
        let mut line = String::new();

        while writer.len() < target_bytes {
            line.clear();
            paragraph(&mut rng, &mut line);
            writer.push(line.as_bytes()).await?;
        }

        Ok(writer.finish().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_at_least_target_in_whole_lines() {
        let mut sink = Vec::new();
        let written = TxtEncoder.encode(1, 10_000, &mut sink).await.unwrap();

        assert!(written >= 10_000);
        assert_eq!(written, sink.len() as u64);
        let text = String::from_utf8(sink).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.lines().all(|line| line.ends_with('.')));
    }

    #[tokio::test]
    async fn zero_target_writes_nothing() {
        let mut sink = Vec::new();
        assert_eq!(TxtEncoder.encode(0, 0, &mut sink).await.unwrap(), 0);
        assert!(sink.is_empty());
    }
}
