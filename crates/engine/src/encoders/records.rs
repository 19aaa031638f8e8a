//! Structured record formats: CSV, JSON and XML.

use super::text::{WORDS, sentence};
use super::{ChunkWriter, Encoder, unit_rng};
use crate::error::EncodeError;
use async_trait::async_trait;
use datamold_core::Format;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::fmt::Write as _;
use tokio::io::AsyncWrite;

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Barbara", "Claude", "Dennis", "Edsger", "Frances", "Grace", "Hedy", "Ivan",
    "John", "Ken", "Linus", "Margaret", "Niklaus", "Radia", "Shafi", "Tim", "Whitfield", "Yukihiro",
];

const LAST_NAMES: &[&str] = &[
    "Allen", "Backus", "Cerf", "Dijkstra", "Engelbart", "Floyd", "Hopper", "Kay", "Knuth",
    "Lamport", "Liskov", "McCarthy", "Perlman", "Ritchie", "Shannon", "Thompson", "Turing",
    "Wirth",
];

const CITIES: &[&str] = &[
    "Seoul", "Busan", "Tokyo", "Osaka", "Berlin", "Paris", "Lisbon", "Toronto", "Austin",
    "Denver", "Sydney", "Nairobi", "Santiago", "Oslo",
];

const DOMAINS: &[&str] = &["example.com", "example.net", "example.org", "test.io"];

fn pick<R: Rng>(rng: &mut R, items: &[&'static str]) -> &'static str {
    items.choose(rng).copied().unwrap_or_default()
}

/// One synthetic record shared by the structured formats.
#[derive(Debug, Serialize)]
struct Record {
    id: u64,
    first_name: &'static str,
    last_name: &'static str,
    email: String,
    city: &'static str,
    age: u8,
    score: f64,
    active: bool,
    tags: Vec<&'static str>,
    bio: String,
}

impl Record {
    fn random<R: Rng>(rng: &mut R, id: u64) -> Self {
        let first_name = pick(rng, FIRST_NAMES);
        let last_name = pick(rng, LAST_NAMES);
        let email = format!(
            "{}.{}{}@{}",
            first_name.to_lowercase(),
            last_name.to_lowercase(),
            rng.gen_range(1..1000),
            pick(rng, DOMAINS)
        );
        let tag_count = rng.gen_range(1..=4);
        let tags = WORDS.choose_multiple(rng, tag_count).copied().collect();
        let mut bio = String::new();
        sentence(rng, &mut bio);

        Self {
            id,
            first_name,
            last_name,
            email,
            city: pick(rng, CITIES),
            age: rng.gen_range(18..=90),
            score: (rng.gen_range(0.0..100.0_f64) * 100.0).round() / 100.0,
            active: rng.gen_bool(0.7),
            tags,
            bio,
        }
    }
}

/// Emit `header`, then records until `target_bytes` is reached, then `footer`.
///
/// `render` appends one record to the line buffer; `first` is true only for
/// the first record.
async fn write_records<F>(
    index: u64,
    target_bytes: u64,
    sink: &mut (dyn AsyncWrite + Send + Unpin),
    header: &str,
    footer: &str,
    mut render: F,
) -> Result<u64, EncodeError>
where
    F: FnMut(&Record, bool, &mut String) -> Result<(), EncodeError> + Send,
{
    let mut rng = unit_rng(index);
    let mut writer = ChunkWriter::new(sink);
    let mut line = String::new();

    writer.push(header.as_bytes()).await?;
    let mut id = 0u64;
    // At least one record per document.
    while id == 0 || writer.len() + (footer.len() as u64) < target_bytes {
        line.clear();
        let record = Record::random(&mut rng, id);
        render(&record, id == 0, &mut line)?;
        writer.push(line.as_bytes()).await?;
        id += 1;
    }
    writer.push(footer.as_bytes()).await?;

    Ok(writer.finish().await?)
}

fn csv_field(value: &str, out: &mut String) {
    if value.contains([',', '"', '\n']) {
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(value);
    }
}

fn xml_escape(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
}

/// Comma-separated records with a header row.
#[derive(Clone, Copy, Debug, Default)]
pub struct CsvEncoder;

const CSV_HEADER: &str = "id,first_name,last_name,email,city,age,score,active,tags,bio\n";

#[async_trait]
impl Encoder for CsvEncoder {
    fn format(&self) -> Format {
        Format::Csv
    }

    async fn encode(
        &self,
        index: u64,
        target_bytes: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EncodeError> {
        write_records(index, target_bytes, sink, CSV_HEADER, "", |record, _, out| {
            let _ = write!(
                out,
                "{},{},{},{},{},{},{:.2},{},",
                record.id,
                record.first_name,
                record.last_name,
                record.email,
                record.city,
                record.age,
                record.score,
                record.active
            );
            csv_field(&record.tags.join(";"), out);
            out.push(',');
            csv_field(&record.bio, out);
            out.push('\n');
            Ok(())
        })
        .await
    }
}

/// A JSON array of record objects, one per line.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoder;

#[async_trait]
impl Encoder for JsonEncoder {
    fn format(&self) -> Format {
        Format::Json
    }

    async fn encode(
        &self,
        index: u64,
        target_bytes: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EncodeError> {
        write_records(index, target_bytes, sink, "[\n", "\n]\n", |record, first, out| {
            if !first {
                out.push_str(",\n");
            }
            out.push_str(&serde_json::to_string(record)?);
            Ok(())
        })
        .await
    }
}

/// An XML document with one `<record>` element per record.
#[derive(Clone, Copy, Debug, Default)]
pub struct XmlEncoder;

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<records>\n";
const XML_FOOTER: &str = "</records>\n";

#[async_trait]
impl Encoder for XmlEncoder {
    fn format(&self) -> Format {
        Format::Xml
    }

    async fn encode(
        &self,
        index: u64,
        target_bytes: u64,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, EncodeError> {
        write_records(index, target_bytes, sink, XML_HEADER, XML_FOOTER, |record, _, out| {
            let _ = write!(
                out,
                "  <record id=\"{}\" active=\"{}\">\n    <name first=\"{}\" last=\"{}\"/>\n    <email>",
                record.id, record.active, record.first_name, record.last_name
            );
            xml_escape(&record.email, out);
            let _ = write!(
                out,
                "</email>\n    <city>{}</city>\n    <age>{}</age>\n    <score>{:.2}</score>\n    <tags>",
                record.city, record.age, record.score
            );
            for tag in &record.tags {
                out.push_str("<tag>");
                xml_escape(tag, out);
                out.push_str("</tag>");
            }
            out.push_str("</tags>\n    <bio>");
            xml_escape(&record.bio, out);
            out.push_str("</bio>\n  </record>\n");
            Ok(())
        })
        .await
    }
}
