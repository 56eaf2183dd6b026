// src/bin/seed_readings.rs
//
// Populate the benchmark store with synthetic out-of-order readings and
// drop a matching table template next to it, so `dosereport` can run
// against a fresh checkout.

use anyhow::Result;
use chrono::Utc;
use dosereport::docx::{Package, DOCUMENT_PART};
use dosereport::vars::READING_KEYS;
use serde_json::{json, Value};
use std::path::Path;
use std::{env, fs};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const DB_PATH: &str = "bench/readings.db";
const TEMPLATE_PATH: &str = "bench/testdoc.docx";
const COLLECTION: &str = "data";

fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env_filter).init();

    let count: usize = env::args()
        .nth(1)
        .map(|a| a.parse())
        .transpose()?
        .unwrap_or(2000);

    fs::create_dir_all("bench")?;
    let store = dosereport::store::Store::new(DB_PATH);
    store.insert(COLLECTION, &synthetic_readings(count))?;
    info!(count, db = DB_PATH, "seeded readings");

    if !Path::new(TEMPLATE_PATH).exists() {
        write_template(TEMPLATE_PATH)?;
        info!(template = TEMPLATE_PATH, "wrote table template");
    }
    Ok(())
}

/// Deterministic xorshift, good enough for jittered sample values.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

fn synthetic_readings(count: usize) -> Vec<Value> {
    let base = Utc::now().timestamp_millis() - (count as i64) * 60_000;
    let mut rng = Rng(0x5eed_d05e_0001u64);
    (0..count)
        .map(|i| {
            // stride the timestamps so insertion order is not sorted order
            let slot = (i * 7 + 3) % count.max(1);
            let cpm = 15 + rng.next() % 40;
            let usvh = cpm as f64 * 0.0065;
            let mut doc = json!({
                "deviceId": format!("gmc-320-{:02}", i % 4),
                "cpm": cpm.to_string(),
                "uSvh": format!("{usvh:.3}"),
                "mRh": format!("{:.4}", usvh / 10.0),
                "mrhLevel": if cpm > 45 { "elevated" } else { "normal" },
                "alarm": (cpm > 50).to_string(),
                "moment": base + slot as i64 * 60_000,
            });
            // every ninth reading loses its dose fields, as in the wild
            if i % 9 == 0 {
                let map = doc.as_object_mut().expect("doc is an object");
                map.remove("mRh");
                map.remove("mrhLevel");
            }
            doc
        })
        .collect()
}

fn write_template(path: &str) -> Result<()> {
    let header: String = ["Device", "CPM", "uSv/h", "mR/h", "Level", "Alarm", "Moment"]
        .iter()
        .map(|h| format!("<w:tc><w:p><w:r><w:t>{h}</w:t></w:r></w:p></w:tc>"))
        .collect();
    let cells: String = READING_KEYS
        .iter()
        .map(|k| format!("<w:tc><w:p><w:r><w:t>${{{k}}}</w:t></w:r></w:p></w:tc>"))
        .collect();
    let body = format!(
        "<w:p><w:r><w:t>Dose rate readings</w:t></w:r></w:p>\
         <w:tbl><w:tr>{header}</w:tr><w:tr>{cells}</w:tr></w:tbl>"
    );

    let mut package = Package::default();
    package.set_part(
        "[Content_Types].xml",
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
            r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
            r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
            r#"</Types>"#
        )
        .as_bytes()
        .to_vec(),
    );
    package.set_part(
        "_rels/.rels",
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
            r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
            r#"</Relationships>"#
        )
        .as_bytes()
        .to_vec(),
    );
    package.set_part(
        DOCUMENT_PART,
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        )
        .into_bytes(),
    );
    package.save(path)
}
