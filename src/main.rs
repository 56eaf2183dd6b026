// src/main.rs

use anyhow::Result;
use dosereport::pipeline::{self, RunConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

// Adjust the collection name if the seeded store uses a different one.
const COLLECTION: &str = "data";
const SORT_FIELD: &str = "moment";
// Row cap for the benchmark run.
const MAX_ROWS: usize = 2000;

const DB_PATH: &str = "bench/readings.db";
const TEMPLATE_PATH: &str = "bench/testdoc.docx";
const OUTPUT_PATH: &str = "bench/testdoc-filled.docx";

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();
    info!("startup");

    let cfg = RunConfig {
        db_path: PathBuf::from(DB_PATH),
        collection: COLLECTION.to_string(),
        sort_field: SORT_FIELD.to_string(),
        max_rows: MAX_ROWS,
        template_path: PathBuf::from(TEMPLATE_PATH),
        output_path: PathBuf::from(OUTPUT_PATH),
    };

    let metrics = pipeline::run(&cfg)?;

    println!("dosereport: rows={}", metrics.rows);
    println!(
        "Fetch ms={:.2}, Vars ms={:.2}, Fill+Save ms={:.2}, Total ms={:.2}",
        metrics.fetch_ms, metrics.build_ms, metrics.fill_ms, metrics.total_ms
    );
    println!("Output: {}", cfg.output_path.display());
    Ok(())
}
