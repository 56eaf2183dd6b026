// src/pipeline/mod.rs

use crate::docx::Docx;
use crate::store::Store;
use crate::vars::{self, Pattern};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, instrument};

/// Everything one benchmark run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub db_path: PathBuf,
    pub collection: String,
    pub sort_field: String,
    pub max_rows: usize,
    pub template_path: PathBuf,
    pub output_path: PathBuf,
}

/// Wall-clock timings for one run, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct RunMetrics {
    pub rows: usize,
    pub fetch_ms: f64,
    pub build_ms: f64,
    pub fill_ms: f64,
    pub total_ms: f64,
}

fn ms(from: Instant, to: Instant) -> f64 {
    to.duration_since(from).as_secs_f64() * 1e3
}

/// Run the fetch → build → fill pipeline once, timing each phase. The
/// first failing phase aborts the run; there are no retries.
#[instrument(level = "info", skip(cfg))]
pub fn run(cfg: &RunConfig) -> Result<RunMetrics> {
    let t0 = Instant::now();

    let store = Store::new(&cfg.db_path);
    let rows = store
        .fetch_rows(&cfg.collection, &cfg.sort_field, cfg.max_rows)
        .context("fetch phase")?;
    let t_fetch = Instant::now();

    let variables = vars::reading_table(&rows, &Pattern::default());
    let t_build = Instant::now();

    let mut docx = Docx::open(&cfg.template_path).context("fill phase: open template")?;
    docx.fill(&variables).context("fill phase")?;
    docx.save(&cfg.output_path).context("fill phase: save")?;
    let t_fill = Instant::now();

    let metrics = RunMetrics {
        rows: rows.len(),
        fetch_ms: ms(t0, t_fetch),
        build_ms: ms(t_fetch, t_build),
        fill_ms: ms(t_build, t_fill),
        total_ms: ms(t0, t_fill),
    };
    info!(
        rows = metrics.rows,
        fetch_ms = metrics.fetch_ms,
        build_ms = metrics.build_ms,
        fill_ms = metrics.fill_ms,
        "pipeline complete"
    );
    Ok(metrics)
}
