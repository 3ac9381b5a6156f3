//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one document: parse → segment →
//! summarize charts → build the knowledge store. Runs as a background
//! unit of work for the HTTP surface and synchronously for the CLI.
//!
//! A cancellation flag is checked between stages so deleting a session
//! mid-ingestion abandons the work; the deleter owns removing the
//! session directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::extract::DocumentParser;
use crate::llm::VisionModel;
use crate::models::EvidenceUnit;
use crate::segment;
use crate::store::{KnowledgeStore, STORE_FILE};
use crate::summarize;

/// Unit counts of a completed ingestion, for status reporting.
#[derive(Debug, Clone, Copy)]
pub struct IngestReport {
    pub text_units: usize,
    pub table_units: usize,
    pub image_units: usize,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.text_units + self.table_units + self.image_units
    }
}

/// Ingest one PDF into `session_dir`, producing the session's knowledge
/// store at [`STORE_FILE`]. Any existing store is replaced, never
/// merged.
pub async fn ingest_document(
    parser: &dyn DocumentParser,
    embedder: &dyn Embedder,
    vision: &dyn VisionModel,
    config: &Config,
    pdf_path: &Path,
    session_dir: &Path,
    cancelled: &AtomicBool,
) -> Result<IngestReport> {
    let image_dir = session_dir.join("images");
    std::fs::create_dir_all(&image_dir)
        .with_context(|| format!("cannot create image dir: {}", image_dir.display()))?;

    let elements = parser
        .parse(pdf_path, &image_dir)
        .await
        .context("document parsing failed")?;
    check_cancelled(cancelled)?;

    let (texts, tables) = segment::segment_elements(&elements, &config.chunking);

    let (summaries, image_paths) = summarize::summarize_images(vision, &image_dir)
        .await
        .context("chart summarization failed")?;
    check_cancelled(cancelled)?;

    let report = IngestReport {
        text_units: texts.len(),
        table_units: tables.len(),
        image_units: summaries.len(),
    };

    let mut units: Vec<EvidenceUnit> = Vec::with_capacity(report.total());
    units.extend(texts.into_iter().map(EvidenceUnit::text));
    units.extend(tables.into_iter().map(EvidenceUnit::table));
    units.extend(
        summaries
            .into_iter()
            .zip(image_paths)
            .map(|(summary, path)| EvidenceUnit::image(summary, path)),
    );

    let store_path = store_path(session_dir);
    remove_store(&store_path)?;

    let store = KnowledgeStore::build(&store_path, &units, embedder, config.embedding.batch_size)
        .await
        .context("knowledge store build failed")?;
    store.close().await;
    check_cancelled(cancelled)?;

    Ok(report)
}

/// Location of a session's knowledge store.
pub fn store_path(session_dir: &Path) -> PathBuf {
    session_dir.join(STORE_FILE)
}

fn check_cancelled(cancelled: &AtomicBool) -> Result<()> {
    if cancelled.load(Ordering::Relaxed) {
        bail!("ingestion cancelled");
    }
    Ok(())
}

/// Remove a previous store file and its WAL siblings so a rebuild starts
/// from an empty destination.
fn remove_store(store_path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = store_path.as_os_str().to_os_string();
        name.push(suffix);
        let path = PathBuf::from(name);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("cannot remove old store file: {}", path.display()))?;
        }
    }
    Ok(())
}
