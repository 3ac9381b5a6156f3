//! PDF parsing boundary.
//!
//! The [`DocumentParser`] trait is the seam between finsight and the PDF
//! layout-analysis layer: `parse` yields typed elements in document order
//! and writes any extracted raster images into the supplied directory.
//! The segmenter downstream only distinguishes table elements from
//! everything else.
//!
//! [`PdfTextParser`] is the default backend, built on `pdf-extract`. It
//! is text-only: tables are recognized with a column-alignment heuristic
//! and no images are produced. Richer parsers (or test fakes) implement
//! the same trait.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

/// Element type reported by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Prose,
    Heading,
    Table,
}

/// One parsed element of a document, in reading order.
#[derive(Debug, Clone)]
pub struct Element {
    pub kind: ElementKind,
    pub text: String,
}

/// Parser contract: ordered elements plus extracted images as a side
/// effect. Failure means the document is unusable; no partial element
/// list is returned.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, file: &Path, image_dir: &Path) -> Result<Vec<Element>>;
}

/// Returns true when the bytes plausibly begin a PDF document.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

/// Text-only PDF parser backed by `pdf-extract`.
pub struct PdfTextParser;

#[async_trait]
impl DocumentParser for PdfTextParser {
    async fn parse(&self, file: &Path, _image_dir: &Path) -> Result<Vec<Element>> {
        let path = PathBuf::from(file);
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await?
            .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}: {}", file.display(), e))?;

        Ok(classify_blocks(&text))
    }
}

/// Split raw extracted text into blank-line-separated blocks and assign
/// each a kind.
fn classify_blocks(text: &str) -> Vec<Element> {
    let mut elements = Vec::new();

    for block in text.split("\n\n") {
        let trimmed = block.trim();
        if trimmed.is_empty() {
            continue;
        }

        let kind = if looks_tabular(trimmed) {
            ElementKind::Table
        } else if looks_heading(trimmed) {
            ElementKind::Heading
        } else {
            ElementKind::Prose
        };

        elements.push(Element {
            kind,
            text: trimmed.to_string(),
        });
    }

    elements
}

/// A block is tabular when it has at least two lines and most lines
/// contain column gaps (tabs or runs of 2+ spaces between cells).
fn looks_tabular(block: &str) -> bool {
    let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 2 {
        return false;
    }

    let columnar = lines
        .iter()
        .filter(|line| line.contains('\t') || line.trim().contains("  "))
        .count();

    columnar * 2 > lines.len()
}

fn looks_heading(block: &str) -> bool {
    let mut lines = block.lines();
    let first = lines.next().unwrap_or("");
    lines.next().is_none() && first.len() < 80 && !first.trim_end().ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_magic() {
        assert!(looks_like_pdf(b"%PDF-1.7 ..."));
        assert!(!looks_like_pdf(b"PK\x03\x04"));
        assert!(!looks_like_pdf(b""));
    }

    #[test]
    fn test_classify_prose_and_heading() {
        let text = "Q3 Highlights\n\nRevenue grew strongly across all segments during the quarter.";
        let elements = classify_blocks(text);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].kind, ElementKind::Heading);
        assert_eq!(elements[1].kind, ElementKind::Prose);
    }

    #[test]
    fn test_classify_table() {
        let text = "Segment  Revenue  Margin\nCloud    $2.1M    34%\nRetail   $3.1M    21%";
        let elements = classify_blocks(text);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].kind, ElementKind::Table);
    }

    #[test]
    fn test_empty_text_yields_no_elements() {
        assert!(classify_blocks("").is_empty());
        assert!(classify_blocks("\n\n  \n\n").is_empty());
    }

    #[test]
    fn test_order_preserved() {
        let text = "Intro paragraph one.\n\nA  1\nB  2\n\nClosing paragraph.";
        let elements = classify_blocks(text);
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].kind, ElementKind::Prose);
        assert_eq!(elements[1].kind, ElementKind::Table);
        assert_eq!(elements[2].kind, ElementKind::Prose);
    }
}
