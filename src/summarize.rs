//! Visual evidence summarizer.
//!
//! Turns chart images extracted during parsing into natural-language
//! descriptions that can be embedded and retrieved like any other text.
//! The vision model decides what is a chart: anything else answers with
//! the sentinel and is dropped.
//!
//! Every image is an isolated unit of work. A failed model call skips
//! that image with a warning and never discards summaries already
//! produced for the others.

use std::path::Path;

use anyhow::Result;

use crate::llm::VisionModel;

/// Fixed instruction for the vision model.
pub const CHART_PROMPT: &str = "You are a financial analyst. Analyze this chart or graph. \
Describe the chart type, axis labels, trends, and numeric values. \
If the image is not a chart or graph, respond with exactly NOT_A_CHART.";

/// Sentinel the model returns for non-chart images.
const NOT_A_CHART: &str = "NOT_A_CHART";

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Summarize every chart image in `image_dir`, in filename order.
///
/// Returns parallel `(summaries, source_paths)` vectors, one entry per
/// image the model judged to be a chart. A missing or empty directory
/// yields two empty vectors; a report without figures is not an error.
pub async fn summarize_images(
    vision: &dyn VisionModel,
    image_dir: &Path,
) -> Result<(Vec<String>, Vec<String>)> {
    let mut summaries = Vec::new();
    let mut paths = Vec::new();

    if !image_dir.is_dir() {
        return Ok((summaries, paths));
    }

    let mut files: Vec<_> = std::fs::read_dir(image_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    for path in files {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Warning: could not read image {}: {}", path.display(), e);
                continue;
            }
        };

        let mime = match path.extension().and_then(|e| e.to_str()) {
            Some("png") | Some("PNG") => "image/png",
            _ => "image/jpeg",
        };

        match vision.describe(CHART_PROMPT, &bytes, mime).await {
            Ok(description) => {
                let trimmed = description.trim();
                if trimmed.eq_ignore_ascii_case(NOT_A_CHART) {
                    continue;
                }
                summaries.push(trimmed.to_string());
                paths.push(path.display().to_string());
            }
            Err(e) => {
                eprintln!(
                    "Warning: chart analysis failed for {}: {}",
                    path.display(),
                    e
                );
                continue;
            }
        }
    }

    Ok((summaries, paths))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Vision fake keyed on image content.
    struct ScriptedVision {
        responses: HashMap<Vec<u8>, Result<String, String>>,
    }

    #[async_trait]
    impl VisionModel for ScriptedVision {
        async fn describe(&self, _prompt: &str, image: &[u8], _mime: &str) -> Result<String> {
            match self.responses.get(image) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(msg)) => bail!("{}", msg),
                None => bail!("unexpected image"),
            }
        }
    }

    fn scripted(entries: &[(&[u8], Result<&str, &str>)]) -> ScriptedVision {
        ScriptedVision {
            responses: entries
                .iter()
                .map(|(bytes, result)| {
                    (
                        bytes.to_vec(),
                        (*result).map(str::to_string).map_err(str::to_string),
                    )
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty_not_error() {
        let tmp = TempDir::new().unwrap();
        let vision = scripted(&[]);
        let (summaries, paths) = summarize_images(&vision, &tmp.path().join("no-such-dir"))
            .await
            .unwrap();
        assert!(summaries.is_empty());
        assert!(paths.is_empty());
    }

    #[tokio::test]
    async fn test_non_chart_sentinel_skipped_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.jpg"), b"logo").unwrap();
        std::fs::write(tmp.path().join("b.jpg"), b"chart").unwrap();

        let vision = scripted(&[
            (b"logo".as_slice(), Ok("  not_a_chart  ")),
            (b"chart".as_slice(), Ok("Bar chart of revenue by quarter")),
        ]);

        let (summaries, paths) = summarize_images(&vision, tmp.path()).await.unwrap();
        assert_eq!(summaries, vec!["Bar chart of revenue by quarter".to_string()]);
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("b.jpg"));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("01.png"), b"first").unwrap();
        std::fs::write(tmp.path().join("02.png"), b"broken").unwrap();
        std::fs::write(tmp.path().join("03.png"), b"third").unwrap();

        let vision = scripted(&[
            (b"first".as_slice(), Ok("Line chart, revenue trending up")),
            (b"broken".as_slice(), Err("model unreachable")),
            (b"third".as_slice(), Ok("Pie chart of segment mix")),
        ]);

        let (summaries, paths) = summarize_images(&vision, tmp.path()).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(paths.len(), 2);
        // Filename order, pairing preserved.
        assert!(paths[0].ends_with("01.png"));
        assert_eq!(summaries[0], "Line chart, revenue trending up");
        assert!(paths[1].ends_with("03.png"));
        assert_eq!(summaries[1], "Pie chart of segment mix");
    }

    #[tokio::test]
    async fn test_non_image_files_ignored() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"text").unwrap();
        std::fs::write(tmp.path().join("data.csv"), b"csv").unwrap();

        let vision = scripted(&[]);
        let (summaries, _) = summarize_images(&vision, tmp.path()).await.unwrap();
        assert!(summaries.is_empty());
    }
}
