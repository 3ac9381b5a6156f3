//! End-to-end pipeline tests.
//!
//! These tests prove the full flow (parse, segment, chart summary,
//! store build, history-aware retrieval, grounded answer) through the
//! actual library entry points, with the parser and both models replaced
//! by deterministic fakes. The segmenter, store, and retrieval logic run
//! for real.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use finsight::config::Config;
use finsight::embedding::Embedder;
use finsight::extract::{DocumentParser, Element, ElementKind};
use finsight::ingest::{ingest_document, store_path};
use finsight::llm::{ChatMessage, ChatModel, VisionModel};
use finsight::models::{SourceKind, Turn};
use finsight::rag;
use finsight::store::KnowledgeStore;

// ─── Fake parser ────────────────────────────────────────────────────

/// Parser double for a one-page report: a heading, a revenue paragraph,
/// a margin table, and one extracted chart image.
struct OnePageReport;

#[async_trait]
impl DocumentParser for OnePageReport {
    async fn parse(&self, _file: &Path, image_dir: &Path) -> Result<Vec<Element>> {
        std::fs::create_dir_all(image_dir)?;
        std::fs::write(image_dir.join("figure-1.jpg"), b"chart-bytes")?;

        Ok(vec![
            Element {
                kind: ElementKind::Heading,
                text: "Q3 Financial Highlights".to_string(),
            },
            Element {
                kind: ElementKind::Prose,
                text: "Revenue grew 12% to $5.2M in Q3, driven by continued strength in \
                       subscription renewals and a one-time licensing deal closed in September. \
                       Operating expenses were held flat against the prior quarter."
                    .to_string(),
            },
            Element {
                kind: ElementKind::Table,
                text: "Metric  Q2  Q3\nGross margin  31%  34%\nHeadcount  118  121".to_string(),
            },
        ])
    }
}

// ─── Fake embedder ──────────────────────────────────────────────────

/// Deterministic bag-of-words embedder. The constant last dimension
/// keeps every vector non-zero so cosine similarity is always defined.
struct VocabEmbedder;

const VOCAB: [&str; 8] = [
    "revenue", "grew", "12%", "$5.2m", "margin", "chart", "quarterly", "dividend",
];

#[async_trait]
impl Embedder for VocabEmbedder {
    fn model_name(&self) -> &str {
        "vocab-test"
    }
    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let mut v: Vec<f32> = VOCAB
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .collect();
                v.push(1.0);
                v
            })
            .collect())
    }
}

// ─── Fake vision model ──────────────────────────────────────────────

struct ChartVision;

#[async_trait]
impl VisionModel for ChartVision {
    async fn describe(&self, _prompt: &str, _image: &[u8], _mime: &str) -> Result<String> {
        Ok("Bar chart of quarterly revenue: Q3 revenue $5.2M, up 12% year over year.".to_string())
    }
}

// ─── Fake chat model ────────────────────────────────────────────────

/// Chat double: rewrite calls return a scripted standalone question;
/// grounding calls answer from the supplied context only.
struct ScriptedChat {
    rewrite_to: String,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    fn new(rewrite_to: &str) -> Self {
        ScriptedChat {
            rewrite_to: rewrite_to.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let system = &messages[0].content;

        if system.starts_with("Given a chat history") {
            return Ok(self.rewrite_to.clone());
        }

        // Grounded generation: answer only what the supplied context
        // supports, refuse otherwise.
        let question = messages.last().unwrap().content.to_lowercase();
        if question.contains("dividend") && !system.to_lowercase().contains("dividend") {
            return Ok(rag::REFUSAL_PHRASE.to_string());
        }
        if system.contains("Revenue grew 12% to $5.2M") {
            Ok("Revenue grew 12% to $5.2M in Q3, per the text and the revenue chart.".to_string())
        } else {
            Ok(rag::REFUSAL_PHRASE.to_string())
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config() -> Config {
    let mut config = Config::default();
    // Small chunks so the revenue paragraph splits realistically.
    config.chunking.chunk_size = 200;
    config.chunking.chunk_overlap = 40;
    config.chunking.min_chunk_chars = 30;
    config.retrieval.k = 6;
    config.retrieval.fetch_k = 12;
    config
}

async fn ingest_report(config: &Config, session: &Path) -> finsight::ingest::IngestReport {
    let cancelled = AtomicBool::new(false);
    ingest_document(
        &OnePageReport,
        &VocabEmbedder,
        &ChartVision,
        config,
        Path::new("report.pdf"),
        session,
        &cancelled,
    )
    .await
    .unwrap()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ingest_builds_complete_store() {
    let tmp = TempDir::new().unwrap();
    let config = test_config();
    let report = ingest_report(&config, tmp.path()).await;

    assert!(report.text_units >= 1);
    assert_eq!(report.table_units, 1);
    assert_eq!(report.image_units, 1);

    let store = KnowledgeStore::open(&store_path(tmp.path()), &VocabEmbedder)
        .await
        .unwrap();
    assert_eq!(store.unit_count().await.unwrap() as usize, report.total());
    store.close().await;
}

#[tokio::test]
async fn test_question_and_grounded_followup() {
    let tmp = TempDir::new().unwrap();
    let config = test_config();
    ingest_report(&config, tmp.path()).await;

    let store = KnowledgeStore::open(&store_path(tmp.path()), &VocabEmbedder)
        .await
        .unwrap();

    // First question: no history, no rewrite.
    let chat = ScriptedChat::new("unused");
    let first = rag::answer(
        &store,
        &VocabEmbedder,
        &chat,
        &config.retrieval,
        &[],
        "What was the revenue growth?",
    )
    .await
    .unwrap();

    assert!(first.text.contains("12%"));
    assert_eq!(chat.calls().len(), 1);

    // Follow-up with no restated subject: rewritten into a standalone
    // revenue question, answered in dollar terms.
    let chat = ScriptedChat::new("What was the revenue figure in dollars?");
    let history = vec![
        Turn::user("What was the revenue growth?"),
        Turn::assistant(&first.text),
    ];
    let followup = rag::answer(
        &store,
        &VocabEmbedder,
        &chat,
        &config.retrieval,
        &history,
        "And in dollar terms?",
    )
    .await
    .unwrap();

    let calls = chat.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0][0].content.starts_with("Given a chat history"));
    let standalone = &calls[1].last().unwrap().content;
    assert!(standalone.to_lowercase().contains("revenue"));
    assert!(followup.text.contains("$5.2M"));

    store.close().await;
}

#[tokio::test]
async fn test_unanswerable_question_is_refused() {
    let tmp = TempDir::new().unwrap();
    let config = test_config();
    ingest_report(&config, tmp.path()).await;

    let store = KnowledgeStore::open(&store_path(tmp.path()), &VocabEmbedder)
        .await
        .unwrap();

    let chat = ScriptedChat::new("unused");
    let answer = rag::answer(
        &store,
        &VocabEmbedder,
        &chat,
        &config.retrieval,
        &[],
        "What dividend was declared?",
    )
    .await
    .unwrap();

    assert!(answer.text.contains(rag::REFUSAL_PHRASE));
    store.close().await;
}

#[tokio::test]
async fn test_sources_carry_provenance() {
    let tmp = TempDir::new().unwrap();
    let config = test_config();
    ingest_report(&config, tmp.path()).await;

    let store = KnowledgeStore::open(&store_path(tmp.path()), &VocabEmbedder)
        .await
        .unwrap();

    let chat = ScriptedChat::new("unused");
    let answer = rag::answer(
        &store,
        &VocabEmbedder,
        &chat,
        &config.retrieval,
        &[],
        "What does the quarterly revenue chart show?",
    )
    .await
    .unwrap();

    assert!(answer.sources.len() <= config.retrieval.max_sources);
    assert!(!answer.sources.is_empty());

    let image = answer
        .sources
        .iter()
        .find(|s| s.source_type == SourceKind::Image.as_str())
        .expect("chart summary should be retrieved for a chart question");
    assert!(image
        .image_path
        .as_deref()
        .unwrap()
        .ends_with("figure-1.jpg"));

    store.close().await;
}

#[tokio::test]
async fn test_reingest_replaces_store() {
    let tmp = TempDir::new().unwrap();
    let config = test_config();

    let first = ingest_report(&config, tmp.path()).await;
    let second = ingest_report(&config, tmp.path()).await;
    assert_eq!(first.total(), second.total());

    // Replaced, not appended: unit count is unchanged after reingest.
    let store = KnowledgeStore::open(&store_path(tmp.path()), &VocabEmbedder)
        .await
        .unwrap();
    assert_eq!(store.unit_count().await.unwrap() as usize, second.total());
    store.close().await;
}

#[tokio::test]
async fn test_cancelled_ingest_aborts() {
    let tmp = TempDir::new().unwrap();
    let config = test_config();

    let cancelled = AtomicBool::new(true);
    let err = ingest_document(
        &OnePageReport,
        &VocabEmbedder,
        &ChartVision,
        &config,
        Path::new("report.pdf"),
        tmp.path(),
        &cancelled,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("cancelled"));
}
