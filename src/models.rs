//! Core data models used throughout finsight.
//!
//! These types represent the evidence units, conversation turns, and
//! retrieval results that flow through the ingestion and answering
//! pipeline.

use serde::{Deserialize, Serialize};

/// Origin of a retrievable unit of document content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Text,
    Table,
    Image,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Text => "text",
            SourceKind::Table => "table",
            SourceKind::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<SourceKind> {
        match s {
            "text" => Some(SourceKind::Text),
            "table" => Some(SourceKind::Table),
            "image" => Some(SourceKind::Image),
            _ => None,
        }
    }
}

/// One retrievable, embeddable piece of document content: a text chunk,
/// a whole table, or the generated description of a chart image.
///
/// `image_path` is set only for `SourceKind::Image` units and points at
/// the raster file the description was generated from.
#[derive(Debug, Clone)]
pub struct EvidenceUnit {
    pub content: String,
    pub kind: SourceKind,
    pub image_path: Option<String>,
}

impl EvidenceUnit {
    pub fn text(content: String) -> Self {
        EvidenceUnit {
            content,
            kind: SourceKind::Text,
            image_path: None,
        }
    }

    pub fn table(content: String) -> Self {
        EvidenceUnit {
            content,
            kind: SourceKind::Table,
            image_path: None,
        }
    }

    pub fn image(content: String, path: String) -> Self {
        EvidenceUnit {
            content,
            kind: SourceKind::Image,
            image_path: Some(path),
        }
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a session's conversation. Turns are appended, never
/// mutated or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Turn {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An evidence unit scored against a query, with the stored vector kept
/// alongside so the diversity selection can compare candidates to each
/// other without another store round-trip.
#[derive(Debug, Clone)]
pub struct ScoredUnit {
    pub unit: EvidenceUnit,
    pub embedding: Vec<f32>,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Evidence reference surfaced to the caller alongside an answer, for
/// provenance display. The snippet is truncated; the full unit content
/// stays in the store.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub source_type: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

/// Final output of the conversational retrieval engine.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
}
