//! # finsight
//!
//! Conversational retrieval over financial PDF reports.
//!
//! finsight turns one heterogeneous document (body text, tables, chart
//! images) into a per-session searchable knowledge base, then runs a
//! multi-turn question-answering loop: follow-up questions are rewritten
//! into standalone queries using the conversation history, evidence is
//! retrieved with a diversity-aware strategy, and answers are generated
//! strictly from the retrieved evidence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────────────┐   ┌───────────┐
//! │   PDF   │──▶│ Parse + Segment  │──▶│  SQLite    │
//! │ upload  │   │ + Chart summary  │   │ unit+vec   │
//! └─────────┘   └──────────────────┘   └─────┬─────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                  ┌──────────┐        ┌──────────┐
//!                  │   CLI    │        │   HTTP   │
//!                  │(finsight)│        │ sessions │
//!                  └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! finsight ingest report.pdf --session ./data/demo   # build the knowledge store
//! finsight ask "What was Q3 revenue?" --session ./data/demo
//! finsight chat --session ./data/demo                # multi-turn REPL
//! finsight serve                                     # JSON API for the web UI
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF parsing boundary ([`extract::DocumentParser`]) |
//! | [`segment`] | Document segmentation into chunks and table units |
//! | [`summarize`] | Chart image summarization |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Text-generation and vision model clients |
//! | [`store`] | Per-session SQLite knowledge store |
//! | [`search`] | Diversity-aware retrieval (MMR) |
//! | [`rag`] | Conversational retrieval engine |
//! | [`ingest`] | Ingestion pipeline orchestration |
//! | [`session`] | Session lifecycle and history |
//! | [`server`] | Session-facing HTTP API |

pub mod config;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod rag;
pub mod search;
pub mod segment;
pub mod server;
pub mod session;
pub mod store;
pub mod summarize;
