//! Conversational retrieval engine.
//!
//! Answers one user message from document evidence only, in three steps:
//! rewrite the message into a standalone question using the conversation
//! history, retrieve a diverse evidence set, and generate an answer the
//! model is instructed to ground strictly in that evidence.
//!
//! Any step failing fails the whole request: no partial answers, and
//! no retries beyond the transport layer inside the model
//! clients.

use anyhow::{Context, Result};

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{Answer, Role, ScoredUnit, SourceRef, Turn};
use crate::search;
use crate::store::KnowledgeStore;

/// Instruction for turning a follow-up message into a standalone question.
pub const REWRITE_INSTRUCTION: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question \
which can be understood without the chat history. Do NOT answer the question, \
just reformulate it if needed and otherwise return it as is.";

/// Refusal phrase the model is told to use when the evidence is silent.
pub const REFUSAL_PHRASE: &str = "I cannot find this information in the document.";

/// Maximum snippet length in a surfaced source reference.
const SNIPPET_CHARS: usize = 300;

fn grounding_instruction(context: &str) -> String {
    format!(
        "You are a precise financial analyst assistant. Answer questions using ONLY the \
context retrieved from the uploaded document.\n\
\n\
RULES:\n\
1. Answer strictly from the context below. If the answer is not there, say \
\"{refusal}\"\n\
2. Never invent numbers, dates, or facts, and do not use outside knowledge beyond \
general financial terminology.\n\
3. When citing a figure, mention whether it comes from the text, a table, or a chart.\n\
4. If you do arithmetic, show the steps briefly.\n\
5. Be concise, professional, and objective.\n\
\n\
CONTEXT:\n{context}",
        refusal = REFUSAL_PHRASE,
        context = context,
    )
}

/// Answer `message` against the session's knowledge store, using the
/// full prior `history` for question rewriting and as model context.
pub async fn answer(
    store: &KnowledgeStore,
    embedder: &dyn Embedder,
    chat: &dyn ChatModel,
    config: &RetrievalConfig,
    history: &[Turn],
    message: &str,
) -> Result<Answer> {
    let query = if history.is_empty() {
        message.to_string()
    } else {
        rewrite_query(chat, history, message)
            .await
            .context("question rewriting failed")?
    };

    let evidence = search::retrieve(store, embedder, &query, config)
        .await
        .context("evidence retrieval failed")?;

    let context = evidence
        .iter()
        .map(|s| s.unit.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(grounding_instruction(&context)));
    messages.extend(history.iter().map(turn_to_message));
    messages.push(ChatMessage::user(query));

    let text = chat
        .complete(&messages)
        .await
        .context("answer generation failed")?;

    let sources = evidence
        .iter()
        .take(config.max_sources)
        .map(source_ref)
        .collect();

    Ok(Answer { text, sources })
}

/// Ask the chat model for a standalone reformulation of `message`.
/// Falls back to the original message if the model returns nothing.
async fn rewrite_query(chat: &dyn ChatModel, history: &[Turn], message: &str) -> Result<String> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(REWRITE_INSTRUCTION));
    messages.extend(history.iter().map(turn_to_message));
    messages.push(ChatMessage::user(message));

    let rewritten = chat.complete(&messages).await?;
    let rewritten = rewritten.trim();

    if rewritten.is_empty() {
        Ok(message.to_string())
    } else {
        Ok(rewritten.to_string())
    }
}

fn turn_to_message(turn: &Turn) -> ChatMessage {
    match turn.role {
        Role::User => ChatMessage::user(turn.content.clone()),
        Role::Assistant => ChatMessage::assistant(turn.content.clone()),
    }
}

fn source_ref(scored: &ScoredUnit) -> SourceRef {
    let content = &scored.unit.content;
    let snippet = if content.len() > SNIPPET_CHARS {
        let cut = (0..=SNIPPET_CHARS)
            .rev()
            .find(|&i| content.is_char_boundary(i))
            .unwrap_or(0);
        format!("{}...", &content[..cut])
    } else {
        content.clone()
    };

    SourceRef {
        source_type: scored.unit.kind.as_str().to_string(),
        snippet,
        image_path: scored.unit.image_path.clone(),
    }
}
