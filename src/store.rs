//! Per-session knowledge store.
//!
//! A [`KnowledgeStore`] is one SQLite database file holding the evidence
//! units of a single document and their embedding vectors. It is built
//! exactly once after ingestion and then only read; the `processing` /
//! `ready` session gate upstream is what keeps builders and readers
//! apart, so no locking happens here.
//!
//! The store records the embedding model it was built with and refuses
//! to open under a different one. Querying across embedding spaces
//! does not fail, it silently returns garbage, which is worse.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::models::{EvidenceUnit, ScoredUnit, SourceKind};

/// File name of the store inside a session directory.
pub const STORE_FILE: &str = "knowledge.sqlite";

/// Store errors callers need to branch on.
#[derive(Debug)]
pub enum StoreError {
    /// Build destination already exists; building is not an append.
    DestinationNotEmpty(PathBuf),
    /// Open target does not exist.
    NotFound(PathBuf),
    /// Store was built with a different embedding model than the one
    /// configured for querying.
    ModelMismatch { stored: String, configured: String },
    /// A stored row could not be interpreted.
    Corrupt(String),
    Embedding(anyhow::Error),
    Database(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DestinationNotEmpty(path) => {
                write!(f, "store destination not empty: {}", path.display())
            }
            StoreError::NotFound(path) => write!(f, "store not found: {}", path.display()),
            StoreError::ModelMismatch { stored, configured } => write!(
                f,
                "store was built with embedding model '{}' but '{}' is configured",
                stored, configured
            ),
            StoreError::Corrupt(msg) => write!(f, "store is corrupt: {}", msg),
            StoreError::Embedding(e) => write!(f, "embedding failed: {}", e),
            StoreError::Database(e) => write!(f, "store database error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

/// A similarity-searchable collection of evidence units for one session.
#[derive(Debug)]
pub struct KnowledgeStore {
    pool: SqlitePool,
}

impl KnowledgeStore {
    /// Build a new store at `path` from the given units, embedding each
    /// one with `embedder`.
    ///
    /// The destination must not exist. Reprocessing a session removes
    /// the old store first; silently appending to a half-built file is
    /// never what anyone wants.
    pub async fn build(
        path: &Path,
        units: &[EvidenceUnit],
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<KnowledgeStore, StoreError> {
        if path.exists() {
            return Err(StoreError::DestinationNotEmpty(path.to_path_buf()));
        }

        let pool = connect(path, true).await?;
        create_schema(&pool).await?;

        let now = chrono::Utc::now().timestamp();
        for (key, value) in [
            ("model", embedder.model_name().to_string()),
            ("dims", embedder.dims().to_string()),
            ("created_at", now.to_string()),
        ] {
            sqlx::query("INSERT INTO store_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&pool)
                .await?;
        }

        let batch_size = batch_size.max(1);
        let mut seq: i64 = 0;

        for batch in units.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|u| u.content.clone()).collect();
            let vectors = embedder
                .embed(&texts)
                .await
                .map_err(StoreError::Embedding)?;
            if vectors.len() != batch.len() {
                return Err(StoreError::Corrupt(format!(
                    "embedder returned {} vectors for {} units",
                    vectors.len(),
                    batch.len()
                )));
            }

            let mut tx = pool.begin().await?;
            for (unit, vector) in batch.iter().zip(vectors.iter()) {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO units (id, seq, content, kind, image_path, hash) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(seq)
                .bind(&unit.content)
                .bind(unit.kind.as_str())
                .bind(&unit.image_path)
                .bind(hash_text(&unit.content))
                .execute(&mut *tx)
                .await?;

                sqlx::query("INSERT INTO unit_vectors (unit_id, embedding) VALUES (?, ?)")
                    .bind(&id)
                    .bind(vec_to_blob(vector))
                    .execute(&mut *tx)
                    .await?;

                seq += 1;
            }
            tx.commit().await?;
        }

        Ok(KnowledgeStore { pool })
    }

    /// Reopen an existing store for querying. Stored units are not
    /// re-embedded; the recorded model must match `embedder`.
    pub async fn open(path: &Path, embedder: &dyn Embedder) -> Result<KnowledgeStore, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let pool = connect(path, false).await?;

        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'model'")
                .fetch_optional(&pool)
                .await?;
        let stored = stored.ok_or_else(|| {
            StoreError::Corrupt("store_meta has no embedding model record".to_string())
        })?;

        if stored != embedder.model_name() {
            return Err(StoreError::ModelMismatch {
                stored,
                configured: embedder.model_name().to_string(),
            });
        }

        Ok(KnowledgeStore { pool })
    }

    /// Return the `fetch_k` units most similar to `query_vec`, scored by
    /// cosine similarity, best first. Ties break on insertion order so
    /// results are deterministic.
    pub async fn query(
        &self,
        query_vec: &[f32],
        fetch_k: usize,
    ) -> Result<Vec<ScoredUnit>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT u.seq, u.content, u.kind, u.image_path, v.embedding
            FROM unit_vectors v
            JOIN units u ON u.id = v.unit_id
            ORDER BY u.seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<(i64, ScoredUnit)> = Vec::with_capacity(rows.len());

        for row in &rows {
            let seq: i64 = row.get("seq");
            let kind_str: String = row.get("kind");
            let kind = SourceKind::parse(&kind_str)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown source kind: {}", kind_str)))?;
            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_vec(&blob);
            let score = cosine_similarity(query_vec, &embedding);

            candidates.push((
                seq,
                ScoredUnit {
                    unit: EvidenceUnit {
                        content: row.get("content"),
                        kind,
                        image_path: row.get("image_path"),
                    },
                    embedding,
                    score,
                },
            ));
        }

        candidates.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        candidates.truncate(fetch_k);

        Ok(candidates.into_iter().map(|(_, c)| c).collect())
    }

    /// Number of stored units.
    pub async fn unit_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn connect(path: &Path, create: bool) -> Result<SqlitePool, StoreError> {
    if create {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Corrupt(format!("cannot create store dir: {}", e)))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(StoreError::Database)?
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS units (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL UNIQUE,
            content TEXT NOT NULL,
            kind TEXT NOT NULL,
            image_path TEXT,
            hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unit_vectors (
            unit_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (unit_id) REFERENCES units(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
