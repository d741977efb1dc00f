//! Database queries for fact operations
//!
//! Every query is filtered by `(user_id, agent_id)`; nothing in this module
//! reads or writes across scopes.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

use crate::embedding::{compare_similarity, cosine_similarity};
use crate::error::{RecollectError, Result};
use crate::types::{Fact, FactId, Scope, ScoredFact};

const FACT_COLUMNS: &str =
    "id, user_id, agent_id, content, content_hash, embedding, dimensions, created_at, updated_at";

/// Compute the content hash used for exact duplicate detection
pub fn compute_content_hash(content: &str) -> String {
    // Normalize: lowercase, collapse whitespace, trim
    let normalized = content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Serialize an embedding to little-endian bytes
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding, checking it against the stored dimension count
pub fn decode_embedding(bytes: &[u8], dimensions: usize) -> Result<Vec<f32>> {
    let expected_len = dimensions.checked_mul(4).ok_or_else(|| {
        RecollectError::Internal("Embedding dimensions too large".to_string())
    })?;
    if bytes.len() != expected_len {
        return Err(RecollectError::Internal(format!(
            "Embedding byte length {} does not match dimensions {}",
            bytes.len(),
            dimensions
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Fixed-width RFC 3339 so that text order equals time order
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Parse a fact from a database row
pub fn fact_from_row(row: &Row) -> rusqlite::Result<Fact> {
    let id: String = row.get("id")?;
    let bytes: Vec<u8> = row.get("embedding")?;
    let dimensions: usize = row.get("dimensions")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let id = FactId::parse_str(&id).map_err(|e| conversion_error(0, e))?;
    let embedding = decode_embedding(&bytes, dimensions).map_err(|e| conversion_error(5, e))?;

    Ok(Fact {
        id,
        text: row.get("content")?,
        embedding,
        user_id: row.get("user_id")?,
        agent_id: row.get("agent_id")?,
        content_hash: row.get("content_hash")?,
        created_at: parse_timestamp(7, &created_at)?,
        updated_at: parse_timestamp(8, &updated_at)?,
    })
}

/// Insert a new fact
pub fn insert_fact(conn: &Connection, scope: &Scope, text: &str, embedding: &[f32]) -> Result<Fact> {
    let now = Utc::now();
    let fact = Fact {
        id: FactId::new_v4(),
        text: text.to_string(),
        embedding: embedding.to_vec(),
        user_id: scope.user_id.clone(),
        agent_id: scope.agent_id.clone(),
        content_hash: compute_content_hash(text),
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        "INSERT INTO facts (id, user_id, agent_id, content, content_hash, embedding, dimensions, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            fact.id.to_string(),
            fact.user_id,
            fact.agent_id,
            fact.text,
            fact.content_hash,
            encode_embedding(&fact.embedding),
            fact.embedding.len(),
            format_timestamp(now),
            format_timestamp(now),
        ],
    )?;

    Ok(fact)
}

/// Replace text and embedding of a fact in one statement
pub fn update_fact(
    conn: &Connection,
    scope: &Scope,
    id: FactId,
    text: &str,
    embedding: &[f32],
) -> Result<Fact> {
    let now = Utc::now();
    let changed = conn.execute(
        "UPDATE facts
         SET content = ?, content_hash = ?, embedding = ?, dimensions = ?, updated_at = ?
         WHERE id = ? AND user_id = ? AND agent_id = ?",
        params![
            text,
            compute_content_hash(text),
            encode_embedding(embedding),
            embedding.len(),
            format_timestamp(now),
            id.to_string(),
            scope.user_id,
            scope.agent_id,
        ],
    )?;

    if changed == 0 {
        return Err(RecollectError::NotFound(id));
    }

    get_fact(conn, scope, id)?.ok_or(RecollectError::NotFound(id))
}

/// Delete a fact; a missing id is `NotFound`
pub fn delete_fact(conn: &Connection, scope: &Scope, id: FactId) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM facts WHERE id = ? AND user_id = ? AND agent_id = ?",
        params![id.to_string(), scope.user_id, scope.agent_id],
    )?;

    if changed == 0 {
        return Err(RecollectError::NotFound(id));
    }

    Ok(())
}

/// Get a fact by id within a scope
pub fn get_fact(conn: &Connection, scope: &Scope, id: FactId) -> Result<Option<Fact>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM facts WHERE id = ? AND user_id = ? AND agent_id = ?",
        FACT_COLUMNS
    ))?;

    let fact = stmt
        .query_row(
            params![id.to_string(), scope.user_id, scope.agent_id],
            fact_from_row,
        )
        .optional()?;

    Ok(fact)
}

/// All facts of a scope, most recently updated first
pub fn list_facts(conn: &Connection, scope: &Scope) -> Result<Vec<Fact>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM facts
         WHERE user_id = ? AND agent_id = ?
         ORDER BY updated_at DESC, rowid DESC",
        FACT_COLUMNS
    ))?;

    let facts = stmt
        .query_map(params![scope.user_id, scope.agent_id], fact_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(facts)
}

/// Number of facts in a scope
pub fn count_facts(conn: &Connection, scope: &Scope) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM facts WHERE user_id = ? AND agent_id = ?",
        params![scope.user_id, scope.agent_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Order by descending score, ties by most recent `updated_at`
pub fn compare_scored(a: &ScoredFact, b: &ScoredFact) -> Ordering {
    compare_similarity(b.score, a.score).then_with(|| b.fact.updated_at.cmp(&a.fact.updated_at))
}

/// Brute-force cosine scan over one scope
pub fn search_facts(
    conn: &Connection,
    scope: &Scope,
    query_embedding: &[f32],
    limit: usize,
) -> Result<Vec<ScoredFact>> {
    if limit == 0 {
        return Ok(vec![]);
    }

    let mut scored: Vec<ScoredFact> = list_facts(conn, scope)?
        .into_iter()
        .map(|fact| {
            let score = cosine_similarity(query_embedding, &fact.embedding);
            ScoredFact { fact, score }
        })
        .collect();

    // Stable sort keeps the list order (rowid DESC) for exact ties
    scored.sort_by(compare_scored);
    scored.truncate(limit);

    Ok(scored)
}
