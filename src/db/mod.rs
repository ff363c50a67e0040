//! SQLite storage for sessions, messages and their embeddings.
//!
//! Every connection gets the sqlite-vec extension plus two scalar functions
//! used by search queries:
//!
//! - `vec_negative_inner_product(a, b)`: `-(a · b)` over f32 blobs, NULL if
//!   either side is NULL.
//! - `jsonb_path_exists(doc, path)`: whether a JSONPath selects anything in a
//!   JSON document, NULL if the document is NULL.

pub mod engine;
pub mod messages;
pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::{Context as FunctionContext, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

use crate::search::jsonpath::JsonPath;
use crate::search::mmr::inner_product;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the database at the given path with extensions,
/// functions and schema in place.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    prepare_connection(&conn)?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database, used by tests and one-off tooling.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    prepare_connection(&conn)?;
    Ok(conn)
}

fn prepare_connection(conn: &Connection) -> Result<()> {
    schema::init_schema(conn).context("failed to initialize schema")?;
    register_functions(conn).context("failed to register SQL functions")?;
    Ok(())
}

/// Register the search scalar functions on `conn`.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("vec_negative_inner_product", 2, flags, negative_inner_product)?;
    conn.create_scalar_function("jsonb_path_exists", 2, flags, json_path_exists)?;
    Ok(())
}

fn user_error(msg: String) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(msg.into())
}

fn negative_inner_product(ctx: &FunctionContext<'_>) -> rusqlite::Result<Option<f64>> {
    let (ValueRef::Blob(lhs), ValueRef::Blob(rhs)) = (ctx.get_raw(0), ctx.get_raw(1)) else {
        return match (ctx.get_raw(0), ctx.get_raw(1)) {
            (ValueRef::Null, _) | (_, ValueRef::Null) => Ok(None),
            _ => Err(user_error(
                "vec_negative_inner_product expects two f32 vector blobs".into(),
            )),
        };
    };
    let lhs = bytes_to_embedding(lhs)
        .ok_or_else(|| user_error("malformed f32 vector blob".into()))?;
    let rhs = bytes_to_embedding(rhs)
        .ok_or_else(|| user_error("malformed f32 vector blob".into()))?;
    if lhs.len() != rhs.len() {
        return Err(user_error(format!(
            "vector dimension mismatch: {} vs {}",
            lhs.len(),
            rhs.len()
        )));
    }
    Ok(Some(-f64::from(inner_product(&lhs, &rhs))))
}

fn json_path_exists(ctx: &FunctionContext<'_>) -> rusqlite::Result<Option<bool>> {
    let doc = match ctx.get_raw(0) {
        ValueRef::Null => return Ok(None),
        ValueRef::Text(text) => serde_json::from_slice::<serde_json::Value>(text)
            .map_err(|e| user_error(format!("metadata is not valid JSON: {e}")))?,
        _ => return Err(user_error("jsonb_path_exists expects a JSON text document".into())),
    };
    let path = ctx.get_or_create_aux(1, |value| -> Result<JsonPath, Box<dyn std::error::Error + Send + Sync>> {
        Ok(JsonPath::parse(value.as_str()?)?)
    })?;
    Ok(Some(path.exists(&doc)))
}

/// View an f32 slice as the raw bytes sqlite-vec stores.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Decode a stored vector blob. `None` if the length is not a multiple of 4.
pub fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % std::mem::size_of::<f32>() != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Fixed-width RFC 3339 so text order equals time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|ts| ts.with_timezone(&Utc))
}
