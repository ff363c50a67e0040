//! SQLite implementation of the search [`QueryEngine`].
//!
//! A [`MessageQuery`] is rendered into one parameterised SELECT over
//! `messages LEFT JOIN message_embeddings`. The left join keeps messages
//! without an embedding visible to metadata-only searches; their distance is
//! NULL.
//!
//! All searches share one connection. Cancellation is scoped to the call
//! that owns it: a progress handler installed for the duration of a single
//! statement polls that call's [`Abort`], so a cancelled search never stops
//! another caller's statement.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Timelike, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params_from_iter, Connection, Row};

use super::{bytes_to_embedding, embedding_to_bytes, format_timestamp, parse_timestamp};
use crate::search::cancel::Abort;
use crate::search::filter::Predicate;
use crate::search::query::{MessageQuery, MessageRow, QueryEngine, SortOrder};
use crate::search::MessageRecord;

const BASE_COLUMNS: &str =
    "m.uuid, m.session_id, m.created_at, m.role, m.content, m.metadata, m.token_count";
const SOURCE: &str =
    "messages AS m LEFT JOIN message_embeddings AS me ON me.message_uuid = m.uuid";

/// VM instructions between abort checks.
const ABORT_CHECK_INTERVAL: i32 = 1_000;

pub struct SqliteEngine {
    conn: Mutex<Connection>,
}

impl SqliteEngine {
    /// Wrap a connection that already has the search functions registered.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(super::open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(super::open_memory_database()?))
    }

    /// Run `f` with exclusive access to the underlying connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        f(&mut conn)
    }
}

impl QueryEngine for SqliteEngine {
    fn execute(&self, query: &MessageQuery, abort: &Abort) -> Result<Vec<MessageRow>> {
        let (sql, params) = render(query)?;
        tracing::trace!(%sql, "executing message query");

        self.with_connection(|conn| {
            abortable(conn, abort, |conn| {
                let mut stmt = conn.prepare_cached(&sql).context("failed to prepare search query")?;
                let rows = stmt
                    .query_map(params_from_iter(params.iter()), |row| map_row(row, query))?
                    .collect::<Result<Vec<_>, _>>()
                    .context("failed to read search results")?;
                Ok(rows)
            })
        })
    }
}

/// Run `f` on a connection this call holds exclusively, stopping its
/// statements once `abort` is raised.
///
/// A call aborted while it still waited for the connection does no work.
fn abortable<T>(
    conn: &mut Connection,
    abort: &Abort,
    f: impl FnOnce(&mut Connection) -> Result<T>,
) -> Result<T> {
    let flag = abort.flag();
    conn.progress_handler(
        ABORT_CHECK_INTERVAL,
        Some(move || flag.load(Ordering::SeqCst)),
    )?;

    let result = if abort.is_raised() {
        Err(anyhow::anyhow!("query aborted before it started"))
    } else {
        f(conn)
    };

    conn.progress_handler(0, None::<fn() -> bool>)?;
    result
}

/// Round up to the stored microsecond precision, so a lower bound never
/// admits a row stored before it.
fn ceil_to_micros(ts: &DateTime<Utc>) -> DateTime<Utc> {
    match ts.nanosecond() % 1_000 {
        0 => *ts,
        rem => *ts + Duration::nanoseconds(i64::from(1_000 - rem)),
    }
}

/// Render a query to SQL plus positional parameters.
pub fn render(query: &MessageQuery) -> Result<(String, Vec<SqlValue>)> {
    let mut params = Vec::new();
    let mut sql = format!("SELECT {BASE_COLUMNS}");

    if let Some(vector) = &query.query_vector {
        sql.push_str(", vec_negative_inner_product(me.embedding, ?) * -1 AS dist");
        params.push(SqlValue::Blob(embedding_to_bytes(vector).to_vec()));
    }
    if query.include_embedding {
        sql.push_str(", me.embedding");
    }

    sql.push_str(" FROM ");
    sql.push_str(SOURCE);

    if !query.predicates.is_empty() {
        let clauses: Vec<String> = query
            .predicates
            .iter()
            .map(|p| render_predicate(p, &mut params))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    match query.order {
        SortOrder::DistanceDesc => {
            anyhow::ensure!(
                query.query_vector.is_some(),
                "distance ordering requires a query vector"
            );
            sql.push_str(" ORDER BY dist DESC, m.created_at DESC, m.uuid DESC");
        }
        SortOrder::CreatedAtDesc => sql.push_str(" ORDER BY m.created_at DESC, m.uuid DESC"),
    }

    sql.push_str(" LIMIT ?");
    params.push(SqlValue::Integer(i64::try_from(query.limit).unwrap_or(i64::MAX)));

    Ok((sql, params))
}

fn render_predicate(predicate: &Predicate, params: &mut Vec<SqlValue>) -> String {
    match predicate {
        Predicate::SessionIs(session_id) => {
            params.push(SqlValue::Text(session_id.clone()));
            "m.session_id = ?".into()
        }
        Predicate::NotDeleted => "m.deleted_at IS NULL".into(),
        Predicate::JsonPathExists(path) => {
            params.push(SqlValue::Text(path.as_str().to_string()));
            "jsonb_path_exists(m.metadata, ?)".into()
        }
        Predicate::CreatedAtOrAfter(ts) => {
            params.push(SqlValue::Text(format_timestamp(&ceil_to_micros(ts))));
            "m.created_at >= ?".into()
        }
        Predicate::CreatedAtOrBefore(ts) => {
            params.push(SqlValue::Text(format_timestamp(ts)));
            "m.created_at <= ?".into()
        }
        Predicate::All(children) => render_group(children, " AND ", "1", params),
        Predicate::Any(children) => render_group(children, " OR ", "0", params),
    }
}

fn render_group(
    children: &[Predicate],
    joiner: &str,
    identity: &str,
    params: &mut Vec<SqlValue>,
) -> String {
    if children.is_empty() {
        return identity.to_string();
    }
    let parts: Vec<String> = children
        .iter()
        .map(|c| render_predicate(c, params))
        .collect();
    format!("({})", parts.join(joiner))
}

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn map_row(row: &Row<'_>, query: &MessageQuery) -> rusqlite::Result<MessageRow> {
    let created_at: String = row.get(2)?;
    let created_at = parse_timestamp(&created_at).map_err(|e| conversion_error(2, Type::Text, e))?;
    let metadata = row
        .get::<_, Option<String>>(5)?
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| conversion_error(5, Type::Text, e))?;

    let message = MessageRecord {
        uuid: row.get(0)?,
        session_id: row.get(1)?,
        created_at,
        role: row.get(3)?,
        content: row.get(4)?,
        metadata,
        token_count: row.get(6)?,
    };

    let mut next = 7;
    let distance = if query.query_vector.is_some() {
        next += 1;
        row.get::<_, Option<f64>>(next - 1)?
    } else {
        None
    };
    let embedding = if query.include_embedding {
        row.get::<_, Option<Vec<u8>>>(next)?
            .map(|bytes| {
                bytes_to_embedding(&bytes).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        next,
                        Type::Blob,
                        "embedding blob length is not a multiple of 4".into(),
                    )
                })
            })
            .transpose()?
    } else {
        None
    };

    Ok(MessageRow {
        message,
        distance,
        embedding,
    })
}
