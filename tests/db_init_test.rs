mod helpers;

use helpers::*;
use mneme::db::engine::SqliteEngine;
use mneme::db::{open_database, schema};
use mneme::search::{CancelSignal, SearchPayload};
use serde_json::json;

fn table_names(conn: &rusqlite::Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    stmt.query_map([], |r| r.get::<_, String>(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn open_database_creates_schema_and_functions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("mneme.db");
    let conn = open_database(&path).unwrap();
    assert!(path.exists());

    let tables = table_names(&conn);
    for table in ["message_embeddings", "messages", "schema_meta", "sessions"] {
        assert!(tables.iter().any(|t| t == table), "missing {table}");
    }

    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |r| r.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");

    let version: String = conn
        .query_row("SELECT vec_version()", [], |r| r.get(0))
        .unwrap();
    assert!(version.starts_with('v'));

    let exists: bool = conn
        .query_row(
            "SELECT jsonb_path_exists('{\"a\": [1, 2]}', '$.a[1]')",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert!(exists);
}

#[tokio::test]
async fn reopening_is_idempotent_and_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mneme.db");

    let id = {
        let engine = SqliteEngine::open(&path).unwrap();
        engine
            .with_connection(|conn| {
                schema::set_embedding_model(conn, "all-MiniLM-L6-v2")?;
                Ok(())
            })
            .unwrap();
        Msg::new("s1", "persisted")
            .metadata(json!({"kind": "note"}))
            .embedding(spike(3))
            .insert(&engine)
    };

    let engine = std::sync::Arc::new(SqliteEngine::open(&path).unwrap());
    let model = engine
        .with_connection(|conn| Ok(schema::get_embedding_model(conn)?))
        .unwrap();
    assert_eq!(model.as_deref(), Some("all-MiniLM-L6-v2"));

    let search = search_service(engine, StaticEmbedder::new().with("q", spike(3)));
    let payload = SearchPayload {
        text: Some("q".into()),
        metadata: Some(json!({"where": {"jsonpath": "$.kind ? (@ == \"note\")"}})),
        ..Default::default()
    };
    let results = search
        .search("s1", &payload, 5, &CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(uuids(&results), vec![id]);
    assert!((results[0].distance.unwrap() - 1.0).abs() < 1e-6);
}

#[test]
fn metadata_must_be_valid_json() {
    let conn = mneme::db::open_memory_database().unwrap();
    conn.execute(
        "INSERT INTO sessions (session_id, created_at) VALUES ('s1', '2024-01-01T00:00:00.000000Z')",
        [],
    )
    .unwrap();
    let result = conn.execute(
        "INSERT INTO messages (uuid, session_id, created_at, role, content, metadata)
         VALUES ('u1', 's1', '2024-01-01T00:00:00.000000Z', 'user', 'hi', '{not json')",
        [],
    );
    assert!(result.is_err());
}
