//! SQL schema definitions as const strings.
//!
//! Mirrors the tables of a Chroma persist directory's `chroma.sqlite3` that
//! the exporter reads. Only the columns the reader touches are required to
//! exist in stores written by Chroma itself.

/// SQL to create the collections table.
pub const CREATE_COLLECTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    dimension INTEGER
)
"#;

/// SQL to create the segments table.
pub const CREATE_SEGMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS segments (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    scope TEXT NOT NULL,
    collection TEXT REFERENCES collections(id)
)
"#;

/// SQL to create the embeddings table.
pub const CREATE_EMBEDDINGS: &str = r#"
CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY,
    segment_id TEXT NOT NULL,
    embedding_id TEXT NOT NULL,
    seq_id BLOB NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (segment_id, embedding_id)
)
"#;

/// SQL to create the embedding metadata table.
pub const CREATE_EMBEDDING_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS embedding_metadata (
    id INTEGER REFERENCES embeddings(id),
    key TEXT NOT NULL,
    string_value TEXT,
    int_value INTEGER,
    float_value REAL,
    bool_value INTEGER,
    PRIMARY KEY (id, key)
)
"#;

/// SQL to create the write-ahead queue holding raw vectors.
pub const CREATE_EMBEDDINGS_QUEUE: &str = r#"
CREATE TABLE IF NOT EXISTS embeddings_queue (
    seq_id INTEGER PRIMARY KEY,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    operation INTEGER NOT NULL,
    topic TEXT NOT NULL,
    id TEXT NOT NULL,
    vector BLOB,
    encoding TEXT,
    metadata TEXT
)
"#;

/// Tables a store must contain before it can be exported.
pub const REQUIRED_TABLES: &[&str] = &[
    "collections",
    "segments",
    "embeddings",
    "embedding_metadata",
    "embeddings_queue",
];

/// Returns all statements in creation order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_COLLECTIONS,
        CREATE_SEGMENTS,
        CREATE_EMBEDDINGS,
        CREATE_EMBEDDING_METADATA,
        CREATE_EMBEDDINGS_QUEUE,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_required_table_is_created() {
        let migrations = all_migrations().join("\n");
        for table in REQUIRED_TABLES {
            assert!(
                migrations.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "no statement creates {table}"
            );
        }
    }

    #[test]
    fn metadata_references_embeddings() {
        assert!(CREATE_EMBEDDING_METADATA.contains("REFERENCES embeddings(id)"));
    }
}
