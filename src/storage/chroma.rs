//! Chroma persist-directory reader.
//!
//! A Chroma store keeps ids, documents and metadata in the metadata segment
//! tables of `chroma.sqlite3`, and the raw vectors in `embeddings_queue`.
//! Reads go through a read-only connection; the write half exists so stores
//! can be seeded with the same layout.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use super::database::{Database, DatabaseError, Result};
use super::source::VectorSource;
use crate::domain::{DocumentId, Metadata, MetadataValue, SourceBatch};
use crate::error::ExportError;

/// File name of the SQLite database inside a persist directory.
pub const SQLITE_FILENAME: &str = "chroma.sqlite3";

/// Metadata key under which Chroma stores document text.
const DOCUMENT_KEY: &str = "chroma:document";

/// Prefix of reserved metadata keys that are not user metadata.
const RESERVED_PREFIX: &str = "chroma:";

const METADATA_SCOPE: &str = "METADATA";
const METADATA_SEGMENT_TYPE: &str = "urn:chroma:segment/metadata/sqlite";
const VECTOR_SCOPE: &str = "VECTOR";
const VECTOR_SEGMENT_TYPE: &str = "urn:chroma:segment/vector/hnsw-local-persisted";

/// Queue operation codes.
const OP_ADD: i64 = 0;
const OP_UPDATE: i64 = 1;
const OP_UPSERT: i64 = 2;

/// Ids named in a missing-vector error.
const MISSING_IDS_SHOWN: usize = 5;

/// Which optional fields a `get` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Include {
    pub embeddings: bool,
    pub documents: bool,
    pub metadatas: bool,
}

impl Include {
    /// Requests every optional field.
    pub fn all() -> Self {
        Self {
            embeddings: true,
            documents: true,
            metadatas: true,
        }
    }
}

/// Index-aligned result of a collection read. Fields not requested are
/// `None`.
#[derive(Debug, Clone, Default)]
pub struct GetResult {
    pub ids: Vec<DocumentId>,
    pub embeddings: Option<Vec<Vec<f32>>>,
    pub documents: Option<Vec<String>>,
    pub metadatas: Option<Vec<Metadata>>,
}

/// A record to write into a collection.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: DocumentId,
    pub embedding: Vec<f32>,
    pub document: Option<String>,
    pub metadata: Metadata,
}

impl Record {
    /// Creates a record with no text or metadata.
    pub fn new(id: impl Into<DocumentId>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            document: None,
            metadata: Metadata::new(),
        }
    }

    /// Sets the document text.
    pub fn with_document(mut self, text: impl Into<String>) -> Self {
        self.document = Some(text.into());
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Summary of a collection for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub count: usize,
}

/// Handle to one collection in a store.
#[derive(Debug, Clone)]
pub struct Collection {
    id: String,
    dimension: Option<usize>,
    db: Database,
}

impl Collection {
    /// Returns the declared vector dimension, if recorded.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Counts the records in the collection.
    pub async fn count(&self) -> Result<usize> {
        let id = self.id.clone();
        self.db
            .with_conn(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM embeddings e
                     JOIN segments s ON e.segment_id = s.id
                     WHERE s.collection = ?1 AND s.scope = ?2",
                    params![id, METADATA_SCOPE],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
    }

    /// Reads up to `limit` records in insertion order.
    pub async fn get(&self, include: Include, limit: Option<usize>) -> Result<GetResult> {
        let id = self.id.clone();
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT e.id, e.embedding_id FROM embeddings e
                     JOIN segments s ON e.segment_id = s.id
                     WHERE s.collection = ?1 AND s.scope = ?2
                     ORDER BY e.id
                     LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![id, METADATA_SCOPE, limit], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let position: HashMap<i64, usize> =
                    rows.iter().enumerate().map(|(i, (rowid, _))| (*rowid, i)).collect();

                let mut result = GetResult {
                    ids: rows.iter().map(|(_, eid)| DocumentId::from(eid.as_str())).collect(),
                    ..GetResult::default()
                };

                if include.documents || include.metadatas {
                    let (documents, metadatas) =
                        read_metadata(conn, &id, limit, &position, rows.len())?;
                    if include.documents {
                        result.documents = Some(documents);
                    }
                    if include.metadatas {
                        result.metadatas = Some(metadatas);
                    }
                }

                if include.embeddings {
                    result.embeddings = Some(read_vectors(conn, &id, &result.ids)?);
                }

                Ok(result)
            })
            .await
    }
}

/// Reads document text and user metadata for the selected rows.
fn read_metadata(
    conn: &rusqlite::Connection,
    collection_id: &str,
    limit: i64,
    position: &HashMap<i64, usize>,
    n: usize,
) -> Result<(Vec<String>, Vec<Metadata>)> {
    let mut documents = vec![String::new(); n];
    let mut metadatas = vec![Metadata::new(); n];

    let mut stmt = conn.prepare(
        "SELECT m.id, m.key, m.string_value, m.int_value, m.float_value, m.bool_value
         FROM embedding_metadata m
         WHERE m.id IN (
             SELECT e.id FROM embeddings e
             JOIN segments s ON e.segment_id = s.id
             WHERE s.collection = ?1 AND s.scope = ?2
             ORDER BY e.id
             LIMIT ?3
         )",
    )?;
    let mut rows = stmt.query(params![collection_id, METADATA_SCOPE, limit])?;

    while let Some(row) = rows.next()? {
        let rowid: i64 = row.get(0)?;
        let Some(&index) = position.get(&rowid) else {
            continue;
        };
        let key: String = row.get(1)?;
        let string_value: Option<String> = row.get(2)?;
        let int_value: Option<i64> = row.get(3)?;
        let float_value: Option<f64> = row.get(4)?;
        let bool_value: Option<i64> = row.get(5)?;

        if key == DOCUMENT_KEY {
            documents[index] = string_value.unwrap_or_default();
            continue;
        }
        if key.starts_with(RESERVED_PREFIX) {
            continue;
        }

        let value = if let Some(s) = string_value {
            MetadataValue::Str(s)
        } else if let Some(i) = int_value {
            MetadataValue::Int(i)
        } else if let Some(f) = float_value {
            MetadataValue::Float(f)
        } else if let Some(b) = bool_value {
            MetadataValue::Bool(b != 0)
        } else {
            continue;
        };
        metadatas[index].insert(key, value);
    }

    Ok((documents, metadatas))
}

/// Reads the latest queued vector for each requested id.
///
/// Fails with `DatabaseError::MissingVectors` when any id has no surviving
/// queue entry.
fn read_vectors(
    conn: &rusqlite::Connection,
    collection_id: &str,
    ids: &[DocumentId],
) -> Result<Vec<Vec<f32>>> {
    let wanted: HashSet<&str> = ids.iter().map(|id| id.0.as_str()).collect();
    let mut latest: HashMap<String, Vec<f32>> = HashMap::with_capacity(ids.len());

    let mut stmt = conn.prepare(
        "SELECT id, vector, encoding FROM embeddings_queue
         WHERE topic LIKE '%' || ?1
           AND operation IN (?2, ?3, ?4)
           AND vector IS NOT NULL
         ORDER BY seq_id",
    )?;
    let mut rows = stmt.query(params![collection_id, OP_ADD, OP_UPDATE, OP_UPSERT])?;

    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        if !wanted.contains(id.as_str()) {
            continue;
        }
        let bytes: Vec<u8> = row.get(1)?;
        let encoding: Option<String> = row.get(2)?;
        let vector = decode_vector(&id, &bytes, encoding.as_deref())?;
        latest.insert(id, vector);
    }

    let absent: Vec<&str> = ids
        .iter()
        .filter(|id| !latest.contains_key(&id.0))
        .map(|id| id.0.as_str())
        .collect();
    if !absent.is_empty() {
        return Err(DatabaseError::MissingVectors {
            missing: absent.len(),
            total: ids.len(),
            ids: absent
                .iter()
                .take(MISSING_IDS_SHOWN)
                .map(|id| id.to_string())
                .collect(),
        });
    }

    Ok(ids
        .iter()
        .map(|id| latest.remove(&id.0).unwrap_or_default())
        .collect())
}

/// Decodes a little-endian vector blob.
fn decode_vector(id: &str, bytes: &[u8], encoding: Option<&str>) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(DatabaseError::InvalidVector {
            id: id.to_string(),
            reason: format!("blob length {} is not a multiple of 4", bytes.len()),
        });
    }

    let words = bytes.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]);
    match encoding.unwrap_or("FLOAT32") {
        "FLOAT32" => Ok(words.map(f32::from_le_bytes).collect()),
        "INT32" => Ok(words.map(|w| i32::from_le_bytes(w) as f32).collect()),
        other => Err(DatabaseError::InvalidVector {
            id: id.to_string(),
            reason: format!("unsupported encoding {other}"),
        }),
    }
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A Chroma persist directory.
#[derive(Debug, Clone)]
pub struct ChromaStore {
    db: Database,
}

impl ChromaStore {
    /// Opens an existing store for reading.
    ///
    /// Fails with `ExportError::DependencyMissing` when the directory has no
    /// `chroma.sqlite3` or the database lacks the Chroma tables.
    pub async fn open(dir: impl AsRef<Path>) -> std::result::Result<Self, ExportError> {
        let path = dir.as_ref().to_path_buf();
        let db_path = path.join(SQLITE_FILENAME);

        if !db_path.is_file() {
            return Err(ExportError::DependencyMissing {
                component: "Chroma store".to_string(),
                hint: format!(
                    "no {} in {}; pass --chroma-path pointing at a Chroma persist directory",
                    SQLITE_FILENAME,
                    path.display()
                ),
            });
        }

        info!(path = %path.display(), "Connecting to Chroma store");
        let db = Database::open_read_only(&db_path).await?;

        let missing = db.missing_tables().await?;
        if !missing.is_empty() {
            return Err(ExportError::DependencyMissing {
                component: "Chroma schema".to_string(),
                hint: format!(
                    "{} lacks tables [{}]; it was not written by a supported Chroma version",
                    db_path.display(),
                    missing.join(", ")
                ),
            });
        }

        Ok(Self { db })
    }

    /// Creates (or reopens) a writable store in `dir`.
    pub async fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let db = Database::create(path.join(SQLITE_FILENAME)).await?;
        Ok(Self { db })
    }

    /// Lists collections with their record counts, ordered by name.
    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.name, COUNT(e.id) FROM collections c
                     LEFT JOIN segments s ON s.collection = c.id AND s.scope = ?1
                     LEFT JOIN embeddings e ON e.segment_id = s.id
                     GROUP BY c.id
                     ORDER BY c.name",
                )?;
                let infos = stmt
                    .query_map(params![METADATA_SCOPE], |row| {
                        Ok(CollectionInfo {
                            name: row.get(0)?,
                            count: row.get::<_, i64>(1)? as usize,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(infos)
            })
            .await
    }

    /// Looks up a collection by name.
    pub async fn get_collection(&self, name: &str) -> Result<Option<Collection>> {
        let lookup = name.to_string();
        let found = self
            .db
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, dimension FROM collections WHERE name = ?1",
                        params![lookup],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
                    )
                    .optional()?)
            })
            .await?;

        Ok(found.map(|(id, dimension)| Collection {
            id,
            dimension: dimension.map(|d| d as usize),
            db: self.db.clone(),
        }))
    }

    /// Creates an empty collection with its metadata and vector segments.
    pub async fn create_collection(&self, name: &str, dimension: Option<usize>) -> Result<Collection> {
        let id = uuid::Uuid::new_v4().to_string();
        let (cid, cname) = (id.clone(), name.to_string());

        self.db
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO collections (id, name, dimension) VALUES (?1, ?2, ?3)",
                    params![cid, cname, dimension.map(|d| d as i64)],
                )?;
                for (scope, kind) in [
                    (METADATA_SCOPE, METADATA_SEGMENT_TYPE),
                    (VECTOR_SCOPE, VECTOR_SEGMENT_TYPE),
                ] {
                    tx.execute(
                        "INSERT INTO segments (id, type, scope, collection) VALUES (?1, ?2, ?3, ?4)",
                        params![uuid::Uuid::new_v4().to_string(), kind, scope, cid],
                    )?;
                }
                Ok(())
            })
            .await?;

        debug!(collection = name, id = %id, "Created collection");

        Ok(Collection {
            id,
            dimension,
            db: self.db.clone(),
        })
    }

    /// Appends records to a collection in order.
    pub async fn add(&self, collection: &Collection, records: Vec<Record>) -> Result<()> {
        let collection_id = collection.id.clone();
        let topic = format!("persistent://default/default/{collection_id}");

        self.db
            .transaction(move |tx| {
                let segment_id: String = tx.query_row(
                    "SELECT id FROM segments WHERE collection = ?1 AND scope = ?2",
                    params![collection_id, METADATA_SCOPE],
                    |row| row.get(0),
                )?;

                for record in records {
                    let metadata_json = serde_json::to_string(&record.metadata)?;

                    tx.execute(
                        "INSERT INTO embeddings_queue (operation, topic, id, vector, encoding, metadata)
                         VALUES (?1, ?2, ?3, ?4, 'FLOAT32', ?5)",
                        params![
                            OP_ADD,
                            topic,
                            record.id.0,
                            encode_vector(&record.embedding),
                            metadata_json
                        ],
                    )?;
                    let seq_id = tx.last_insert_rowid();

                    tx.execute(
                        "INSERT INTO embeddings (segment_id, embedding_id, seq_id) VALUES (?1, ?2, ?3)",
                        params![segment_id, record.id.0, seq_id.to_be_bytes().to_vec()],
                    )?;
                    let rowid = tx.last_insert_rowid();

                    if let Some(text) = &record.document {
                        tx.execute(
                            "INSERT INTO embedding_metadata (id, key, string_value) VALUES (?1, ?2, ?3)",
                            params![rowid, DOCUMENT_KEY, text],
                        )?;
                    }

                    for (key, value) in &record.metadata {
                        insert_metadata(tx, rowid, key, value)?;
                    }
                }
                Ok(())
            })
            .await
    }
}

fn insert_metadata(
    tx: &rusqlite::Transaction<'_>,
    rowid: i64,
    key: &str,
    value: &MetadataValue,
) -> Result<()> {
    let (column, sql_value) = match value {
        MetadataValue::Str(s) => ("string_value", Value::Text(s.clone())),
        MetadataValue::Int(i) => ("int_value", Value::Integer(*i)),
        MetadataValue::Float(f) => ("float_value", Value::Real(*f)),
        MetadataValue::Bool(b) => ("bool_value", Value::Integer(i64::from(*b))),
    };
    tx.execute(
        &format!("INSERT INTO embedding_metadata (id, key, {column}) VALUES (?1, ?2, ?3)"),
        params![rowid, key, sql_value],
    )?;
    Ok(())
}

#[async_trait]
impl VectorSource for ChromaStore {
    async fn collection_names(&self) -> std::result::Result<Vec<String>, ExportError> {
        Ok(self
            .list_collections()
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }

    async fn fetch(
        &self,
        collection: &str,
        limit: Option<usize>,
    ) -> std::result::Result<SourceBatch, ExportError> {
        let Some(handle) = self.get_collection(collection).await? else {
            return Err(ExportError::SourceUnavailable {
                name: collection.to_string(),
                available: self.collection_names().await?,
            });
        };

        let count = handle.count().await?;
        info!(
            collection,
            count,
            dimension = ?handle.dimension(),
            "Found collection"
        );

        let result = handle
            .get(Include::all(), limit)
            .await
            .map_err(|e| match e {
                DatabaseError::MissingVectors { missing, total, ids } => {
                    ExportError::DependencyMissing {
                        component: "Chroma vectors".to_string(),
                        hint: format!(
                            "{missing} of {total} records in '{collection}' have no readable \
                             vector (first: {}); they were flushed to the HNSW segment, which \
                             this exporter cannot read",
                            ids.join(", ")
                        ),
                    }
                }
                other => ExportError::from(other),
            })?;
        Ok(SourceBatch::aligned(
            result.ids,
            result.documents,
            result.embeddings,
            result.metadatas,
        ))
    }
}
