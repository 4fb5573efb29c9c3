//! The assembled export document.

use serde::{Deserialize, Serialize};

use super::document::{Document, SourceBatch};
use crate::projection::Projections;

/// Header describing an exported corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusMetadata {
    /// Human-readable corpus name.
    pub name: String,
    /// Identifier of the model that produced the stored vectors.
    pub embedding_model: String,
    /// Dimension of the first document's embedding, 0 for an empty corpus.
    pub embedding_dim: usize,
    /// Number of exported documents.
    pub count: usize,
}

/// Documents plus their projections, ready to serialize.
///
/// Row `i` of every projection belongs to `documents[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusExport {
    pub metadata: CorpusMetadata,
    pub documents: Vec<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projections: Option<Projections>,
}

impl CorpusExport {
    /// Joins a fetched batch with its projections.
    pub fn assemble(
        name: impl Into<String>,
        embedding_model: impl Into<String>,
        batch: SourceBatch,
        projections: Option<Projections>,
    ) -> Self {
        let embedding_dim = batch.embeddings.first().map(Vec::len).unwrap_or(0);
        let documents = batch.into_documents();

        if let Some(projections) = &projections {
            debug_assert!(projections.iter().all(|(_, p)| p.len() == documents.len()));
        }

        Self {
            metadata: CorpusMetadata {
                name: name.into(),
                embedding_model: embedding_model.into(),
                embedding_dim,
                count: documents.len(),
            },
            documents,
            projections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DocumentId;

    fn batch() -> SourceBatch {
        SourceBatch::aligned(
            vec!["a".into(), "b".into(), "c".into()],
            None,
            Some(vec![
                vec![1.0, 0.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0, 0.0],
                vec![0.0, 0.0, 1.0, 0.0],
            ]),
            None,
        )
    }

    #[test]
    fn assemble_records_header() {
        let export = CorpusExport::assemble("Memory", "model-x", batch(), None);

        assert_eq!(export.metadata.count, 3);
        assert_eq!(export.metadata.embedding_dim, 4);
        assert_eq!(export.metadata.embedding_model, "model-x");
        assert_eq!(export.documents[0].id, DocumentId::from("a"));
    }

    #[test]
    fn empty_corpus_has_zero_dimension() {
        let export = CorpusExport::assemble("Memory", "model-x", SourceBatch::default(), None);
        assert_eq!(export.metadata.count, 0);
        assert_eq!(export.metadata.embedding_dim, 0);
        assert!(export.documents.is_empty());
    }

    #[test]
    fn projections_key_omitted_when_absent() {
        let export = CorpusExport::assemble("Memory", "model-x", batch(), None);
        let json = serde_json::to_value(&export).unwrap();

        assert!(json.get("projections").is_none());
        assert_eq!(json["metadata"]["count"], 3);
    }

    #[test]
    fn projections_serialize_by_method() {
        let rows = vec![[0.0, 0.0, 0.0]; 3];
        let projections = Projections {
            pca: rows.clone(),
            umap: rows.clone(),
            tsne: rows,
        };
        let export = CorpusExport::assemble("Memory", "model-x", batch(), Some(projections));
        let json = serde_json::to_value(&export).unwrap();

        for method in ["pca", "umap", "tsne"] {
            assert_eq!(json["projections"][method].as_array().unwrap().len(), 3);
        }
    }
}
