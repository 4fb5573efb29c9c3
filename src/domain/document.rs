//! Documents and the raw batches they are built from.

use serde::{Deserialize, Serialize};

use super::types::{DocumentId, Metadata};

/// A stored text with its embedding and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier within the collection.
    pub id: DocumentId,
    /// Raw document text, empty when the store holds none.
    pub text: String,
    /// The embedding vector, kept inline in the export.
    pub embedding: Vec<f32>,
    /// Scalar metadata attached to the document.
    pub metadata: Metadata,
}

/// Index-aligned arrays fetched from a vector source.
///
/// Every field has exactly `ids.len()` entries. Sources fill absent text
/// with an empty string and absent metadata with an empty map, so consumers
/// never check for presence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub ids: Vec<DocumentId>,
    pub texts: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    pub metadatas: Vec<Metadata>,
}

impl SourceBatch {
    /// Builds a batch from possibly-short optional arrays, padding each with
    /// its empty value so every field matches `ids` in length.
    pub fn aligned(
        ids: Vec<DocumentId>,
        texts: Option<Vec<String>>,
        embeddings: Option<Vec<Vec<f32>>>,
        metadatas: Option<Vec<Metadata>>,
    ) -> Self {
        let n = ids.len();
        Self {
            ids,
            texts: pad(texts.unwrap_or_default(), n),
            embeddings: pad(embeddings.unwrap_or_default(), n),
            metadatas: pad(metadatas.unwrap_or_default(), n),
        }
    }

    /// Number of documents in the batch.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns whether the batch holds no documents.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Joins the parallel arrays into documents, preserving row order.
    pub fn into_documents(self) -> Vec<Document> {
        self.ids
            .into_iter()
            .zip(self.texts)
            .zip(self.embeddings)
            .zip(self.metadatas)
            .map(|(((id, text), embedding), metadata)| Document {
                id,
                text,
                embedding,
                metadata,
            })
            .collect()
    }
}

fn pad<T: Default>(mut values: Vec<T>, n: usize) -> Vec<T> {
    values.truncate(n);
    values.resize_with(n, T::default);
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetadataValue;

    #[test]
    fn aligned_pads_missing_fields() {
        let batch = SourceBatch::aligned(
            vec!["a".into(), "b".into()],
            Some(vec!["first".to_string()]),
            Some(vec![vec![1.0, 2.0], vec![3.0, 4.0]]),
            None,
        );

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.texts, vec!["first".to_string(), String::new()]);
        assert!(batch.metadatas.iter().all(|m| m.is_empty()));
    }

    #[test]
    fn into_documents_keeps_order() {
        let mut metadata = Metadata::new();
        metadata.insert("role".to_string(), MetadataValue::from("user"));

        let batch = SourceBatch::aligned(
            vec!["x".into(), "y".into()],
            Some(vec!["hello".to_string(), "world".to_string()]),
            Some(vec![vec![0.5], vec![0.25]]),
            Some(vec![metadata.clone(), Metadata::new()]),
        );

        let docs = batch.into_documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, DocumentId::from("x"));
        assert_eq!(docs[0].text, "hello");
        assert_eq!(docs[0].metadata, metadata);
        assert_eq!(docs[1].embedding, vec![0.25]);
    }

    #[test]
    fn document_serializes_expected_keys() {
        let doc = Document {
            id: DocumentId::from("a"),
            text: String::new(),
            embedding: vec![1.0, 0.0],
            metadata: Metadata::new(),
        };
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["id"], "a");
        assert_eq!(json["text"], "");
        assert_eq!(json["embedding"], serde_json::json!([1.0, 0.0]));
        assert!(json["metadata"].as_object().unwrap().is_empty());
    }
}
