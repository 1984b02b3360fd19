use super::{Chunk, ChunkId, Document, DocumentId};
use ahash::AHashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Read-mostly lookup of indexed chunks and their documents.
///
/// Adapters only return chunk ids and raw scores; the catalog hydrates those
/// ids into text and sentence spans for reranking and citation.
#[derive(Default)]
pub struct ChunkCatalog {
    chunks: RwLock<AHashMap<ChunkId, Arc<Chunk>>>,
    documents: RwLock<AHashMap<DocumentId, Document>>,
}

impl ChunkCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chunk_id: &str) -> Option<Arc<Chunk>> {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chunk_id)
            .cloned()
    }

    pub fn document(&self, document_id: &str) -> Option<Document> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    /// Source URI of the document a chunk belongs to
    pub fn source_uri(&self, chunk: &Chunk) -> Option<String> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chunk.document_id)
            .map(|d| d.source_uri.clone())
    }

    pub(crate) fn put_chunk(&self, chunk: Arc<Chunk>) {
        self.chunks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chunk.id.clone(), chunk);
    }

    pub(crate) fn remove_chunk(&self, chunk_id: &str) -> Option<Arc<Chunk>> {
        self.chunks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(chunk_id)
    }

    pub(crate) fn put_document(&self, document: Document) -> Option<Document> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.id.clone(), document)
    }

    pub(crate) fn remove_document(&self, document_id: &str) -> Option<Document> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn document_count(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
