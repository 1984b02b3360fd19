//! Ingestion side of the index: idempotent upserts of pre-computed documents
//! into the three adapters and the chunk catalog.

use super::{Chunk, ChunkCatalog, ChunkId, Document, DocumentId};
use crate::index::{AdapterError, IndexAdapter};
use ahash::AHashSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid chunk '{chunk_id}': {reason}")]
    InvalidChunk { chunk_id: ChunkId, reason: String },

    #[error("Invalid document '{document_id}': {reason}")]
    InvalidDocument {
        document_id: DocumentId,
        reason: String,
    },

    #[error("Chunk '{chunk_id}' already belongs to document '{owner}'")]
    ChunkOwnership { chunk_id: ChunkId, owner: DocumentId },

    #[error("Index update failed for chunk '{chunk_id}': {source}")]
    Index {
        chunk_id: ChunkId,
        source: AdapterError,
    },

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Malformed corpus record on line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

/// A document as delivered by the ingestion pipeline, chunks inline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub source_uri: String,
    #[serde(default)]
    pub ingested_at: Option<DateTime<Utc>>,
    pub chunks: Vec<Chunk>,
}

/// Outcome of ingesting one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: DocumentId,
    pub upserted: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub version: String,
}

/// Writes documents into every adapter and the catalog.
///
/// Deliveries are at-least-once: re-sending an unchanged chunk is a no-op,
/// and a document is only recorded after all its chunks reached every
/// adapter, so a failed delivery can simply be retried.
pub struct Ingestor {
    catalog: Arc<ChunkCatalog>,
    adapters: Vec<Arc<dyn IndexAdapter>>,
    write_lock: Mutex<()>,
}

impl Ingestor {
    pub fn new(catalog: Arc<ChunkCatalog>, adapters: Vec<Arc<dyn IndexAdapter>>) -> Self {
        Self {
            catalog,
            adapters,
            write_lock: Mutex::new(()),
        }
    }

    /// Ingest a document version, replacing any previous version
    pub async fn ingest(&self, record: DocumentRecord) -> Result<IngestReport, IngestError> {
        let _guard = self.write_lock.lock().await;

        let chunks = self.prepare(record.id.as_str(), record.chunks)?;
        let previous = self.catalog.document(&record.id);

        let mut report = IngestReport {
            document_id: record.id.clone(),
            ..Default::default()
        };

        let mut fingerprints = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let fingerprint = chunk.fingerprint();
            let unchanged = self
                .catalog
                .get(&chunk.id)
                .is_some_and(|existing| existing.fingerprint() == fingerprint);
            fingerprints.push(fingerprint);

            if unchanged {
                report.unchanged += 1;
                continue;
            }

            for adapter in &self.adapters {
                adapter
                    .upsert(chunk)
                    .await
                    .map_err(|source| IngestError::Index {
                        chunk_id: chunk.id.clone(),
                        source,
                    })?;
            }
            report.upserted += 1;
        }

        let current: AHashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        if let Some(previous) = &previous {
            for stale in previous
                .chunk_ids
                .iter()
                .filter(|id| !current.contains(id.as_str()))
            {
                self.delete_chunk(stale).await?;
                report.removed += 1;
            }
        }

        let mut hasher = blake3::Hasher::new();
        for fingerprint in &fingerprints {
            hasher.update(fingerprint.as_bytes());
        }
        report.version = hasher.finalize().to_hex().to_string();

        let chunk_ids = chunks.iter().map(|c| c.id.clone()).collect();
        for chunk in chunks {
            self.catalog.put_chunk(Arc::new(chunk));
        }
        self.catalog.put_document(Document {
            id: record.id.clone(),
            source_uri: record.source_uri,
            chunk_ids,
            ingested_at: record.ingested_at.unwrap_or_else(Utc::now),
            version: report.version.clone(),
        });

        debug!(
            "Ingested document {}: {} upserted, {} unchanged, {} removed",
            report.document_id, report.upserted, report.unchanged, report.removed
        );

        Ok(report)
    }

    /// Ingest many documents, stopping at the first failure
    pub async fn ingest_all(
        &self,
        records: Vec<DocumentRecord>,
    ) -> Result<Vec<IngestReport>, IngestError> {
        let total = records.len();
        let mut reports = Vec::with_capacity(total);
        for record in records {
            reports.push(self.ingest(record).await?);
        }
        info!("Ingested {} documents", total);
        Ok(reports)
    }

    /// Remove a document and all its chunks; returns the number of chunks removed
    pub async fn remove_document(&self, document_id: &str) -> Result<usize, IngestError> {
        let _guard = self.write_lock.lock().await;

        let Some(document) = self.catalog.document(document_id) else {
            return Ok(0);
        };
        for chunk_id in &document.chunk_ids {
            self.delete_chunk(chunk_id).await?;
        }
        self.catalog.remove_document(document_id);
        Ok(document.chunk_ids.len())
    }

    async fn delete_chunk(&self, chunk_id: &str) -> Result<(), IngestError> {
        for adapter in &self.adapters {
            adapter
                .delete(chunk_id)
                .await
                .map_err(|source| IngestError::Index {
                    chunk_id: chunk_id.to_string(),
                    source,
                })?;
        }
        self.catalog.remove_chunk(chunk_id);
        Ok(())
    }

    fn prepare(&self, document_id: &str, chunks: Vec<Chunk>) -> Result<Vec<Chunk>, IngestError> {
        if document_id.is_empty() {
            return Err(IngestError::InvalidDocument {
                document_id: document_id.to_string(),
                reason: "document id cannot be empty".to_string(),
            });
        }

        let mut seen = AHashSet::new();
        let mut prepared = Vec::with_capacity(chunks.len());
        for mut chunk in chunks {
            if chunk.document_id.is_empty() {
                chunk.document_id = document_id.to_string();
            } else if chunk.document_id != document_id {
                return Err(IngestError::InvalidChunk {
                    chunk_id: chunk.id,
                    reason: format!("declares parent '{}'", chunk.document_id),
                });
            }
            if chunk.sentences.is_empty() {
                chunk.sentences = crate::text::sentence_spans(&chunk.text);
            }
            chunk.validate()?;

            if !seen.insert(chunk.id.clone()) {
                return Err(IngestError::InvalidDocument {
                    document_id: document_id.to_string(),
                    reason: format!("duplicate chunk id '{}'", chunk.id),
                });
            }
            if let Some(existing) = self.catalog.get(&chunk.id) {
                if existing.document_id != document_id {
                    return Err(IngestError::ChunkOwnership {
                        chunk_id: chunk.id,
                        owner: existing.document_id.clone(),
                    });
                }
            }
            prepared.push(chunk);
        }
        Ok(prepared)
    }
}

/// Read a JSON-lines corpus file: one `DocumentRecord` per line
pub fn load_jsonl(path: &Path) -> Result<Vec<DocumentRecord>, IngestError> {
    let content = std::fs::read_to_string(path).map_err(|e| IngestError::Io {
        source: e,
        context: format!("Failed to read corpus file: {:?}", path),
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| IngestError::Parse {
                line: idx + 1,
                source,
            })
        })
        .collect()
}
