//! Document Store
//!
//! Owns the text of every open document and its version counter. Every
//! accepted mutation is announced to subscribers as a [`DocumentEvent`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tower_lsp::lsp_types::Url;

use crate::diagnostics::Range;
use crate::text::LineIndex;

/// Contract violations reported back to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Document already open: {0}")]
    DuplicateDocument(Url),

    #[error("Document not open: {0}")]
    UnknownDocument(Url),

    #[error("Stale version for {uri}: received {received}, current is {current}")]
    StaleVersion {
        uri: Url,
        current: i32,
        received: i32,
    },

    #[error("Edit range {range} does not resolve in {uri}")]
    InvalidRange { uri: Url, range: Range },
}

/// Snapshot of a single document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub uri: Url,
    /// Version number, strictly increasing per accepted edit
    pub version: i32,
    /// Full text content, shared between snapshots
    pub text: Arc<str>,
    /// Language identifier
    pub language_id: String,
}

impl Document {
    pub fn line_index(&self) -> LineIndex<'_> {
        LineIndex::new(&self.text)
    }
}

/// One entry of an edit notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    /// `None` replaces the whole document
    pub range: Option<Range>,
    pub text: String,
}

impl ContentChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    pub fn ranged(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }
}

/// Notifications emitted to subscribers, in mutation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Opened(Document),
    Changed(Document),
    Closed(Url),
}

impl DocumentEvent {
    pub fn uri(&self) -> &Url {
        match self {
            DocumentEvent::Opened(doc) | DocumentEvent::Changed(doc) => &doc.uri,
            DocumentEvent::Closed(uri) => uri,
        }
    }
}

/// Document store for managing open files
pub struct DocumentStore {
    documents: DashMap<Url, Document>,
    events: mpsc::UnboundedSender<DocumentEvent>,
}

impl DocumentStore {
    /// Create a store and the receiving end of its event stream.
    pub fn init() -> (Self, mpsc::UnboundedReceiver<DocumentEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let store = Self {
            documents: DashMap::new(),
            events,
        };
        (store, receiver)
    }

    /// Open a new document
    pub fn open(
        &self,
        uri: Url,
        language_id: impl Into<String>,
        version: i32,
        text: impl Into<Arc<str>>,
    ) -> Result<Document, DocumentError> {
        match self.documents.entry(uri.clone()) {
            Entry::Occupied(_) => Err(DocumentError::DuplicateDocument(uri)),
            Entry::Vacant(entry) => {
                let document = Document {
                    uri,
                    version,
                    text: text.into(),
                    language_id: language_id.into(),
                };
                tracing::debug!("Opened {} at version {}", document.uri, version);
                // Emitted while the entry is locked so events keep mutation order
                self.emit(DocumentEvent::Opened(document.clone()));
                entry.insert(document.clone());
                Ok(document)
            }
        }
    }

    /// Replace the full text of a document
    pub fn apply_change(
        &self,
        uri: &Url,
        text: impl Into<String>,
        version: i32,
    ) -> Result<Document, DocumentError> {
        self.apply_edits(uri, vec![ContentChange::full(text)], version)
    }

    /// Fold a sequence of changes into the stored text and bump the version
    /// once. Nothing is modified if any change fails to apply.
    pub fn apply_edits(
        &self,
        uri: &Url,
        changes: Vec<ContentChange>,
        version: i32,
    ) -> Result<Document, DocumentError> {
        let mut doc = self
            .documents
            .get_mut(uri)
            .ok_or_else(|| DocumentError::UnknownDocument(uri.clone()))?;

        if version <= doc.version {
            return Err(DocumentError::StaleVersion {
                uri: uri.clone(),
                current: doc.version,
                received: version,
            });
        }

        let mut text = doc.text.to_string();
        for change in changes {
            match change.range {
                None => text = change.text,
                Some(range) => {
                    let (start, end) = LineIndex::new(&text).span(range).ok_or_else(|| {
                        DocumentError::InvalidRange {
                            uri: uri.clone(),
                            range,
                        }
                    })?;
                    text.replace_range(start..end, &change.text);
                }
            }
        }

        doc.text = text.into();
        doc.version = version;
        tracing::debug!("Changed {} to version {}", uri, version);

        let snapshot = doc.clone();
        self.emit(DocumentEvent::Changed(snapshot.clone()));
        Ok(snapshot)
    }

    /// Get document
    pub fn get(&self, uri: &Url) -> Option<Document> {
        self.documents.get(uri).map(|doc| doc.clone())
    }

    /// Close a document
    pub fn close(&self, uri: &Url) -> Result<(), DocumentError> {
        match self.documents.entry(uri.clone()) {
            Entry::Vacant(_) => Err(DocumentError::UnknownDocument(uri.clone())),
            Entry::Occupied(entry) => {
                tracing::debug!("Closed {}", uri);
                self.emit(DocumentEvent::Closed(uri.clone()));
                entry.remove();
                Ok(())
            }
        }
    }

    /// Close every open document. Returns how many were closed.
    pub fn teardown(&self) -> usize {
        self.uris()
            .iter()
            .filter(|uri| self.close(uri).is_ok())
            .count()
    }

    /// Get all document URIs
    pub fn uris(&self) -> Vec<Url> {
        self.documents
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn emit(&self, event: DocumentEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No document listener attached, event dropped");
        }
    }
}
