//! Session
//!
//! Wires the document store, diagnostic engine and code action provider
//! together for one editor session, and exposes the inbound operations the
//! protocol layer calls.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_lsp::lsp_types::Url;

use crate::actions::CodeActionProvider;
use crate::config::Settings;
use crate::diagnostics::{CodeAction, Diagnostic, PublishedSet, Range};
use crate::document::{ContentChange, Document, DocumentError, DocumentStore};
use crate::engine::{DiagnosticEngine, DiagnosticPublisher};
use crate::rules::RuleSet;

pub struct Session {
    store: Arc<DocumentStore>,
    engine: DiagnosticEngine,
    actions: CodeActionProvider,
    engine_task: JoinHandle<()>,
}

impl Session {
    /// Start a session. Must be called from within a tokio runtime.
    pub fn start(
        settings: &Settings,
        rules: RuleSet,
        publisher: Arc<dyn DiagnosticPublisher>,
    ) -> Self {
        let rules = Arc::new(rules);
        let (store, events) = DocumentStore::init();
        let store = Arc::new(store);

        let engine = DiagnosticEngine::new(Arc::clone(&rules), settings, publisher);
        let engine_task = engine.clone().spawn(events);
        let actions = CodeActionProvider::new(Arc::clone(&store), rules, settings);

        tracing::info!("Session started with source tag '{}'", settings.source);

        Self {
            store,
            engine,
            actions,
            engine_task,
        }
    }

    pub fn notify_open(
        &self,
        uri: Url,
        language_id: String,
        version: i32,
        text: String,
    ) -> Result<(), DocumentError> {
        self.store.open(uri, language_id, version, text).map(|_| ())
    }

    pub fn notify_change(&self, uri: &Url, version: i32, text: String) -> Result<(), DocumentError> {
        self.store.apply_change(uri, text, version).map(|_| ())
    }

    pub fn notify_edits(
        &self,
        uri: &Url,
        version: i32,
        changes: Vec<ContentChange>,
    ) -> Result<(), DocumentError> {
        self.store.apply_edits(uri, changes, version).map(|_| ())
    }

    pub fn notify_close(&self, uri: &Url) -> Result<(), DocumentError> {
        self.store.close(uri)
    }

    pub fn request_code_actions(
        &self,
        uri: &Url,
        range: Range,
        diagnostics: &[Diagnostic],
    ) -> Vec<CodeAction> {
        self.actions.provide(uri, range, diagnostics)
    }

    pub fn document(&self, uri: &Url) -> Option<Document> {
        self.store.get(uri)
    }

    pub async fn published(&self, uri: &Url) -> Option<PublishedSet> {
        self.engine.published(uri).await
    }

    pub fn source(&self) -> &str {
        self.engine.source()
    }

    /// Close every open document so their diagnostics are cleared
    pub fn teardown(&self) -> usize {
        let closed = self.store.teardown();
        tracing::info!("Session teardown closed {} documents", closed);
        closed
    }

    /// Tear down and wait for the engine to drain its events
    pub async fn stop(self) {
        self.teardown();
        let Session {
            store,
            engine,
            actions,
            engine_task,
        } = self;
        drop(actions);
        drop(store);
        drop(engine);
        if let Err(e) = engine_task.await {
            tracing::error!("Diagnostic engine task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticSeverity;
    use crate::engine::tests::{next_publication, RecordingPublisher};
    use crate::rules::{PatternRule, PatternRuleConfig};
    use crate::text::LineIndex;

    fn uri() -> Url {
        Url::parse("file:///doc1.txt").unwrap()
    }

    fn rules() -> RuleSet {
        let mut rules = RuleSet::new();
        rules
            .register(Arc::new(
                PatternRule::new(PatternRuleConfig::uppercase_word()).unwrap(),
            ))
            .unwrap();
        rules
    }

    #[tokio::test]
    async fn test_end_to_end_fix() {
        let (publisher, mut publications) = RecordingPublisher::new();
        let session = Session::start(&Settings::default(), rules(), publisher);

        session
            .notify_open(uri(), "plaintext".into(), 1, "HELLO world".into())
            .unwrap();
        let (_, diagnostics, version) = next_publication(&mut publications).await;

        assert_eq!(version, Some(1));
        assert_eq!(diagnostics.len(), 1);
        let hello = &diagnostics[0];
        assert_eq!(hello.range, Range::single_line(0, 0, 5));
        assert_eq!(hello.message, "HELLO is all uppercase.");
        assert_eq!(hello.severity, DiagnosticSeverity::Warning);
        assert_eq!(hello.document_version, Some(1));

        // Echo through the wire format as the editor would
        let echoed = Diagnostic::from_lsp(&hello.to_lsp());
        let actions = session.request_code_actions(&uri(), hello.range, &[echoed]);
        assert_eq!(actions.len(), 1);
        let edit = &actions[0].edit;
        assert_eq!(edit.version, 1);
        assert_eq!(edit.edits[0].range, Range::single_line(0, 0, 5));
        assert_eq!(edit.edits[0].new_text, "hello");

        let doc = session.document(&uri()).unwrap();
        let (start, end) = LineIndex::new(&doc.text)
            .span(edit.edits[0].range)
            .unwrap();
        let mut fixed = doc.text.to_string();
        fixed.replace_range(start..end, &edit.edits[0].new_text);
        assert_eq!(fixed, "hello world");

        session.stop().await;
    }

    #[tokio::test]
    async fn test_close_clears_diagnostics() {
        let (publisher, mut publications) = RecordingPublisher::new();
        let session = Session::start(&Settings::default(), rules(), publisher);

        session
            .notify_open(uri(), "plaintext".into(), 1, "ABC def GHI".into())
            .unwrap();
        assert_eq!(next_publication(&mut publications).await.1.len(), 2);

        session.notify_close(&uri()).unwrap();
        let (closed_uri, diagnostics, version) = next_publication(&mut publications).await;
        assert_eq!(closed_uri, uri());
        assert!(diagnostics.is_empty());
        assert_eq!(version, None);

        assert!(session.document(&uri()).is_none());
        assert!(session.published(&uri()).await.is_none());
        assert_eq!(
            session.notify_close(&uri()),
            Err(DocumentError::UnknownDocument(uri()))
        );
    }

    #[tokio::test]
    async fn test_incremental_changes_are_rechecked() {
        let (publisher, mut publications) = RecordingPublisher::new();
        let session = Session::start(&Settings::default(), rules(), publisher);

        session
            .notify_open(uri(), "plaintext".into(), 1, "quiet text".into())
            .unwrap();
        assert!(next_publication(&mut publications).await.1.is_empty());

        session
            .notify_edits(
                &uri(),
                2,
                vec![ContentChange::ranged(Range::single_line(0, 0, 5), "LOUD")],
            )
            .unwrap();
        let (_, diagnostics, version) = next_publication(&mut publications).await;
        assert_eq!(version, Some(2));
        assert_eq!(diagnostics[0].message, "LOUD is all uppercase.");
        assert_eq!(diagnostics[0].range, Range::single_line(0, 0, 4));

        assert!(matches!(
            session.notify_change(&uri(), 2, "again".into()),
            Err(DocumentError::StaleVersion { current: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_edit_at_end_of_document() {
        let (publisher, mut publications) = RecordingPublisher::new();
        let session = Session::start(&Settings::default(), rules(), publisher);

        session
            .notify_open(uri(), "plaintext".into(), 1, "quiet".into())
            .unwrap();
        assert!(next_publication(&mut publications).await.1.is_empty());

        // Editors address the end of a single line document as line 1
        session
            .notify_edits(
                &uri(),
                2,
                vec![ContentChange::ranged(Range::multi_line(0, 5, 1, 0), " LOUD")],
            )
            .unwrap();
        assert_eq!(&*session.document(&uri()).unwrap().text, "quiet LOUD");

        let (_, diagnostics, version) = next_publication(&mut publications).await;
        assert_eq!(version, Some(2));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].range, Range::single_line(0, 6, 10));

        session.stop().await;
    }

    #[tokio::test]
    async fn test_crlf_edit_is_rechecked_with_correct_ranges() {
        let (publisher, mut publications) = RecordingPublisher::new();
        let session = Session::start(&Settings::default(), rules(), publisher);

        session
            .notify_open(uri(), "plaintext".into(), 1, "A\r\nBC".into())
            .unwrap();
        let (_, diagnostics, _) = next_publication(&mut publications).await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].range, Range::single_line(1, 0, 2));

        session
            .notify_edits(
                &uri(),
                2,
                vec![ContentChange::ranged(Range::single_line(0, 1, 99), "BC")],
            )
            .unwrap();
        assert_eq!(&*session.document(&uri()).unwrap().text, "ABC\r\nBC");

        let (_, diagnostics, version) = next_publication(&mut publications).await;
        assert_eq!(version, Some(2));
        let ranges: Vec<Range> = diagnostics.iter().map(|d| d.range).collect();
        assert_eq!(
            ranges,
            vec![Range::single_line(0, 0, 3), Range::single_line(1, 0, 2)]
        );
        assert_eq!(diagnostics[0].message, "ABC is all uppercase.");

        let actions = session.request_code_actions(&uri(), diagnostics[0].range, &diagnostics[..1]);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].edit.edits[0].new_text, "abc");

        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_clears_open_documents() {
        let (publisher, mut publications) = RecordingPublisher::new();
        let session = Session::start(&Settings::default(), rules(), publisher);

        session
            .notify_open(uri(), "plaintext".into(), 1, "OK".into())
            .unwrap();
        assert_eq!(next_publication(&mut publications).await.2, Some(1));

        session.stop().await;
        let (_, diagnostics, version) = next_publication(&mut publications).await;
        assert!(diagnostics.is_empty());
        assert_eq!(version, None);
    }
}
