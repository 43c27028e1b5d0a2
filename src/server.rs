//! LSP Server Implementation
//!
//! Binds the [`Session`] to the Language Server Protocol: notifications feed
//! the document store, diagnostics are pushed through the client, and code
//! action requests are answered from the provider.

use std::sync::Arc;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::config::Config;
use crate::diagnostics::{self, Diagnostic as EngineDiagnostic};
use crate::document::{ContentChange, DocumentError};
use crate::engine::DiagnosticPublisher;
use crate::rules::RuleSet;
use crate::session::Session;

/// Publishes engine diagnostics to the editor
pub struct ClientPublisher {
    client: Client,
}

impl ClientPublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[tower_lsp::async_trait]
impl DiagnosticPublisher for ClientPublisher {
    async fn publish(&self, uri: Url, diagnostics: Vec<EngineDiagnostic>, version: Option<i32>) {
        tracing::debug!(
            "Publishing {} diagnostics for {} (version {:?})",
            diagnostics.len(),
            uri,
            version
        );
        let diagnostics = diagnostics.iter().map(EngineDiagnostic::to_lsp).collect();
        self.client
            .publish_diagnostics(uri, diagnostics, version)
            .await;
    }
}

/// Main LSP server structure
pub struct RulecheckServer {
    client: Client,
    session: Arc<Session>,
}

impl RulecheckServer {
    /// Create a new LSP server instance
    pub fn new(client: Client, config: &Config, rules: RuleSet) -> Self {
        let publisher = Arc::new(ClientPublisher::new(client.clone()));
        let session = Session::start(&config.settings, rules, publisher);

        Self {
            client,
            session: Arc::new(session),
        }
    }

    pub fn server_capabilities(source: &str) -> ServerCapabilities {
        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::INCREMENTAL),
                    will_save: Some(false),
                    will_save_wait_until: Some(false),
                    save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                        include_text: Some(false),
                    })),
                },
            )),
            code_action_provider: Some(CodeActionProviderCapability::Options(
                CodeActionOptions {
                    code_action_kinds: Some(vec![CodeActionKind::QUICKFIX]),
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                    resolve_provider: Some(false),
                },
            )),
            diagnostic_provider: Some(DiagnosticServerCapabilities::Options(
                DiagnosticOptions {
                    identifier: Some(source.to_string()),
                    inter_file_dependencies: false,
                    workspace_diagnostics: false,
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                },
            )),
            ..Default::default()
        }
    }

    /// Store errors are the caller's problem, never fatal to the server
    async fn report(&self, operation: &str, error: DocumentError) {
        tracing::warn!("{} rejected: {}", operation, error);
        self.client
            .log_message(MessageType::WARNING, format!("{operation} rejected: {error}"))
            .await;
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for RulecheckServer {
    async fn initialize(&self, _params: InitializeParams) -> Result<InitializeResult> {
        tracing::info!("Client initializing LSP server");

        Ok(InitializeResult {
            capabilities: Self::server_capabilities(self.session.source()),
            server_info: Some(ServerInfo {
                name: "Rulecheck".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        tracing::info!("LSP server initialized successfully");
        self.client
            .log_message(MessageType::INFO, "Rulecheck ready")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("LSP server shutting down");
        self.session.teardown();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        tracing::info!("Document opened: {} (version {})", doc.uri, doc.version);

        if let Err(e) = self
            .session
            .notify_open(doc.uri, doc.language_id, doc.version, doc.text)
        {
            self.report("Open", e).await;
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        tracing::debug!("Document changed: {} (version {})", uri, version);

        let changes = params
            .content_changes
            .into_iter()
            .map(|change| ContentChange {
                range: change.range.map(Into::into),
                text: change.text,
            })
            .collect();

        if let Err(e) = self.session.notify_edits(&uri, version, changes) {
            self.report("Change", e).await;
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        tracing::info!("Document saved: {}", params.text_document.uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        tracing::info!("Document closed: {}", uri);

        if let Err(e) = self.session.notify_close(&uri) {
            self.report("Close", e).await;
        }
    }

    async fn code_action(&self, params: CodeActionParams) -> Result<Option<CodeActionResponse>> {
        let diagnostics: Vec<EngineDiagnostic> = params
            .context
            .diagnostics
            .iter()
            .map(EngineDiagnostic::from_lsp)
            .collect();

        let actions = self
            .session
            .request_code_actions(
                &params.text_document.uri,
                diagnostics::Range::from(params.range),
                &diagnostics,
            )
            .iter()
            .map(|action| CodeActionOrCommand::CodeAction(action.to_lsp()))
            .collect();

        Ok(Some(actions))
    }

    async fn diagnostic(
        &self,
        params: DocumentDiagnosticParams,
    ) -> Result<DocumentDiagnosticReportResult> {
        let uri = params.text_document.uri;
        tracing::debug!("Pull diagnostic request for: {}", uri);

        let items = self
            .session
            .published(&uri)
            .await
            .map(|set| set.diagnostics.iter().map(EngineDiagnostic::to_lsp).collect())
            .unwrap_or_default();

        Ok(DocumentDiagnosticReportResult::Report(
            DocumentDiagnosticReport::Full(RelatedFullDocumentDiagnosticReport {
                related_documents: None,
                full_document_diagnostic_report: FullDocumentDiagnosticReport {
                    result_id: None,
                    items,
                },
            }),
        ))
    }
}
