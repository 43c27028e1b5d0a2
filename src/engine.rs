//! Diagnostic Engine
//!
//! Consumes [`DocumentEvent`]s, runs every registered rule against each new
//! snapshot and publishes the result tagged with the snapshot's version.
//!
//! Publication goes through a gate that remembers, per document, the newest
//! version observed and the last version published. An evaluation only
//! publishes if its version is still the newest, so results reach the
//! editor in non-decreasing version order even when a slow run finishes
//! after a faster, newer one.

use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_lsp::lsp_types::Url;

use crate::config::Settings;
use crate::diagnostics::{Diagnostic, DiagnosticCollection, PublishedSet};
use crate::document::{Document, DocumentEvent};
use crate::rules::{RuleError, RuleSet};

/// Outbound side of the engine
#[tower_lsp::async_trait]
pub trait DiagnosticPublisher: Send + Sync + 'static {
    /// `version` is `None` only when clearing diagnostics of a closed document
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: Option<i32>);
}

/// Outcome of running every rule against one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationReport {
    pub uri: Url,
    pub version: i32,
    pub diagnostics: Vec<Diagnostic>,
    pub failures: Vec<RuleError>,
}

impl EvaluationReport {
    /// True when at least one rule failed and its findings are missing
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Identifies one evaluation: the document's open generation plus the
/// version it was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    generation: u64,
    version: i32,
}

struct GateEntry {
    generation: u64,
    latest: i32,
}

#[derive(Default)]
struct GateState {
    entries: HashMap<Url, GateEntry>,
    published: DiagnosticCollection,
}

/// Orders publications per document
#[derive(Default)]
struct PublishGate {
    state: Mutex<GateState>,
    generations: AtomicU64,
}

impl PublishGate {
    /// A freshly opened document starts a new generation, so results from a
    /// previous open of the same uri can never be published.
    async fn open(&self, uri: &Url, version: i32) -> Ticket {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        state.entries.insert(
            uri.clone(),
            GateEntry {
                generation,
                latest: version,
            },
        );
        state.published.clear(uri);
        Ticket {
            generation,
            version,
        }
    }

    async fn observe(&self, uri: &Url, version: i32) -> Ticket {
        let mut state = self.state.lock().await;
        let generations = &self.generations;
        let entry = state.entries.entry(uri.clone()).or_insert_with(|| GateEntry {
            generation: generations.fetch_add(1, Ordering::Relaxed),
            latest: version,
        });
        entry.latest = entry.latest.max(version);

        Ticket {
            generation: entry.generation,
            version,
        }
    }

    /// Publish unless superseded. The lock is held across the publish so two
    /// evaluations of the same document cannot interleave.
    async fn publish_if_current(
        &self,
        ticket: Ticket,
        report: EvaluationReport,
        publisher: &dyn DiagnosticPublisher,
    ) -> bool {
        let mut state = self.state.lock().await;

        let current = state.entries.get(&report.uri).is_some_and(|entry| {
            entry.generation == ticket.generation && entry.latest == ticket.version
        });
        let already_newer = state
            .published
            .version(&report.uri)
            .is_some_and(|published| published > ticket.version);
        if !current || already_newer {
            tracing::debug!(
                "Dropping superseded diagnostics for {} at version {}",
                report.uri,
                ticket.version
            );
            return false;
        }

        publisher
            .publish(
                report.uri.clone(),
                report.diagnostics.clone(),
                Some(ticket.version),
            )
            .await;
        state
            .published
            .replace(report.uri, ticket.version, report.diagnostics);
        true
    }

    async fn close(&self, uri: &Url, publisher: &dyn DiagnosticPublisher) {
        let mut state = self.state.lock().await;
        state.entries.remove(uri);
        state.published.clear(uri);
        publisher.publish(uri.clone(), Vec::new(), None).await;
    }

    async fn published(&self, uri: &Url) -> Option<PublishedSet> {
        self.state.lock().await.published.get(uri).cloned()
    }
}

/// Runs rules on document events and publishes versioned diagnostics
#[derive(Clone)]
pub struct DiagnosticEngine {
    rules: Arc<RuleSet>,
    source: Arc<str>,
    rule_timeout: Duration,
    publisher: Arc<dyn DiagnosticPublisher>,
    gate: Arc<PublishGate>,
    /// Dropping a sender cancels the evaluation waiting on its receiver
    in_flight: Arc<Mutex<HashMap<Url, oneshot::Sender<()>>>>,
}

impl DiagnosticEngine {
    pub fn new(
        rules: Arc<RuleSet>,
        settings: &Settings,
        publisher: Arc<dyn DiagnosticPublisher>,
    ) -> Self {
        tracing::info!(
            "Diagnostic engine initialized with {} rules: {:?}",
            rules.len(),
            rules.ids()
        );

        Self {
            rules,
            source: settings.source.as_str().into(),
            rule_timeout: settings.rule_timeout(),
            publisher,
            gate: Arc::new(PublishGate::default()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Start consuming events on the current runtime. The task ends when
    /// every sender of the event stream is gone.
    pub fn spawn(self, events: mpsc::UnboundedReceiver<DocumentEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    pub async fn run(self, mut events: mpsc::UnboundedReceiver<DocumentEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        tracing::info!("Document event stream closed, diagnostic engine stopping");
    }

    pub async fn handle_event(&self, event: DocumentEvent) {
        match event {
            DocumentEvent::Opened(doc) => {
                let ticket = self.gate.open(&doc.uri, doc.version).await;
                self.schedule(doc, ticket).await;
            }
            DocumentEvent::Changed(doc) => {
                let ticket = self.gate.observe(&doc.uri, doc.version).await;
                self.schedule(doc, ticket).await;
            }
            DocumentEvent::Closed(uri) => {
                self.in_flight.lock().await.remove(&uri);
                self.gate.close(&uri, &*self.publisher).await;
                tracing::debug!("Cleared diagnostics for closed document {}", uri);
            }
        }
    }

    /// Start an evaluation, superseding any still running for the document
    async fn schedule(&self, doc: Document, ticket: Ticket) {
        let (cancel, cancelled) = oneshot::channel();
        if self
            .in_flight
            .lock()
            .await
            .insert(doc.uri.clone(), cancel)
            .is_some()
        {
            tracing::trace!("Superseding previous evaluation of {}", doc.uri);
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let report = tokio::select! {
                biased;
                _ = cancelled => {
                    tracing::debug!(
                        "Evaluation of {} at version {} superseded",
                        doc.uri,
                        doc.version
                    );
                    return;
                }
                report = engine.evaluate(&doc) => report,
            };
            engine
                .gate
                .publish_if_current(ticket, report, &*engine.publisher)
                .await;
        });
    }

    /// Run every rule against a snapshot. Failing rules are reported in the
    /// result and do not affect the others.
    pub async fn evaluate(&self, doc: &Document) -> EvaluationReport {
        let text = Arc::clone(&doc.text);

        let runs = self.rules.iter().map(|rule| {
            let text = Arc::clone(&text);
            async move {
                let outcome = AssertUnwindSafe(tokio::time::timeout(
                    self.rule_timeout,
                    rule.evaluate(&text),
                ))
                .catch_unwind()
                .await;

                let result = match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(_elapsed)) => Err(RuleError::TimedOut {
                        rule: rule.id().to_string(),
                        timeout_ms: self.rule_timeout.as_millis() as u64,
                    }),
                    Err(_panic) => Err(RuleError::Panicked(rule.id().to_string())),
                };
                result.map(|found| (rule.id().to_string(), found))
            }
        });

        let mut diagnostics = Vec::new();
        let mut failures = Vec::new();
        for result in join_all(runs).await {
            match result {
                Ok((rule_id, found)) => diagnostics.extend(found.into_iter().map(|finding| {
                    Diagnostic::from_rule(finding, rule_id.as_str(), &*self.source, doc.version)
                })),
                Err(e) => {
                    tracing::error!(
                        "Rule evaluation failed for {} at version {}: {}",
                        doc.uri,
                        doc.version,
                        e
                    );
                    failures.push(e);
                }
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                "Diagnostics for {} at version {} are partial: {} of {} rules failed",
                doc.uri,
                doc.version,
                failures.len(),
                self.rules.len()
            );
        }

        EvaluationReport {
            uri: doc.uri.clone(),
            version: doc.version,
            diagnostics,
            failures,
        }
    }

    /// Most recently published diagnostics for a document
    pub async fn published(&self, uri: &Url) -> Option<PublishedSet> {
        self.gate.published(uri).await
    }
}
