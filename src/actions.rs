//! Code Action Provider
//!
//! Turns diagnostics the editor reports as active into quick fixes. Each
//! fix replaces the text a diagnostic covers with its rule's transform and
//! is bound to the document's current version.

use std::sync::Arc;
use tower_lsp::lsp_types::Url;

use crate::config::Settings;
use crate::diagnostics::{CodeAction, CodeActionKind, Diagnostic, Range, TextEdit, VersionedEdit};
use crate::document::{Document, DocumentStore};
use crate::rules::RuleSet;
use crate::text::LineIndex;

pub struct CodeActionProvider {
    store: Arc<DocumentStore>,
    rules: Arc<RuleSet>,
    source: String,
    reject_stale: bool,
}

impl CodeActionProvider {
    pub fn new(store: Arc<DocumentStore>, rules: Arc<RuleSet>, settings: &Settings) -> Self {
        Self {
            store,
            rules,
            source: settings.source.clone(),
            reject_stale: settings.reject_stale_code_actions,
        }
    }

    /// One quick fix per fixable diagnostic from this engine, in input order
    pub fn provide(&self, uri: &Url, range: Range, diagnostics: &[Diagnostic]) -> Vec<CodeAction> {
        let ours: Vec<&Diagnostic> = diagnostics
            .iter()
            .filter(|d| d.source == self.source)
            .collect();

        let Some(doc) = self.store.get(uri) else {
            tracing::debug!("Code actions requested for unknown document {}", uri);
            return Vec::new();
        };
        if ours.is_empty() {
            return Vec::new();
        }

        tracing::debug!(
            "Computing code actions for {} in {} ({} diagnostics)",
            uri,
            range,
            ours.len()
        );

        let index = doc.line_index();
        ours.into_iter()
            .filter_map(|diagnostic| self.fix_for(&doc, &index, diagnostic))
            .collect()
    }

    fn fix_for(
        &self,
        doc: &Document,
        index: &LineIndex<'_>,
        diagnostic: &Diagnostic,
    ) -> Option<CodeAction> {
        if self.reject_stale
            && diagnostic
                .document_version
                .is_some_and(|version| version < doc.version)
        {
            tracing::debug!(
                "Skipping fix for stale diagnostic at version {:?}, document is at {}",
                diagnostic.document_version,
                doc.version
            );
            return None;
        }

        let Some(covered) = index.slice(diagnostic.range).filter(|text| !text.is_empty()) else {
            tracing::debug!(
                "Diagnostic range {} no longer resolves in {}",
                diagnostic.range,
                doc.uri
            );
            return None;
        };

        let fix = self.rules.get(&diagnostic.rule_id)?.fix(covered)?;

        Some(CodeAction {
            title: fix.title,
            kind: CodeActionKind::QuickFix,
            edit: VersionedEdit {
                uri: doc.uri.clone(),
                version: doc.version,
                edits: vec![TextEdit {
                    range: diagnostic.range,
                    new_text: fix.replacement,
                }],
            },
            diagnostics: vec![diagnostic.clone()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticSeverity, RuleDiagnostic};
    use crate::rules::{PatternRule, PatternRuleConfig};

    fn uri() -> Url {
        Url::parse("file:///doc1.txt").unwrap()
    }

    fn rules() -> Arc<RuleSet> {
        let mut rules = RuleSet::new();
        rules
            .register(Arc::new(
                PatternRule::new(PatternRuleConfig::uppercase_word()).unwrap(),
            ))
            .unwrap();
        Arc::new(rules)
    }

    fn provider(settings: &Settings) -> (Arc<DocumentStore>, CodeActionProvider) {
        let (store, _events) = DocumentStore::init();
        let store = Arc::new(store);
        let provider = CodeActionProvider::new(Arc::clone(&store), rules(), settings);
        (store, provider)
    }

    fn diagnostic(range: Range, source: &str, version: i32) -> Diagnostic {
        Diagnostic::from_rule(
            RuleDiagnostic::new(range, DiagnosticSeverity::Warning, "is all uppercase."),
            "uppercase-word",
            source,
            version,
        )
    }

    #[test]
    fn test_one_lowercase_fix_per_diagnostic() {
        let (store, provider) = provider(&Settings::default());
        store.open(uri(), "plaintext", 1, "HELLO world ABC").unwrap();

        let hello = diagnostic(Range::single_line(0, 0, 5), "rulecheck", 1);
        let abc = diagnostic(Range::single_line(0, 12, 15), "rulecheck", 1);
        let actions = provider.provide(
            &uri(),
            Range::single_line(0, 0, 15),
            &[hello.clone(), abc.clone()],
        );

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].title, "Fix to lower case");
        assert_eq!(actions[0].kind, CodeActionKind::QuickFix);
        assert_eq!(actions[0].diagnostics, vec![hello]);
        assert_eq!(
            actions[0].edit,
            VersionedEdit {
                uri: uri(),
                version: 1,
                edits: vec![TextEdit {
                    range: Range::single_line(0, 0, 5),
                    new_text: "hello".to_string(),
                }],
            }
        );
        assert_eq!(actions[1].diagnostics, vec![abc]);
        assert_eq!(actions[1].edit.edits[0].new_text, "abc");
    }

    #[test]
    fn test_foreign_diagnostics_are_ignored() {
        let (store, provider) = provider(&Settings::default());
        store.open(uri(), "plaintext", 1, "HELLO world").unwrap();

        let foreign = diagnostic(Range::single_line(0, 0, 5), "spellcheck", 1);
        assert!(provider
            .provide(&uri(), Range::single_line(0, 0, 5), &[foreign])
            .is_empty());
    }

    #[test]
    fn test_unknown_document_yields_nothing() {
        let (_store, provider) = provider(&Settings::default());

        let hello = diagnostic(Range::single_line(0, 0, 5), "rulecheck", 1);
        assert!(provider
            .provide(&uri(), Range::single_line(0, 0, 5), &[hello])
            .is_empty());
    }

    #[test]
    fn test_edit_uses_current_document_version() {
        let (store, provider) = provider(&Settings::default());
        store.open(uri(), "plaintext", 1, "HELLO world").unwrap();
        store.apply_change(&uri(), "HELLO there", 2).unwrap();

        let hello = diagnostic(Range::single_line(0, 0, 5), "rulecheck", 1);
        let actions = provider.provide(&uri(), Range::single_line(0, 0, 5), &[hello]);

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].edit.version, 2);
        assert_eq!(actions[0].diagnostics[0].document_version, Some(1));
    }

    #[test]
    fn test_stale_diagnostics_rejected_when_configured() {
        let settings = Settings {
            reject_stale_code_actions: true,
            ..Settings::default()
        };
        let (store, provider) = provider(&settings);
        store.open(uri(), "plaintext", 1, "HELLO world").unwrap();
        store.apply_change(&uri(), "HELLO there", 2).unwrap();

        let stale = diagnostic(Range::single_line(0, 0, 5), "rulecheck", 1);
        let current = diagnostic(Range::single_line(0, 0, 5), "rulecheck", 2);
        let actions = provider.provide(&uri(), Range::single_line(0, 0, 5), &[stale, current]);

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].diagnostics[0].document_version, Some(2));
    }

    #[test]
    fn test_range_past_line_end_fixes_up_to_line_end() {
        let (store, provider) = provider(&Settings::default());
        store.open(uri(), "plaintext", 1, "say HI\r\nnext").unwrap();

        let hi = diagnostic(Range::single_line(0, 4, 7), "rulecheck", 1);
        let actions = provider.provide(&uri(), Range::single_line(0, 4, 7), &[hi]);

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].edit.edits[0].new_text, "hi");
    }

    #[test]
    fn test_unresolvable_or_unknown_rule_is_skipped() {
        let (store, provider) = provider(&Settings::default());
        store.open(uri(), "plaintext", 1, "HI").unwrap();

        let out_of_range = diagnostic(Range::single_line(3, 0, 5), "rulecheck", 1);
        let mut unknown_rule = diagnostic(Range::single_line(0, 0, 2), "rulecheck", 1);
        unknown_rule.rule_id = "gone".to_string();

        assert!(provider
            .provide(
                &uri(),
                Range::single_line(0, 0, 2),
                &[out_of_range, unknown_rule]
            )
            .is_empty());
    }
}
