//! Diagnostics module for the rulecheck engine
//!
//! Positions, ranges, versioned diagnostics and quick-fix code actions, plus
//! the conversions to and from the LSP wire types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tower_lsp::lsp_types::{self as lsp, Url};

/// Diagnostic severity levels matching LSP specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    #[serde(alias = "info")]
    Information = 3,
    Hint = 4,
}

impl From<DiagnosticSeverity> for lsp::DiagnosticSeverity {
    fn from(severity: DiagnosticSeverity) -> Self {
        match severity {
            DiagnosticSeverity::Error => lsp::DiagnosticSeverity::ERROR,
            DiagnosticSeverity::Warning => lsp::DiagnosticSeverity::WARNING,
            DiagnosticSeverity::Information => lsp::DiagnosticSeverity::INFORMATION,
            DiagnosticSeverity::Hint => lsp::DiagnosticSeverity::HINT,
        }
    }
}

impl DiagnosticSeverity {
    fn from_lsp(severity: Option<lsp::DiagnosticSeverity>) -> Self {
        match severity {
            Some(s) if s == lsp::DiagnosticSeverity::WARNING => DiagnosticSeverity::Warning,
            Some(s) if s == lsp::DiagnosticSeverity::INFORMATION => {
                DiagnosticSeverity::Information
            }
            Some(s) if s == lsp::DiagnosticSeverity::HINT => DiagnosticSeverity::Hint,
            _ => DiagnosticSeverity::Error,
        }
    }
}

/// Position in a document: 0-based line and UTF-16 code unit offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.character)
    }
}

impl From<lsp::Position> for Position {
    fn from(pos: lsp::Position) -> Self {
        Self::new(pos.line, pos.character)
    }
}

impl From<Position> for lsp::Position {
    fn from(pos: Position) -> Self {
        lsp::Position::new(pos.line, pos.character)
    }
}

/// Range in a document (start and end positions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn single_line(line: u32, start_char: u32, end_char: u32) -> Self {
        Self {
            start: Position::new(line, start_char),
            end: Position::new(line, end_char),
        }
    }

    pub fn multi_line(start_line: u32, start_char: u32, end_line: u32, end_char: u32) -> Self {
        Self {
            start: Position::new(start_line, start_char),
            end: Position::new(end_line, end_char),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl From<lsp::Range> for Range {
    fn from(range: lsp::Range) -> Self {
        Self::new(range.start.into(), range.end.into())
    }
}

impl From<Range> for lsp::Range {
    fn from(range: Range) -> Self {
        lsp::Range::new(range.start.into(), range.end.into())
    }
}

/// A finding reported by a rule, before the engine stamps it with a
/// source tag, rule id and document version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDiagnostic {
    pub range: Range,
    pub message: String,
    pub severity: DiagnosticSeverity,
}

impl RuleDiagnostic {
    pub fn new(range: Range, severity: DiagnosticSeverity, message: impl Into<String>) -> Self {
        Self {
            range,
            severity,
            message: message.into(),
        }
    }
}

/// Extra payload carried in the LSP `data` field so that a diagnostic echoed
/// back by the editor can be traced to its rule and document version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosticData {
    rule_id: String,
    document_version: Option<i32>,
}

/// A diagnostic produced by one engine run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    pub message: String,
    pub severity: DiagnosticSeverity,
    pub source: String,
    pub rule_id: String,
    /// Version of the text this was computed from. Only `None` for
    /// diagnostics rebuilt from an editor payload that lost the version.
    pub document_version: Option<i32>,
}

impl Diagnostic {
    pub fn from_rule(
        finding: RuleDiagnostic,
        rule_id: impl Into<String>,
        source: impl Into<String>,
        document_version: i32,
    ) -> Self {
        Self {
            range: finding.range,
            message: finding.message,
            severity: finding.severity,
            source: source.into(),
            rule_id: rule_id.into(),
            document_version: Some(document_version),
        }
    }

    pub fn to_lsp(&self) -> lsp::Diagnostic {
        let data = DiagnosticData {
            rule_id: self.rule_id.clone(),
            document_version: self.document_version,
        };

        lsp::Diagnostic {
            range: self.range.into(),
            severity: Some(self.severity.into()),
            code: Some(lsp::NumberOrString::String(self.rule_id.clone())),
            code_description: None,
            source: Some(self.source.clone()),
            message: self.message.clone(),
            related_information: None,
            tags: None,
            data: serde_json::to_value(data).ok(),
        }
    }

    /// Rebuild a diagnostic from the editor's copy. The rule id comes from
    /// `data` when present, otherwise from a string `code`.
    pub fn from_lsp(diagnostic: &lsp::Diagnostic) -> Self {
        let data = diagnostic
            .data
            .clone()
            .and_then(|value| serde_json::from_value::<DiagnosticData>(value).ok());

        let rule_id = match (&data, &diagnostic.code) {
            (Some(data), _) => data.rule_id.clone(),
            (None, Some(lsp::NumberOrString::String(code))) => code.clone(),
            (None, Some(lsp::NumberOrString::Number(code))) => code.to_string(),
            (None, None) => String::new(),
        };

        Self {
            range: diagnostic.range.into(),
            message: diagnostic.message.clone(),
            severity: DiagnosticSeverity::from_lsp(diagnostic.severity),
            source: diagnostic.source.clone().unwrap_or_default(),
            rule_id,
            document_version: data.and_then(|d| d.document_version),
        }
    }
}

/// Code action kinds offered by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeActionKind {
    QuickFix,
}

impl From<CodeActionKind> for lsp::CodeActionKind {
    fn from(kind: CodeActionKind) -> Self {
        match kind {
            CodeActionKind::QuickFix => lsp::CodeActionKind::QUICKFIX,
        }
    }
}

/// Text edit to modify document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

/// Edits bound to the document version they were computed against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEdit {
    pub uri: Url,
    pub version: i32,
    pub edits: Vec<TextEdit>,
}

/// Code action that can be applied to fix a diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAction {
    pub title: String,
    pub kind: CodeActionKind,
    pub edit: VersionedEdit,
    pub diagnostics: Vec<Diagnostic>,
}

impl CodeAction {
    pub fn to_lsp(&self) -> lsp::CodeAction {
        let edits = self
            .edit
            .edits
            .iter()
            .map(|edit| {
                lsp::OneOf::Left(lsp::TextEdit {
                    range: edit.range.into(),
                    new_text: edit.new_text.clone(),
                })
            })
            .collect();

        let document_edit = lsp::TextDocumentEdit {
            text_document: lsp::OptionalVersionedTextDocumentIdentifier {
                uri: self.edit.uri.clone(),
                version: Some(self.edit.version),
            },
            edits,
        };

        lsp::CodeAction {
            title: self.title.clone(),
            kind: Some(self.kind.into()),
            diagnostics: Some(self.diagnostics.iter().map(Diagnostic::to_lsp).collect()),
            edit: Some(lsp::WorkspaceEdit {
                document_changes: Some(lsp::DocumentChanges::Edits(vec![document_edit])),
                ..Default::default()
            }),
            command: None,
            is_preferred: Some(true),
            disabled: None,
            data: None,
        }
    }
}

/// Diagnostics published for one document version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSet {
    pub version: i32,
    pub diagnostics: Vec<Diagnostic>,
}

/// Most recently published diagnostics, per document
#[derive(Debug, Default)]
pub struct DiagnosticCollection {
    sets: HashMap<Url, PublishedSet>,
}

impl DiagnosticCollection {
    pub fn new() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }

    /// Record a set unless one for a newer version is already held.
    pub fn replace(&mut self, uri: Url, version: i32, diagnostics: Vec<Diagnostic>) -> bool {
        if self.version(&uri).is_some_and(|held| held > version) {
            return false;
        }
        self.sets.insert(
            uri,
            PublishedSet {
                version,
                diagnostics,
            },
        );
        true
    }

    pub fn clear(&mut self, uri: &Url) {
        self.sets.remove(uri);
    }

    pub fn get(&self, uri: &Url) -> Option<&PublishedSet> {
        self.sets.get(uri)
    }

    pub fn version(&self, uri: &Url) -> Option<i32> {
        self.sets.get(uri).map(|set| set.version)
    }
}
