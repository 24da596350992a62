//! Diagnostics for the compilation pipeline.
//!
//! Every failure class stays local to the unit that produced it: stages hand
//! their [`Reporter`] a diagnostic and keep going. The build orchestrator
//! drains one aggregated list per build; nothing in the library aborts the
//! process on user input.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

/// Malformed markup; the unit continues with a partial tree.
pub const PARSE_ERROR: &str = "parse-error";
/// Naming or path collision that was auto-resolved.
pub const TRANSFORM_CONFLICT: &str = "transform-conflict";
/// Generated render fragment did not parse; unit fell back to passthrough.
pub const CODEGEN_FAILURE: &str = "codegen-failure";
/// Two distinct resources demanded the same fixed output path.
pub const REGISTRY_CONFLICT: &str = "registry-conflict";
/// Custom tag used without a registration.
pub const UNKNOWN_COMPONENT: &str = "unknown-component";

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// 1-based position in the template or script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        SourceLocation { line, column }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub resource_path: String,
    pub location: Option<SourceLocation>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPORTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-unit warn/error sink. Owns the resource path so stages only supply a
/// message and, where available, a location.
#[derive(Debug, Default)]
pub struct Reporter {
    resource_path: String,
    diagnostics: Vec<Diagnostic>,
}

impl Reporter {
    pub fn new(resource_path: &str) -> Self {
        Reporter {
            resource_path: resource_path.to_string(),
            diagnostics: Vec::new(),
        }
    }

    pub fn warn(&mut self, code: &str, message: impl Into<String>) {
        self.push(Severity::Warning, code, message.into(), None);
    }

    pub fn warn_at(&mut self, code: &str, message: impl Into<String>, location: SourceLocation) {
        self.push(Severity::Warning, code, message.into(), Some(location));
    }

    pub fn error(&mut self, code: &str, message: impl Into<String>) {
        self.push(Severity::Error, code, message.into(), None);
    }

    pub fn error_at(&mut self, code: &str, message: impl Into<String>, location: SourceLocation) {
        self.push(Severity::Error, code, message.into(), Some(location));
    }

    fn push(
        &mut self,
        severity: Severity,
        code: &str,
        message: String,
        location: Option<SourceLocation>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            code: code.to_string(),
            message,
            resource_path: self.resource_path.clone(),
            location,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}
