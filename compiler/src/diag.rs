// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases.
// Every phase returns its artifact together with a `Vec<Diagnostic>`; the
// orchestrator splits them into errors and warnings for the final result.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0104`, `W0101`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes, grouped by range.
///
/// - `E01xx` structural graph errors
/// - `E02xx` scheduling errors
/// - `E03xx` block generation errors
/// - `E04xx` resource ceilings exceeded
/// - `E05xx` assembler-reported problems
/// - `W01xx` validation warnings, `W04xx` capacity, `W05xx` optimizer
pub mod codes {
    use super::DiagCode;

    pub const E0100: DiagCode = DiagCode("E0100"); // unknown block type
    pub const E0101: DiagCode = DiagCode("E0101"); // connection names a missing block
    pub const E0102: DiagCode = DiagCode("E0102"); // connection names a missing port
    pub const E0103: DiagCode = DiagCode("E0103"); // port used against its direction
    pub const E0104: DiagCode = DiagCode("E0104"); // self-loop
    pub const E0105: DiagCode = DiagCode("E0105"); // signal kind mismatch
    pub const E0106: DiagCode = DiagCode("E0106"); // input driven more than once
    pub const E0107: DiagCode = DiagCode("E0107"); // duplicate block id

    pub const E0200: DiagCode = DiagCode("E0200"); // unschedulable graph

    pub const E0300: DiagCode = DiagCode("E0300"); // block generator failed
    pub const E0301: DiagCode = DiagCode("E0301"); // malformed template

    pub const E0400: DiagCode = DiagCode("E0400"); // instruction memory exceeded
    pub const E0401: DiagCode = DiagCode("E0401"); // registers exhausted
    pub const E0402: DiagCode = DiagCode("E0402"); // delay memory exhausted
    pub const E0403: DiagCode = DiagCode("E0403"); // LFOs exhausted

    pub const E0500: DiagCode = DiagCode("E0500"); // assembler rejected generated text

    pub const W0100: DiagCode = DiagCode("W0100"); // required input unconnected
    pub const W0101: DiagCode = DiagCode("W0101"); // no output block
    pub const W0102: DiagCode = DiagCode("W0102"); // no input block
    pub const W0103: DiagCode = DiagCode("W0103"); // empty graph
    pub const W0104: DiagCode = DiagCode("W0104"); // parameter out of range
    pub const W0105: DiagCode = DiagCode("W0105"); // unknown parameter

    pub const W0400: DiagCode = DiagCode("W0400"); // near instruction ceiling
    pub const W0401: DiagCode = DiagCode("W0401"); // near delay memory ceiling

    pub const W0500: DiagCode = DiagCode("W0500"); // optimizer rewrote code
    pub const W0501: DiagCode = DiagCode("W0501"); // non-fatal assembler problem
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Error taxonomy ───────────────────────────────────────────────────────

/// Which failure family a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Structural,
    Scheduling,
    Generation,
    ResourceExceeded,
    Assembly,
    Advisory,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub hint: Option<String>,
    /// Block the diagnostic is about, when there is one.
    pub block: Option<String>,
    /// Connection the diagnostic is about, when there is one.
    pub connection: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related items.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            message: message.into(),
            hint: None,
            block: None,
            connection: None,
        }
    }

    pub fn error(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message).with_code(code)
    }

    pub fn warning(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_block(mut self, block: impl Into<String>) -> Self {
        self.block = Some(block.into());
        self
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    /// Failure family, derived from the code range.
    pub fn category(&self) -> Category {
        if self.level == DiagLevel::Warning {
            return Category::Advisory;
        }
        match self.code.map(|c| c.0) {
            Some(c) if c.starts_with("E01") => Category::Structural,
            Some(c) if c.starts_with("E02") => Category::Scheduling,
            Some(c) if c.starts_with("E04") => Category::ResourceExceeded,
            Some(c) if c.starts_with("E05") => Category::Assembly,
            _ => Category::Generation,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_hint() {
        let d = Diagnostic::warning(codes::W0101, "graph has no output block")
            .with_hint("add an `output` block");
        assert_eq!(
            format!("{d}"),
            "warning[W0101]: graph has no output block\n  hint: add an `output` block"
        );
    }

    #[test]
    fn category_follows_code_range() {
        assert_eq!(
            Diagnostic::error(codes::E0104, "x").category(),
            Category::Structural
        );
        assert_eq!(
            Diagnostic::error(codes::E0200, "x").category(),
            Category::Scheduling
        );
        assert_eq!(
            Diagnostic::error(codes::E0301, "x").category(),
            Category::Generation
        );
        assert_eq!(
            Diagnostic::error(codes::E0400, "x").category(),
            Category::ResourceExceeded
        );
        assert_eq!(
            Diagnostic::error(codes::E0500, "x").category(),
            Category::Assembly
        );
        assert_eq!(
            Diagnostic::warning(codes::W0100, "x").category(),
            Category::Advisory
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(codes::E0105, "kind mismatch")
            .with_block("gain1")
            .with_connection("c3");
        assert_eq!(d.block.as_deref(), Some("gain1"));
        assert_eq!(d.connection.as_deref(), Some("c3"));
        assert!(d.is_error());
    }
}
