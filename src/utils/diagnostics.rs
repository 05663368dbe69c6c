//! Non-fatal conversion diagnostics.
//!
//! Everything that degrades the output without invalidating it ends up here:
//! unresolved citations and references, failed figures, and assorted
//! warnings. The report serializes to JSON for the orchestration layer.

use std::fmt;

use serde::Serialize;

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    UnresolvedCitation,
    UnresolvedReference,
    FigureGeneration,
    CacheWriteRace,
    PlacementAnchorMissing,
    EnrichmentFailed,
}

impl DiagnosticKind {
    pub fn severity(&self) -> DiagnosticSeverity {
        match self {
            DiagnosticKind::UnresolvedCitation
            | DiagnosticKind::UnresolvedReference
            | DiagnosticKind::FigureGeneration => DiagnosticSeverity::Error,
            DiagnosticKind::PlacementAnchorMissing | DiagnosticKind::EnrichmentFailed => {
                DiagnosticSeverity::Warning
            }
            DiagnosticKind::CacheWriteRace => DiagnosticSeverity::Info,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::UnresolvedCitation => write!(f, "unresolved citation"),
            DiagnosticKind::UnresolvedReference => write!(f, "unresolved reference"),
            DiagnosticKind::FigureGeneration => write!(f, "figure generation"),
            DiagnosticKind::CacheWriteRace => write!(f, "cache write race"),
            DiagnosticKind::PlacementAnchorMissing => write!(f, "placement anchor missing"),
            DiagnosticKind::EnrichmentFailed => write!(f, "enrichment failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: DiagnosticSeverity,
    pub message: String,
    /// The citation key, label, or figure source the diagnostic is about.
    pub subject: Option<String>,
    /// Section or file context.
    pub location: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            message: message.into(),
            subject: None,
            location: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn unresolved_citation(key: &str, occurrences: usize) -> Self {
        Diagnostic::new(
            DiagnosticKind::UnresolvedCitation,
            format!(
                "Citation key '{}' not found in bibliography ({} occurrence{})",
                key,
                occurrences,
                if occurrences == 1 { "" } else { "s" }
            ),
        )
        .with_subject(key)
    }

    pub fn unresolved_reference(label: &str, occurrences: usize) -> Self {
        Diagnostic::new(
            DiagnosticKind::UnresolvedReference,
            format!(
                "Reference to undeclared label '{}' ({} occurrence{})",
                label,
                occurrences,
                if occurrences == 1 { "" } else { "s" }
            ),
        )
        .with_subject(label)
    }

    pub fn figure_generation(source: &str, reason: impl Into<String>) -> Self {
        Diagnostic::new(DiagnosticKind::FigureGeneration, reason).with_subject(source)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.subject, &self.location) {
            (Some(subject), Some(loc)) => {
                write!(f, "[{}] {} ({}): {}", self.kind, subject, loc, self.message)
            }
            (Some(subject), None) => write!(f, "[{}] {}: {}", self.kind, subject, self.message),
            _ => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Diagnostics accumulated over one conversion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        log::debug!("diagnostic: {}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One line per diagnostic, in the order they were recorded.
    pub fn format_lines(&self) -> Vec<String> {
        self.diagnostics.iter().map(|d| d.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_follow_kind() {
        assert_eq!(
            Diagnostic::unresolved_citation("k", 1).severity,
            DiagnosticSeverity::Error
        );
        assert_eq!(
            Diagnostic::new(DiagnosticKind::CacheWriteRace, "x").severity,
            DiagnosticSeverity::Info
        );
    }

    #[test]
    fn report_counts_and_serializes() {
        let mut report = DiagnosticsReport::new();
        report.push(Diagnostic::unresolved_citation("smith2023", 2));
        report.push(Diagnostic::figure_generation("FIGURES/a.py", "exit status 1"));
        assert_eq!(report.count(DiagnosticKind::UnresolvedCitation), 1);
        assert!(report.has_errors());

        let json = report.to_json().unwrap();
        assert!(json.contains("\"unresolved-citation\""));
        assert!(json.contains("smith2023"));
        assert!(json.contains("2 occurrences"));
    }

    #[test]
    fn display_includes_subject_and_location() {
        let diag = Diagnostic::unresolved_reference("fig:missing", 1).with_location("Results");
        assert_eq!(
            diag.to_string(),
            "[unresolved reference] fig:missing (Results): Reference to undeclared label 'fig:missing' (1 occurrence)"
        );
    }
}
