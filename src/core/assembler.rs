//! Section placement.
//!
//! Sections are moved as whole units; their identifiers and bodies are never
//! touched, so every label and reference number computed earlier stays valid.

use manutex_ir::Section;

use crate::core::parser::MethodsPlacement;
use crate::utils::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticsReport};

const ABSTRACT: &str = "Abstract";

/// Sections grouped by the template slot they fill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledDocument {
    pub abstract_section: Option<Section>,
    pub main: Vec<Section>,
    /// Sections placed after the bibliography.
    pub post_bibliography: Vec<Section>,
    pub supplementary: Vec<Section>,
}

impl AssembledDocument {
    /// Identifiers in document order, for logging and tests.
    pub fn order(&self) -> Vec<&str> {
        self.main
            .iter()
            .chain(&self.post_bibliography)
            .chain(&self.supplementary)
            .map(|s| s.identifier.as_str())
            .collect()
    }
}

/// Whether `identifier` addresses the anchor: equal to it or starting with
/// it, ignoring case ("Results and Discussion" anchors `results`).
fn matches_anchor(identifier: &str, anchor: &str) -> bool {
    let identifier = identifier.trim().to_lowercase();
    !identifier.is_empty() && identifier.starts_with(&anchor.to_lowercase())
}

pub fn assemble(
    sections: Vec<Section>,
    placement: MethodsPlacement,
    methods_section: &str,
    report: &mut DiagnosticsReport,
) -> AssembledDocument {
    let (mut main, supplementary): (Vec<Section>, Vec<Section>) =
        sections.into_iter().partition(|s| !s.supplementary);

    let abstract_section = main
        .iter()
        .position(|s| s.is_named(ABSTRACT))
        .map(|idx| main.remove(idx));

    let mut doc = AssembledDocument {
        abstract_section,
        main: Vec::new(),
        post_bibliography: Vec::new(),
        supplementary,
    };

    if placement == MethodsPlacement::Inline {
        doc.main = main;
        return doc;
    }
    let Some(from) = main.iter().position(|s| s.is_named(methods_section)) else {
        log::debug!("no '{}' section, placement {} is a no-op", methods_section, placement);
        doc.main = main;
        return doc;
    };
    let designated = main.remove(from);

    match placement.anchor() {
        None => doc.post_bibliography.push(designated),
        Some(anchor) => match main.iter().position(|s| matches_anchor(&s.identifier, anchor)) {
            Some(idx) => main.insert(idx + 1, designated),
            None => {
                log::warn!(
                    "placement {}: no section matches '{}', leaving '{}' in place",
                    placement,
                    anchor,
                    designated.identifier
                );
                report.push(
                    Diagnostic::new(
                        DiagnosticKind::PlacementAnchorMissing,
                        format!(
                            "No section matches anchor '{}' for placement {}; '{}' stays in its authored position",
                            anchor, placement, designated.identifier
                        ),
                    )
                    .with_subject(anchor)
                    .with_location(designated.identifier.clone()),
                );
                main.insert(from, designated);
            }
        },
    }
    doc.main = main;
    log::debug!("assembled sections: {:?}", doc.order());
    doc
}
