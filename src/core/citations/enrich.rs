//! Optional citation metadata enrichment.
//!
//! The core never talks to the network. A caller may plug in a
//! [`MetadataEnricher`] (a DOI lookup service, a local metadata dump) which
//! is consulted for cited entries that lack a DOI, year, title or authors.
//! Each lookup runs on its own thread and is abandoned after the timeout.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use manutex_ir::BibliographyEntry;

use crate::core::parser::Bibliography;
use crate::utils::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticsReport};

pub trait MetadataEnricher: Send + Sync {
    /// Return a (possibly partial) entry for the same key. Fields already set
    /// locally always win over the returned ones.
    fn enrich(&self, entry: &BibliographyEntry) -> Result<BibliographyEntry, String>;
}

/// Enricher that adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnricher;

impl MetadataEnricher for NoopEnricher {
    fn enrich(&self, entry: &BibliographyEntry) -> Result<BibliographyEntry, String> {
        Ok(entry.clone())
    }
}

fn needs_enrichment(entry: &BibliographyEntry) -> bool {
    entry.identifier.is_none()
        || entry.year.is_none()
        || entry.title.is_none()
        || entry.authors.is_empty()
}

/// Enrich the cited `keys` in place. Returns how many entries gained data.
pub fn enrich_bibliography(
    bibliography: &mut Bibliography,
    keys: &[String],
    enricher: &Arc<dyn MetadataEnricher>,
    timeout: Duration,
    report: &mut DiagnosticsReport,
) -> usize {
    let mut updated = 0usize;
    for key in keys {
        let Some(entry) = bibliography.get(key) else {
            continue;
        };
        if !needs_enrichment(entry) {
            continue;
        }

        let request = entry.clone();
        let worker = Arc::clone(enricher);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(worker.enrich(&request));
        });

        let failure = match rx.recv_timeout(timeout) {
            Ok(Ok(found)) => {
                if let Some(entry) = bibliography.get_mut(key) {
                    let before = entry.clone();
                    entry.merge_missing(&found);
                    if *entry != before {
                        updated += 1;
                    }
                }
                None
            }
            Ok(Err(reason)) => Some(reason),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Some(format!("lookup timed out after {:?}", timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Some("lookup worker panicked".to_string()),
        };

        if let Some(reason) = failure {
            log::warn!("metadata enrichment for '{}' failed: {}", key, reason);
            report.push(
                Diagnostic::new(
                    DiagnosticKind::EnrichmentFailed,
                    format!("Kept local entry: {}", reason),
                )
                .with_subject(key.as_str()),
            );
        }
    }
    if updated > 0 {
        log::info!("enriched {} bibliography entries", updated);
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_bibliography;

    struct DoiLookup;

    impl MetadataEnricher for DoiLookup {
        fn enrich(&self, entry: &BibliographyEntry) -> Result<BibliographyEntry, String> {
            let mut found = BibliographyEntry::new(&entry.entry_type, &entry.key);
            found.identifier = Some(format!("10.5555/{}", entry.key));
            found.title = Some("Remote title".to_string());
            Ok(found)
        }
    }

    struct Slow;

    impl MetadataEnricher for Slow {
        fn enrich(&self, _entry: &BibliographyEntry) -> Result<BibliographyEntry, String> {
            thread::sleep(Duration::from_millis(500));
            Err("too late".to_string())
        }
    }

    fn bib() -> Bibliography {
        parse_bibliography("@article{a, title={Local}, year={2020}, author={X, Y}}").unwrap()
    }

    #[test]
    fn fills_missing_fields_only() {
        let mut bib = bib();
        let enricher: Arc<dyn MetadataEnricher> = Arc::new(DoiLookup);
        let mut report = DiagnosticsReport::new();
        let n = enrich_bibliography(
            &mut bib,
            &["a".to_string()],
            &enricher,
            Duration::from_secs(5),
            &mut report,
        );
        assert_eq!(n, 1);
        let entry = bib.get("a").unwrap();
        assert_eq!(entry.identifier.as_deref(), Some("10.5555/a"));
        assert_eq!(entry.title.as_deref(), Some("Local"));
        assert!(report.is_empty());
    }

    #[test]
    fn timeout_keeps_local_entry_and_warns() {
        let mut bib = bib();
        let enricher: Arc<dyn MetadataEnricher> = Arc::new(Slow);
        let mut report = DiagnosticsReport::new();
        enrich_bibliography(
            &mut bib,
            &["a".to_string()],
            &enricher,
            Duration::from_millis(20),
            &mut report,
        );
        assert_eq!(report.count(DiagnosticKind::EnrichmentFailed), 1);
        assert!(bib.get("a").unwrap().identifier.is_none());
    }
}
