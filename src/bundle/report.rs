//! Per-domain outcomes of an export or import run.
//!
//! A run never stops at the first failing domain; every selected domain gets
//! an entry. The serializable summaries are what the HTTP API and the CLI
//! render.

use super::codecs::Exported;
use super::domain::Domain;
use super::error::BundleError;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug)]
pub enum ExportOutcome {
    Exported(Exported),
    Failed(BundleError),
}

#[derive(Debug)]
pub struct ExportReport {
    pub bundle: String,
    pub outcomes: BTreeMap<Domain, ExportOutcome>,
    /// Set when the metadata record could not be written.
    pub metadata_error: Option<BundleError>,
}

impl ExportReport {
    pub fn new(bundle: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            outcomes: BTreeMap::new(),
            metadata_error: None,
        }
    }

    pub fn record(&mut self, domain: Domain, result: Result<Exported, BundleError>) {
        let outcome = match result {
            Ok(exported) => ExportOutcome::Exported(exported),
            Err(err) => ExportOutcome::Failed(err),
        };
        self.outcomes.insert(domain, outcome);
    }

    pub fn failures(&self) -> impl Iterator<Item = (Domain, &BundleError)> {
        self.outcomes.iter().filter_map(|(domain, outcome)| match outcome {
            ExportOutcome::Failed(err) => Some((*domain, err)),
            ExportOutcome::Exported(_) => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.metadata_error.is_none() && self.failures().next().is_none()
    }

    pub fn summary(&self) -> ExportSummary {
        let domains = self
            .outcomes
            .iter()
            .map(|(domain, outcome)| match outcome {
                ExportOutcome::Exported(exported) => DomainSummary {
                    domain: *domain,
                    status: DomainStatus::Ok,
                    count: exported.identifiers.len(),
                    identifiers: exported.identifiers.clone(),
                    notice: exported.notice.clone(),
                    error: None,
                    error_kind: None,
                },
                ExportOutcome::Failed(err) => DomainSummary::failed(*domain, err),
            })
            .collect();
        ExportSummary {
            bundle: self.bundle.clone(),
            success: self.is_success(),
            domains,
            metadata_error: self.metadata_error.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Debug)]
pub enum ImportOutcome {
    Applied(usize),
    Failed(BundleError),
}

#[derive(Debug)]
pub struct ImportReport {
    pub bundle: String,
    pub outcomes: BTreeMap<Domain, ImportOutcome>,
}

impl ImportReport {
    pub fn new(bundle: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, domain: Domain, result: Result<usize, BundleError>) {
        let outcome = match result {
            Ok(applied) => ImportOutcome::Applied(applied),
            Err(err) => ImportOutcome::Failed(err),
        };
        self.outcomes.insert(domain, outcome);
    }

    /// Entities applied for `domain`, or `None` when it failed or did not run.
    pub fn applied(&self, domain: Domain) -> Option<usize> {
        match self.outcomes.get(&domain) {
            Some(ImportOutcome::Applied(count)) => Some(*count),
            _ => None,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = (Domain, &BundleError)> {
        self.outcomes.iter().filter_map(|(domain, outcome)| match outcome {
            ImportOutcome::Failed(err) => Some((*domain, err)),
            ImportOutcome::Applied(_) => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn summary(&self) -> ImportSummary {
        let domains = self
            .outcomes
            .iter()
            .map(|(domain, outcome)| match outcome {
                ImportOutcome::Applied(count) => DomainSummary {
                    domain: *domain,
                    status: DomainStatus::Ok,
                    count: *count,
                    identifiers: Vec::new(),
                    notice: None,
                    error: None,
                    error_kind: None,
                },
                ImportOutcome::Failed(err) => DomainSummary::failed(*domain, err),
            })
            .collect();
        ImportSummary {
            bundle: self.bundle.clone(),
            success: self.is_success(),
            domains,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Ok,
    Failed,
}

/// One line of a run summary.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DomainSummary {
    pub domain: Domain,
    pub status: DomainStatus,
    /// Identifiers exported, or entities applied on import.
    pub count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error kind such as `MalformedArtifact`, set alongside `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl DomainSummary {
    fn failed(domain: Domain, err: &BundleError) -> Self {
        Self {
            domain,
            status: DomainStatus::Failed,
            count: 0,
            identifiers: Vec::new(),
            notice: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
        }
    }
}

impl fmt::Display for DomainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.error) {
            (DomainStatus::Failed, Some(error)) => write!(f, "{:<14} FAILED  {}", self.domain, error),
            _ => {
                write!(f, "{:<14} ok      {}", self.domain, self.count)?;
                if let Some(notice) = &self.notice {
                    write!(f, " ({notice})")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExportSummary {
    pub bundle: String,
    pub success: bool,
    pub domains: Vec<DomainSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImportSummary {
    pub bundle: String,
    pub success: bool,
    pub domains: Vec<DomainSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_do_not_hide_successes() {
        let mut report = ImportReport::new("base");
        report.record(Domain::Groups, Ok(3));
        report.record(
            Domain::Milestones,
            Err(BundleError::malformed("milestone", "unclosed element <milestone>")),
        );

        assert!(!report.is_success());
        assert_eq!(report.applied(Domain::Groups), Some(3));
        assert_eq!(report.applied(Domain::Milestones), None);

        let summary = report.summary();
        assert_eq!(summary.domains.len(), 2);
        assert_eq!(summary.domains[0].domain, Domain::Groups);
        assert_eq!(summary.domains[1].status, DomainStatus::Failed);
        assert!(summary.domains[1].error.as_deref().unwrap().contains("milestone"));
        assert_eq!(summary.domains[1].error_kind.as_deref(), Some("MalformedArtifact"));
    }

    #[test]
    fn summary_line_shows_notice() {
        let line = DomainSummary {
            domain: Domain::Archive,
            status: DomainStatus::Ok,
            count: 0,
            identifiers: Vec::new(),
            notice: Some("no repository".into()),
            error: None,
            error_kind: None,
        }
        .to_string();
        assert!(line.starts_with("archive"));
        assert!(line.ends_with("(no repository)"));
    }
}
