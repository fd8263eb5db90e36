//! Immutable scan reports.
//!
//! A [`SecurityReport`] is built wholesale from the probe outcomes of one
//! scan. Failed probes sort before passed ones, which sort before probes
//! that never ran; within that order, entries with supporting detail sort
//! before plain pass/fail lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probes::{CheckKind, Evidence, SecurityCheck, Status};
use crate::security::CsFlagStatus;

/// Display severity of a report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Secure state observed.
    Ok,
    /// Insecure state observed.
    Critical,
    /// Informational or not evaluated.
    Neutral,
}

impl Severity {
    fn of_status(status: Status) -> Self {
        match status {
            Status::Passed => Self::Ok,
            Status::Failed => Self::Critical,
            Status::Unchanged => Self::Neutral,
        }
    }

    fn of_flag(status: &CsFlagStatus) -> Self {
        match (status.is_present, status.is_insecure, status.is_required) {
            (true, true, _) => Self::Critical,
            (true, false, _) => Self::Ok,
            (false, _, true) => Self::Critical,
            (false, _, false) => Self::Neutral,
        }
    }
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Stable key.
    pub key: String,
    /// Human label.
    pub label: String,
    /// Optional value column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Display severity.
    pub severity: Severity,
    /// Supporting detail.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ReportEntry>,
}

impl ReportEntry {
    fn leaf(key: impl Into<String>, label: impl Into<String>, value: Option<String>, severity: Severity) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            value,
            severity,
            children: Vec::new(),
        }
    }

    fn from_evidence(evidence: &Evidence) -> Self {
        match evidence {
            Evidence::Item { value } => Self::leaf(value.clone(), value.clone(), None, Severity::Neutral),
            Evidence::Port { description, port } => Self::leaf(
                description.clone(),
                description.clone(),
                Some(port.to_string()),
                Severity::Neutral,
            ),
            Evidence::Scheme {
                description,
                scheme,
            } => Self::leaf(
                description.clone(),
                description.clone(),
                Some(scheme.clone()),
                Severity::Neutral,
            ),
            Evidence::Flag { status } => Self::leaf(
                status.flag.to_string(),
                status.flag.description(),
                None,
                Severity::of_flag(status),
            ),
        }
    }

    fn from_check(check: &SecurityCheck) -> Self {
        Self {
            key: check.kind.id().to_string(),
            label: check.label().to_string(),
            value: None,
            severity: Severity::of_status(check.status),
            children: check.evidence.iter().map(Self::from_evidence).collect(),
        }
    }
}

/// Counts over one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Probes in the catalog.
    pub total: usize,
    /// Probes that passed.
    pub passed: usize,
    /// Probes that failed.
    pub failed: usize,
    /// Signature categories with at least one entry.
    pub signature_categories: usize,
    /// Signature categories in the database schema.
    pub signature_categories_total: usize,
}

impl ReportSummary {
    /// Human summary of the database coverage.
    pub fn coverage_label(&self) -> String {
        format!(
            "{} of {} categories evaluated",
            self.signature_categories, self.signature_categories_total
        )
    }
}

/// Snapshot of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    /// When the scan finished; `None` before the first scan.
    pub generated_at: Option<DateTime<Utc>>,
    /// Probe outcomes in catalog order.
    pub checks: Vec<SecurityCheck>,
    /// Display entries.
    pub entries: Vec<ReportEntry>,
    /// Counts.
    pub summary: ReportSummary,
}

impl SecurityReport {
    /// The report published before any scan: every probe unchanged.
    pub fn pending() -> Self {
        let checks: Vec<_> = CheckKind::ALL
            .iter()
            .copied()
            .map(SecurityCheck::pending)
            .collect();
        Self::build(checks, (0, 0), None)
    }

    /// Build a report from probe outcomes.
    ///
    /// `coverage` is `(populated, total)` signature categories.
    pub fn build(
        checks: Vec<SecurityCheck>,
        coverage: (usize, usize),
        generated_at: Option<DateTime<Utc>>,
    ) -> Self {
        let bucket = |status: Status| checks.iter().filter(move |c| c.status == status);
        let ordered: Vec<&SecurityCheck> = bucket(Status::Failed)
            .chain(bucket(Status::Passed))
            .chain(bucket(Status::Unchanged))
            .collect();

        let all: Vec<ReportEntry> = ordered.into_iter().map(ReportEntry::from_check).collect();
        let (mut entries, simple): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|entry| !entry.children.is_empty());
        entries.extend(simple);

        let summary = ReportSummary {
            total: checks.len(),
            passed: checks.iter().filter(|c| c.is_passed()).count(),
            failed: checks.iter().filter(|c| c.is_failed()).count(),
            signature_categories: coverage.0,
            signature_categories_total: coverage.1,
        };

        Self {
            generated_at,
            checks,
            entries,
            summary,
        }
    }

    /// Whether at least one probe failed.
    pub fn is_compromised(&self) -> bool {
        self.summary.failed > 0
    }

    /// The entry for `kind`.
    pub fn entry(&self, kind: CheckKind) -> Option<&ReportEntry> {
        self.entries.iter().find(|entry| entry.key == kind.id())
    }

    /// The outcome of `kind`.
    pub fn check(&self, kind: CheckKind) -> Option<&SecurityCheck> {
        self.checks.iter().find(|check| check.kind == kind)
    }
}

impl Default for SecurityReport {
    fn default() -> Self {
        Self::pending()
    }
}
