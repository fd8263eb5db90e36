//! Report export for diagnostic sharing.
//!
//! Pure serialization of an already computed [`SecurityReport`]; nothing
//! is re-evaluated.

use std::path::Path;
use std::time::SystemTime;

use plist::{Dictionary, Value};

use crate::report::{ReportEntry, SecurityReport};

/// Module class recorded in exported documents.
pub const MODULE_CLASS: &str = "Security";

fn entry_value(entry: &ReportEntry) -> Value {
    let mut dict = Dictionary::new();
    dict.insert("key".into(), Value::String(entry.key.clone()));
    dict.insert("name".into(), Value::String(entry.label.clone()));
    if let Some(value) = &entry.value {
        dict.insert("value".into(), Value::String(value.clone()));
    }
    let severity = match entry.severity {
        crate::report::Severity::Ok => "ok",
        crate::report::Severity::Critical => "critical",
        crate::report::Severity::Neutral => "neutral",
    };
    dict.insert("severity".into(), Value::String(severity.into()));
    if !entry.children.is_empty() {
        dict.insert(
            "children".into(),
            Value::Array(entry.children.iter().map(entry_value).collect()),
        );
    }
    Value::Dictionary(dict)
}

fn count(n: usize) -> Value {
    Value::Integer((n as u64).into())
}

/// Render `report` as a property-list dictionary.
///
/// Keys: `moduleClass`, `moduleName`, `basicEntries`, `usageEntry`, plus
/// `checks` with the raw probe outcomes and `generatedAt` once scanned.
pub fn to_plist(report: &SecurityReport, module_name: &str) -> Value {
    let mut dict = Dictionary::new();
    dict.insert("moduleClass".into(), Value::String(MODULE_CLASS.into()));
    dict.insert("moduleName".into(), Value::String(module_name.into()));
    dict.insert(
        "basicEntries".into(),
        Value::Array(report.entries.iter().map(entry_value).collect()),
    );

    let summary = &report.summary;
    let mut usage = Dictionary::new();
    usage.insert("failed".into(), count(summary.failed));
    usage.insert("passed".into(), count(summary.passed));
    usage.insert("total".into(), count(summary.total));
    usage.insert("compromised".into(), Value::Boolean(report.is_compromised()));
    usage.insert("coverage".into(), Value::String(summary.coverage_label()));
    dict.insert("usageEntry".into(), Value::Dictionary(usage));

    let checks = report
        .checks
        .iter()
        .map(|check| {
            let mut item = Dictionary::new();
            item.insert("kind".into(), Value::String(check.kind.id().into()));
            item.insert("category".into(), Value::String(check.kind.category().label().into()));
            let status = match check.status {
                crate::probes::Status::Unchanged => "unchanged",
                crate::probes::Status::Passed => "passed",
                crate::probes::Status::Failed => "failed",
            };
            item.insert("status".into(), Value::String(status.into()));
            if let Some(message) = &check.message {
                item.insert("message".into(), Value::String(message.clone()));
            }
            Value::Dictionary(item)
        })
        .collect();
    dict.insert("checks".into(), Value::Array(checks));

    if let Some(at) = report.generated_at {
        dict.insert("generatedAt".into(), Value::Date(SystemTime::from(at).into()));
    }
    Value::Dictionary(dict)
}

/// Write `report` as an XML property list.
pub fn write(path: impl AsRef<Path>, report: &SecurityReport, module_name: &str) -> Result<(), plist::Error> {
    let path = path.as_ref();
    to_plist(report, module_name).to_file_xml(path)?;
    tracing::info!(path = %path.display(), "export: report written");
    Ok(())
}

/// Render `report` as pretty-printed JSON.
pub fn to_json(report: &SecurityReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
