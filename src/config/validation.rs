//! Structural validation of the asset and alert-behavior documents
//!
//! Runs only on demand (`--validate`), never on the evaluation path. Works on the
//! untyped document so that every problem is reported, not just the first serde error.

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::persistence::{self, DocumentFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub document: String,
    /// Path inside the document, e.g. `coins[2].ath_thresholds[0]`
    pub location: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if self.location.is_empty() {
            write!(f, "[{}] {}: {}", level, self.document, self.message)
        } else {
            write!(
                f,
                "[{}] {} {}: {}",
                level, self.document, self.location, self.message
            )
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }
}

struct Collector<'a> {
    document: &'a str,
    issues: Vec<ValidationIssue>,
}

impl<'a> Collector<'a> {
    fn new(document: &'a str) -> Self {
        Self {
            document,
            issues: Vec::new(),
        }
    }

    fn push(&mut self, severity: Severity, location: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity,
            document: self.document.to_string(),
            location: location.into(),
            message: message.into(),
        });
    }

    fn error(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, location, message);
    }

    fn warning(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, location, message);
    }
}

/// Validate an asset list document
pub fn validate_coins_value(document: &str, value: &Value) -> Vec<ValidationIssue> {
    let mut c = Collector::new(document);

    let coins = match value.get("coins") {
        Some(Value::Array(coins)) => coins,
        Some(_) => {
            c.error("coins", "must be an array");
            return c.issues;
        }
        None => {
            c.error("", "missing required field 'coins'");
            return c.issues;
        }
    };

    if coins.is_empty() {
        c.warning("coins", "no assets configured");
    }

    let mut seen_ids = HashSet::new();
    for (idx, coin) in coins.iter().enumerate() {
        let at = format!("coins[{}]", idx);
        let Some(obj) = coin.as_object() else {
            c.error(at, "must be an object");
            continue;
        };

        for field in ["id", "name", "symbol"] {
            match obj.get(field) {
                None => c.error(format!("{}.{}", at, field), "missing required field"),
                Some(Value::String(s)) if s.trim().is_empty() => {
                    c.error(format!("{}.{}", at, field), "must not be empty")
                }
                Some(Value::String(_)) => {}
                Some(_) => c.error(format!("{}.{}", at, field), "must be a string"),
            }
        }

        if let Some(Value::String(id)) = obj.get("id") {
            if id != &id.to_lowercase() {
                c.error(
                    format!("{}.id", at),
                    format!("'{}' must be lowercase (market API ids are canonical lowercase)", id),
                );
            }
            if id.chars().any(char::is_whitespace) {
                c.error(format!("{}.id", at), format!("'{}' must not contain whitespace", id));
            }
            if !id.is_empty() && !seen_ids.insert(id.clone()) {
                c.error(format!("{}.id", at), format!("duplicate id '{}'", id));
            }
        }

        let thresholds = check_number_list(&mut c, &at, obj.get("ath_thresholds"), "ath_thresholds");
        for (i, t) in thresholds.iter().enumerate() {
            if *t <= 0.0 || *t > 100.0 {
                c.error(
                    format!("{}.ath_thresholds[{}]", at, i),
                    format!("{} is outside (0, 100]", t),
                );
            }
        }

        let targets = check_number_list(&mut c, &at, obj.get("price_alerts"), "price_alerts");
        for (i, p) in targets.iter().enumerate() {
            if *p <= 0.0 {
                c.error(
                    format!("{}.price_alerts[{}]", at, i),
                    format!("{} must be positive", p),
                );
            }
        }

        let has_thresholds = obj
            .get("ath_thresholds")
            .and_then(Value::as_array)
            .is_some_and(|a| !a.is_empty());
        let has_targets = obj
            .get("price_alerts")
            .and_then(Value::as_array)
            .is_some_and(|a| !a.is_empty());
        if !has_thresholds && !has_targets {
            c.warning(at, "no ath_thresholds or price_alerts; asset never alerts");
        }
    }

    c.issues
}

fn check_number_list(
    c: &mut Collector<'_>,
    at: &str,
    value: Option<&Value>,
    field: &str,
) -> Vec<f64> {
    let mut numbers = Vec::new();
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                match item.as_f64() {
                    Some(n) => numbers.push(n),
                    None => c.error(format!("{}.{}[{}]", at, field, i), "must be a number"),
                }
            }
        }
        Some(_) => c.error(format!("{}.{}", at, field), "must be an array of numbers"),
    }
    numbers
}

/// Validate an alert-behavior document
pub fn validate_behavior_value(document: &str, value: &Value) -> Vec<ValidationIssue> {
    let mut c = Collector::new(document);

    let Some(obj) = value.as_object() else {
        c.error("", "must be an object");
        return c.issues;
    };

    if let Some(v) = obj.get("reset_alerts_daily") {
        if !v.is_boolean() {
            c.error("reset_alerts_daily", "must be a boolean");
        }
    }
    for field in ["check_interval_minutes", "max_alerts_per_run"] {
        if let Some(v) = obj.get(field) {
            match v.as_u64() {
                Some(0) => c.error(field, "must be greater than zero"),
                Some(_) => {}
                None => c.error(field, "must be a positive integer"),
            }
        }
    }
    if let Some(v) = obj.get("alert_tracking_file") {
        match v.as_str() {
            Some(s) if s.trim().is_empty() => c.error("alert_tracking_file", "must not be empty"),
            Some(_) => {}
            None => c.error("alert_tracking_file", "must be a string"),
        }
    }

    c.issues
}

fn read_value(path: &Path, document: &str, missing: Severity) -> Result<Value, ValidationIssue> {
    let issue = |severity, message: String| ValidationIssue {
        severity,
        document: document.to_string(),
        location: String::new(),
        message,
    };

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return match missing {
                Severity::Error => Err(issue(Severity::Error, "file not found".to_string())),
                Severity::Warning => Err(issue(
                    Severity::Warning,
                    "file not found; defaults will be used".to_string(),
                )),
            };
        }
        Err(e) => return Err(issue(Severity::Error, format!("cannot read file: {}", e))),
    };

    persistence::parse_document::<Value>(path, &text, DocumentFormat::from_path(path))
        .map_err(|e| issue(Severity::Error, e.to_string()))
}

/// Validate both documents on disk, collecting every issue found
pub fn validate_files(coins_path: &Path, alert_path: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();

    let coins_doc = coins_path.display().to_string();
    match read_value(coins_path, &coins_doc, Severity::Error) {
        Ok(value) => report
            .issues
            .extend(validate_coins_value(&coins_doc, &value)),
        Err(issue) => report.issues.push(issue),
    }

    let alert_doc = alert_path.display().to_string();
    match read_value(alert_path, &alert_doc, Severity::Warning) {
        Ok(value) => report
            .issues
            .extend(validate_behavior_value(&alert_doc, &value)),
        Err(issue) => report.issues.push(issue),
    }

    report
}
