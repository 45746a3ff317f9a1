use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::QualityCheckConfig;
use crate::dataset::{Dataset, Value};
use crate::recorder::{QualityLogEntry, RunRecorder};

/// Declarative check set for one destination table. Each non-empty family
/// is executed and logged once per evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityRules {
    #[serde(default)]
    pub required_columns: Vec<String>,
    #[serde(default)]
    pub not_null: Vec<String>,
    #[serde(default)]
    pub unique: Vec<String>,
    #[serde(default)]
    pub ranges: Vec<RangeRule>,
    #[serde(default)]
    pub no_future_dates: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<PatternRule>,
    /// Expected scalar type per column. Nulls are never a type issue.
    #[serde(default)]
    pub data_types: BTreeMap<String, ColumnType>,
    #[serde(default)]
    pub consistency: Vec<ConsistencyRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Number,
    Date,
    Text,
}

impl ColumnType {
    fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Number, Value::Number(_)) => true,
            (ColumnType::Date, Value::Date(_)) => true,
            (ColumnType::Text, Value::String(_)) => true,
            _ => false,
        }
    }
}

/// `column` must be non-zero on every row where `when_positive` is positive,
/// e.g. a sale with a quantity must carry an amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyRule {
    pub column: String,
    pub when_positive: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeRule {
    pub column: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Treat `min` itself as out of range (e.g. prices must be positive).
    #[serde(default)]
    pub exclusive_min: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub column: String,
    pub pattern: String,
}

impl QualityRules {
    /// Adds the merge key to the null and uniqueness families.
    pub fn with_key(mut self, key: &str) -> Self {
        if !self.not_null.iter().any(|c| c == key) {
            self.not_null.insert(0, key.to_string());
        }
        if !self.unique.iter().any(|c| c == key) {
            self.unique.insert(0, key.to_string());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    RequiredColumns,
    NotNull,
    Unique,
    NumericRange,
    FutureDate,
    Pattern,
    DataTypes,
    Consistency,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::RequiredColumns => "required_columns",
            CheckType::NotNull => "not_null",
            CheckType::Unique => "unique",
            CheckType::NumericRange => "numeric_range",
            CheckType::FutureDate => "future_date",
            CheckType::Pattern => "pattern",
            CheckType::DataTypes => "data_types",
            CheckType::Consistency => "consistency",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub check_type: CheckType,
    pub passed: bool,
    /// Rows this check flagged.
    pub issue_rows: usize,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub table: String,
    pub enabled: bool,
    pub total_rows: usize,
    pub rows_with_issues: usize,
    pub score: f64,
    pub threshold: f64,
    pub passed: bool,
    pub checks: Vec<CheckOutcome>,
}

/// Signal returned for a dataset scoring below threshold. The orchestrator
/// decides whether it halts the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityCheckFailure {
    pub table: String,
    pub score: f64,
    pub threshold: f64,
    pub failed_checks: Vec<CheckType>,
}

impl fmt::Display for QualityCheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let checks: Vec<&str> = self.failed_checks.iter().map(|c| c.as_str()).collect();
        write!(
            f,
            "quality score {:.2} below threshold {:.2} for table '{}' (failed: {})",
            self.score,
            self.threshold,
            self.table,
            checks.join(", ")
        )
    }
}

impl QualityReport {
    pub fn failure(&self) -> Option<QualityCheckFailure> {
        if self.passed {
            return None;
        }
        Some(QualityCheckFailure {
            table: self.table.clone(),
            score: self.score,
            threshold: self.threshold,
            failed_checks: self
                .checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.check_type)
                .collect(),
        })
    }

    /// Human-readable multi-line summary of the check outcomes.
    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        let mut lines = vec![format!(
            "Quality Check Summary: {}/{} checks passed",
            passed,
            self.checks.len()
        )];
        for check in &self.checks {
            if check.passed {
                lines.push(format!("✓ {}: PASSED", check.check_type));
            } else {
                lines.push(format!("✗ {}: FAILED", check.check_type));
                lines.push(format!("  Details: {}", check.details));
            }
        }
        lines.join("\n")
    }
}

/// Scores datasets against [`QualityRules`].
pub struct QualityGate {
    config: QualityCheckConfig,
    today: Option<NaiveDate>,
    /// Compiled pattern rules, keyed by source pattern.
    regexes: Mutex<HashMap<String, Regex>>,
}

impl QualityGate {
    pub fn new(config: QualityCheckConfig) -> Self {
        Self {
            config,
            today: None,
            regexes: Mutex::new(HashMap::new()),
        }
    }

    /// Pins the reference date used by future-date checks.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn evaluate(&self, dataset: &Dataset, table: &str, rules: &QualityRules) -> QualityReport {
        let total_rows = dataset.len();
        if !self.config.enabled {
            return QualityReport {
                table: table.to_string(),
                enabled: false,
                total_rows,
                rows_with_issues: 0,
                score: 1.0,
                threshold: self.config.threshold,
                passed: true,
                checks: Vec::new(),
            };
        }

        let mut flagged = vec![false; total_rows];
        let mut checks = Vec::new();

        if !rules.required_columns.is_empty() {
            checks.push(check_required(dataset, &rules.required_columns, &mut flagged));
        }
        if !rules.not_null.is_empty() {
            checks.push(check_not_null(dataset, &rules.not_null, &mut flagged));
        }
        if !rules.unique.is_empty() {
            checks.push(check_unique(dataset, &rules.unique, &mut flagged));
        }
        if !rules.ranges.is_empty() {
            checks.push(check_ranges(dataset, &rules.ranges, &mut flagged));
        }
        if !rules.no_future_dates.is_empty() {
            let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
            checks.push(check_future_dates(
                dataset,
                &rules.no_future_dates,
                today,
                &mut flagged,
            ));
        }
        if !rules.patterns.is_empty() {
            checks.push(self.check_patterns(dataset, &rules.patterns, &mut flagged));
        }
        if !rules.data_types.is_empty() {
            checks.push(check_data_types(dataset, &rules.data_types, &mut flagged));
        }
        if !rules.consistency.is_empty() {
            checks.push(check_consistency(dataset, &rules.consistency, &mut flagged));
        }

        let rows_with_issues = flagged.iter().filter(|f| **f).count();
        let score = if total_rows == 0 {
            1.0
        } else {
            (total_rows - rows_with_issues) as f64 / total_rows as f64
        };
        let passed = score >= self.config.threshold;

        crate::metrics::QualityMetrics::record_score(table, score, passed);

        QualityReport {
            table: table.to_string(),
            enabled: true,
            total_rows,
            rows_with_issues,
            score,
            threshold: self.config.threshold,
            passed,
            checks,
        }
    }

    /// Evaluates and appends one audit entry per executed check family.
    /// Audit failures are logged and never change the report.
    #[instrument(skip(self, dataset, rules, recorder), fields(rows = dataset.len()))]
    pub async fn evaluate_and_log(
        &self,
        dataset: &Dataset,
        table: &str,
        rules: &QualityRules,
        recorder: &dyn RunRecorder,
        run_id: Uuid,
    ) -> QualityReport {
        let report = self.evaluate(dataset, table, rules);

        for check in &report.checks {
            let entry = QualityLogEntry {
                run_id,
                table_name: table.to_string(),
                check_type: check.check_type.as_str().to_string(),
                check_result: check.passed,
                details: check.details.clone(),
                checked_at: Utc::now(),
            };
            if let Err(e) = recorder.log_quality(entry).await {
                warn!(check = %check.check_type, error = %e, "Failed to record quality check");
            }
        }

        if report.passed {
            info!(score = report.score, "Quality gate passed");
        } else {
            warn!(
                score = report.score,
                threshold = report.threshold,
                "Quality gate below threshold"
            );
        }
        report
    }

    fn compiled(&self, pattern: &str) -> Result<Regex, regex::Error> {
        let mut cache = self.regexes.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern)?;
        cache.insert(pattern.to_string(), re.clone());
        Ok(re)
    }

    fn check_patterns(
        &self,
        dataset: &Dataset,
        patterns: &[PatternRule],
        flagged: &mut [bool],
    ) -> CheckOutcome {
        let mut counts = BTreeMap::new();
        let mut invalid = Vec::new();
        let mut issue_rows = HashSet::new();

        for rule in patterns {
            let re = match self.compiled(&rule.pattern) {
                Ok(re) => re,
                Err(e) => {
                    invalid.push(json!({ "column": rule.column, "error": e.to_string() }));
                    continue;
                }
            };
            let (rows, column_counts) = scan_columns(
                dataset,
                std::iter::once(rule.column.as_str()),
                flagged,
                |_, v| !v.is_null() && !re.is_match(&v.to_string()),
            );
            issue_rows.extend(rows);
            counts.extend(column_counts);
        }

        let mut check = outcome(
            CheckType::Pattern,
            issue_rows.len(),
            json!({ "mismatch_counts": counts, "invalid_patterns": invalid }),
        );
        check.passed = check.passed && invalid.is_empty();
        check
    }
}

fn outcome(check_type: CheckType, issue_rows: usize, details: serde_json::Value) -> CheckOutcome {
    CheckOutcome {
        check_type,
        passed: issue_rows == 0,
        issue_rows,
        details,
    }
}

fn check_required(dataset: &Dataset, required: &[String], flagged: &mut [bool]) -> CheckOutcome {
    let missing: Vec<&String> = required.iter().filter(|c| !dataset.has_column(c)).collect();
    let issue_rows = if missing.is_empty() {
        0
    } else {
        flagged.iter_mut().for_each(|f| *f = true);
        flagged.len()
    };
    let mut check = outcome(
        CheckType::RequiredColumns,
        issue_rows,
        json!({ "missing_columns": missing }),
    );
    // A missing column fails the check even for an empty dataset.
    check.passed = missing.is_empty();
    check
}

/// Runs `is_issue` over each listed column present in the dataset, flagging
/// rows. Returns the flagged row indices and per-column issue counts.
fn scan_columns<'a, F>(
    dataset: &'a Dataset,
    columns: impl Iterator<Item = &'a str>,
    flagged: &mut [bool],
    mut is_issue: F,
) -> (HashSet<usize>, BTreeMap<String, usize>)
where
    F: FnMut(&str, &Value) -> bool,
{
    let mut counts = BTreeMap::new();
    let mut rows = HashSet::new();
    for column in columns {
        let Ok(values) = dataset.column_values(column) else {
            continue;
        };
        let mut count = 0;
        for (idx, value) in values.into_iter().enumerate() {
            if is_issue(column, value) {
                count += 1;
                flagged[idx] = true;
                rows.insert(idx);
            }
        }
        if count > 0 {
            counts.insert(column.to_string(), count);
        }
    }
    (rows, counts)
}

fn check_not_null(dataset: &Dataset, columns: &[String], flagged: &mut [bool]) -> CheckOutcome {
    let (rows, counts) = scan_columns(
        dataset,
        columns.iter().map(String::as_str),
        flagged,
        |_, v| v.is_null(),
    );
    outcome(CheckType::NotNull, rows.len(), json!({ "null_counts": counts }))
}

/// Later occurrences of a key are the duplicates; the first one is kept.
fn check_unique(dataset: &Dataset, columns: &[String], flagged: &mut [bool]) -> CheckOutcome {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let (rows, counts) = scan_columns(
        dataset,
        columns.iter().map(String::as_str),
        flagged,
        |column, v| match v.key_repr() {
            Some(key) => !seen.insert((column.to_string(), key)),
            None => false,
        },
    );
    outcome(CheckType::Unique, rows.len(), json!({ "duplicate_counts": counts }))
}

fn check_ranges(dataset: &Dataset, ranges: &[RangeRule], flagged: &mut [bool]) -> CheckOutcome {
    let mut details = BTreeMap::new();
    let mut issue_rows = HashSet::new();

    for rule in ranges {
        let Ok(values) = dataset.column_values(&rule.column) else {
            continue;
        };
        let (mut below, mut above, mut non_numeric) = (0usize, 0usize, 0usize);
        for (idx, value) in values.into_iter().enumerate() {
            let issue = match value {
                Value::Null => false,
                Value::Number(n) => {
                    let low = rule
                        .min
                        .is_some_and(|m| if rule.exclusive_min { *n <= m } else { *n < m });
                    let high = rule.max.is_some_and(|m| *n > m);
                    below += low as usize;
                    above += high as usize;
                    low || high
                }
                _ => {
                    non_numeric += 1;
                    true
                }
            };
            if issue {
                flagged[idx] = true;
                issue_rows.insert(idx);
            }
        }
        if below + above + non_numeric > 0 {
            details.insert(
                rule.column.clone(),
                json!({ "below_min": below, "above_max": above, "non_numeric": non_numeric }),
            );
        }
    }
    outcome(
        CheckType::NumericRange,
        issue_rows.len(),
        json!({ "out_of_range": details }),
    )
}

fn check_future_dates(
    dataset: &Dataset,
    columns: &[String],
    today: NaiveDate,
    flagged: &mut [bool],
) -> CheckOutcome {
    let (rows, counts) = scan_columns(
        dataset,
        columns.iter().map(String::as_str),
        flagged,
        |_, v| v.as_date().is_some_and(|d| d > today),
    );
    outcome(
        CheckType::FutureDate,
        rows.len(),
        json!({ "future_counts": counts, "reference_date": today.to_string() }),
    )
}

fn check_data_types(
    dataset: &Dataset,
    types: &BTreeMap<String, ColumnType>,
    flagged: &mut [bool],
) -> CheckOutcome {
    let (rows, counts) = scan_columns(
        dataset,
        types.keys().map(String::as_str),
        flagged,
        |column, v| types.get(column).is_some_and(|t| !t.matches(v)),
    );
    outcome(
        CheckType::DataTypes,
        rows.len(),
        json!({ "expected": types, "mismatch_counts": counts }),
    )
}

fn check_consistency(
    dataset: &Dataset,
    rules: &[ConsistencyRule],
    flagged: &mut [bool],
) -> CheckOutcome {
    let mut details = BTreeMap::new();
    let mut issue_rows = HashSet::new();

    for rule in rules {
        let (Ok(values), Ok(guards)) = (
            dataset.column_values(&rule.column),
            dataset.column_values(&rule.when_positive),
        ) else {
            continue;
        };
        let mut count = 0;
        for (idx, (value, guard)) in values.into_iter().zip(guards).enumerate() {
            let positive = guard.as_number().is_some_and(|n| n > 0.0);
            if positive && value.as_number() == Some(0.0) {
                count += 1;
                flagged[idx] = true;
                issue_rows.insert(idx);
            }
        }
        if count > 0 {
            details.insert(format!("{}_zero_with_{}", rule.column, rule.when_positive), count);
        }
    }
    outcome(
        CheckType::Consistency,
        issue_rows.len(),
        json!({ "inconsistent": details }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(threshold: f64) -> QualityGate {
        QualityGate::new(QualityCheckConfig {
            enabled: true,
            threshold,
            fail_on_error: false,
        })
        .with_today(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    /// 100 rows keyed 1..=100; rows 0..bad get a non-positive amount.
    fn amounts(bad: usize) -> Dataset {
        let mut ds = Dataset::new(vec!["sale_id".into(), "amount".into()]);
        for i in 0..100 {
            let amount = if i < bad { -1.0 } else { 10.0 };
            ds.push_row(vec![Value::Number((i + 1) as f64), Value::Number(amount)])
                .unwrap();
        }
        ds
    }

    fn positive_amounts() -> QualityRules {
        QualityRules {
            ranges: vec![RangeRule {
                column: "amount".into(),
                min: Some(0.0),
                max: None,
                exclusive_min: true,
            }],
            ..Default::default()
        }
        .with_key("sale_id")
    }

    #[test]
    fn test_score_formula_at_threshold_boundary() {
        let ds = amounts(5);
        let report = gate(0.95).evaluate(&ds, "sales", &positive_amounts());
        assert_eq!(report.rows_with_issues, 5);
        assert_eq!(report.score, 0.95);
        assert!(report.passed);
        assert!(report.failure().is_none());

        let report = gate(0.96).evaluate(&ds, "sales", &positive_amounts());
        assert!(!report.passed);
        let failure = report.failure().unwrap();
        assert_eq!(failure.failed_checks, vec![CheckType::NumericRange]);
    }

    #[test]
    fn test_rows_with_multiple_issues_count_once() {
        let mut ds = amounts(0);
        // duplicate key and negative amount on the same row
        ds.push_row(vec![Value::Number(1.0), Value::Number(-5.0)]).unwrap();
        let report = gate(0.0).evaluate(&ds, "sales", &positive_amounts());
        assert_eq!(report.total_rows, 101);
        assert_eq!(report.rows_with_issues, 1);
        assert_eq!(report.checks.len(), 3);
    }

    #[test]
    fn test_empty_dataset_passes_vacuously() {
        let ds = Dataset::new(vec!["sale_id".into(), "amount".into()]);
        let report = gate(1.0).evaluate(&ds, "sales", &positive_amounts());
        assert_eq!(report.score, 1.0);
        assert!(report.passed);
    }

    #[test]
    fn test_disabled_gate_runs_nothing() {
        let gate = QualityGate::new(QualityCheckConfig {
            enabled: false,
            threshold: 1.0,
            fail_on_error: true,
        });
        let report = gate.evaluate(&amounts(50), "sales", &positive_amounts());
        assert!(report.passed);
        assert!(report.checks.is_empty());
    }

    #[test]
    fn test_missing_required_column_flags_every_row() {
        let rules = QualityRules {
            required_columns: vec!["sale_id".into(), "sale_date".into()],
            ..Default::default()
        };
        let report = gate(0.5).evaluate(&amounts(0), "sales", &rules);
        assert_eq!(report.score, 0.0);
        assert_eq!(
            report.checks[0].details,
            json!({ "missing_columns": ["sale_date"] })
        );
    }

    #[test]
    fn test_future_dates_and_patterns() {
        let mut ds = Dataset::new(vec!["email".into(), "signup".into()]);
        let d = |s: &str| Value::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap());
        ds.push_row(vec![Value::from("a@b.com"), d("2024-01-01")]).unwrap();
        ds.push_row(vec![Value::from("broken"), d("2024-05-31")]).unwrap();
        ds.push_row(vec![Value::Null, d("2025-01-01")]).unwrap();
        ds.push_row(vec![Value::from("c@d.org"), Value::Null]).unwrap();

        let rules = QualityRules {
            no_future_dates: vec!["signup".into()],
            patterns: vec![PatternRule {
                column: "email".into(),
                pattern: r"^[^@\s]+@[^@\s]+\.[^@\s]+$".into(),
            }],
            ..Default::default()
        };
        let report = gate(0.0).evaluate(&ds, "customers", &rules);
        assert_eq!(report.rows_with_issues, 2);
        assert_eq!(report.score, 0.5);
        assert_eq!(report.checks[0].check_type, CheckType::FutureDate);
        assert_eq!(report.checks[1].details["mismatch_counts"]["email"], 1);
    }

    #[test]
    fn test_data_types_flag_uncoerced_cells() {
        let mut ds = Dataset::new(vec!["amount".into(), "sale_date".into()]);
        let day = Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        ds.push_row(vec![Value::Number(5.0), day.clone()]).unwrap();
        ds.push_row(vec![Value::from("5.00"), day]).unwrap();
        ds.push_row(vec![Value::Null, Value::from("yesterday")]).unwrap();
        ds.push_row(vec![Value::Null, Value::Null]).unwrap();

        let rules = QualityRules {
            data_types: BTreeMap::from([
                ("amount".to_string(), ColumnType::Number),
                ("sale_date".to_string(), ColumnType::Date),
                ("missing".to_string(), ColumnType::Text),
            ]),
            ..Default::default()
        };
        let report = gate(0.0).evaluate(&ds, "sales", &rules);
        let check = &report.checks[0];
        assert_eq!(check.check_type, CheckType::DataTypes);
        assert!(!check.passed);
        assert_eq!(check.issue_rows, 2);
        assert_eq!(check.details["mismatch_counts"]["amount"], 1);
        assert_eq!(check.details["mismatch_counts"]["sale_date"], 1);
        assert_eq!(report.score, 0.5);
    }

    #[test]
    fn test_consistency_flags_zero_amount_with_quantity() {
        let mut ds = Dataset::new(vec!["quantity".into(), "amount".into()]);
        for (q, a) in [(2.0, 0.0), (0.0, 0.0), (1.0, 9.5), (3.0, 0.0)] {
            ds.push_row(vec![Value::Number(q), Value::Number(a)]).unwrap();
        }
        ds.push_row(vec![Value::Null, Value::Number(0.0)]).unwrap();

        let rules = QualityRules {
            consistency: vec![ConsistencyRule {
                column: "amount".into(),
                when_positive: "quantity".into(),
            }],
            ..Default::default()
        };
        let report = gate(0.0).evaluate(&ds, "sales", &rules);
        assert_eq!(report.checks[0].check_type, CheckType::Consistency);
        assert_eq!(report.rows_with_issues, 2);
        assert_eq!(
            report.checks[0].details,
            json!({ "inconsistent": { "amount_zero_with_quantity": 2 } })
        );
    }

    #[test]
    fn test_pattern_compiled_once_per_gate() {
        let gate = gate(0.0);
        let rules = QualityRules {
            patterns: vec![PatternRule {
                column: "code".into(),
                pattern: r"^[A-Z]{3}$".into(),
            }],
            ..Default::default()
        };
        let mut ds = Dataset::new(vec!["code".into()]);
        ds.push_row(vec![Value::from("ABC")]).unwrap();
        ds.push_row(vec![Value::from("abc")]).unwrap();

        for _ in 0..3 {
            assert_eq!(gate.evaluate(&ds, "codes", &rules).rows_with_issues, 1);
        }
        assert_eq!(gate.regexes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_summary_lists_failures() {
        let report = gate(0.99).evaluate(&amounts(3), "sales", &positive_amounts());
        let summary = report.summary();
        assert!(summary.starts_with("Quality Check Summary: 2/3 checks passed"));
        assert!(summary.contains("✗ numeric_range: FAILED"));
    }
}
