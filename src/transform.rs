//! Declarative cleansing, coercion, and derivation rules applied to a
//! [`Dataset`] in place.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::dataset::{Dataset, Value};
use crate::error::TransformError;

const DEFAULT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const MAX_ROUND_DIGITS: u32 = 12;
const MAX_FAILURE_SAMPLES: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    #[serde(default)]
    pub rules: Vec<TransformRule>,
    #[serde(default)]
    pub on_error: CoercionPolicy,
}

/// What happens to a row whose value fails a `number` or `date` coercion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionPolicy {
    Drop,
    #[default]
    NullFill,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRule {
    /// Column the rule rewrites, or creates for derivations.
    pub column: String,
    #[serde(flatten)]
    pub op: RuleOp,
}

impl TransformRule {
    pub fn new(column: &str, op: RuleOp) -> Self {
        Self {
            column: column.to_string(),
            op,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RuleOp {
    Trim,
    Lowercase,
    Uppercase,
    TitleCase,
    FillNull {
        value: FillValue,
    },
    Number,
    Date {
        #[serde(default)]
        formats: Option<Vec<String>>,
    },
    Round {
        digits: u32,
    },
    DatePart {
        source: String,
        part: DatePart,
    },
    Ratio {
        numerator: String,
        denominator: String,
    },
    /// Label `i` covers `(edges[i], edges[i + 1]]`; the last label is open-ended.
    Bucket {
        source: String,
        edges: Vec<f64>,
        labels: Vec<String>,
    },
    SplitPart {
        source: String,
        delimiter: String,
        index: usize,
    },
    Lookup {
        source: String,
        mapping: BTreeMap<String, String>,
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        missing: Option<String>,
    },
}

impl RuleOp {
    pub fn name(&self) -> &'static str {
        match self {
            RuleOp::Trim => "trim",
            RuleOp::Lowercase => "lowercase",
            RuleOp::Uppercase => "uppercase",
            RuleOp::TitleCase => "title_case",
            RuleOp::FillNull { .. } => "fill_null",
            RuleOp::Number => "number",
            RuleOp::Date { .. } => "date",
            RuleOp::Round { .. } => "round",
            RuleOp::DatePart { .. } => "date_part",
            RuleOp::Ratio { .. } => "ratio",
            RuleOp::Bucket { .. } => "bucket",
            RuleOp::SplitPart { .. } => "split_part",
            RuleOp::Lookup { .. } => "lookup",
        }
    }

    fn inputs(&self) -> Vec<&str> {
        match self {
            RuleOp::DatePart { source, .. }
            | RuleOp::Bucket { source, .. }
            | RuleOp::SplitPart { source, .. }
            | RuleOp::Lookup { source, .. } => vec![source.as_str()],
            RuleOp::Ratio {
                numerator,
                denominator,
            } => vec![numerator.as_str(), denominator.as_str()],
            _ => Vec::new(),
        }
    }

    fn is_derivation(&self) -> bool {
        !self.inputs().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Number(f64),
    Text(String),
}

impl From<&FillValue> for Value {
    fn from(v: &FillValue) -> Self {
        match v {
            FillValue::Number(n) => Value::Number(*n),
            FillValue::Text(s) => Value::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePart {
    Year,
    Month,
    Quarter,
    Day,
    /// Monday = 0.
    DayOfWeek,
    /// 1 for Saturday/Sunday, else 0.
    IsWeekend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoercionFailure {
    pub row: usize,
    pub column: String,
    pub value: String,
    pub rule: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub rows_dropped: usize,
    pub coercion_failures: usize,
    /// The first few failures, for the log.
    pub samples: Vec<CoercionFailure>,
}

#[derive(Debug, Default)]
pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }

    /// Validates every rule against the evolving schema, then applies them in
    /// order. Nothing is mutated when a rule is invalid.
    #[instrument(skip_all, fields(rules = spec.rules.len(), rows = dataset.len()))]
    pub fn apply(
        &self,
        dataset: &mut Dataset,
        spec: &TransformSpec,
    ) -> Result<TransformReport, TransformError> {
        validate_rules(dataset, &spec.rules)?;

        let mut report = TransformReport {
            rows_in: dataset.len(),
            ..Default::default()
        };
        let mut dropped = BTreeSet::new();

        for rule in &spec.rules {
            let failures = apply_rule(dataset, rule)?;
            for failure in failures {
                match spec.on_error {
                    CoercionPolicy::Abort => {
                        return Err(TransformError::Aborted {
                            row: failure.row,
                            column: failure.column,
                            value: failure.value,
                            rule: failure.rule,
                        })
                    }
                    CoercionPolicy::Drop => {
                        dropped.insert(failure.row);
                    }
                    CoercionPolicy::NullFill => {}
                }
                report.coercion_failures += 1;
                if report.samples.len() < MAX_FAILURE_SAMPLES {
                    report.samples.push(failure);
                }
            }
        }

        dataset.remove_rows(&dropped);
        report.rows_dropped = dropped.len();
        report.rows_out = dataset.len();

        if report.coercion_failures > 0 {
            warn!(
                failures = report.coercion_failures,
                dropped = report.rows_dropped,
                policy = ?spec.on_error,
                "Values failed coercion"
            );
        }
        debug!(rows_out = report.rows_out, "Transform complete");
        Ok(report)
    }
}

fn validate_rules(dataset: &Dataset, rules: &[TransformRule]) -> Result<(), TransformError> {
    let mut known: HashSet<String> = dataset.columns().iter().cloned().collect();

    for rule in rules {
        let name = rule.op.name();
        let invalid = |reason: &str| TransformError::InvalidRule {
            rule: name,
            column: rule.column.clone(),
            reason: reason.to_string(),
        };

        if rule.op.is_derivation() {
            for input in rule.op.inputs() {
                if !known.contains(input) {
                    return Err(TransformError::UnknownColumn {
                        rule: name,
                        column: input.to_string(),
                    });
                }
            }
        } else if !known.contains(&rule.column) {
            return Err(TransformError::UnknownColumn {
                rule: name,
                column: rule.column.clone(),
            });
        }

        match &rule.op {
            RuleOp::Round { digits } if *digits > MAX_ROUND_DIGITS => {
                return Err(invalid(&format!("digits must be at most {MAX_ROUND_DIGITS}")));
            }
            RuleOp::Date {
                formats: Some(formats),
            } => {
                if formats.is_empty() {
                    return Err(invalid("formats must not be empty"));
                }
                if let Some(bad) = formats.iter().find(|f| !is_valid_strftime(f)) {
                    return Err(invalid(&format!("malformed date format {bad:?}")));
                }
            }
            RuleOp::Bucket { edges, labels, .. } => {
                if edges.is_empty() {
                    return Err(invalid("edges must not be empty"));
                }
                if edges.windows(2).any(|w| w[0] >= w[1]) || edges.iter().any(|e| !e.is_finite()) {
                    return Err(invalid("edges must be finite and strictly ascending"));
                }
                if labels.len() != edges.len() {
                    return Err(invalid("labels must have one entry per edge"));
                }
            }
            RuleOp::SplitPart { delimiter, .. } if delimiter.is_empty() => {
                return Err(invalid("delimiter must not be empty"));
            }
            _ => {}
        }

        known.insert(rule.column.clone());
    }
    Ok(())
}

fn is_valid_strftime(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Applies one rule; returns the coercion failures it produced. Failed cells
/// are left null so later rules see a typed column.
fn apply_rule(
    dataset: &mut Dataset,
    rule: &TransformRule,
) -> Result<Vec<CoercionFailure>, TransformError> {
    let target = dataset.ensure_column(&rule.column);
    let name = rule.op.name();
    let mut failures = Vec::new();
    let fail = |row: usize, value: &Value| CoercionFailure {
        row,
        column: rule.column.clone(),
        value: value.to_string(),
        rule: name,
    };

    match &rule.op {
        RuleOp::Trim => map_strings(dataset, target, |s| s.trim().to_string()),
        RuleOp::Lowercase => map_strings(dataset, target, |s| s.to_lowercase()),
        RuleOp::Uppercase => map_strings(dataset, target, |s| s.to_uppercase()),
        RuleOp::TitleCase => map_strings(dataset, target, title_case),
        RuleOp::FillNull { value } => {
            let fill = Value::from(value);
            dataset.for_each_in_column(target, |_, cell| {
                if cell.is_null() {
                    *cell = fill.clone();
                }
            });
        }
        RuleOp::Number => dataset.for_each_in_column(target, |row, cell| {
            let coerced = match &*cell {
                Value::Null | Value::Number(_) => return,
                Value::String(s) if s.trim().is_empty() => Some(Value::Null),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(Value::Number),
                Value::Date(_) => None,
            };
            match coerced {
                Some(v) => *cell = v,
                None => {
                    failures.push(fail(row, &*cell));
                    *cell = Value::Null;
                }
            }
        }),
        RuleOp::Date { formats } => dataset.for_each_in_column(target, |row, cell| {
            let coerced = match &*cell {
                Value::Null | Value::Date(_) => return,
                Value::String(s) if s.trim().is_empty() => Some(Value::Null),
                Value::String(s) => parse_date(s.trim(), formats.as_deref()).map(Value::Date),
                Value::Number(_) => None,
            };
            match coerced {
                Some(v) => *cell = v,
                None => {
                    failures.push(fail(row, &*cell));
                    *cell = Value::Null;
                }
            }
        }),
        RuleOp::Round { digits } => {
            let factor = 10f64.powi(*digits as i32);
            dataset.for_each_in_column(target, |row, cell| match cell {
                Value::Number(n) => {
                    let scaled = *n * factor;
                    // Values this large carry no fractional digits to round.
                    if scaled.is_finite() {
                        *n = scaled.round() / factor;
                    }
                }
                Value::Null => {}
                other => {
                    failures.push(fail(row, &*other));
                    *other = Value::Null;
                }
            });
        }
        RuleOp::DatePart { source, part } => {
            derive(dataset, target, &[source], |vals| {
                vals[0].as_date().map(|d| Value::Number(date_part(d, *part)))
            })?;
        }
        RuleOp::Ratio {
            numerator,
            denominator,
        } => {
            derive(dataset, target, &[numerator, denominator], |vals| {
                match (vals[0].as_number(), vals[1].as_number()) {
                    (Some(n), Some(d)) if d != 0.0 => Some(Value::Number(n / d)),
                    _ => None,
                }
            })?;
        }
        RuleOp::Bucket {
            source,
            edges,
            labels,
        } => {
            derive(dataset, target, &[source], |vals| {
                let n = vals[0].as_number()?;
                let idx = edges.iter().rposition(|edge| n > *edge)?;
                Some(Value::String(labels[idx].clone()))
            })?;
        }
        RuleOp::SplitPart {
            source,
            delimiter,
            index,
        } => {
            derive(dataset, target, &[source], |vals| {
                let part = vals[0].as_str()?.split(delimiter.as_str()).nth(*index)?;
                Some(Value::String(part.to_string()))
            })?;
        }
        RuleOp::Lookup {
            source,
            mapping,
            default,
            missing,
        } => {
            derive(dataset, target, &[source], |vals| match &vals[0] {
                Value::Null => missing.clone().map(Value::String),
                key => mapping
                    .get(&key.to_string())
                    .or(default.as_ref())
                    .cloned()
                    .map(Value::String),
            })?;
        }
    }
    Ok(failures)
}

fn map_strings<F>(dataset: &mut Dataset, idx: usize, f: F)
where
    F: Fn(&str) -> String,
{
    dataset.for_each_in_column(idx, |_, cell| {
        if let Value::String(s) = cell {
            *s = f(s);
        }
    });
}

/// Computes `target` from `inputs` for every row; `None` writes null.
fn derive<F>(
    dataset: &mut Dataset,
    target: usize,
    inputs: &[&String],
    f: F,
) -> Result<(), TransformError>
where
    F: Fn(&[Value]) -> Option<Value>,
{
    let indices = inputs
        .iter()
        .map(|c| {
            dataset
                .column_index(c)
                .ok_or_else(|| TransformError::UnknownColumn {
                    rule: "derive",
                    column: c.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for row in dataset.rows_mut() {
        let vals: Vec<Value> = indices.iter().map(|&i| row[i].clone()).collect();
        row[target] = f(&vals).unwrap_or(Value::Null);
    }
    Ok(())
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn parse_date(s: &str, formats: Option<&[String]>) -> Option<NaiveDate> {
    match formats {
        Some(formats) => formats.iter().find_map(|f| {
            NaiveDate::parse_from_str(s, f)
                .ok()
                .or_else(|| NaiveDateTime::parse_from_str(s, f).ok().map(|dt| dt.date()))
        }),
        None => DEFAULT_DATE_FORMATS
            .iter()
            .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.date())
            })
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())),
    }
}

fn date_part(d: NaiveDate, part: DatePart) -> f64 {
    match part {
        DatePart::Year => d.year() as f64,
        DatePart::Month => d.month() as f64,
        DatePart::Quarter => ((d.month() - 1) / 3 + 1) as f64,
        DatePart::Day => d.day() as f64,
        DatePart::DayOfWeek => d.weekday().num_days_from_monday() as f64,
        DatePart::IsWeekend => {
            if matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
                1.0
            } else {
                0.0
            }
        }
    }
}
