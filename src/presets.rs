//! Built-in transforms, quality rules and load projections for the three
//! sales-analytics tables. Used whenever a source or destination does not
//! declare its own.

use std::collections::BTreeMap;

use crate::quality::{ColumnType, ConsistencyRule, PatternRule, QualityRules, RangeRule};
use crate::transform::{CoercionPolicy, DatePart, FillValue, RuleOp, TransformRule, TransformSpec};

pub const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

const CORPORATE_DOMAINS: [&str; 3] = ["company.com", "business.com", "corp.com"];
const PERSONAL_DOMAINS: [&str; 4] = ["gmail.com", "yahoo.com", "hotmail.com", "outlook.com"];

/// Transform for rows bound for `table`; unknown tables pass through
/// untouched. Keyed like [`quality_for_table`] and [`columns_for_table`] so
/// the coerced schema is the one those rules expect.
pub fn transform_for_table(table: &str) -> TransformSpec {
    let rules = match table {
        "sales" => sales_rules(),
        "products" => product_rules(),
        "customers" => customer_rules(),
        _ => Vec::new(),
    };
    TransformSpec {
        rules,
        on_error: CoercionPolicy::NullFill,
    }
}

fn text(s: &str) -> FillValue {
    FillValue::Text(s.to_string())
}

fn date_part(column: &str, part: DatePart) -> TransformRule {
    TransformRule::new(
        column,
        RuleOp::DatePart {
            source: "sale_date".into(),
            part,
        },
    )
}

fn sales_rules() -> Vec<TransformRule> {
    vec![
        TransformRule::new("sale_date", RuleOp::Date { formats: None }),
        TransformRule::new("sale_id", RuleOp::Number),
        TransformRule::new("product_id", RuleOp::Number),
        TransformRule::new("customer_id", RuleOp::Number),
        TransformRule::new("quantity", RuleOp::Number),
        TransformRule::new("amount", RuleOp::Number),
        date_part("year", DatePart::Year),
        date_part("month", DatePart::Month),
        date_part("quarter", DatePart::Quarter),
        date_part("day_of_week", DatePart::DayOfWeek),
        date_part("is_weekend", DatePart::IsWeekend),
        TransformRule::new(
            "price_per_unit",
            RuleOp::Ratio {
                numerator: "amount".into(),
                denominator: "quantity".into(),
            },
        ),
        TransformRule::new("amount", RuleOp::Round { digits: 2 }),
        TransformRule::new("price_per_unit", RuleOp::Round { digits: 2 }),
        TransformRule::new("quantity", RuleOp::FillNull { value: FillValue::Number(0.0) }),
        TransformRule::new("amount", RuleOp::FillNull { value: FillValue::Number(0.0) }),
    ]
}

fn product_rules() -> Vec<TransformRule> {
    vec![
        TransformRule::new("product_id", RuleOp::Number),
        TransformRule::new("product_name", RuleOp::Trim),
        TransformRule::new("product_name", RuleOp::TitleCase),
        TransformRule::new("category", RuleOp::Trim),
        TransformRule::new("category", RuleOp::Uppercase),
        TransformRule::new("category", RuleOp::FillNull { value: text("UNCATEGORIZED") }),
        TransformRule::new("price", RuleOp::Number),
        TransformRule::new(
            "price_tier",
            RuleOp::Bucket {
                source: "price".into(),
                edges: vec![0.0, 50.0, 200.0, 500.0],
                labels: ["Budget", "Standard", "Premium", "Luxury"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
        ),
    ]
}

fn customer_rules() -> Vec<TransformRule> {
    let mapping: BTreeMap<String, String> = CORPORATE_DOMAINS
        .iter()
        .map(|d| (d.to_string(), "Corporate".to_string()))
        .chain(
            PERSONAL_DOMAINS
                .iter()
                .map(|d| (d.to_string(), "Personal".to_string())),
        )
        .collect();

    vec![
        TransformRule::new("customer_id", RuleOp::Number),
        TransformRule::new("customer_name", RuleOp::Trim),
        TransformRule::new("customer_name", RuleOp::TitleCase),
        TransformRule::new("email", RuleOp::Trim),
        TransformRule::new("email", RuleOp::Lowercase),
        TransformRule::new("region", RuleOp::Trim),
        TransformRule::new("region", RuleOp::Uppercase),
        TransformRule::new(
            "email_domain",
            RuleOp::SplitPart {
                source: "email".into(),
                delimiter: "@".into(),
                index: 1,
            },
        ),
        TransformRule::new(
            "customer_segment",
            RuleOp::Lookup {
                source: "email_domain".into(),
                mapping,
                default: Some("Other".into()),
                missing: Some("Unknown".into()),
            },
        ),
        TransformRule::new("region", RuleOp::FillNull { value: text("UNKNOWN") }),
    ]
}

fn names(cols: &[&str]) -> Vec<String> {
    cols.iter().map(|c| c.to_string()).collect()
}

/// Quality rules for a table by name; unknown tables get an empty set.
pub fn quality_for_table(table: &str) -> QualityRules {
    match table {
        "sales" => QualityRules {
            required_columns: names(&[
                "sale_id",
                "product_id",
                "customer_id",
                "quantity",
                "amount",
                "sale_date",
            ]),
            not_null: names(&["sale_id", "product_id", "customer_id", "sale_date"]),
            unique: names(&["sale_id"]),
            ranges: vec![
                RangeRule {
                    column: "quantity".into(),
                    min: Some(0.0),
                    max: Some(1000.0),
                    exclusive_min: true,
                },
                RangeRule {
                    column: "amount".into(),
                    min: Some(0.0),
                    max: Some(1_000_000.0),
                    exclusive_min: true,
                },
            ],
            no_future_dates: names(&["sale_date"]),
            data_types: BTreeMap::from([
                ("sale_date".to_string(), ColumnType::Date),
                ("quantity".to_string(), ColumnType::Number),
                ("amount".to_string(), ColumnType::Number),
                ("price_per_unit".to_string(), ColumnType::Number),
            ]),
            consistency: vec![ConsistencyRule {
                column: "amount".into(),
                when_positive: "quantity".into(),
            }],
            ..QualityRules::default()
        },
        "products" => QualityRules {
            required_columns: names(&["product_id", "product_name", "category", "price"]),
            not_null: names(&["product_id", "product_name"]),
            unique: names(&["product_id"]),
            ranges: vec![RangeRule {
                column: "price".into(),
                min: Some(0.0),
                max: Some(10_000.0),
                exclusive_min: true,
            }],
            ..QualityRules::default()
        },
        "customers" => QualityRules {
            required_columns: names(&["customer_id", "customer_name", "email", "region"]),
            not_null: names(&["customer_id", "customer_name"]),
            unique: names(&["customer_id", "email"]),
            patterns: vec![PatternRule {
                column: "email".into(),
                pattern: EMAIL_PATTERN.into(),
            }],
            ..QualityRules::default()
        },
        _ => QualityRules::default(),
    }
}

/// Columns written to a table, in order. `None` loads every column.
pub fn columns_for_table(table: &str) -> Option<Vec<String>> {
    let cols: &[&str] = match table {
        "sales" => &[
            "sale_id",
            "product_id",
            "customer_id",
            "quantity",
            "amount",
            "sale_date",
        ],
        "products" => &["product_id", "product_name", "category", "price"],
        "customers" => &["customer_id", "customer_name", "email", "region"],
        _ => return None,
    };
    Some(names(cols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, Value};
    use crate::transform::Transformer;
    use chrono::NaiveDate;

    fn dataset(columns: &[&str], rows: &[&[&str]]) -> Dataset {
        let mut ds = Dataset::new(names(columns));
        for row in rows {
            ds.push_row(
                row.iter()
                    .map(|v| if v.is_empty() { Value::Null } else { Value::from(*v) })
                    .collect(),
            )
            .unwrap();
        }
        ds
    }

    #[test]
    fn test_sales_preset_derives_calendar_and_unit_price() {
        let mut ds = dataset(
            &["sale_id", "product_id", "customer_id", "quantity", "amount", "sale_date"],
            &[&["1", "10", "100", "3", "100", "2024-03-16"]],
        );
        Transformer::new()
            .apply(&mut ds, &transform_for_table("sales"))
            .unwrap();
        assert_eq!(
            ds.value(0, "sale_date"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 3, 16).unwrap()))
        );
        assert_eq!(ds.value(0, "quarter"), Some(&Value::Number(1.0)));
        assert_eq!(ds.value(0, "day_of_week"), Some(&Value::Number(5.0)));
        assert_eq!(ds.value(0, "is_weekend"), Some(&Value::Number(1.0)));
        assert_eq!(ds.value(0, "price_per_unit"), Some(&Value::Number(33.33)));
    }

    #[test]
    fn test_sales_preset_fills_missing_quantity() {
        let mut ds = dataset(
            &["sale_id", "product_id", "customer_id", "quantity", "amount", "sale_date"],
            &[&["1", "10", "100", "", "", "2024-01-02"]],
        );
        Transformer::new()
            .apply(&mut ds, &transform_for_table("sales"))
            .unwrap();
        assert_eq!(ds.value(0, "quantity"), Some(&Value::Number(0.0)));
        assert_eq!(ds.value(0, "amount"), Some(&Value::Number(0.0)));
        assert_eq!(ds.value(0, "price_per_unit"), Some(&Value::Null));
    }

    #[test]
    fn test_customer_preset_segments() {
        let mut ds = dataset(
            &["customer_id", "customer_name", "email", "region"],
            &[
                &["1", "  ada lovelace ", " Ada@Corp.com ", "west"],
                &["2", "bob", "bob@gmail.com", ""],
                &["3", "cy", "cy@example.org", "east"],
                &["4", "di", "", "east"],
            ],
        );
        Transformer::new()
            .apply(&mut ds, &transform_for_table("customers"))
            .unwrap();
        assert_eq!(ds.value(0, "customer_name"), Some(&Value::from("Ada Lovelace")));
        assert_eq!(ds.value(0, "email"), Some(&Value::from("ada@corp.com")));
        let segments: Vec<String> = ds
            .column_values("customer_segment")
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(segments, vec!["Corporate", "Personal", "Other", "Unknown"]);
        assert_eq!(ds.value(1, "region"), Some(&Value::from("UNKNOWN")));
    }

    #[test]
    fn test_product_preset_tiers() {
        let mut ds = dataset(
            &["product_id", "product_name", "category", "price"],
            &[
                &["1", "desk lamp", " home ", "49.99"],
                &["2", "tv", "", "650"],
            ],
        );
        Transformer::new()
            .apply(&mut ds, &transform_for_table("products"))
            .unwrap();
        assert_eq!(ds.value(0, "category"), Some(&Value::from("HOME")));
        assert_eq!(ds.value(1, "category"), Some(&Value::from("UNCATEGORIZED")));
        assert_eq!(ds.value(0, "price_tier"), Some(&Value::from("Budget")));
        assert_eq!(ds.value(1, "price_tier"), Some(&Value::from("Luxury")));
    }

    #[test]
    fn test_sales_preset_output_satisfies_sales_rules() {
        use crate::config::QualityCheckConfig;
        use crate::quality::{CheckType, QualityGate};

        let mut ds = dataset(
            &["sale_id", "product_id", "customer_id", "quantity", "amount", "sale_date"],
            &[
                &["1", "10", "100", "3", "100", "2024-03-16"],
                &["2", "11", "101", "2", "", "2024-03-17"],
            ],
        );
        Transformer::new()
            .apply(&mut ds, &transform_for_table("sales"))
            .unwrap();
        let gate = QualityGate::new(QualityCheckConfig {
            enabled: true,
            threshold: 0.95,
            fail_on_error: true,
        })
        .with_today(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let report = gate.evaluate(&ds, "sales", &quality_for_table("sales"));

        let check = |t: CheckType| report.checks.iter().find(|c| c.check_type == t).unwrap();
        assert!(check(CheckType::DataTypes).passed);
        // the filled zero amount on a two-unit sale is the only issue
        assert!(!check(CheckType::Consistency).passed);
        assert_eq!(report.rows_with_issues, 1);
    }

    #[test]
    fn test_unknown_names_fall_back() {
        assert!(transform_for_table("inventory").rules.is_empty());
        assert_eq!(quality_for_table("inventory"), QualityRules::default());
        assert_eq!(columns_for_table("inventory"), None);
        assert_eq!(columns_for_table("products").map(|c| c.len()), Some(4));
    }
}
