use std::collections::BTreeMap;
use std::sync::Arc;

use catalog::{CatalogHandle, ColumnType, SchemaCatalog, TableDescriptor};

use super::{init_logger, shop_catalog, validate};
use crate::parser::DEFAULT_MAX_DEPTH;
use crate::{RuleId, Severity, ValidationReport, Validator, ValidatorConfig};

fn validate_with(query: &str, config: &ValidatorConfig) -> ValidationReport {
    init_logger();
    crate::validate(query, &shop_catalog(), config)
}

fn assert_single(report: &ValidationReport, rule_id: RuleId, line: usize, column: usize) {
    let [diagnostic] = report.diagnostics.as_slice() else {
        panic!("Expected single {rule_id} diagnostic, got {report:?}");
    };
    assert_eq!(diagnostic.rule_id, rule_id);
    assert_eq!((diagnostic.line, diagnostic.column), (line, column));
}

#[test]
fn lex_error_stops_validation() {
    let report = validate("SELECT shop_id FROM orders WHERE name = 'oops");
    assert_single(&report, RuleId::LexError, 1, 41);
    assert!(!report.ok);
}

#[test]
fn parse_errors_do_not_hide_other_statements() {
    // given
    let query = "SELECT FROM;\nSELECT shop_id FROM shops WHERE name > 1";

    // when
    let report = validate(query);

    // then
    assert_eq!(report.count(RuleId::ParseError), 1, "{report:?}");
    assert_eq!(report.count(RuleId::ComparisonTypeMismatch), 1, "{report:?}");
    assert_eq!(report.diagnostics[0].rule_id, RuleId::ParseError);
    assert_eq!(report.diagnostics[1].line, 2);
    assert!(!report.ok);
}

#[test]
fn diagnostics_are_positioned_per_line() {
    let report = validate("SELECT shop_id\nFROM orders;\nSELECT name FROM shops");
    assert_single(&report, RuleId::MissingPartitionFilter, 2, 6);
}

#[test]
fn deep_nesting_is_rejected() {
    let config = ValidatorConfig {
        max_depth: 8,
        ..ValidatorConfig::default()
    };
    let query = format!("SELECT {}1{}", "(".repeat(30), ")".repeat(30));

    let report = validate_with(&query, &config);
    assert_eq!(report.count(RuleId::MaxDepthExceeded), 1, "{report:?}");
    assert!(!report.ok);

    let report = validate(&query);
    assert!(report.ok, "{report:?}");
}

fn nested_derived_tables(levels: usize) -> String {
    let mut query = "SELECT * FROM shops".to_string();
    for _ in 0..levels {
        query = format!("SELECT * FROM ({query})");
    }
    query
}

#[test]
fn derived_tables_nested_up_to_default_depth() {
    let report = validate(&nested_derived_tables(DEFAULT_MAX_DEPTH - 4));
    assert!(report.ok, "{report:?}");

    let report = validate(&nested_derived_tables(DEFAULT_MAX_DEPTH + 10));
    assert_eq!(report.diagnostics.len(), 1, "{report:?}");
    assert_eq!(report.count(RuleId::MaxDepthExceeded), 1);
}

#[test]
fn long_flat_chains_are_rejected() {
    let queries = [
        format!(
            "SELECT name FROM shops WHERE {}",
            vec!["shop_id = 1"; 50_000].join(" AND ")
        ),
        format!("SELECT {}", vec!["1"; 20_000].join(" + ")),
        format!("SELECT {}", vec!["'a'"; 20_000].join(" || ")),
    ];
    for query in &queries {
        let report = validate(query);
        let [diagnostic] = report.diagnostics.as_slice() else {
            panic!("Expected single MAX_DEPTH_EXCEEDED diagnostic, got {report:?}");
        };
        assert_eq!(diagnostic.rule_id, RuleId::MaxDepthExceeded);
        assert!(!report.ok);
    }
}

#[test]
fn chains_within_default_depth_are_checked() {
    let terms = vec!["shop_id = 1"; 40].join(" AND ");
    let report = validate(&format!("SELECT name FROM shops WHERE {terms}"));
    assert!(report.ok, "{report:?}");

    let report = validate(&format!("SELECT name FROM shops WHERE {terms} AND name > 1"));
    assert_eq!(report.count(RuleId::ComparisonTypeMismatch), 1, "{report:?}");
}

#[test]
fn disabled_rules_and_severity_overrides() {
    let query = "SELECT amount / quantity FROM orders";

    let report = validate(query);
    assert_eq!(report.count(RuleId::UnguardedDivision), 1);
    assert_eq!(report.count(RuleId::MissingPartitionFilter), 1);
    assert!(!report.ok);

    let config = ValidatorConfig::from_json_str(
        r#"{
            "disabled_rules": ["MISSING_PARTITION_FILTER"],
            "severity_overrides": { "UNGUARDED_DIVISION": "info" }
        }"#,
    )
    .unwrap();
    let report = validate_with(query, &config);
    assert_single(&report, RuleId::UnguardedDivision, 1, 8);
    assert_eq!(report.diagnostics[0].severity, Severity::Info);
    assert!(report.ok);

    let config = ValidatorConfig {
        severity_overrides: BTreeMap::from([(RuleId::UnguardedDivision, Severity::Error)]),
        disabled_rules: vec![RuleId::MissingPartitionFilter],
        ..ValidatorConfig::default()
    };
    assert!(!validate_with(query, &config).ok);
}

#[test]
fn parameters_are_typed_from_config() {
    let query = "SELECT order_id FROM orders WHERE created_at >= @since";

    let untyped = validate(query);
    assert!(untyped.ok, "{untyped:?}");

    let config = ValidatorConfig {
        parameter_types: BTreeMap::from([("since".to_string(), ColumnType::Date)]),
        ..ValidatorConfig::default()
    };
    let report = validate_with(query, &config);
    assert_single(&report, RuleId::TemporalTypeMismatch, 1, 35);
}

#[test]
fn unknown_function_does_not_fail_validation() {
    let report = validate("SELECT MY_UDF(shop_id) FROM shops");
    assert_single(&report, RuleId::UnknownFunction, 1, 8);
    assert_eq!(report.diagnostics[0].severity, Severity::Info);
    assert!(report.ok);
}

#[test]
fn report_serializes_to_json() {
    let report = validate("SELECT shop_id FROM orders");
    let json = report.to_json().unwrap();
    assert!(json.starts_with(r#"{"ok":false,"diagnostics":[{"#), "{json}");
    assert!(json.contains(r#""ruleId":"MISSING_PARTITION_FILTER""#), "{json}");
    assert!(json.contains(r#""severity":"error""#), "{json}");
    assert!(json.contains(r#""line":1,"column":21,"length":6"#), "{json}");

    let parsed: ValidationReport = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, report);
}

fn relaxed_catalog() -> SchemaCatalog {
    let orders = TableDescriptor::builder("shop.sales.orders")
        .column("order_id", ColumnType::Int64)
        .column("shop_id", ColumnType::Int64)
        .column("created_at", ColumnType::Timestamp)
        .partitioned_by("created_at")
        .build()
        .unwrap();
    SchemaCatalog::load(vec![orders]).unwrap()
}

#[test]
fn validator_picks_up_reloaded_catalog() {
    // given
    init_logger();
    let handle = Arc::new(CatalogHandle::new(shop_catalog()));
    let validator = Validator::new(handle.clone(), ValidatorConfig::default());
    let query = "SELECT shop_id FROM orders";
    let before = validator.validate(query);
    let snapshot = handle.snapshot();

    // when
    let version = handle.reload(relaxed_catalog());

    // then
    assert_eq!(version, 1);
    assert_eq!(before.count(RuleId::MissingPartitionFilter), 1);
    assert!(validator.validate(query).ok);
    // snapshot taken before reload still sees the old catalog
    let old = crate::validate(query, &snapshot, validator.config());
    assert_eq!(old, before);
}

#[test]
fn validator_batch_keeps_input_order() {
    init_logger();
    let validator = Validator::new(
        Arc::new(CatalogHandle::new(shop_catalog())),
        ValidatorConfig::default(),
    );
    let queries: Vec<String> = (0..25)
        .map(|i| match i % 3 {
            0 => format!("SELECT shop_id FROM shops WHERE shop_id = {i}"),
            1 => "SELECT shop_id FROM orders".to_string(),
            _ => format!("SELECT MY_UDF_{i}(name) FROM shops"),
        })
        .collect();

    let reports = validator.validate_batch(&queries, 4);

    assert_eq!(reports.len(), queries.len());
    for (i, (query, report)) in queries.iter().zip(&reports).enumerate() {
        assert_eq!(report, &validator.validate(query), "query {i}");
        match i % 3 {
            0 => assert!(report.diagnostics.is_empty()),
            1 => assert_eq!(report.count(RuleId::MissingPartitionFilter), 1),
            _ => {
                assert_eq!(report.count(RuleId::UnknownFunction), 1);
                assert!(report.diagnostics[0].message.contains(&format!("MY_UDF_{i}")));
            }
        }
    }
}
