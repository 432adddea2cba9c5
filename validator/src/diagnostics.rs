//! Uniform diagnostic format and the reporter that turns findings of all passes into a [`ValidationReport`].

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::ast::Span;
use crate::config::ValidatorConfig;
use crate::cte::CteError;
use crate::functions::FunctionDiagnostic;
use crate::inference::TypeDiagnostic;
use crate::lexer::LexError;
use crate::parser::ParserError;
use crate::partition::PartitionDiagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Stable identifier of a diagnostic kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleId {
    LexError,
    ParseError,
    MaxDepthExceeded,
    CteDuplicateName,
    CteForwardReference,
    CteIllegalSelfReference,
    CteInvalidRecursion,
    TemporalTypeMismatch,
    ComparisonTypeMismatch,
    OperatorTypeMismatch,
    InvalidCast,
    UnguardedDivision,
    DivisionByZero,
    UnresolvedReference,
    AmbiguousReference,
    UnknownTable,
    SetOperationMismatch,
    MissingPartitionFilter,
    FunctionSignatureMismatch,
    UnknownFunction,
    WindowFunctionRequiresOver,
    OverClauseNotAllowed,
    WindowOrderByRequired,
    AggregateNotAllowed,
    WindowFunctionNotAllowed,
    /// Validation of the query itself failed.
    InternalError,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::LexError => "LEX_ERROR",
            RuleId::ParseError => "PARSE_ERROR",
            RuleId::MaxDepthExceeded => "MAX_DEPTH_EXCEEDED",
            RuleId::CteDuplicateName => "CTE_DUPLICATE_NAME",
            RuleId::CteForwardReference => "CTE_FORWARD_REFERENCE",
            RuleId::CteIllegalSelfReference => "CTE_ILLEGAL_SELF_REFERENCE",
            RuleId::CteInvalidRecursion => "CTE_INVALID_RECURSION",
            RuleId::TemporalTypeMismatch => "TEMPORAL_TYPE_MISMATCH",
            RuleId::ComparisonTypeMismatch => "COMPARISON_TYPE_MISMATCH",
            RuleId::OperatorTypeMismatch => "OPERATOR_TYPE_MISMATCH",
            RuleId::InvalidCast => "INVALID_CAST",
            RuleId::UnguardedDivision => "UNGUARDED_DIVISION",
            RuleId::DivisionByZero => "DIVISION_BY_ZERO",
            RuleId::UnresolvedReference => "UNRESOLVED_REFERENCE",
            RuleId::AmbiguousReference => "AMBIGUOUS_REFERENCE",
            RuleId::UnknownTable => "UNKNOWN_TABLE",
            RuleId::SetOperationMismatch => "SET_OPERATION_MISMATCH",
            RuleId::MissingPartitionFilter => "MISSING_PARTITION_FILTER",
            RuleId::FunctionSignatureMismatch => "FUNCTION_SIGNATURE_MISMATCH",
            RuleId::UnknownFunction => "UNKNOWN_FUNCTION",
            RuleId::WindowFunctionRequiresOver => "WINDOW_FUNCTION_REQUIRES_OVER",
            RuleId::OverClauseNotAllowed => "OVER_CLAUSE_NOT_ALLOWED",
            RuleId::WindowOrderByRequired => "WINDOW_ORDER_BY_REQUIRED",
            RuleId::AggregateNotAllowed => "AGGREGATE_NOT_ALLOWED",
            RuleId::WindowFunctionNotAllowed => "WINDOW_FUNCTION_NOT_ALLOWED",
            RuleId::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            RuleId::UnguardedDivision => Severity::Warning,
            RuleId::UnknownFunction => Severity::Info,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single finding, in the format shared by all passes. Positions are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub rule_id: RuleId,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Diagnostic {
    /// Creates diagnostic with the default severity of `rule_id`.
    pub fn new(rule_id: RuleId, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            rule_id,
            severity: rule_id.default_severity(),
            message: message.into(),
            line: span.line,
            column: span.column,
            length: span.length,
        }
    }
}

impl From<LexError> for Diagnostic {
    fn from(error: LexError) -> Self {
        let (line, column) = error.position();
        Diagnostic::new(RuleId::LexError, error.to_string(), Span::new(line, column, 0, 1))
    }
}

impl From<ParserError> for Diagnostic {
    fn from(error: ParserError) -> Self {
        let rule_id = match error {
            ParserError::MaxDepthExceeded { .. } => RuleId::MaxDepthExceeded,
            _ => RuleId::ParseError,
        };
        Diagnostic::new(rule_id, error.to_string(), error.span())
    }
}

impl From<CteError> for Diagnostic {
    fn from(error: CteError) -> Self {
        let rule_id = match error {
            CteError::DuplicateName { .. } => RuleId::CteDuplicateName,
            CteError::ForwardReference { .. } => RuleId::CteForwardReference,
            CteError::IllegalSelfReference { .. } => RuleId::CteIllegalSelfReference,
            CteError::InvalidRecursion { .. } => RuleId::CteInvalidRecursion,
        };
        Diagnostic::new(rule_id, error.to_string(), error.span())
    }
}

impl From<TypeDiagnostic> for Diagnostic {
    fn from(diagnostic: TypeDiagnostic) -> Self {
        let span = diagnostic.span();
        let (rule_id, message) = match diagnostic {
            TypeDiagnostic::TemporalMismatch {
                op, left, right, ..
            } => (
                RuleId::TemporalTypeMismatch,
                format!("no matching signature for operator {op} for argument types: {left}, {right}"),
            ),
            TypeDiagnostic::ComparisonMismatch {
                op, left, right, ..
            } => (
                RuleId::ComparisonTypeMismatch,
                format!("cannot compare {left} with {right} using {op}"),
            ),
            TypeDiagnostic::OperatorMismatch { op, operands, .. } => (
                RuleId::OperatorTypeMismatch,
                format!(
                    "no matching signature for operator {op} for argument types: {}",
                    operands.iter().join(", ")
                ),
            ),
            TypeDiagnostic::InvalidCast { from, to, .. } => (
                RuleId::InvalidCast,
                format!("invalid cast from {from} to {to}"),
            ),
            TypeDiagnostic::UnguardedDivision { .. } => (
                RuleId::UnguardedDivision,
                "division by a value that may be zero or NULL, use SAFE_DIVIDE or guard the denominator"
                    .to_string(),
            ),
            TypeDiagnostic::DivisionByZero { .. } => {
                (RuleId::DivisionByZero, "division by zero".to_string())
            }
            TypeDiagnostic::UnresolvedReference { name, .. } => (
                RuleId::UnresolvedReference,
                format!("unrecognized name: {name}"),
            ),
            TypeDiagnostic::AmbiguousReference {
                name, candidates, ..
            } => (
                RuleId::AmbiguousReference,
                format!(
                    "column name {name} is ambiguous, it may refer to {}",
                    candidates.iter().join(" or ")
                ),
            ),
            TypeDiagnostic::UnknownTable { name, .. } => (
                RuleId::UnknownTable,
                format!("table {name} was not found in the schema catalog"),
            ),
            TypeDiagnostic::SetOperationMismatch { reason, .. } => {
                (RuleId::SetOperationMismatch, reason)
            }
        };
        Diagnostic::new(rule_id, message, span)
    }
}

impl From<PartitionDiagnostic> for Diagnostic {
    fn from(diagnostic: PartitionDiagnostic) -> Self {
        let span = diagnostic.span();
        let PartitionDiagnostic::MissingPartitionFilter {
            table,
            partition_column,
            only_in_disjunction,
            ..
        } = diagnostic;
        let mut message = format!(
            "cannot query table {table} without a filter over column {partition_column} that can be used for partition elimination"
        );
        if only_in_disjunction {
            message.push_str(" (filters under OR do not prune partitions)");
        }
        Diagnostic::new(RuleId::MissingPartitionFilter, message, span)
    }
}

impl From<FunctionDiagnostic> for Diagnostic {
    fn from(diagnostic: FunctionDiagnostic) -> Self {
        match diagnostic {
            FunctionDiagnostic::SignatureMismatch {
                name,
                supplied_types,
                expected,
                span,
            } => Diagnostic::new(
                RuleId::FunctionSignatureMismatch,
                format!(
                    "no matching signature for function {name} for argument types: {}. Supported signatures: {}",
                    supplied_types.join(", "),
                    expected.join("; ")
                ),
                span,
            ),
            FunctionDiagnostic::UnknownFunction { name, span } => Diagnostic::new(
                RuleId::UnknownFunction,
                format!("function {name} is not known, its arguments were not checked"),
                span,
            ),
            FunctionDiagnostic::MissingOverClause { name, span } => Diagnostic::new(
                RuleId::WindowFunctionRequiresOver,
                format!("analytic function {name} requires an OVER clause"),
                span,
            ),
            FunctionDiagnostic::UnexpectedOverClause { name, span } => Diagnostic::new(
                RuleId::OverClauseNotAllowed,
                format!("function {name} does not support an OVER clause"),
                span,
            ),
            FunctionDiagnostic::MissingWindowOrder { name, span } => Diagnostic::new(
                RuleId::WindowOrderByRequired,
                format!("window ORDER BY is required for analytic function {name}"),
                span,
            ),
            FunctionDiagnostic::AggregateNotAllowed { name, clause, span } => Diagnostic::new(
                RuleId::AggregateNotAllowed,
                format!("aggregate function {name} not allowed in {clause}"),
                span,
            ),
            FunctionDiagnostic::WindowFunctionNotAllowed { name, clause, span } => Diagnostic::new(
                RuleId::WindowFunctionNotAllowed,
                format!("analytic function {name} not allowed in {clause}"),
                span,
            ),
        }
    }
}

/// Result of validating one query. `ok` is `false` iff some diagnostic has [`Severity::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Returns number of diagnostics with `rule_id`.
    pub fn count(&self, rule_id: RuleId) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.rule_id == rule_id)
            .count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Builds report with default configuration.
pub fn report(text: &str, diagnostics: Vec<Diagnostic>) -> ValidationReport {
    report_with_config(text, diagnostics, &ValidatorConfig::default())
}

/// Applies `config` rule settings, orders diagnostics by position and removes exact duplicates.
pub fn report_with_config(
    text: &str,
    diagnostics: Vec<Diagnostic>,
    config: &ValidatorConfig,
) -> ValidationReport {
    let positions = LinePositions::new(text);
    let diagnostics: Vec<Diagnostic> = diagnostics
        .into_iter()
        .filter(|d| !config.is_disabled(d.rule_id))
        .map(|mut d| {
            if let Some(severity) = config.severity_override(d.rule_id) {
                d.severity = severity;
            }
            d.line = d.line.max(1);
            d.column = d.column.max(1);
            d.length = d.length.min(positions.remaining(d.line, d.column));
            d
        })
        .sorted_by(|a, b| {
            (a.line, a.column, a.rule_id.as_str(), &a.message)
                .cmp(&(b.line, b.column, b.rule_id.as_str(), &b.message))
        })
        .dedup()
        .collect();
    let ok = diagnostics.iter().all(|d| d.severity != Severity::Error);
    ValidationReport { ok, diagnostics }
}

/// Number of characters in every line of the text, for clamping diagnostic lengths.
struct LinePositions {
    /// Characters from the start of each line to the end of the text.
    remaining_from_line_start: Vec<usize>,
}

impl LinePositions {
    fn new(text: &str) -> Self {
        let total = text.chars().count();
        let mut remaining_from_line_start = vec![total];
        for (idx, ch) in text.chars().enumerate() {
            if ch == '\n' {
                remaining_from_line_start.push(total - idx - 1);
            }
        }
        LinePositions {
            remaining_from_line_start,
        }
    }

    fn remaining(&self, line: usize, column: usize) -> usize {
        self.remaining_from_line_start
            .get(line - 1)
            .map(|rest| rest.saturating_sub(column - 1))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostic(rule_id: RuleId, line: usize, column: usize, message: &str) -> Diagnostic {
        Diagnostic::new(rule_id, message, Span::new(line, column, 0, 3))
    }

    #[test]
    fn sorts_by_position_then_rule() {
        // given
        let diagnostics = vec![
            diagnostic(RuleId::UnguardedDivision, 2, 1, "b"),
            diagnostic(RuleId::TemporalTypeMismatch, 1, 5, "a"),
            diagnostic(RuleId::MissingPartitionFilter, 1, 5, "a"),
            diagnostic(RuleId::LexError, 1, 1, "c"),
        ];

        // when
        let report = report("SELECT a\nFROM t", diagnostics);

        // then
        let rules: Vec<RuleId> = report.diagnostics.iter().map(|d| d.rule_id).collect();
        assert_eq!(
            rules,
            vec![
                RuleId::LexError,
                RuleId::MissingPartitionFilter,
                RuleId::TemporalTypeMismatch,
                RuleId::UnguardedDivision
            ]
        );
        assert!(!report.ok);
    }

    #[test]
    fn removes_exact_duplicates() {
        let diagnostics = vec![
            diagnostic(RuleId::UnresolvedReference, 1, 1, "x"),
            diagnostic(RuleId::UnresolvedReference, 1, 1, "x"),
            diagnostic(RuleId::UnresolvedReference, 1, 1, "y"),
        ];
        let report = report("SELECT x, y", diagnostics);
        assert_eq!(report.diagnostics.len(), 2);
    }

    #[test]
    fn warnings_and_infos_do_not_fail_report() {
        let report = report(
            "SELECT a / b",
            vec![
                diagnostic(RuleId::UnguardedDivision, 1, 8, "w"),
                diagnostic(RuleId::UnknownFunction, 1, 8, "i"),
            ],
        );
        assert!(report.ok);
        assert_eq!(report.diagnostics[0].severity, Severity::Warning);
        assert_eq!(report.diagnostics[1].severity, Severity::Info);
    }

    #[test]
    fn clamps_length_to_text() {
        let mut long = diagnostic(RuleId::ParseError, 2, 3, "p");
        long.length = 100;
        let report = report("SELECT 1\nFROM t", vec![long]);
        assert_eq!(report.diagnostics[0].length, 4);
    }

    #[test]
    fn applies_disabled_rules_and_severity_overrides() {
        // given
        let mut config = ValidatorConfig::default();
        config.disabled_rules.push(RuleId::UnknownFunction);
        config
            .severity_overrides
            .insert(RuleId::UnguardedDivision, Severity::Error);

        // when
        let report = report_with_config(
            "SELECT a / b",
            vec![
                diagnostic(RuleId::UnguardedDivision, 1, 8, "w"),
                diagnostic(RuleId::UnknownFunction, 1, 8, "i"),
            ],
            &config,
        );

        // then
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].severity, Severity::Error);
        assert!(!report.ok);
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let report = report(
            "SELECT a / b",
            vec![diagnostic(RuleId::UnguardedDivision, 1, 8, "w")],
        );
        let json = report.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"ok":true,"diagnostics":[{"ruleId":"UNGUARDED_DIVISION","severity":"warning","message":"w","line":1,"column":8,"length":3}]}"#
        );
    }

    #[test]
    fn converts_pass_errors() {
        let lex: Diagnostic = LexError::UnterminatedString { line: 3, column: 7 }.into();
        assert_eq!(lex.rule_id, RuleId::LexError);
        assert_eq!((lex.line, lex.column, lex.length), (3, 7, 1));

        let depth: Diagnostic = ParserError::MaxDepthExceeded {
            max_depth: 4,
            span: Span::new(1, 9, 8, 1),
        }
        .into();
        assert_eq!(depth.rule_id, RuleId::MaxDepthExceeded);

        let partition: Diagnostic = PartitionDiagnostic::MissingPartitionFilter {
            table: "p.d.orders".into(),
            partition_column: "created_at".into(),
            span: Span::new(1, 15, 14, 6),
            only_in_disjunction: true,
        }
        .into();
        assert_eq!(partition.rule_id, RuleId::MissingPartitionFilter);
        assert!(partition.message.ends_with("(filters under OR do not prune partitions)"));
    }
}
