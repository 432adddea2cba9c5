//! Checks that queries over tables requiring a partition filter actually bound the partition column.

use catalog::SchemaCatalog;
use log::{debug, trace};

use crate::ast::{
    Ast, Expression, Literal, LogicalExpressionNode, NodeId, Select, Span, TableSource,
};
use crate::operators::{BinaryOperator, LogicalOperator, UnaryOperator};

/// Functions that keep partition pruning when wrapped around the partition column.
const COLUMN_WRAPPERS: &[&str] = &[
    "DATE",
    "TIMESTAMP",
    "DATETIME",
    "DATE_TRUNC",
    "TIMESTAMP_TRUNC",
    "DATETIME_TRUNC",
];

/// Functions whose result is constant for the query, when their arguments are.
const BOUND_FUNCTIONS: &[&str] = &[
    "CURRENT_DATE",
    "CURRENT_TIMESTAMP",
    "CURRENT_DATETIME",
    "DATE_SUB",
    "DATE_ADD",
    "TIMESTAMP_SUB",
    "TIMESTAMP_ADD",
    "DATETIME_SUB",
    "DATETIME_ADD",
    "DATE_TRUNC",
    "TIMESTAMP_TRUNC",
    "DATETIME_TRUNC",
    "DATE",
    "TIMESTAMP",
    "DATETIME",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionDiagnostic {
    /// `table` requires a filter on `partition_column`, but the `WHERE` clause introducing it has none.
    /// `only_in_disjunction` is set when the column is filtered only under a top-level `OR`.
    MissingPartitionFilter {
        table: String,
        partition_column: String,
        span: Span,
        only_in_disjunction: bool,
    },
}

impl PartitionDiagnostic {
    pub fn span(&self) -> Span {
        match self {
            PartitionDiagnostic::MissingPartitionFilter { span, .. } => *span,
        }
    }
}

pub struct PartitionAnalyzer<'a> {
    ast: &'a Ast,
    catalog: &'a SchemaCatalog,
}

impl<'a> PartitionAnalyzer<'a> {
    pub fn new(ast: &'a Ast, catalog: &'a SchemaCatalog) -> Self {
        PartitionAnalyzer { ast, catalog }
    }

    pub fn analyze(&self) -> Vec<PartitionDiagnostic> {
        let mut diagnostics = Vec::new();
        for statement in self.ast.statements() {
            self.ast
                .for_each_select(statement, &mut |select| self.check_select(select, &mut diagnostics));
        }
        debug!("partition analyzer found {} problems", diagnostics.len());
        diagnostics
    }

    fn check_select(&self, select: &Select, diagnostics: &mut Vec<PartitionDiagnostic>) {
        let terms = select
            .where_clause
            .map(|id| self.and_terms(id))
            .unwrap_or_default();

        for table in select.tables() {
            let TableSource::Catalog(name) = &table.source else {
                continue;
            };
            let Ok(descriptor) = self.catalog.lookup(name) else {
                continue;
            };
            let Some(column) = descriptor.partition_column() else {
                continue;
            };
            if !descriptor.requires_partition_filter() {
                continue;
            }
            let column_ref = PartitionColumn {
                column,
                reference: table.reference_name(),
            };
            if terms.iter().any(|&t| self.is_partition_filter(t, &column_ref)) {
                trace!("{} is filtered on {column}", descriptor.qualified_name());
                continue;
            }
            let only_in_disjunction = terms.iter().any(|&t| {
                matches!(
                    self.ast.node(t),
                    Expression::Logical(LogicalExpressionNode {
                        op: LogicalOperator::Or,
                        ..
                    })
                ) && self.mentions(t, &column_ref)
            });
            diagnostics.push(PartitionDiagnostic::MissingPartitionFilter {
                table: descriptor.qualified_name().to_string(),
                partition_column: column.to_string(),
                span: table.span,
                only_in_disjunction,
            });
        }
    }

    /// Splits `a AND b AND c` into its terms.
    fn and_terms(&self, node_id: NodeId) -> Vec<NodeId> {
        match self.ast.node(node_id) {
            Expression::Logical(LogicalExpressionNode {
                op: LogicalOperator::And,
                left_id,
                right_id,
            }) => {
                let mut terms = self.and_terms(*left_id);
                terms.extend(self.and_terms(*right_id));
                terms
            }
            _ => vec![node_id],
        }
    }

    fn is_partition_filter(&self, term: NodeId, column: &PartitionColumn) -> bool {
        match self.ast.node(term) {
            Expression::Binary(node) if node.op.is_range_bound() => {
                (self.is_partition_ref(node.left_id, column) && self.is_bound(node.right_id))
                    || (self.is_partition_ref(node.right_id, column) && self.is_bound(node.left_id))
            }
            Expression::Between(node) if !node.negated => {
                self.is_partition_ref(node.expression_id, column)
                    && self.is_bound(node.low_id)
                    && self.is_bound(node.high_id)
            }
            _ => false,
        }
    }

    /// Returns `true` for the partition column itself or the column wrapped in a pruning-preserving function.
    fn is_partition_ref(&self, node_id: NodeId, column: &PartitionColumn) -> bool {
        match self.ast.node(node_id) {
            Expression::ColumnRef(node) => column.matches(node.qualifier.as_deref(), &node.name),
            Expression::FunctionCall(call) if COLUMN_WRAPPERS.contains(&call.name.as_str()) => call
                .argument_ids
                .first()
                .is_some_and(|&arg| self.is_partition_ref(arg, column)),
            Expression::Cast(node) => self.is_partition_ref(node.expression_id, column),
            _ => false,
        }
    }

    /// Returns `true` for expressions constant during the query: literals, parameters and
    /// date arithmetic over them.
    fn is_bound(&self, node_id: NodeId) -> bool {
        match self.ast.node(node_id) {
            Expression::Literal(literal) => !matches!(literal, Literal::Null),
            Expression::Parameter(_) | Expression::Interval(_) | Expression::DatePart(_) => true,
            Expression::FunctionCall(call) => {
                BOUND_FUNCTIONS.contains(&call.name.as_str())
                    && call.over.is_none()
                    && call.argument_ids.iter().all(|&arg| self.is_bound(arg))
            }
            Expression::Cast(node) => self.is_bound(node.expression_id),
            Expression::Binary(node) => {
                matches!(node.op, BinaryOperator::Plus | BinaryOperator::Minus)
                    && self.is_bound(node.left_id)
                    && self.is_bound(node.right_id)
            }
            Expression::Unary(node) => {
                node.op == UnaryOperator::Minus && self.is_bound(node.expression_id)
            }
            _ => false,
        }
    }

    fn mentions(&self, node_id: NodeId, column: &PartitionColumn) -> bool {
        let mut found = false;
        self.ast.walk_expression(node_id, &mut |id| {
            if let Expression::ColumnRef(node) = self.ast.node(id) {
                found |= column.matches(node.qualifier.as_deref(), &node.name);
            }
        });
        found
    }
}

/// Partition column as it may be written in the query: unqualified or qualified by the table's reference name.
struct PartitionColumn<'a> {
    column: &'a str,
    reference: Option<&'a str>,
}

impl PartitionColumn<'_> {
    fn matches(&self, qualifier: Option<&str>, name: &str) -> bool {
        name.eq_ignore_ascii_case(self.column)
            && qualifier.is_none_or(|q| self.reference.is_some_and(|r| r.eq_ignore_ascii_case(q)))
    }
}
