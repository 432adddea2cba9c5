//! AST module - definition of query syntax tree nodes.

use std::fmt;

use catalog::ColumnType;

use crate::operators::{BinaryOperator, LogicalOperator, SetOperator, UnaryOperator};
use crate::tokens::Token;

/// Location of a syntax element in the query text.
///
/// `line` and `column` are 1-based, `offset` is the 0-based character offset and `length`
/// is the number of characters the element covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(line: usize, column: usize, offset: usize, length: usize) -> Self {
        Span {
            line,
            column,
            offset,
            length,
        }
    }

    pub fn from_token(token: &Token) -> Self {
        Span::new(token.line, token.column, token.offset, token.len())
    }

    /// Returns span starting at `self` and ending where `end` ends.
    pub fn to(&self, end: &Span) -> Span {
        let end_offset = (end.offset + end.length).max(self.offset + self.length);
        Span::new(self.line, self.column, self.offset, end_offset - self.offset)
    }
}

/// [`Ast`] represents parsed query text as list of statements ([`Ast::statements`]).
///
/// Every expression lives in [`Ast::nodes`] and is addressed by [`NodeId`]. Next to each node
/// the [`Ast`] keeps its [`Span`] and a type annotation slot which is filled by type inference
/// and only read by later passes.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Expression>,
    spans: Vec<Span>,
    types: Vec<Option<ColumnType>>,
    statements: Vec<Query>,
}

impl Ast {
    pub fn statements(&self) -> &[Query] {
        &self.statements
    }

    /// Returns node with `node_id`.
    pub fn node(&self, node_id: NodeId) -> &Expression {
        &self.nodes[node_id.0]
    }

    pub fn span(&self, node_id: NodeId) -> Span {
        self.spans[node_id.0]
    }

    /// Returns type inferred for `node_id`, if type inference already visited it.
    pub fn ty(&self, node_id: NodeId) -> Option<&ColumnType> {
        self.types[node_id.0].as_ref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds node to [`Ast`] and returns its id.
    pub(crate) fn add_node(&mut self, node: Expression, span: Span) -> NodeId {
        self.nodes.push(node);
        self.spans.push(span);
        self.types.push(None);
        NodeId::new(self.nodes.len() - 1)
    }

    pub(crate) fn add_statement(&mut self, statement: Query) {
        self.statements.push(statement);
    }

    pub(crate) fn set_type(&mut self, node_id: NodeId, ty: ColumnType) {
        self.types[node_id.0] = Some(ty);
    }

    /// Returns direct child expressions of `node_id`. Expressions inside sub-queries are not included.
    pub fn children(&self, node_id: NodeId) -> Vec<NodeId> {
        match self.node(node_id) {
            Expression::ColumnRef(_)
            | Expression::Literal(_)
            | Expression::Parameter(_)
            | Expression::DatePart(_)
            | Expression::Subquery(_)
            | Expression::Exists(_) => vec![],
            Expression::FieldAccess(node) => vec![node.expression_id],
            Expression::Unary(node) => vec![node.expression_id],
            Expression::Binary(node) => vec![node.left_id, node.right_id],
            Expression::Logical(node) => vec![node.left_id, node.right_id],
            Expression::IsNull(node) => vec![node.expression_id],
            Expression::InList(node) => {
                let mut children = vec![node.expression_id];
                children.extend(&node.list);
                children
            }
            Expression::InSubquery(node) => vec![node.expression_id],
            Expression::Like(node) => vec![node.expression_id, node.pattern_id],
            Expression::Between(node) => vec![node.expression_id, node.low_id, node.high_id],
            Expression::FunctionCall(node) => {
                let mut children = node.argument_ids.clone();
                children.extend(node.order_by.iter().map(|o| o.expression_id));
                if let Some(over) = &node.over {
                    children.extend(&over.partition_by);
                    children.extend(over.order_by.iter().map(|o| o.expression_id));
                    if let Some(frame) = &over.frame {
                        children.extend(frame.start.offset());
                        children.extend(frame.end.as_ref().and_then(|e| e.offset()));
                    }
                }
                children
            }
            Expression::Case(node) => {
                let mut children = Vec::new();
                children.extend(node.operand_id);
                for branch in &node.branches {
                    children.push(branch.condition_id);
                    children.push(branch.result_id);
                }
                children.extend(node.else_id);
                children
            }
            Expression::Cast(node) => vec![node.expression_id],
            Expression::Interval(node) => vec![node.value_id],
            Expression::Extract(node) => vec![node.expression_id],
            Expression::Array(node) => node.elements.clone(),
            Expression::Subscript(node) => vec![node.expression_id, node.index_id],
        }
    }

    /// Returns sub-queries directly owned by `node_id`.
    pub fn subqueries(&self, node_id: NodeId) -> Vec<&Query> {
        match self.node(node_id) {
            Expression::Subquery(query) | Expression::Exists(query) => vec![query],
            Expression::InSubquery(node) => vec![&node.query],
            _ => vec![],
        }
    }

    /// Calls `f` for `node_id` and every expression below it, parents first.
    /// Does not descend into sub-queries.
    pub fn walk_expression(&self, node_id: NodeId, f: &mut dyn FnMut(NodeId)) {
        f(node_id);
        for child in self.children(node_id) {
            self.walk_expression(child, f);
        }
    }

    /// Calls `f` for every [`Select`] reachable from `query`: CTE bodies, set operation branches,
    /// derived tables and sub-queries inside expressions.
    pub fn for_each_select<'a>(&'a self, query: &'a Query, f: &mut dyn FnMut(&'a Select)) {
        if let Some(with) = &query.with {
            for cte in &with.ctes {
                self.for_each_select(&cte.query, f);
            }
        }
        self.for_each_select_in_set_expr(&query.body, f);
        for root in query.expression_roots() {
            self.for_each_select_in_expression(root, f);
        }
    }

    /// Calls `f` for `query` and every query nested in it (CTE bodies, parenthesised
    /// set operands, derived tables and sub-queries inside expressions), outer first.
    pub fn for_each_query<'a>(&'a self, query: &'a Query, f: &mut dyn FnMut(&'a Query)) {
        f(query);
        if let Some(with) = &query.with {
            for cte in &with.ctes {
                self.for_each_query(&cte.query, f);
            }
        }
        let mut nested = Vec::new();
        self.nested_queries_in_set_expr(&query.body, &mut nested);
        for root in query.expression_roots() {
            self.walk_expression(root, &mut |id| nested.extend(self.subqueries(id)));
        }
        for query in nested {
            self.for_each_query(query, f);
        }
    }

    fn nested_queries_in_set_expr<'a>(&'a self, set_expr: &'a SetExpr, out: &mut Vec<&'a Query>) {
        match set_expr {
            SetExpr::Select(select) => {
                for table in select.tables() {
                    if let TableSource::Derived(query) = &table.source {
                        out.push(query);
                    }
                }
                for root in select.expression_roots() {
                    self.walk_expression(root, &mut |id| out.extend(self.subqueries(id)));
                }
            }
            SetExpr::SetOperation(node) => {
                self.nested_queries_in_set_expr(&node.left, out);
                self.nested_queries_in_set_expr(&node.right, out);
            }
            SetExpr::Nested(query) => out.push(query),
            SetExpr::Invalid(_) => {}
        }
    }

    fn for_each_select_in_set_expr<'a>(
        &'a self,
        set_expr: &'a SetExpr,
        f: &mut dyn FnMut(&'a Select),
    ) {
        match set_expr {
            SetExpr::Select(select) => {
                f(select);
                for table in select.tables() {
                    if let TableSource::Derived(query) = &table.source {
                        self.for_each_select(query, f);
                    }
                }
                for root in select.expression_roots() {
                    self.for_each_select_in_expression(root, f);
                }
            }
            SetExpr::SetOperation(node) => {
                self.for_each_select_in_set_expr(&node.left, f);
                self.for_each_select_in_set_expr(&node.right, f);
            }
            SetExpr::Nested(query) => self.for_each_select(query, f),
            SetExpr::Invalid(_) => {}
        }
    }

    fn for_each_select_in_expression<'a>(
        &'a self,
        node_id: NodeId,
        f: &mut dyn FnMut(&'a Select),
    ) {
        let mut nested = Vec::new();
        self.walk_expression(node_id, &mut |id| nested.extend(self.subqueries(id)));
        for query in nested {
            self.for_each_select(query, f);
        }
    }
}

/// [`NodeId`] is used for indexing nodes inside [`Ast`].
///
/// It's a wrapper around `usize` that can only be created inside `ast` ([`NodeId::new`] is private).
/// Nodes are never removed from [`Ast`], so every [`NodeId`] stays valid for the lifetime of its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    fn new(id: usize) -> Self {
        NodeId(id)
    }
}

/// Single query statement: optional `WITH`, a body and the trailing `ORDER BY`/`LIMIT` that apply to the whole body.
#[derive(Debug)]
pub struct Query {
    pub with: Option<With>,
    pub body: SetExpr,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<NodeId>,
    pub offset: Option<NodeId>,
    pub span: Span,
}

impl Query {
    /// Returns root expressions of the query-level `ORDER BY`, `LIMIT` and `OFFSET`.
    pub fn expression_roots(&self) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = self.order_by.iter().map(|o| o.expression_id).collect();
        roots.extend(self.limit);
        roots.extend(self.offset);
        roots
    }
}

#[derive(Debug)]
pub struct With {
    pub recursive: bool,
    pub ctes: Vec<CteDef>,
    pub span: Span,
}

#[derive(Debug)]
pub struct CteDef {
    pub name: String,
    /// Set for every CTE of a `WITH RECURSIVE` clause.
    pub is_recursive: bool,
    pub query: Query,
    /// Span of the CTE name in its declaration.
    pub declared_span: Span,
}

#[derive(Debug)]
pub enum SetExpr {
    Select(Box<Select>),
    SetOperation(SetOperationNode),
    Nested(Box<Query>),
    /// Body that failed to parse and was skipped during error recovery.
    Invalid(Span),
}

impl SetExpr {
    pub fn span(&self) -> Span {
        match self {
            SetExpr::Select(select) => select.span,
            SetExpr::SetOperation(node) => node.span,
            SetExpr::Nested(query) => query.span,
            SetExpr::Invalid(span) => *span,
        }
    }

    /// Returns selects that are direct operands of this set expression, without
    /// entering parenthesised queries.
    pub fn selects(&self) -> Vec<&Select> {
        match self {
            SetExpr::Select(select) => vec![select],
            SetExpr::SetOperation(node) => {
                let mut selects = node.left.selects();
                selects.extend(node.right.selects());
                selects
            }
            SetExpr::Nested(_) | SetExpr::Invalid(_) => vec![],
        }
    }
}

#[derive(Debug)]
pub struct SetOperationNode {
    pub op: SetOperator,
    pub distinct: bool,
    pub left: Box<SetExpr>,
    pub right: Box<SetExpr>,
    pub span: Span,
}

#[derive(Debug)]
pub struct Select {
    pub distinct: bool,
    pub projections: Vec<SelectItem>,
    pub from: Option<FromClause>,
    pub where_clause: Option<NodeId>,
    pub group_by: Vec<NodeId>,
    pub having: Option<NodeId>,
    pub qualify: Option<NodeId>,
    pub span: Span,
}

impl Select {
    /// Returns every table reference of the `FROM` clause, including joined ones.
    pub fn tables(&self) -> Vec<&TableRef> {
        match &self.from {
            Some(from) => std::iter::once(&from.first)
                .chain(from.joins.iter().map(|j| &j.table))
                .collect(),
            None => vec![],
        }
    }

    /// Returns root expressions of every clause of this select (projections, join
    /// conditions, `UNNEST` arguments, `WHERE`, `GROUP BY`, `HAVING`, `QUALIFY`).
    pub fn expression_roots(&self) -> Vec<NodeId> {
        let mut roots = Vec::new();
        for item in &self.projections {
            if let SelectItem::Expression { expression_id, .. } = item {
                roots.push(*expression_id);
            }
        }
        for table in self.tables() {
            if let TableSource::Unnest(id) = table.source {
                roots.push(id);
            }
        }
        if let Some(from) = &self.from {
            for join in &from.joins {
                if let JoinConstraint::On(id) = join.constraint {
                    roots.push(id);
                }
            }
        }
        roots.extend(self.where_clause);
        roots.extend(&self.group_by);
        roots.extend(self.having);
        roots.extend(self.qualify);
        roots
    }
}

#[derive(Debug)]
pub enum SelectItem {
    Expression {
        expression_id: NodeId,
        alias: Option<String>,
    },
    /// `*` or `* EXCEPT (a, b)`
    Wildcard { except: Vec<String>, span: Span },
    /// `t.*` or `t.* EXCEPT (a, b)`
    QualifiedWildcard {
        qualifier: String,
        except: Vec<String>,
        span: Span,
    },
}

#[derive(Debug)]
pub struct FromClause {
    pub first: TableRef,
    pub joins: Vec<Join>,
}

#[derive(Debug)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub constraint: JoinConstraint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    /// `CROSS JOIN` and comma joins
    Cross,
}

#[derive(Debug)]
pub enum JoinConstraint {
    On(NodeId),
    Using(Vec<String>),
    None,
}

#[derive(Debug)]
pub struct TableRef {
    pub source: TableSource,
    pub alias: Option<String>,
    pub span: Span,
}

impl TableRef {
    /// Name under which columns of this table can be qualified: alias, or the last segment of the table name.
    pub fn reference_name(&self) -> Option<&str> {
        if let Some(alias) = &self.alias {
            return Some(alias);
        }
        match &self.source {
            TableSource::Catalog(name) | TableSource::Cte(name) => name.rsplit('.').next(),
            TableSource::Derived(_) | TableSource::Unnest(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum TableSource {
    /// Table looked up in the schema catalog.
    Catalog(String),
    /// Reference to a CTE declared in an enclosing `WITH`.
    Cte(String),
    Derived(Box<Query>),
    /// `UNNEST(array_expression)`
    Unnest(NodeId),
}

#[derive(Debug, Clone)]
pub struct OrderByItem {
    pub expression_id: NodeId,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Bytes(String),
    Float(f64),
    Int(i64),
    /// Integer literal that does not fit into INT64, typed as NUMERIC.
    BigInt(String),
    Bool(bool),
    Null,
    /// `DATE '2024-01-01'`, `TIMESTAMP '...'`, `NUMERIC '1.5'`...
    Typed { ty: ColumnType, value: String },
}

#[derive(Debug)]
pub enum Expression {
    ColumnRef(ColumnRefNode),
    FieldAccess(FieldAccessNode),
    Literal(Literal),
    Parameter(String),
    Unary(UnaryExpressionNode),
    Binary(BinaryExpressionNode),
    Logical(LogicalExpressionNode),
    IsNull(IsNullNode),
    InList(InListNode),
    InSubquery(InSubqueryNode),
    Like(LikeNode),
    Between(BetweenNode),
    FunctionCall(FunctionCallNode),
    Case(CaseNode),
    Cast(CastNode),
    Interval(IntervalNode),
    Extract(ExtractNode),
    /// Date part keyword used as function argument (`DATE_TRUNC(d, MONTH)`).
    DatePart(String),
    Subquery(Box<Query>),
    Exists(Box<Query>),
    Array(ArrayNode),
    Subscript(SubscriptNode),
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::ColumnRef(node) => match &node.qualifier {
                Some(qualifier) => write!(f, "{qualifier}.{}", node.name),
                None => write!(f, "{}", node.name),
            },
            Expression::FieldAccess(node) => write!(f, "FieldAccess(.{})", node.field),
            Expression::Literal(_) => write!(f, "Literal"),
            Expression::Parameter(name) => write!(f, "@{name}"),
            Expression::Unary(_) => write!(f, "Unary"),
            Expression::Binary(_) => write!(f, "Binary"),
            Expression::Logical(_) => write!(f, "Logical"),
            Expression::IsNull(_) => write!(f, "IsNull"),
            Expression::InList(_) => write!(f, "InList"),
            Expression::InSubquery(_) => write!(f, "InSubquery"),
            Expression::Like(_) => write!(f, "Like"),
            Expression::Between(_) => write!(f, "Between"),
            Expression::FunctionCall(node) => write!(f, "{}(...)", node.name),
            Expression::Case(_) => write!(f, "Case"),
            Expression::Cast(_) => write!(f, "Cast"),
            Expression::Interval(_) => write!(f, "Interval"),
            Expression::Extract(_) => write!(f, "Extract"),
            Expression::DatePart(part) => write!(f, "{part}"),
            Expression::Subquery(_) => write!(f, "Subquery"),
            Expression::Exists(_) => write!(f, "Exists"),
            Expression::Array(_) => write!(f, "Array"),
            Expression::Subscript(_) => write!(f, "Subscript"),
        }
    }
}

#[derive(Debug)]
pub struct ColumnRefNode {
    /// Table name or alias in `t.col`.
    pub qualifier: Option<String>,
    pub name: String,
}

#[derive(Debug)]
pub struct FieldAccessNode {
    pub expression_id: NodeId,
    pub field: String,
}

#[derive(Debug)]
pub struct UnaryExpressionNode {
    pub expression_id: NodeId,
    pub op: UnaryOperator,
}

#[derive(Debug)]
pub struct BinaryExpressionNode {
    pub left_id: NodeId,
    pub right_id: NodeId,
    pub op: BinaryOperator,
}

#[derive(Debug)]
pub struct LogicalExpressionNode {
    pub left_id: NodeId,
    pub right_id: NodeId,
    pub op: LogicalOperator,
}

#[derive(Debug)]
pub struct IsNullNode {
    pub expression_id: NodeId,
    pub negated: bool,
}

#[derive(Debug)]
pub struct InListNode {
    pub expression_id: NodeId,
    pub list: Vec<NodeId>,
    pub negated: bool,
    /// `x IN UNNEST(array)`: `list` holds the single array expression.
    pub unnest: bool,
}

#[derive(Debug)]
pub struct InSubqueryNode {
    pub expression_id: NodeId,
    pub query: Box<Query>,
    pub negated: bool,
}

#[derive(Debug)]
pub struct LikeNode {
    pub expression_id: NodeId,
    pub pattern_id: NodeId,
    pub negated: bool,
}

#[derive(Debug)]
pub struct BetweenNode {
    pub expression_id: NodeId,
    pub low_id: NodeId,
    pub high_id: NodeId,
    pub negated: bool,
}

#[derive(Debug)]
pub struct FunctionCallNode {
    /// Upper-cased function name, without the `SAFE.` prefix.
    pub name: String,
    /// Called as `SAFE.name(...)`.
    pub safe: bool,
    pub argument_ids: Vec<NodeId>,
    pub distinct: bool,
    /// Called as `name(*)`.
    pub star: bool,
    /// `ORDER BY` inside the argument list (`ARRAY_AGG(x ORDER BY y)`).
    pub order_by: Vec<OrderByItem>,
    pub over: Option<OverClause>,
}

#[derive(Debug)]
pub struct OverClause {
    pub partition_by: Vec<NodeId>,
    pub order_by: Vec<OrderByItem>,
    pub frame: Option<WindowFrame>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUnits {
    Rows,
    Range,
}

#[derive(Debug)]
pub struct WindowFrame {
    pub units: FrameUnits,
    pub start: FrameBound,
    pub end: Option<FrameBound>,
}

#[derive(Debug)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(NodeId),
    CurrentRow,
    Following(NodeId),
    UnboundedFollowing,
}

impl FrameBound {
    pub fn offset(&self) -> Option<NodeId> {
        match self {
            FrameBound::Preceding(id) | FrameBound::Following(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct CaseNode {
    /// `x` in `CASE x WHEN ...`
    pub operand_id: Option<NodeId>,
    pub branches: Vec<CaseBranch>,
    pub else_id: Option<NodeId>,
}

#[derive(Debug)]
pub struct CaseBranch {
    pub condition_id: NodeId,
    pub result_id: NodeId,
}

#[derive(Debug)]
pub struct CastNode {
    pub expression_id: NodeId,
    pub target: ColumnType,
    /// `SAFE_CAST`
    pub safe: bool,
}

#[derive(Debug)]
pub struct IntervalNode {
    pub value_id: NodeId,
    /// Upper-cased date part, e.g. `DAY`.
    pub unit: String,
}

#[derive(Debug)]
pub struct ExtractNode {
    pub part: String,
    pub expression_id: NodeId,
}

#[derive(Debug)]
pub struct ArrayNode {
    pub elements: Vec<NodeId>,
}

#[derive(Debug)]
pub struct SubscriptNode {
    pub expression_id: NodeId,
    pub index_id: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_literal(ast: &mut Ast, lit: Literal) -> NodeId {
        ast.add_node(Expression::Literal(lit), Span::default())
    }

    #[test]
    fn ast_add_binary_expression() {
        // given a new AST and two literal nodes
        let mut ast = Ast::default();
        let left = add_literal(&mut ast, Literal::Int(1));
        let right = add_literal(&mut ast, Literal::Int(2));

        // when adding a binary expression
        let expr_id = ast.add_node(
            Expression::Binary(BinaryExpressionNode {
                left_id: left,
                right_id: right,
                op: BinaryOperator::Plus,
            }),
            Span::new(1, 1, 0, 5),
        );

        // then the node is present, has children and no type yet
        let Expression::Binary(node) = ast.node(expr_id) else {
            panic!("Expected BinaryExpressionNode");
        };
        assert_eq!(node.left_id, left);
        assert_eq!(ast.children(expr_id), vec![left, right]);
        assert_eq!(ast.span(expr_id).length, 5);
        assert!(ast.ty(expr_id).is_none());
    }

    #[test]
    fn ast_set_type_annotates_node() {
        let mut ast = Ast::default();
        let id = add_literal(&mut ast, Literal::Bool(true));
        ast.set_type(id, ColumnType::Bool);
        assert_eq!(ast.ty(id), Some(&ColumnType::Bool));
    }

    #[test]
    fn span_to_covers_both_spans() {
        let start = Span::new(1, 5, 4, 3);
        let end = Span::new(2, 2, 20, 4);
        assert_eq!(start.to(&end), Span::new(1, 5, 4, 20));
    }

    #[test]
    fn walk_expression_visits_parents_first() {
        let mut ast = Ast::default();
        let a = add_literal(&mut ast, Literal::Int(1));
        let b = add_literal(&mut ast, Literal::Int(2));
        let sum = ast.add_node(
            Expression::Binary(BinaryExpressionNode {
                left_id: a,
                right_id: b,
                op: BinaryOperator::Plus,
            }),
            Span::default(),
        );
        let mut visited = Vec::new();
        ast.walk_expression(sum, &mut |id| visited.push(id));
        assert_eq!(visited, vec![sum, a, b]);
    }
}
