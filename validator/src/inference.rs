//! Type inference: resolves column references against the catalog and CTE outputs, types every
//! expression of the [`Ast`] and reports type errors found on the way.

use std::collections::{BTreeMap, HashMap, HashSet};

use catalog::{ColumnType, SchemaCatalog};
use log::{debug, trace};

use crate::ast::{
    Ast, BinaryExpressionNode, CaseNode, Expression, FunctionCallNode, JoinConstraint, Literal,
    NodeId, OrderByItem, Query, Select, SelectItem, SetExpr, SetOperationNode, Span, TableRef,
    TableSource, With,
};
use crate::cte::CteResolver;
use crate::functions::{FunctionRegistry, SuppliedArg, quotient_type};
use crate::operators::{BinaryOperator, UnaryOperator};

/// Problems found while typing expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDiagnostic {
    /// `DATE` compared with `TIMESTAMP`, or `TIMESTAMP` with `DATETIME`.
    TemporalMismatch {
        op: String,
        left: ColumnType,
        right: ColumnType,
        span: Span,
    },
    /// Comparison of two types with no common supertype.
    ComparisonMismatch {
        op: String,
        left: ColumnType,
        right: ColumnType,
        span: Span,
    },
    OperatorMismatch {
        op: String,
        operands: Vec<ColumnType>,
        span: Span,
    },
    InvalidCast {
        from: ColumnType,
        to: ColumnType,
        span: Span,
    },
    /// Division by a value that may be zero or `NULL` and is not guarded.
    UnguardedDivision { span: Span },
    DivisionByZero { span: Span },
    UnresolvedReference { name: String, span: Span },
    AmbiguousReference {
        name: String,
        candidates: Vec<String>,
        span: Span,
    },
    UnknownTable { name: String, span: Span },
    SetOperationMismatch { reason: String, span: Span },
}

impl TypeDiagnostic {
    pub fn span(&self) -> Span {
        match self {
            TypeDiagnostic::TemporalMismatch { span, .. }
            | TypeDiagnostic::ComparisonMismatch { span, .. }
            | TypeDiagnostic::OperatorMismatch { span, .. }
            | TypeDiagnostic::InvalidCast { span, .. }
            | TypeDiagnostic::UnguardedDivision { span }
            | TypeDiagnostic::DivisionByZero { span }
            | TypeDiagnostic::UnresolvedReference { span, .. }
            | TypeDiagnostic::AmbiguousReference { span, .. }
            | TypeDiagnostic::UnknownTable { span, .. }
            | TypeDiagnostic::SetOperationMismatch { span, .. } => *span,
        }
    }
}

/// Column produced by a table, CTE or sub-query.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    name: Option<String>,
    ty: ColumnType,
}

impl OutputColumn {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ty(&self) -> &ColumnType {
        &self.ty
    }
}

/// Row shape visible in a `FROM` clause.
///
/// Opaque relations have unknown columns (unknown tables, invalid or self-referencing CTEs):
/// every column looked up in them is [`ColumnType::Unknown`] and no error is reported.
#[derive(Debug, Clone)]
struct Relation {
    name: Option<String>,
    columns: Vec<OutputColumn>,
    opaque: bool,
}

impl Relation {
    fn opaque(name: Option<String>) -> Self {
        Relation {
            name,
            columns: vec![],
            opaque: true,
        }
    }

    fn column(&self, name: &str) -> Option<&OutputColumn> {
        self.columns
            .iter()
            .find(|c| c.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    fn is_named(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Default)]
struct Scope {
    relations: Vec<Relation>,
    /// Select list, visible once the projections are typed (`GROUP BY`, `HAVING`, `QUALIFY`, `ORDER BY`).
    aliases: Vec<OutputColumn>,
    aliases_visible: bool,
    /// Lower-cased `USING` columns, which are not ambiguous even though every joined table has them.
    using_columns: HashSet<String>,
}

enum Lookup {
    Found(ColumnType),
    Ambiguous(Vec<String>),
    Missing,
}

/// Walks every query of an [`Ast`] in scope order and computes a type for each expression.
pub struct TypeInference<'a> {
    ast: &'a Ast,
    catalog: &'a SchemaCatalog,
    registry: &'a FunctionRegistry,
    parameters: &'a BTreeMap<String, ColumnType>,
    types: HashMap<NodeId, ColumnType>,
    scopes: Vec<Scope>,
    /// Lower-cased CTE name to its output, innermost `WITH` last.
    ctes: Vec<HashMap<String, Relation>>,
    /// Conditions of enclosing `CASE`/`IF` expressions, used to accept guarded divisions.
    guards: Vec<NodeId>,
    diagnostics: Vec<TypeDiagnostic>,
}

impl<'a> TypeInference<'a> {
    pub fn new(
        ast: &'a Ast,
        catalog: &'a SchemaCatalog,
        parameters: &'a BTreeMap<String, ColumnType>,
    ) -> Self {
        TypeInference {
            ast,
            catalog,
            registry: FunctionRegistry::builtin(),
            parameters,
            types: HashMap::new(),
            scopes: Vec::new(),
            ctes: Vec::new(),
            guards: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Types every expression of `ast`, stores the types as annotations and returns found problems.
    pub fn infer(
        ast: &mut Ast,
        catalog: &SchemaCatalog,
        parameters: &BTreeMap<String, ColumnType>,
    ) -> Vec<TypeDiagnostic> {
        let (types, diagnostics) = TypeInference::new(ast, catalog, parameters).run();
        for (node_id, ty) in types {
            ast.set_type(node_id, ty);
        }
        diagnostics
    }

    /// Returns computed types without touching the [`Ast`].
    pub fn run(mut self) -> (HashMap<NodeId, ColumnType>, Vec<TypeDiagnostic>) {
        let ast = self.ast;
        for statement in ast.statements() {
            self.infer_query(statement);
        }
        debug!(
            "type inference typed {} nodes, found {} problems",
            self.types.len(),
            self.diagnostics.len()
        );
        (self.types, self.diagnostics)
    }

    fn infer_query(&mut self, query: &Query) -> Relation {
        if let Some(with) = &query.with {
            self.infer_with(with);
        }
        let output = match &query.body {
            SetExpr::Select(select) => self.infer_select(select, &query.order_by),
            body => {
                let output = self.infer_set_expr(body);
                if !query.order_by.is_empty() {
                    self.scopes.push(Scope {
                        relations: vec![output.clone()],
                        aliases: output.columns.clone(),
                        aliases_visible: true,
                        using_columns: HashSet::new(),
                    });
                    self.infer_order_by(&query.order_by);
                    self.scopes.pop();
                }
                output
            }
        };
        for id in query.limit.iter().chain(&query.offset) {
            self.infer_expression(*id);
        }
        if query.with.is_some() {
            self.ctes.pop();
        }
        output
    }

    /// Infers CTE bodies in dependency order and registers their outputs.
    /// Leaves the registered names on [`TypeInference::ctes`], the caller pops them.
    fn infer_with(&mut self, with: &With) {
        let mut registered = HashMap::new();
        for cte in &with.ctes {
            registered
                .entry(cte.name.to_ascii_lowercase())
                .or_insert_with(|| Relation::opaque(Some(cte.name.clone())));
        }
        self.ctes.push(registered);

        let (order, _) = CteResolver::new(self.ast).resolve_with(with);
        for &idx in order.indices() {
            let cte = &with.ctes[idx];
            let mut output = self.infer_query(&cte.query);
            output.name = Some(cte.name.clone());
            let is_first = with.ctes[..idx]
                .iter()
                .all(|other| !other.name.eq_ignore_ascii_case(&cte.name));
            if is_first && let Some(names) = self.ctes.last_mut() {
                trace!("CTE '{}' has {} columns", cte.name, output.columns.len());
                names.insert(cte.name.to_ascii_lowercase(), output);
            }
        }
    }

    fn infer_set_expr(&mut self, set_expr: &SetExpr) -> Relation {
        match set_expr {
            SetExpr::Select(select) => self.infer_select(select, &[]),
            SetExpr::SetOperation(node) => self.infer_set_operation(node),
            SetExpr::Nested(query) => self.infer_query(query),
            SetExpr::Invalid(_) => Relation::opaque(None),
        }
    }

    fn infer_set_operation(&mut self, node: &SetOperationNode) -> Relation {
        let left = self.infer_set_expr(&node.left);
        let right = self.infer_set_expr(&node.right);
        if left.opaque || right.opaque {
            return Relation::opaque(None);
        }
        if left.columns.len() != right.columns.len() {
            self.diagnostics.push(TypeDiagnostic::SetOperationMismatch {
                reason: format!(
                    "{} operands have {} and {} columns",
                    node.op,
                    left.columns.len(),
                    right.columns.len()
                ),
                span: node.span,
            });
            return left;
        }
        let mut columns = Vec::with_capacity(left.columns.len());
        for (idx, (l, r)) in left.columns.iter().zip(&right.columns).enumerate() {
            let ty = match ColumnType::coercion(&l.ty, &r.ty) {
                Some(ty) => ty,
                None => {
                    self.diagnostics.push(TypeDiagnostic::SetOperationMismatch {
                        reason: format!(
                            "column {} of {} has types {} and {}",
                            idx + 1,
                            node.op,
                            l.ty,
                            r.ty
                        ),
                        span: node.span,
                    });
                    ColumnType::Unknown
                }
            };
            columns.push(OutputColumn {
                name: l.name.clone(),
                ty,
            });
        }
        Relation {
            name: None,
            columns,
            opaque: false,
        }
    }

    fn infer_select(&mut self, select: &Select, order_by: &[OrderByItem]) -> Relation {
        self.scopes.push(Scope::default());

        if let Some(from) = &select.from {
            self.add_relation(&from.first);
            for join in &from.joins {
                self.add_relation(&join.table);
                match &join.constraint {
                    JoinConstraint::On(id) => {
                        self.infer_expression(*id);
                    }
                    JoinConstraint::Using(columns) => {
                        if let Some(scope) = self.scopes.last_mut() {
                            scope
                                .using_columns
                                .extend(columns.iter().map(|c| c.to_ascii_lowercase()));
                        }
                    }
                    JoinConstraint::None => {}
                }
            }
        }
        if let Some(id) = select.where_clause {
            self.infer_expression(id);
        }

        let mut columns = Vec::new();
        let mut opaque = false;
        for item in &select.projections {
            match item {
                SelectItem::Expression {
                    expression_id,
                    alias,
                } => {
                    let ty = self.infer_expression(*expression_id);
                    let name = alias.clone().or_else(|| self.implicit_name(*expression_id));
                    columns.push(OutputColumn { name, ty });
                }
                SelectItem::Wildcard { except, .. } => {
                    opaque |= self.expand_wildcard(None, except, &mut columns);
                }
                SelectItem::QualifiedWildcard {
                    qualifier,
                    except,
                    span,
                } => {
                    if !self.scope_has_relation(qualifier) {
                        self.diagnostics.push(TypeDiagnostic::UnresolvedReference {
                            name: format!("{qualifier}.*"),
                            span: *span,
                        });
                        opaque = true;
                        continue;
                    }
                    opaque |= self.expand_wildcard(Some(qualifier), except, &mut columns);
                }
            }
        }

        if let Some(scope) = self.scopes.last_mut() {
            scope.aliases = columns.clone();
            scope.aliases_visible = true;
        }
        for id in &select.group_by {
            self.infer_expression(*id);
        }
        for id in select.having.iter().chain(&select.qualify) {
            self.infer_expression(*id);
        }
        self.infer_order_by(order_by);

        self.scopes.pop();
        Relation {
            name: None,
            columns,
            opaque,
        }
    }

    fn infer_order_by(&mut self, order_by: &[OrderByItem]) {
        for item in order_by {
            self.infer_expression(item.expression_id);
        }
    }

    fn scope_has_relation(&self, name: &str) -> bool {
        self.scopes
            .last()
            .is_some_and(|s| s.relations.iter().any(|r| r.is_named(name)))
    }

    /// Appends columns of `*` (or `qualifier.*`) to `columns`. Returns `true` when some expanded
    /// relation is opaque.
    fn expand_wildcard(
        &self,
        qualifier: Option<&str>,
        except: &[String],
        columns: &mut Vec<OutputColumn>,
    ) -> bool {
        let Some(scope) = self.scopes.last() else {
            return false;
        };
        let mut opaque = false;
        let mut emitted_using = HashSet::new();
        let relations = scope
            .relations
            .iter()
            .filter(|r| qualifier.is_none_or(|q| r.is_named(q)));
        for relation in relations {
            opaque |= relation.opaque;
            for column in &relation.columns {
                let Some(name) = column.name.as_deref() else {
                    continue;
                };
                let lower = name.to_ascii_lowercase();
                if except.iter().any(|e| e.eq_ignore_ascii_case(name)) {
                    continue;
                }
                if qualifier.is_none()
                    && scope.using_columns.contains(&lower)
                    && !emitted_using.insert(lower)
                {
                    continue;
                }
                columns.push(column.clone());
            }
        }
        opaque
    }

    fn implicit_name(&self, node_id: NodeId) -> Option<String> {
        match self.ast.node(node_id) {
            Expression::ColumnRef(node) => Some(node.name.clone()),
            Expression::FieldAccess(node) => Some(node.field.clone()),
            _ => None,
        }
    }

    fn add_relation(&mut self, table: &TableRef) {
        let relation = self.table_relation(table);
        if let Some(scope) = self.scopes.last_mut() {
            scope.relations.push(relation);
        }
    }

    fn table_relation(&mut self, table: &TableRef) -> Relation {
        let name = table.reference_name().map(str::to_string);
        match &table.source {
            TableSource::Catalog(table_name) => match self.catalog.lookup(table_name) {
                Ok(descriptor) => Relation {
                    name,
                    columns: descriptor
                        .columns()
                        .iter()
                        .map(|c| OutputColumn {
                            name: Some(c.name().to_string()),
                            ty: c.ty().clone(),
                        })
                        .collect(),
                    opaque: false,
                },
                Err(e) => {
                    trace!("table lookup failed: {e}");
                    self.diagnostics.push(TypeDiagnostic::UnknownTable {
                        name: table_name.clone(),
                        span: table.span,
                    });
                    Relation::opaque(name)
                }
            },
            TableSource::Cte(cte_name) => {
                let key = cte_name.to_ascii_lowercase();
                let found = self.ctes.iter().rev().find_map(|names| names.get(&key));
                match found {
                    Some(relation) => Relation {
                        name,
                        ..relation.clone()
                    },
                    None => Relation::opaque(name),
                }
            }
            TableSource::Derived(query) => {
                let output = self.infer_query(query);
                Relation { name, ..output }
            }
            TableSource::Unnest(id) => {
                let element = match self.infer_expression(*id) {
                    ColumnType::Array(inner) => *inner,
                    _ => ColumnType::Unknown,
                };
                if element.is_unknown() {
                    return Relation::opaque(name);
                }
                let mut columns = Vec::new();
                match (&table.alias, &element) {
                    (Some(alias), _) => columns.push(OutputColumn {
                        name: Some(alias.clone()),
                        ty: element.clone(),
                    }),
                    (None, ColumnType::Struct(fields)) => {
                        columns.extend(fields.iter().map(|f| OutputColumn {
                            name: Some(f.name.clone()),
                            ty: f.ty.clone(),
                        }));
                    }
                    (None, _) => {}
                }
                Relation {
                    name,
                    columns,
                    opaque: false,
                }
            }
        }
    }

    /// Looks `name` up in the innermost scope that knows it, without reporting anything.
    fn lookup_column(&self, name: &str) -> Lookup {
        for scope in self.scopes.iter().rev() {
            let matches: Vec<(&Relation, &OutputColumn)> = scope
                .relations
                .iter()
                .filter_map(|r| r.column(name).map(|c| (r, c)))
                .collect();
            match matches.as_slice() {
                [(_, column)] => return Lookup::Found(column.ty.clone()),
                [(_, column), ..] if scope.using_columns.contains(&name.to_ascii_lowercase()) => {
                    return Lookup::Found(column.ty.clone());
                }
                [_, _, ..] => {
                    let candidates = matches
                        .iter()
                        .map(|(r, _)| match &r.name {
                            Some(relation) => format!("{relation}.{name}"),
                            None => name.to_string(),
                        })
                        .collect();
                    return Lookup::Ambiguous(candidates);
                }
                [] => {}
            }
            if scope.aliases_visible
                && let Some(alias) = scope
                    .aliases
                    .iter()
                    .find(|a| a.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            {
                return Lookup::Found(alias.ty.clone());
            }
            if scope.relations.iter().any(|r| r.opaque) {
                return Lookup::Found(ColumnType::Unknown);
            }
        }
        Lookup::Missing
    }

    fn resolve_column(&mut self, qualifier: Option<&str>, name: &str, span: Span) -> ColumnType {
        let Some(qualifier) = qualifier else {
            return match self.lookup_column(name) {
                Lookup::Found(ty) => ty,
                Lookup::Ambiguous(candidates) => {
                    self.diagnostics.push(TypeDiagnostic::AmbiguousReference {
                        name: name.to_string(),
                        candidates,
                        span,
                    });
                    ColumnType::Unknown
                }
                Lookup::Missing => {
                    self.diagnostics.push(TypeDiagnostic::UnresolvedReference {
                        name: name.to_string(),
                        span,
                    });
                    ColumnType::Unknown
                }
            };
        };

        let relation = self
            .scopes
            .iter()
            .rev()
            .find_map(|s| s.relations.iter().find(|r| r.is_named(qualifier)));
        if let Some(relation) = relation {
            if relation.opaque {
                return ColumnType::Unknown;
            }
            if let Some(column) = relation.column(name) {
                return column.ty.clone();
            }
            // value table such as `UNNEST(structs) AS s`, where `s.field` reads a struct field
            if let Some(field) = relation
                .column(qualifier)
                .and_then(|c| c.ty.field(name))
            {
                return field.clone();
            }
        } else {
            // `struct_column.field`
            match self.lookup_column(qualifier) {
                Lookup::Found(ColumnType::Unknown) => return ColumnType::Unknown,
                Lookup::Found(ty) => {
                    if let Some(field) = ty.field(name) {
                        return field.clone();
                    }
                    if ty == ColumnType::Json {
                        return ColumnType::Json;
                    }
                }
                Lookup::Ambiguous(candidates) => {
                    self.diagnostics.push(TypeDiagnostic::AmbiguousReference {
                        name: qualifier.to_string(),
                        candidates,
                        span,
                    });
                    return ColumnType::Unknown;
                }
                Lookup::Missing => {}
            }
        }
        self.diagnostics.push(TypeDiagnostic::UnresolvedReference {
            name: format!("{qualifier}.{name}"),
            span,
        });
        ColumnType::Unknown
    }

    /// Computes type of `node_id` and of all its children.
    fn infer_expression(&mut self, node_id: NodeId) -> ColumnType {
        let ast = self.ast;
        let span = ast.span(node_id);
        let ty = match ast.node(node_id) {
            Expression::ColumnRef(node) => {
                self.resolve_column(node.qualifier.as_deref(), &node.name, span)
            }
            Expression::FieldAccess(node) => {
                let base = self.infer_expression(node.expression_id);
                match &base {
                    ColumnType::Unknown => ColumnType::Unknown,
                    ColumnType::Json => ColumnType::Json,
                    _ => match base.field(&node.field) {
                        Some(ty) => ty.clone(),
                        None => {
                            self.diagnostics.push(TypeDiagnostic::UnresolvedReference {
                                name: format!("{}.{}", Self::render(ast, node.expression_id), node.field),
                                span,
                            });
                            ColumnType::Unknown
                        }
                    },
                }
            }
            Expression::Literal(literal) => literal_type(literal),
            Expression::Parameter(name) => self
                .parameters
                .get(name)
                .cloned()
                .unwrap_or(ColumnType::Unknown),
            Expression::Unary(node) => {
                let operand = self.infer_expression(node.expression_id);
                match node.op {
                    UnaryOperator::Not => {
                        if !matches!(operand, ColumnType::Bool | ColumnType::Unknown) {
                            self.operator_mismatch("NOT", vec![operand], span);
                        }
                        ColumnType::Bool
                    }
                    UnaryOperator::Plus | UnaryOperator::Minus => {
                        if operand.is_unknown()
                            || operand.is_numeric()
                            || operand == ColumnType::Interval
                        {
                            operand
                        } else {
                            self.operator_mismatch(&node.op.to_string(), vec![operand], span);
                            ColumnType::Unknown
                        }
                    }
                }
            }
            Expression::Binary(node) => self.infer_binary(node, span),
            Expression::Logical(node) => {
                let left = self.infer_expression(node.left_id);
                let right = self.infer_expression(node.right_id);
                let is_boolean = |ty: &ColumnType| matches!(ty, ColumnType::Bool | ColumnType::Unknown);
                if !is_boolean(&left) || !is_boolean(&right) {
                    self.operator_mismatch(&node.op.to_string(), vec![left, right], span);
                }
                ColumnType::Bool
            }
            Expression::IsNull(node) => {
                self.infer_expression(node.expression_id);
                ColumnType::Bool
            }
            Expression::InList(node) => {
                let value = self.infer_expression(node.expression_id);
                let mut reported = false;
                for &item in &node.list {
                    let item_ty = self.infer_expression(item);
                    let item_ty = match (node.unnest, item_ty) {
                        (true, ColumnType::Array(inner)) => *inner,
                        (true, _) => ColumnType::Unknown,
                        (false, ty) => ty,
                    };
                    if !reported {
                        reported = self.check_comparison(
                            "IN",
                            (node.expression_id, &value),
                            (item, &item_ty),
                            span,
                        );
                    }
                }
                ColumnType::Bool
            }
            Expression::InSubquery(node) => {
                let value = self.infer_expression(node.expression_id);
                let output = self.infer_query(&node.query);
                if let Some(column) = single_column(&output) {
                    self.check_comparison(
                        "IN",
                        (node.expression_id, &value),
                        (node_id, &column),
                        span,
                    );
                }
                ColumnType::Bool
            }
            Expression::Like(node) => {
                let value = self.infer_expression(node.expression_id);
                let pattern = self.infer_expression(node.pattern_id);
                let is_text = |ty: &ColumnType| {
                    matches!(
                        ty,
                        ColumnType::String | ColumnType::Bytes | ColumnType::Unknown
                    )
                };
                if !is_text(&value) || !is_text(&pattern) {
                    self.operator_mismatch("LIKE", vec![value, pattern], span);
                }
                ColumnType::Bool
            }
            Expression::Between(node) => {
                let value = self.infer_expression(node.expression_id);
                let low = self.infer_expression(node.low_id);
                let high = self.infer_expression(node.high_id);
                let reported =
                    self.check_comparison("BETWEEN", (node.expression_id, &value), (node.low_id, &low), span);
                if !reported {
                    self.check_comparison(
                        "BETWEEN",
                        (node.expression_id, &value),
                        (node.high_id, &high),
                        span,
                    );
                }
                ColumnType::Bool
            }
            Expression::FunctionCall(node) => self.infer_function_call(node),
            Expression::Case(node) => self.infer_case(node, span),
            Expression::Cast(node) => {
                let from = self.infer_expression(node.expression_id);
                if !is_castable(&from, &node.target) {
                    self.diagnostics.push(TypeDiagnostic::InvalidCast {
                        from,
                        to: node.target.clone(),
                        span,
                    });
                }
                node.target.clone()
            }
            Expression::Interval(node) => {
                let value = self.infer_expression(node.value_id);
                if !matches!(
                    value,
                    ColumnType::Int64 | ColumnType::String | ColumnType::Unknown
                ) {
                    self.operator_mismatch("INTERVAL", vec![value], span);
                }
                ColumnType::Interval
            }
            Expression::Extract(node) => {
                let source = self.infer_expression(node.expression_id);
                if !source.is_unknown() && !source.is_temporal() {
                    self.operator_mismatch("EXTRACT", vec![source], span);
                }
                match node.part.as_str() {
                    "DATE" => ColumnType::Date,
                    "TIME" => ColumnType::Time,
                    "DATETIME" => ColumnType::Datetime,
                    _ => ColumnType::Int64,
                }
            }
            Expression::DatePart(_) => ColumnType::Unknown,
            Expression::Subquery(query) => {
                let output = self.infer_query(query);
                single_column(&output).unwrap_or(ColumnType::Unknown)
            }
            Expression::Exists(query) => {
                self.infer_query(query);
                ColumnType::Bool
            }
            Expression::Array(node) => {
                let mut element = ColumnType::Unknown;
                let mut compatible = true;
                for &id in &node.elements {
                    let ty = self.infer_expression(id);
                    if ty.is_unknown() || !compatible {
                        continue;
                    }
                    match ColumnType::coercion(&element, &ty) {
                        Some(ColumnType::Unknown) => element = ty,
                        Some(common) => element = common,
                        None => compatible = false,
                    }
                }
                if !compatible {
                    self.operator_mismatch("ARRAY[]", vec![element.clone()], span);
                    element = ColumnType::Unknown;
                }
                ColumnType::Array(Box::new(element))
            }
            Expression::Subscript(node) => {
                let base = self.infer_expression(node.expression_id);
                self.infer_expression(node.index_id);
                match base {
                    ColumnType::Array(inner) => *inner,
                    ColumnType::Json => ColumnType::Json,
                    ColumnType::Unknown => ColumnType::Unknown,
                    other => {
                        self.operator_mismatch("[]", vec![other], span);
                        ColumnType::Unknown
                    }
                }
            }
        };
        self.types.insert(node_id, ty.clone());
        ty
    }

    fn infer_binary(&mut self, node: &BinaryExpressionNode, span: Span) -> ColumnType {
        let left = self.infer_expression(node.left_id);
        let right = self.infer_expression(node.right_id);

        if node.op.is_comparison() {
            self.check_comparison(
                &node.op.to_string(),
                (node.left_id, &left),
                (node.right_id, &right),
                span,
            );
            return ColumnType::Bool;
        }
        if node.op == BinaryOperator::Slash {
            self.check_division(node.right_id, span);
        }

        use ColumnType as C;
        let result = match (node.op, &left, &right) {
            (_, C::Unknown, _) | (_, _, C::Unknown) => Some(C::Unknown),
            (BinaryOperator::Slash, l, r) if l.is_numeric() && r.is_numeric() => {
                Some(quotient_type(l, r))
            }
            (BinaryOperator::Plus | BinaryOperator::Minus | BinaryOperator::Star, l, r)
                if l.is_numeric() && r.is_numeric() =>
            {
                ColumnType::coercion(l, r)
            }
            (BinaryOperator::Plus | BinaryOperator::Minus, t, C::Interval)
                if t.is_temporal() || *t == C::Interval =>
            {
                Some(t.clone())
            }
            (BinaryOperator::Plus, C::Interval, t) if t.is_temporal() => Some(t.clone()),
            (BinaryOperator::Plus | BinaryOperator::Minus, C::Date, C::Int64) => Some(C::Date),
            (BinaryOperator::Minus, l, r) if l == r && l.is_temporal() => Some(C::Interval),
            (BinaryOperator::Star, C::Interval, C::Int64)
            | (BinaryOperator::Star, C::Int64, C::Interval) => Some(C::Interval),
            (BinaryOperator::Concat, C::String, C::String) => Some(C::String),
            (BinaryOperator::Concat, C::Bytes, C::Bytes) => Some(C::Bytes),
            (BinaryOperator::Concat, C::Array(_), C::Array(_)) => ColumnType::coercion(&left, &right),
            _ => None,
        };
        match result {
            Some(ty) => ty,
            None => {
                self.operator_mismatch(&node.op.to_string(), vec![left, right], span);
                ColumnType::Unknown
            }
        }
    }

    fn infer_function_call(&mut self, node: &FunctionCallNode) -> ColumnType {
        let is_if = node.name == "IF";
        for (idx, &id) in node.argument_ids.iter().enumerate() {
            self.infer_expression(id);
            if is_if && idx == 0 {
                self.guards.push(id);
            }
        }
        if is_if && !node.argument_ids.is_empty() {
            self.guards.pop();
        }
        let mut window_ids: Vec<NodeId> = node.order_by.iter().map(|o| o.expression_id).collect();
        if let Some(over) = &node.over {
            window_ids.extend(&over.partition_by);
            window_ids.extend(over.order_by.iter().map(|o| o.expression_id));
            if let Some(frame) = &over.frame {
                window_ids.extend(frame.start.offset());
                window_ids.extend(frame.end.as_ref().and_then(|e| e.offset()));
            }
        }
        for id in window_ids {
            self.infer_expression(id);
        }

        let Some(spec) = self.registry.get(&node.name) else {
            return ColumnType::Unknown;
        };
        let args: Vec<SuppliedArg> = match node.star {
            true => vec![],
            false => node
                .argument_ids
                .iter()
                .map(|&id| self.supplied_arg(id))
                .collect(),
        };
        spec.resolve(&args).unwrap_or(ColumnType::Unknown)
    }

    fn supplied_arg(&self, node_id: NodeId) -> SuppliedArg {
        let mut arg = SuppliedArg::from_node(self.ast, node_id);
        arg.ty = self
            .types
            .get(&node_id)
            .cloned()
            .unwrap_or(ColumnType::Unknown);
        arg
    }

    fn infer_case(&mut self, node: &CaseNode, span: Span) -> ColumnType {
        let guards_before = self.guards.len();
        let operand = node.operand_id.map(|id| (id, self.infer_expression(id)));
        if let Some((id, _)) = operand {
            self.guards.push(id);
        }

        let mut results = Vec::new();
        for branch in &node.branches {
            let condition = self.infer_expression(branch.condition_id);
            if let Some((operand_id, operand_ty)) = &operand {
                let condition_span = self.ast.span(branch.condition_id);
                self.check_comparison(
                    "CASE",
                    (*operand_id, operand_ty),
                    (branch.condition_id, &condition),
                    condition_span,
                );
            }
            self.guards.push(branch.condition_id);
            results.push(self.infer_expression(branch.result_id));
        }
        if let Some(id) = node.else_id {
            results.push(self.infer_expression(id));
        }
        self.guards.truncate(guards_before);

        let mut common = ColumnType::Unknown;
        for ty in &results {
            match ColumnType::coercion(&common, ty) {
                Some(ColumnType::Unknown) if !ty.is_unknown() => common = ty.clone(),
                Some(ColumnType::Unknown) => {}
                Some(ty) => common = ty,
                None => {
                    self.operator_mismatch("CASE", results.clone(), span);
                    return ColumnType::Unknown;
                }
            }
        }
        common
    }

    /// Reports comparison of incompatible types. Returns `true` when something was reported.
    fn check_comparison(
        &mut self,
        op: &str,
        (left_id, left): (NodeId, &ColumnType),
        (right_id, right): (NodeId, &ColumnType),
        span: Span,
    ) -> bool {
        if left.is_unknown() || right.is_unknown() {
            return false;
        }
        let is_string_literal = |id: NodeId| {
            matches!(
                self.ast.node(id),
                Expression::Literal(Literal::String(_))
            )
        };
        if (is_string_literal(left_id) && right.is_temporal())
            || (is_string_literal(right_id) && left.is_temporal())
        {
            return false;
        }
        let diagnostic = if is_temporal_mismatch(left, right) {
            TypeDiagnostic::TemporalMismatch {
                op: op.to_string(),
                left: left.clone(),
                right: right.clone(),
                span,
            }
        } else if ColumnType::coercion(left, right).is_none() {
            TypeDiagnostic::ComparisonMismatch {
                op: op.to_string(),
                left: left.clone(),
                right: right.clone(),
                span,
            }
        } else {
            return false;
        };
        trace!("comparison mismatch: {diagnostic:?}");
        self.diagnostics.push(diagnostic);
        true
    }

    fn check_division(&mut self, denominator: NodeId, span: Span) {
        let ast = self.ast;
        match ast.node(denominator) {
            Expression::Literal(Literal::Int(0)) => {
                self.diagnostics.push(TypeDiagnostic::DivisionByZero { span });
            }
            Expression::Literal(Literal::Float(value)) if *value == 0.0 => {
                self.diagnostics.push(TypeDiagnostic::DivisionByZero { span });
            }
            Expression::Literal(_) | Expression::Case(_) => {}
            Expression::FunctionCall(call)
                if matches!(call.name.as_str(), "NULLIF" | "IF" | "SAFE_DIVIDE") => {}
            _ => {
                let key = Self::render(ast, denominator);
                let guarded = self.guards.iter().any(|&guard| {
                    let mut mentioned = false;
                    ast.walk_expression(guard, &mut |id| {
                        mentioned |= Self::render(ast, id) == key;
                    });
                    mentioned
                });
                if !guarded {
                    self.diagnostics
                        .push(TypeDiagnostic::UnguardedDivision { span });
                }
            }
        }
    }

    /// Canonical text of an expression, used to match a denominator against guard conditions.
    fn render(ast: &Ast, node_id: NodeId) -> String {
        match ast.node(node_id) {
            Expression::ColumnRef(node) => node.name.to_ascii_lowercase(),
            Expression::FieldAccess(node) => {
                format!("{}.{}", Self::render(ast, node.expression_id), node.field.to_ascii_lowercase())
            }
            Expression::Literal(literal) => format!("{literal:?}"),
            Expression::Parameter(name) => format!("@{name}"),
            Expression::Unary(node) => format!("{}({})", node.op, Self::render(ast, node.expression_id)),
            Expression::Binary(node) => format!(
                "({} {} {})",
                Self::render(ast, node.left_id),
                node.op,
                Self::render(ast, node.right_id)
            ),
            Expression::FunctionCall(node) => {
                let args: Vec<String> = node
                    .argument_ids
                    .iter()
                    .map(|&id| Self::render(ast, id))
                    .collect();
                format!("{}({})", node.name, args.join(", "))
            }
            Expression::Cast(node) => {
                format!("CAST({} AS {})", Self::render(ast, node.expression_id), node.target)
            }
            _ => format!("#{node_id:?}"),
        }
    }

    fn operator_mismatch(&mut self, op: &str, operands: Vec<ColumnType>, span: Span) {
        self.diagnostics.push(TypeDiagnostic::OperatorMismatch {
            op: op.to_string(),
            operands,
            span,
        });
    }
}

fn literal_type(literal: &Literal) -> ColumnType {
    match literal {
        Literal::String(_) => ColumnType::String,
        Literal::Bytes(_) => ColumnType::Bytes,
        Literal::Float(_) => ColumnType::Float64,
        Literal::Int(_) => ColumnType::Int64,
        Literal::BigInt(_) => ColumnType::Numeric,
        Literal::Bool(_) => ColumnType::Bool,
        Literal::Null => ColumnType::Unknown,
        Literal::Typed { ty, .. } => ty.clone(),
    }
}

fn single_column(relation: &Relation) -> Option<ColumnType> {
    match (relation.opaque, relation.columns.as_slice()) {
        (false, [column]) => Some(column.ty.clone()),
        _ => None,
    }
}

fn is_temporal_mismatch(left: &ColumnType, right: &ColumnType) -> bool {
    use ColumnType as C;
    matches!(
        (left, right),
        (C::Date, C::Timestamp)
            | (C::Timestamp, C::Date)
            | (C::Timestamp, C::Datetime)
            | (C::Datetime, C::Timestamp)
    )
}

/// Returns `true` when BigQuery accepts `CAST(from AS to)`.
pub fn is_castable(from: &ColumnType, to: &ColumnType) -> bool {
    use ColumnType as C;
    if from.is_unknown() || to.is_unknown() || from == to {
        return true;
    }
    match (from, to) {
        (l, r) if l.is_numeric() && r.is_numeric() => true,
        (C::Int64, C::Bool) | (C::Bool, C::Int64) => true,
        (C::String, C::Json) | (C::Json, _) | (C::Struct(_), _) | (_, C::Struct(_)) => false,
        (C::String, C::Array(_)) | (C::Array(_), C::String) => false,
        (C::String, _) | (_, C::String) => true,
        (C::Bytes, _) | (_, C::Bytes) => false,
        (C::Date, C::Timestamp | C::Datetime) => true,
        (C::Timestamp, C::Date | C::Datetime | C::Time) => true,
        (C::Datetime, C::Date | C::Timestamp | C::Time) => true,
        (C::Array(l), C::Array(r)) => is_castable(l, r),
        _ => false,
    }
}
