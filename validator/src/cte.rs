//! Checks ordering and naming rules of `WITH` clauses and computes the order in which
//! CTE bodies must be analysed.

use std::collections::HashSet;

use log::{debug, trace};
use thiserror::Error;

use crate::ast::{Ast, NodeId, Query, SetExpr, Span, TableSource, With};
use crate::operators::SetOperator;

/// Problems found in a single `WITH` clause. All of them are collected, resolving never stops at the first one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CteError {
    /// Two sibling CTEs share a name.
    #[error(
        "CTE '{name}' is declared more than once (first at line {}, column {})",
        first_span.line,
        first_span.column
    )]
    DuplicateName {
        name: String,
        first_span: Span,
        second_span: Span,
    },
    /// CTE references a sibling declared after it.
    #[error("CTE '{referencing}' references CTE '{referenced}' which is declared after it")]
    ForwardReference {
        referenced: String,
        referencing: String,
        span: Span,
    },
    /// CTE references itself, but the `WITH` clause is not `RECURSIVE`.
    #[error("CTE '{name}' references itself but WITH is not RECURSIVE")]
    IllegalSelfReference { name: String, span: Span },
    /// Recursive CTE is not shaped as `base UNION ALL|DISTINCT recursive-term`.
    #[error(
        "recursive CTE '{name}' must be 'base UNION ALL recursive-term' with the self-reference only in the recursive term"
    )]
    InvalidRecursion { name: String, span: Span },
}

impl CteError {
    /// Position reported for the error.
    pub fn span(&self) -> Span {
        match self {
            CteError::DuplicateName { second_span, .. } => *second_span,
            CteError::ForwardReference { span, .. }
            | CteError::IllegalSelfReference { span, .. }
            | CteError::InvalidRecursion { span, .. } => *span,
        }
    }
}

/// Indices of a `WITH` clause's CTEs ordered so that every CTE comes after the CTEs it references.
///
/// Ties are broken by declaration order. CTEs taking part in a cycle are appended in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyOrder {
    order: Vec<usize>,
}

impl DependencyOrder {
    pub fn indices(&self) -> &[usize] {
        &self.order
    }

    /// Returns CTE names of `with` in dependency order.
    pub fn names<'a>(&self, with: &'a With) -> Vec<&'a str> {
        self.order
            .iter()
            .map(|&idx| with.ctes[idx].name.as_str())
            .collect()
    }
}

/// Resolves dependencies between CTEs of `with`. Fails with every error found.
pub fn resolve(ast: &Ast, with: &With) -> Result<DependencyOrder, Vec<CteError>> {
    let (order, errors) = CteResolver::new(ast).resolve_with(with);
    match errors.is_empty() {
        true => Ok(order),
        false => Err(errors),
    }
}

/// Reference to a CTE name found in a `FROM` clause.
#[derive(Debug)]
struct CteReference {
    name: String,
    span: Span,
}

pub struct CteResolver<'a> {
    ast: &'a Ast,
}

impl<'a> CteResolver<'a> {
    pub fn new(ast: &'a Ast) -> Self {
        CteResolver { ast }
    }

    /// Checks every `WITH` clause of every statement, including `WITH`s nested in sub-queries.
    pub fn resolve_all(&self) -> Vec<CteError> {
        let mut errors = Vec::new();
        for statement in self.ast.statements() {
            self.ast.for_each_query(statement, &mut |query| {
                if let Some(with) = &query.with {
                    errors.extend(self.resolve_with(with).1);
                }
            });
        }
        debug!("cte resolver found {} errors", errors.len());
        errors
    }

    /// Computes dependency order of `with` together with all errors found in it.
    /// The order is usable even when errors exist.
    pub fn resolve_with(&self, with: &With) -> (DependencyOrder, Vec<CteError>) {
        let mut errors = self.duplicate_names(with);
        let names: Vec<String> = with
            .ctes
            .iter()
            .map(|cte| cte.name.to_ascii_lowercase())
            .collect();
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); with.ctes.len()];

        for (idx, cte) in with.ctes.iter().enumerate() {
            let references = self.references(&cte.query);
            let mut reported = HashSet::new();
            let mut self_reference = None;
            for reference in references {
                let name = reference.name.to_ascii_lowercase();
                // earlier sibling wins, so duplicates don't turn backward references into self-references
                if let Some(target) = names[..idx].iter().position(|n| *n == name) {
                    dependencies[idx].push(target);
                } else if names[idx] == name {
                    self_reference.get_or_insert(reference.span);
                } else if let Some(offset) = names[idx + 1..].iter().position(|n| *n == name) {
                    let target = idx + 1 + offset;
                    dependencies[idx].push(target);
                    if reported.insert(target) {
                        errors.push(CteError::ForwardReference {
                            referenced: with.ctes[target].name.clone(),
                            referencing: cte.name.clone(),
                            span: reference.span,
                        });
                    }
                }
            }
            if let Some(span) = self_reference {
                trace!("CTE '{}' references itself", cte.name);
                if !cte.is_recursive {
                    errors.push(CteError::IllegalSelfReference {
                        name: cte.name.clone(),
                        span,
                    });
                } else if !self.is_valid_recursion(&cte.query, &names[idx]) {
                    errors.push(CteError::InvalidRecursion {
                        name: cte.name.clone(),
                        span,
                    });
                }
            }
        }

        let order = Self::topological_order(&dependencies);
        trace!("CTE order: {:?}", order.names(with));
        (order, errors)
    }

    fn duplicate_names(&self, with: &With) -> Vec<CteError> {
        let mut errors = Vec::new();
        for (idx, cte) in with.ctes.iter().enumerate() {
            let first = with.ctes[..idx]
                .iter()
                .find(|other| other.name.eq_ignore_ascii_case(&cte.name));
            if let Some(first) = first {
                errors.push(CteError::DuplicateName {
                    name: cte.name.clone(),
                    first_span: first.declared_span,
                    second_span: cte.declared_span,
                });
            }
        }
        errors
    }

    /// Self-reference is only allowed in the right operand of a top-level `UNION`.
    fn is_valid_recursion(&self, query: &Query, name: &str) -> bool {
        let SetExpr::SetOperation(node) = &query.body else {
            return false;
        };
        if node.op != SetOperator::Union {
            return false;
        }
        let mut base = ReferenceCollector::new(self.ast);
        base.collect_set_expr(&node.left);
        let base_is_clean = base
            .references
            .iter()
            .all(|r| !r.name.eq_ignore_ascii_case(name));
        let mut rest = ReferenceCollector::new(self.ast);
        if let Some(with) = &query.with {
            rest.shadow(with);
            for cte in &with.ctes {
                rest.collect_query(&cte.query);
            }
        }
        for root in query.expression_roots() {
            rest.collect_expression(root);
        }
        let rest_is_clean = rest
            .references
            .iter()
            .all(|r| !r.name.eq_ignore_ascii_case(name));
        base_is_clean && rest_is_clean
    }

    fn references(&self, query: &Query) -> Vec<CteReference> {
        let mut collector = ReferenceCollector::new(self.ast);
        collector.collect_query(query);
        collector.references
    }

    /// Kahn's algorithm, always picking the lowest ready index.
    fn topological_order(dependencies: &[Vec<usize>]) -> DependencyOrder {
        let count = dependencies.len();
        let mut done = vec![false; count];
        let mut order = Vec::with_capacity(count);
        while order.len() < count {
            let ready = (0..count).find(|&idx| {
                !done[idx]
                    && dependencies[idx]
                        .iter()
                        .all(|&dep| dep == idx || done[dep])
            });
            match ready {
                Some(idx) => {
                    done[idx] = true;
                    order.push(idx);
                }
                None => {
                    // cycle: append what is left in declaration order
                    order.extend((0..count).filter(|&idx| !done[idx]));
                    break;
                }
            }
        }
        DependencyOrder { order }
    }
}

/// Collects CTE references of a query, skipping names shadowed by nested `WITH` clauses.
struct ReferenceCollector<'a> {
    ast: &'a Ast,
    shadowed: Vec<String>,
    references: Vec<CteReference>,
}

impl<'a> ReferenceCollector<'a> {
    fn new(ast: &'a Ast) -> Self {
        ReferenceCollector {
            ast,
            shadowed: Vec::new(),
            references: Vec::new(),
        }
    }

    fn shadow(&mut self, with: &With) {
        self.shadowed
            .extend(with.ctes.iter().map(|cte| cte.name.to_ascii_lowercase()));
    }

    fn collect_query(&mut self, query: &Query) {
        let shadowed = self.shadowed.len();
        if let Some(with) = &query.with {
            self.shadow(with);
            for cte in &with.ctes {
                self.collect_query(&cte.query);
            }
        }
        self.collect_set_expr(&query.body);
        for root in query.expression_roots() {
            self.collect_expression(root);
        }
        self.shadowed.truncate(shadowed);
    }

    fn collect_set_expr(&mut self, set_expr: &SetExpr) {
        match set_expr {
            SetExpr::Select(select) => {
                for table in select.tables() {
                    match &table.source {
                        TableSource::Cte(name)
                            if !self.shadowed.contains(&name.to_ascii_lowercase()) =>
                        {
                            self.references.push(CteReference {
                                name: name.clone(),
                                span: table.span,
                            });
                        }
                        TableSource::Derived(query) => self.collect_query(query),
                        _ => {}
                    }
                }
                for root in select.expression_roots() {
                    self.collect_expression(root);
                }
            }
            SetExpr::SetOperation(node) => {
                self.collect_set_expr(&node.left);
                self.collect_set_expr(&node.right);
            }
            SetExpr::Nested(query) => self.collect_query(query),
            SetExpr::Invalid(_) => {}
        }
    }

    fn collect_expression(&mut self, root: NodeId) {
        let ast = self.ast;
        let mut nested = Vec::new();
        ast.walk_expression(root, &mut |id| nested.extend(ast.subqueries(id)));
        for query in nested {
            self.collect_query(query);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn parse_query(input: &str) -> Ast {
        parse(tokenize(input).unwrap()).unwrap()
    }

    fn resolve_statement(ast: &Ast) -> (DependencyOrder, Vec<CteError>) {
        let with = ast.statements()[0].with.as_ref().expect("Expected WITH clause");
        CteResolver::new(ast).resolve_with(with)
    }

    fn assert_order(ast: &Ast, order: &DependencyOrder, expected: &[&str]) {
        let with = ast.statements()[0].with.as_ref().unwrap();
        assert_eq!(order.names(with), expected);
    }

    #[test]
    fn resolves_backward_references_in_declaration_order() {
        // given
        let ast = parse_query(
            "WITH a AS (SELECT 1 AS x), b AS (SELECT * FROM a), c AS (SELECT * FROM b JOIN a USING (x)) SELECT * FROM c",
        );

        // when
        let result = resolve(&ast, ast.statements()[0].with.as_ref().unwrap());

        // then
        let order = result.unwrap();
        assert_order(&ast, &order, &["a", "b", "c"]);
    }

    #[test]
    fn reports_forward_reference_once_per_pair() {
        // given `a` references `b` twice
        let ast = parse_query(
            "WITH a AS (SELECT * FROM b JOIN b AS b2 USING (x)), b AS (SELECT 1 AS x) SELECT * FROM a",
        );

        // when
        let (order, errors) = resolve_statement(&ast);

        // then
        assert_eq!(errors.len(), 1);
        let CteError::ForwardReference {
            referenced,
            referencing,
            span,
        } = &errors[0]
        else {
            panic!("Expected ForwardReference, got {:?}", errors[0]);
        };
        assert_eq!(referenced, "b");
        assert_eq!(referencing, "a");
        assert_eq!(span.column, 26);
        // dependency still drives the order
        assert_order(&ast, &order, &["b", "a"]);
    }

    #[test]
    fn finds_references_in_nested_queries() {
        let ast = parse_query(
            "WITH a AS (SELECT x FROM t WHERE x IN (SELECT x FROM (SELECT x FROM b))), b AS (SELECT 1 AS x) SELECT * FROM a",
        );
        let (_, errors) = resolve_statement(&ast);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], CteError::ForwardReference { referenced, .. } if referenced == "b"));
    }

    #[test]
    fn nested_with_shadows_outer_names() {
        // given inner `b` shadows the later sibling `b`
        let ast = parse_query(
            "WITH a AS (WITH b AS (SELECT 2 AS x) SELECT * FROM b), b AS (SELECT 1 AS x) SELECT * FROM a",
        );

        // when
        let (_, errors) = resolve_statement(&ast);

        // then
        assert!(errors.is_empty(), "Unexpected errors: {errors:?}");
    }

    #[test]
    fn reports_duplicate_names() {
        let ast = parse_query(
            "WITH x AS (SELECT 1 AS v), X AS (SELECT 2 AS v), y AS (SELECT * FROM x) SELECT * FROM y",
        );
        let (_, errors) = resolve_statement(&ast);
        assert_eq!(errors.len(), 1);
        let CteError::DuplicateName {
            name,
            first_span,
            second_span,
        } = &errors[0]
        else {
            panic!("Expected DuplicateName, got {:?}", errors[0]);
        };
        assert_eq!(name, "X");
        assert_eq!(first_span.column, 6);
        assert_eq!(second_span.column, 28);
    }

    #[test]
    fn rejects_self_reference_without_recursive() {
        let ast = parse_query(
            "WITH r AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM r WHERE n < 5) SELECT * FROM r",
        );
        let (_, errors) = resolve_statement(&ast);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], CteError::IllegalSelfReference { name, .. } if name == "r"));
    }

    #[test]
    fn accepts_well_formed_recursion() {
        let ast = parse_query(
            "WITH RECURSIVE r AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM r WHERE n < 5) SELECT * FROM r",
        );
        let (order, errors) = resolve_statement(&ast);
        assert!(errors.is_empty(), "Unexpected errors: {errors:?}");
        assert_eq!(order.indices(), &[0]);
    }

    #[test]
    fn rejects_self_reference_in_base_case() {
        let ast = parse_query(
            "WITH RECURSIVE r AS (SELECT n FROM r UNION ALL SELECT 1 AS n) SELECT * FROM r",
        );
        let (_, errors) = resolve_statement(&ast);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], CteError::InvalidRecursion { name, .. } if name == "r"));
    }

    #[test]
    fn rejects_recursion_without_union() {
        let ast = parse_query("WITH RECURSIVE r AS (SELECT n FROM r) SELECT * FROM r");
        let (_, errors) = resolve_statement(&ast);
        assert!(matches!(&errors[..], [CteError::InvalidRecursion { .. }]));
    }

    #[test]
    fn cycles_are_appended_in_declaration_order() {
        // given a <-> b cycle and independent c
        let ast = parse_query(
            "WITH a AS (SELECT * FROM b), b AS (SELECT * FROM a), c AS (SELECT 1 AS x) SELECT * FROM c",
        );

        // when
        let (order, errors) = resolve_statement(&ast);

        // then only the forward reference is an error, the backward one is legal
        assert_eq!(errors.len(), 1);
        assert_order(&ast, &order, &["c", "a", "b"]);
    }

    #[test]
    fn resolve_all_checks_nested_with_clauses() {
        let ast = parse_query(
            "SELECT * FROM (WITH p AS (SELECT * FROM q), q AS (SELECT 1 AS x) SELECT * FROM p)",
        );
        let errors = CteResolver::new(&ast).resolve_all();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], CteError::ForwardReference { referencing, .. } if referencing == "p"));
    }
}
