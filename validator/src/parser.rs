use std::collections::HashMap;
use std::mem;

use catalog::ColumnType;
use log::trace;
use thiserror::Error;

use crate::ast::*;
use crate::operators::{BinaryOperator, LogicalOperator, SetOperator, UnaryOperator};
use crate::tokens::{Token, TokenType};

type PrefixFn = fn(&mut Parser) -> Result<NodeId, ParserError>;

type InfixFn = fn(&mut Parser, NodeId) -> Result<NodeId, ParserError>;

/// Default limit of nested expressions and sub-queries.
///
/// Bounds both parser recursion and the height of the parsed tree, which later passes walk
/// recursively. Sized so that validation fits the 2 MiB stack of a spawned thread.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Date parts accepted as bare keywords in `INTERVAL`, `EXTRACT` and date function arguments.
const DATE_PARTS: &[&str] = &[
    "MICROSECOND",
    "MILLISECOND",
    "SECOND",
    "MINUTE",
    "HOUR",
    "DAY",
    "DAYOFWEEK",
    "DAYOFYEAR",
    "WEEK",
    "ISOWEEK",
    "MONTH",
    "QUARTER",
    "YEAR",
    "ISOYEAR",
    "DATE",
    "TIME",
    "DATETIME",
];

/// Functions whose arguments after the first one may be date parts (`DATE_TRUNC(d, MONTH)`).
const DATE_PART_FUNCTIONS: &[&str] = &[
    "DATE_TRUNC",
    "DATETIME_TRUNC",
    "TIMESTAMP_TRUNC",
    "TIME_TRUNC",
    "DATE_DIFF",
    "DATETIME_DIFF",
    "TIMESTAMP_DIFF",
    "TIME_DIFF",
    "LAST_DAY",
];

/// Type names that form typed literals when followed by a string (`DATE '2024-01-01'`).
const TYPED_LITERALS: &[&str] = &[
    "DATE",
    "DATETIME",
    "TIME",
    "TIMESTAMP",
    "NUMERIC",
    "DECIMAL",
    "BIGNUMERIC",
    "BIGDECIMAL",
    "JSON",
];

/// Functions that can be called without parentheses.
const NILADIC_FUNCTIONS: &[&str] = &[
    "CURRENT_DATE",
    "CURRENT_DATETIME",
    "CURRENT_TIME",
    "CURRENT_TIMESTAMP",
];

/// Operator precedence levels, ordered from lowest to highest.
/// Used in the Pratt parsing algorithm to decide whether to
/// continue parsing an expression or return control to the caller.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub(crate) enum Precedence {
    Lowest = 0,
    LogicalOr,      // OR
    LogicalAnd,     // AND
    LogicalNot,     // NOT
    Between,        // [NOT] BETWEEN
    Like,           // [NOT] LIKE
    In,             // [NOT] IN
    Is,             // IS [NOT] NULL
    Comparison,     // =, !=, <>, <, <=, >, >=
    Additive,       // +, -, ||
    Multiplicative, // *, /
    Unary,          // unary -, +
    Primary,        // field access, subscripts
}

/// Error for [`Parser`] related operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error(
        "unexpected token: expected {expected}, found {found} at line {}, column {}",
        span.line,
        span.column
    )]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },
    #[error(
        "unexpected token in expression: {found} at line {}, column {}",
        span.line,
        span.column
    )]
    NoParseFn { found: String, span: Span },
    #[error(
        "query nesting exceeds maximum depth of {max_depth} at line {}, column {}",
        span.line,
        span.column
    )]
    MaxDepthExceeded { max_depth: usize, span: Span },
}

impl ParserError {
    pub fn span(&self) -> Span {
        match self {
            ParserError::UnexpectedToken { span, .. }
            | ParserError::NoParseFn { span, .. }
            | ParserError::MaxDepthExceeded { span, .. } => *span,
        }
    }
}

/// Result of recovering parse: everything that could be parsed plus all errors found on the way.
#[derive(Debug)]
pub struct ParseOutcome {
    pub ast: Ast,
    pub errors: Vec<ParserError>,
}

/// Parses `tokens` and fails if any error was found.
pub fn parse(tokens: Vec<Token>) -> Result<Ast, Vec<ParserError>> {
    let outcome = Parser::new(tokens).parse_program();
    match outcome.errors.is_empty() {
        true => Ok(outcome.ast),
        false => Err(outcome.errors),
    }
}

/// Responsible for transforming a vector of [`Token`]s into an abstract syntax tree ([`Ast`]).
///
/// The parser always looks at two tokens: `curr_token` (the last consumed one) and
/// `peek_token` (the next one). Every `parse_*` function starts with its construct in
/// `peek_token` and finishes with the last token of the construct in `curr_token`.
pub(crate) struct Parser {
    tokens: Vec<Token>,
    /// Index of the token that becomes `peek_token` on the next read.
    next: usize,
    /// The ast being constructed
    ast: Ast,
    /// list of errors, filled during parsing
    errors: Vec<ParserError>,
    /// the token currently being processed
    curr_token: Token,
    /// the next token to be processed
    peek_token: Token,
    /// Names of CTEs visible at the current position, innermost `WITH` last.
    cte_scopes: Vec<Vec<String>>,
    /// Current recursion depth, see [`Parser::enter_nested`].
    depth: usize,
    max_depth: usize,
    /// Height of every expression node built so far, sub-queries included.
    heights: HashMap<NodeId, usize>,
    /// Tallest node of every query being parsed, innermost last.
    query_heights: Vec<usize>,
    /// Height of the query finished most recently.
    last_query_height: usize,
}

impl Parser {
    /// Creates a new parser over `tokens` (as produced by [`crate::lexer::tokenize`]).
    pub fn new(mut tokens: Vec<Token>) -> Parser {
        if tokens.last().is_none_or(|t| t.token_type != TokenType::EOF) {
            let (line, column, offset) = tokens
                .last()
                .map(|t| (t.line, t.column + t.len(), t.offset + t.len()))
                .unwrap_or((1, 1, 0));
            tokens.push(Token::new(TokenType::EOF, "", line, column, offset));
        }
        // `curr_token` starts as a virtual statement separator placed before the input.
        let start = Token::new(TokenType::Semicolon, "", 1, 1, 0);
        let peek = tokens[0].clone();
        Parser {
            tokens,
            next: 1,
            ast: Ast::default(),
            errors: Vec::new(),
            curr_token: start,
            peek_token: peek,
            cte_scopes: Vec::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            heights: HashMap::new(),
            query_heights: Vec::new(),
            last_query_height: 0,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Parser {
        self.max_depth = max_depth;
        self
    }

    /// Main entry point for parsing a list of `;`-separated queries.
    ///
    /// On errors, records them and recovers by skipping to the next semicolon, so every
    /// statement of the input gets a chance to be parsed. Errors inside CTE bodies are
    /// recovered at the CTE level (see [`Parser::parse_with`]).
    pub fn parse_program(mut self) -> ParseOutcome {
        loop {
            while self.peek_token.token_type == TokenType::Semicolon {
                self.read_token();
            }
            if self.peek_token.token_type == TokenType::EOF {
                break;
            }
            match self.parse_statement() {
                Err(err) => {
                    self.errors.push(err);
                    self.recover_to_semicolon();
                }
                Ok(stmt) => match self.peek_token.token_type {
                    TokenType::Semicolon | TokenType::EOF => self.ast.add_statement(stmt),
                    _ => {
                        self.errors.push(self.unexpected_token_error("';' or end of input"));
                        self.recover_to_semicolon();
                    }
                },
            }
        }
        trace!(
            "parsed {} statements, {} errors",
            self.ast.statements().len(),
            self.errors.len()
        );
        ParseOutcome {
            ast: self.ast,
            errors: self.errors,
        }
    }

    /// Skips tokens until a semicolon or EOF is reached. This allows the parser to continue parsing
    /// subsequent statements after an error instead of aborting entirely.
    fn recover_to_semicolon(&mut self) {
        while self.peek_token.token_type != TokenType::Semicolon
            && self.peek_token.token_type != TokenType::EOF
        {
            self.read_token();
        }
    }

    /// Parses top level query. Unlike nested queries, a failure in the main body keeps the
    /// already parsed `WITH` clause, so CTEs are still analysed.
    fn parse_statement(&mut self) -> Result<Query, ParserError> {
        match self.peek_token.token_type {
            TokenType::Select | TokenType::With | TokenType::LParen => {}
            _ => return Err(self.unexpected_token_error("SELECT, WITH or '('")),
        }
        let scopes = self.cte_scopes.len();
        self.enter_nested()?;
        self.query_heights.push(0);
        let result = self.parse_top_level_query();
        self.leave_query();
        self.depth -= 1;
        self.cte_scopes.truncate(scopes);
        result
    }

    fn parse_top_level_query(&mut self) -> Result<Query, ParserError> {
        let start = self.peek_span();
        let with = match self.peek_token.token_type {
            TokenType::With => Some(self.parse_with()?),
            _ => None,
        };
        let body_start = self.peek_span();
        match self.parse_query_body() {
            Ok((body, order_by, limit, offset)) => Ok(Query {
                with,
                body,
                order_by,
                limit,
                offset,
                span: start.to(&self.curr_span()),
            }),
            Err(err) if with.is_some() => {
                self.errors.push(err);
                self.recover_to_semicolon();
                let body_span = body_start.to(&self.curr_span());
                Ok(Query {
                    with,
                    body: SetExpr::Invalid(body_span),
                    order_by: vec![],
                    limit: None,
                    offset: None,
                    span: start.to(&self.curr_span()),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Parses (possibly nested) query: `[WITH ...] body [ORDER BY ...] [LIMIT n [OFFSET m]]`.
    fn parse_query(&mut self) -> Result<Query, ParserError> {
        let scopes = self.cte_scopes.len();
        self.enter_nested()?;
        self.query_heights.push(0);
        let result = self.parse_query_inner();
        self.leave_query();
        self.depth -= 1;
        self.cte_scopes.truncate(scopes);
        result
    }

    fn parse_query_inner(&mut self) -> Result<Query, ParserError> {
        let start = self.peek_span();
        let with = match self.peek_token.token_type {
            TokenType::With => Some(self.parse_with()?),
            _ => None,
        };
        let (body, order_by, limit, offset) = self.parse_query_body()?;
        Ok(Query {
            with,
            body,
            order_by,
            limit,
            offset,
            span: start.to(&self.curr_span()),
        })
    }

    #[allow(clippy::type_complexity)]
    fn parse_query_body(
        &mut self,
    ) -> Result<(SetExpr, Vec<OrderByItem>, Option<NodeId>, Option<NodeId>), ParserError> {
        let body = self.parse_set_expr()?;
        let order_by = match self.peek_token.token_type {
            TokenType::Order => self.parse_order_by()?,
            _ => vec![],
        };
        let mut limit = None;
        let mut offset = None;
        if self.peek_token.token_type == TokenType::Limit {
            self.read_token();
            limit = Some(self.parse_expression(Precedence::Lowest)?);
            if self.peek_token.token_type == TokenType::Offset {
                self.read_token();
                offset = Some(self.parse_expression(Precedence::Lowest)?);
            }
        }
        Ok((body, order_by, limit, offset))
    }

    /// Parses `WITH [RECURSIVE] name AS (query), ...`.
    ///
    /// All CTE names of the clause are collected up front, so a reference to a sibling declared
    /// later is still recognised as a CTE reference (and reported by the CTE resolver). A CTE
    /// whose body fails to parse is skipped to its closing parenthesis and kept as
    /// [`SetExpr::Invalid`], the error is recorded and parsing continues with the next CTE.
    fn parse_with(&mut self) -> Result<With, ParserError> {
        self.expect_token(TokenType::With)?;
        let start = self.curr_span();
        let recursive = match self.peek_token.token_type {
            TokenType::Recursive => {
                self.read_token();
                true
            }
            _ => false,
        };
        let names = self.scan_cte_names();
        self.cte_scopes.push(names);

        let mut ctes = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let declared_span = self.curr_span();
            self.expect_token(TokenType::As)?;
            self.expect_token(TokenType::LParen)?;
            let open_index = self.next - 2;
            let query = match self.parse_query() {
                Ok(query) => {
                    self.expect_token(TokenType::RParen)?;
                    query
                }
                Err(err) => {
                    let Some(close_index) = self.matching_paren(open_index) else {
                        return Err(err);
                    };
                    self.errors.push(err);
                    let body_start = Span::from_token(&self.tokens[open_index + 1]);
                    self.skip_to(close_index);
                    let span = body_start.to(&self.curr_span());
                    Query {
                        with: None,
                        body: SetExpr::Invalid(span),
                        order_by: vec![],
                        limit: None,
                        offset: None,
                        span,
                    }
                }
            };
            ctes.push(CteDef {
                name,
                is_recursive: recursive,
                query,
                declared_span,
            });
            if self.peek_token.token_type != TokenType::Comma {
                break;
            }
            self.read_token();
        }
        Ok(With {
            recursive,
            ctes,
            span: start.to(&self.curr_span()),
        })
    }

    /// Collects names of all CTEs declared by the `WITH` clause starting at `peek_token`.
    fn scan_cte_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut idx = self.next - 1;
        loop {
            let name = match &self.token_at(idx).token_type {
                TokenType::Ident(name) | TokenType::QuotedIdent(name) => name.clone(),
                _ => break,
            };
            if self.token_at(idx + 1).token_type != TokenType::As
                || self.token_at(idx + 2).token_type != TokenType::LParen
            {
                break;
            }
            names.push(name);
            let Some(close) = self.matching_paren(idx + 2) else {
                break;
            };
            if self.token_at(close + 1).token_type != TokenType::Comma {
                break;
            }
            idx = close + 2;
        }
        names
    }

    /// Returns index of the `)` matching the `(` at `open_index`.
    fn matching_paren(&self, open_index: usize) -> Option<usize> {
        let mut balance = 0usize;
        for (idx, token) in self.tokens.iter().enumerate().skip(open_index) {
            match token.token_type {
                TokenType::LParen => balance += 1,
                TokenType::RParen => {
                    balance = balance.saturating_sub(1);
                    if balance == 0 {
                        return Some(idx);
                    }
                }
                TokenType::EOF => return None,
                _ => {}
            }
        }
        None
    }

    /// Moves parser so that token at `index` becomes `curr_token`.
    fn skip_to(&mut self, index: usize) {
        self.curr_token = self.token_at(index).clone();
        self.peek_token = self.token_at(index + 1).clone();
        self.next = index + 2;
    }

    fn is_cte_name(&self, name: &str) -> bool {
        self.cte_scopes
            .iter()
            .any(|scope| scope.iter().any(|cte| cte.eq_ignore_ascii_case(name)))
    }

    /// Parses left-associative chain of set operations.
    fn parse_set_expr(&mut self) -> Result<SetExpr, ParserError> {
        let mut left = self.parse_set_operand()?;
        let mut height = 0;
        loop {
            let op = match self.peek_token.token_type {
                TokenType::Union => SetOperator::Union,
                TokenType::Intersect => SetOperator::Intersect,
                TokenType::Except => SetOperator::Except,
                _ => break,
            };
            self.read_token();
            let distinct = match self.peek_token.token_type {
                TokenType::All => false,
                TokenType::Distinct => true,
                _ => return Err(self.unexpected_token_error("ALL or DISTINCT")),
            };
            self.read_token();
            let right = self.parse_set_operand()?;
            // Set operations nest to the left, each one adds a level.
            height += 1;
            if self.depth + height > self.max_depth {
                return Err(ParserError::MaxDepthExceeded {
                    max_depth: self.max_depth,
                    span: self.curr_span(),
                });
            }
            if let Some(query_height) = self.query_heights.last_mut() {
                *query_height = (*query_height).max(height);
            }
            let span = left.span().to(&right.span());
            left = SetExpr::SetOperation(SetOperationNode {
                op,
                distinct,
                left: Box::new(left),
                right: Box::new(right),
                span,
            });
        }
        Ok(left)
    }

    fn parse_set_operand(&mut self) -> Result<SetExpr, ParserError> {
        match self.peek_token.token_type {
            TokenType::Select => Ok(SetExpr::Select(Box::new(self.parse_select()?))),
            TokenType::LParen => {
                self.read_token();
                let query = self.parse_query()?;
                self.expect_token(TokenType::RParen)?;
                Ok(SetExpr::Nested(Box::new(query)))
            }
            _ => Err(self.unexpected_token_error("SELECT or '('")),
        }
    }

    /// Parses a SELECT:
    ///
    /// Syntax:
    /// `SELECT [DISTINCT] <items> [FROM ...] [WHERE ...] [GROUP BY ...] [HAVING ...] [QUALIFY ...]`
    fn parse_select(&mut self) -> Result<Select, ParserError> {
        self.expect_token(TokenType::Select)?;
        let start = self.curr_span();
        let distinct = match self.peek_token.token_type {
            TokenType::Distinct => {
                self.read_token();
                true
            }
            TokenType::All => {
                self.read_token();
                false
            }
            _ => false,
        };
        // `SELECT AS STRUCT` / `SELECT AS VALUE`
        if self.peek_token.token_type == TokenType::As
            && matches!(&self.token_after_peek().token_type, TokenType::Ident(s) if s.eq_ignore_ascii_case("STRUCT") || s.eq_ignore_ascii_case("VALUE"))
        {
            self.read_token();
            self.read_token();
        }
        let projections = self.parse_select_items()?;
        let from = match self.peek_token.token_type {
            TokenType::From => {
                self.read_token();
                Some(self.parse_from()?)
            }
            _ => None,
        };
        let where_clause = self.parse_optional_clause(TokenType::Where)?;
        let group_by = match self.peek_token.token_type {
            TokenType::Group => {
                self.read_token();
                self.expect_token(TokenType::By)?;
                self.parse_expression_list()?
            }
            _ => vec![],
        };
        let having = self.parse_optional_clause(TokenType::Having)?;
        let qualify = self.parse_optional_clause(TokenType::Qualify)?;
        Ok(Select {
            distinct,
            projections,
            from,
            where_clause,
            group_by,
            having,
            qualify,
            span: start.to(&self.curr_span()),
        })
    }

    /// Parses `<keyword> <expression>` if `peek_token` is `keyword`.
    fn parse_optional_clause(&mut self, keyword: TokenType) -> Result<Option<NodeId>, ParserError> {
        if self.peek_token.token_type != keyword {
            return Ok(None);
        }
        self.read_token();
        Ok(Some(self.parse_expression(Precedence::Lowest)?))
    }

    fn parse_select_items(&mut self) -> Result<Vec<SelectItem>, ParserError> {
        let mut items = vec![self.parse_select_item()?];
        while self.peek_token.token_type == TokenType::Comma {
            self.read_token();
            // trailing comma before FROM is allowed
            if self.peek_token.token_type == TokenType::From {
                break;
            }
            items.push(self.parse_select_item()?);
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem, ParserError> {
        if self.peek_token.token_type == TokenType::Star {
            self.read_token();
            let start = self.curr_span();
            let except = self.parse_except_columns()?;
            return Ok(SelectItem::Wildcard {
                except,
                span: start.to(&self.curr_span()),
            });
        }
        let is_qualified_wildcard = matches!(
            self.peek_token.token_type,
            TokenType::Ident(_) | TokenType::QuotedIdent(_)
        ) && self.token_after_peek().token_type == TokenType::Dot
            && self.token_at(self.next + 1).token_type == TokenType::Star;
        if is_qualified_wildcard {
            let qualifier = self.expect_ident()?;
            let start = self.curr_span();
            self.read_token();
            self.read_token();
            let except = self.parse_except_columns()?;
            return Ok(SelectItem::QualifiedWildcard {
                qualifier,
                except,
                span: start.to(&self.curr_span()),
            });
        }
        let expression_id = self.parse_expression(Precedence::Lowest)?;
        let alias = self.parse_alias()?;
        Ok(SelectItem::Expression {
            expression_id,
            alias,
        })
    }

    /// Parses optional `EXCEPT (col, ...)` after a wildcard.
    fn parse_except_columns(&mut self) -> Result<Vec<String>, ParserError> {
        if self.peek_token.token_type != TokenType::Except
            || self.token_after_peek().token_type != TokenType::LParen
        {
            return Ok(vec![]);
        }
        self.read_token();
        self.parse_ident_list()
    }

    /// Parses `(ident, ident, ...)`.
    fn parse_ident_list(&mut self) -> Result<Vec<String>, ParserError> {
        self.expect_token(TokenType::LParen)?;
        let mut idents = vec![self.expect_ident()?];
        while self.peek_token.token_type == TokenType::Comma {
            self.read_token();
            idents.push(self.expect_ident()?);
        }
        self.expect_token(TokenType::RParen)?;
        Ok(idents)
    }

    /// Parses `[AS] alias`.
    fn parse_alias(&mut self) -> Result<Option<String>, ParserError> {
        match self.peek_token.token_type {
            TokenType::As => {
                self.read_token();
                Ok(Some(self.expect_ident()?))
            }
            TokenType::Ident(_) | TokenType::QuotedIdent(_) => Ok(Some(self.expect_ident()?)),
            _ => Ok(None),
        }
    }

    fn parse_from(&mut self) -> Result<FromClause, ParserError> {
        let first = self.parse_table_ref()?;
        let mut joins = Vec::new();
        loop {
            let kind = match self.peek_token.token_type {
                TokenType::Comma => {
                    self.read_token();
                    let table = self.parse_table_ref()?;
                    joins.push(Join {
                        kind: JoinKind::Cross,
                        table,
                        constraint: JoinConstraint::None,
                    });
                    continue;
                }
                TokenType::Join => JoinKind::Inner,
                TokenType::Inner => {
                    self.read_token();
                    JoinKind::Inner
                }
                TokenType::Cross => {
                    self.read_token();
                    JoinKind::Cross
                }
                TokenType::Left | TokenType::Right | TokenType::Full => {
                    let kind = match self.peek_token.token_type {
                        TokenType::Left => JoinKind::Left,
                        TokenType::Right => JoinKind::Right,
                        _ => JoinKind::Full,
                    };
                    self.read_token();
                    if self.peek_token.token_type == TokenType::Outer {
                        self.read_token();
                    }
                    kind
                }
                _ => break,
            };
            self.expect_token(TokenType::Join)?;
            let table = self.parse_table_ref()?;
            let constraint = match self.peek_token.token_type {
                TokenType::On => {
                    self.read_token();
                    JoinConstraint::On(self.parse_expression(Precedence::Lowest)?)
                }
                TokenType::Using => {
                    self.read_token();
                    JoinConstraint::Using(self.parse_ident_list()?)
                }
                _ => JoinConstraint::None,
            };
            joins.push(Join {
                kind,
                table,
                constraint,
            });
        }
        Ok(FromClause { first, joins })
    }

    /// Parses single `FROM` item: table name, `(query)` or `UNNEST(expr)`, with optional alias.
    fn parse_table_ref(&mut self) -> Result<TableRef, ParserError> {
        let start = self.peek_span();
        let source = match self.peek_token.token_type.clone() {
            TokenType::LParen => {
                self.read_token();
                let query = self.parse_query()?;
                self.expect_token(TokenType::RParen)?;
                TableSource::Derived(Box::new(query))
            }
            TokenType::Ident(name)
                if name.eq_ignore_ascii_case("UNNEST")
                    && self.token_after_peek().token_type == TokenType::LParen =>
            {
                self.read_token();
                self.read_token();
                let array = self.parse_expression(Precedence::Lowest)?;
                self.expect_token(TokenType::RParen)?;
                TableSource::Unnest(array)
            }
            TokenType::Ident(_) | TokenType::QuotedIdent(_) => {
                let mut segments = vec![self.expect_ident()?];
                while self.peek_token.token_type == TokenType::Dot {
                    self.read_token();
                    segments.push(self.expect_ident()?);
                }
                let name = segments.join(".");
                match segments.len() == 1 && self.is_cte_name(&name) {
                    true => TableSource::Cte(name),
                    false => TableSource::Catalog(name),
                }
            }
            _ => return Err(self.unexpected_token_error("table name, '(' or UNNEST")),
        };
        let alias = self.parse_alias()?;
        Ok(TableRef {
            source,
            alias,
            span: start.to(&self.curr_span()),
        })
    }

    /// Parses `ORDER BY expr [ASC|DESC] [NULLS FIRST|LAST], ...`.
    fn parse_order_by(&mut self) -> Result<Vec<OrderByItem>, ParserError> {
        self.expect_token(TokenType::Order)?;
        self.expect_token(TokenType::By)?;
        let mut items = Vec::new();
        loop {
            let expression_id = self.parse_expression(Precedence::Lowest)?;
            let descending = match self.peek_token.token_type {
                TokenType::Asc => {
                    self.read_token();
                    false
                }
                TokenType::Desc => {
                    self.read_token();
                    true
                }
                _ => false,
            };
            if self.peek_ident_is("NULLS") {
                self.read_token();
                if !(self.peek_ident_is("FIRST") || self.peek_ident_is("LAST")) {
                    return Err(self.unexpected_token_error("FIRST or LAST"));
                }
                self.read_token();
            }
            items.push(OrderByItem {
                expression_id,
                descending,
            });
            if self.peek_token.token_type != TokenType::Comma {
                return Ok(items);
            }
            self.read_token();
        }
    }

    fn parse_expression_list(&mut self) -> Result<Vec<NodeId>, ParserError> {
        let mut list = vec![self.parse_expression(Precedence::Lowest)?];
        while self.peek_token.token_type == TokenType::Comma {
            self.read_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }
        Ok(list)
    }

    /// Gets the correct prefix parsing function based on `token_type`.
    ///
    /// Can fail if there exists no prefix function for the given `token_type`
    fn prefix_function(&self, token_type: &TokenType) -> Result<PrefixFn, ParserError> {
        match token_type {
            TokenType::Minus => Ok(|p| p.parse_unary_op(UnaryOperator::Minus, Precedence::Unary)),
            TokenType::Plus => Ok(|p| p.parse_unary_op(UnaryOperator::Plus, Precedence::Unary)),
            TokenType::Not => Ok(|p| p.parse_unary_op(UnaryOperator::Not, Precedence::LogicalNot)),
            TokenType::Ident(_) => Ok(Self::parse_prefix_ident),
            TokenType::QuotedIdent(_) => Ok(Self::parse_prefix_quoted_ident),
            keyword
                if keyword.is_function_keyword()
                    && self.peek_token.token_type == TokenType::LParen =>
            {
                Ok(Self::parse_prefix_keyword_function)
            }
            TokenType::Int(_)
            | TokenType::BigInt(_)
            | TokenType::Float(_)
            | TokenType::String(_)
            | TokenType::Bytes(_)
            | TokenType::True
            | TokenType::False
            | TokenType::Null => Ok(Self::parse_prefix_literal),
            TokenType::Parameter(_) => Ok(Self::parse_prefix_parameter),
            TokenType::LParen => Ok(Self::parse_grouped_expression),
            TokenType::LBracket => Ok(Self::parse_array_literal),
            TokenType::Case => Ok(Self::parse_case),
            TokenType::Cast | TokenType::SafeCast => Ok(Self::parse_cast),
            TokenType::Extract => Ok(Self::parse_extract),
            TokenType::Interval => Ok(Self::parse_interval),
            TokenType::Exists => Ok(Self::parse_exists),
            _ => Err(ParserError::NoParseFn {
                found: token_type.to_string(),
                span: self.curr_span(),
            }),
        }
    }

    /// Parses a unary expression: `-x`, `+x`, or `NOT x` with operator `unary_op`.
    fn parse_unary_op(
        &mut self,
        unary_op: UnaryOperator,
        precedence: Precedence,
    ) -> Result<NodeId, ParserError> {
        let start = self.curr_span();
        let expression_id = self.parse_expression(precedence)?;
        let expression = Expression::Unary(UnaryExpressionNode {
            op: unary_op,
            expression_id,
        });
        self.add_node(expression, start)
    }

    /// Parses an identifier in expression position: typed literal (`DATE '2024-01-01'`), niladic
    /// function (`CURRENT_DATE`), function call (`f(...)`, `SAFE.f(...)`) or column reference
    /// (`col`, `t.col`, `t.col.field`).
    fn parse_prefix_ident(&mut self) -> Result<NodeId, ParserError> {
        let TokenType::Ident(ident) = self.curr_token.token_type.clone() else {
            return Err(self.unexpected_token_error("identifier"));
        };
        let start = self.curr_span();
        let upper = ident.to_ascii_uppercase();

        if let TokenType::String(value) = &self.peek_token.token_type
            && TYPED_LITERALS.contains(&upper.as_str())
        {
            let value = value.clone();
            self.read_token();
            let ty = ColumnType::from_name(&upper).unwrap_or(ColumnType::Unknown);
            return self.add_node(Expression::Literal(Literal::Typed { ty, value }), start);
        }
        if self.peek_token.token_type == TokenType::LParen {
            return self.parse_function_call(upper, false, start);
        }
        if NILADIC_FUNCTIONS.contains(&upper.as_str()) {
            let node = Expression::FunctionCall(FunctionCallNode {
                name: upper,
                safe: false,
                argument_ids: vec![],
                distinct: false,
                star: false,
                order_by: vec![],
                over: None,
            });
            return self.add_node(node, start);
        }
        if upper == "ARRAY" && self.peek_token.token_type == TokenType::LBracket {
            self.read_token();
            return self.parse_array_elements(start);
        }
        let safe_call = upper == "SAFE"
            && self.peek_token.token_type == TokenType::Dot
            && matches!(self.token_after_peek().token_type, TokenType::Ident(_))
            && self.token_at(self.next + 1).token_type == TokenType::LParen;
        if safe_call {
            self.read_token();
            let name = self.expect_ident()?.to_ascii_uppercase();
            return self.parse_function_call(name, true, start);
        }
        self.parse_column_path(ident, start)
    }

    fn parse_prefix_quoted_ident(&mut self) -> Result<NodeId, ParserError> {
        let TokenType::QuotedIdent(ident) = self.curr_token.token_type.clone() else {
            return Err(self.unexpected_token_error("identifier"));
        };
        let start = self.curr_span();
        self.parse_column_path(ident, start)
    }

    /// Parses `first.second.third...` into a column reference followed by field accesses.
    /// Dotted names followed by `(` are function calls (`NET.HOST(x)`).
    fn parse_column_path(&mut self, first: String, start: Span) -> Result<NodeId, ParserError> {
        let mut segments = vec![first];
        while self.peek_token.token_type == TokenType::Dot
            && matches!(
                self.token_after_peek().token_type,
                TokenType::Ident(_) | TokenType::QuotedIdent(_)
            )
        {
            self.read_token();
            segments.push(self.expect_ident()?);
        }
        if segments.len() > 1 && self.peek_token.token_type == TokenType::LParen {
            let name = segments.join(".").to_ascii_uppercase();
            return self.parse_function_call(name, false, start);
        }

        let mut segments = segments.into_iter();
        let first = segments.next().unwrap_or_default();
        let column = match segments.next() {
            Some(name) => ColumnRefNode {
                qualifier: Some(first),
                name,
            },
            None => ColumnRefNode {
                qualifier: None,
                name: first,
            },
        };
        let mut node_id = self.add_node(Expression::ColumnRef(column), start)?;
        for field in segments {
            node_id = self.add_node(
                Expression::FieldAccess(FieldAccessNode {
                    expression_id: node_id,
                    field,
                }),
                start,
            )?;
        }
        Ok(node_id)
    }

    /// Parses `LEFT(...)` / `RIGHT(...)` where the keyword is used as a function name.
    fn parse_prefix_keyword_function(&mut self) -> Result<NodeId, ParserError> {
        let start = self.curr_span();
        let name = self.curr_token.token_type.to_string();
        self.parse_function_call(name, false, start)
    }

    fn parse_prefix_literal(&mut self) -> Result<NodeId, ParserError> {
        let literal = match &self.curr_token.token_type {
            TokenType::Int(value) => Literal::Int(*value),
            TokenType::BigInt(value) => Literal::BigInt(value.clone()),
            TokenType::Float(value) => Literal::Float(*value),
            TokenType::String(value) => Literal::String(value.clone()),
            TokenType::Bytes(value) => Literal::Bytes(value.clone()),
            TokenType::True => Literal::Bool(true),
            TokenType::False => Literal::Bool(false),
            TokenType::Null => Literal::Null,
            _ => return Err(self.unexpected_token_error("literal")),
        };
        let span = self.curr_span();
        self.add_node(Expression::Literal(literal), span)
    }

    fn parse_prefix_parameter(&mut self) -> Result<NodeId, ParserError> {
        let TokenType::Parameter(name) = self.curr_token.token_type.clone() else {
            return Err(self.unexpected_token_error("parameter"));
        };
        let span = self.curr_span();
        self.add_node(Expression::Parameter(name), span)
    }

    /// Parses an expression enclosed in parentheses: `( ... )`, or a scalar sub-query `(SELECT ...)`.
    fn parse_grouped_expression(&mut self) -> Result<NodeId, ParserError> {
        let start = self.curr_span();
        if matches!(
            self.peek_token.token_type,
            TokenType::Select | TokenType::With
        ) {
            let query = self.parse_query()?;
            self.expect_token(TokenType::RParen)?;
            return self.add_node(Expression::Subquery(Box::new(query)), start);
        }
        // We use the lowest precedence here, because we want to parse anything inside the parentheses
        let expression_id = self.parse_expression(Precedence::Lowest)?;
        self.expect_token(TokenType::RParen)?;
        Ok(expression_id)
    }

    fn parse_array_literal(&mut self) -> Result<NodeId, ParserError> {
        let start = self.curr_span();
        self.parse_array_elements(start)
    }

    /// Parses elements of array literal, `curr_token` is the opening bracket.
    fn parse_array_elements(&mut self, start: Span) -> Result<NodeId, ParserError> {
        let elements = match self.peek_token.token_type {
            TokenType::RBracket => vec![],
            _ => self.parse_expression_list()?,
        };
        self.expect_token(TokenType::RBracket)?;
        self.add_node(Expression::Array(ArrayNode { elements }), start)
    }

    /// Parses `CASE [operand] WHEN cond THEN result ... [ELSE result] END`.
    fn parse_case(&mut self) -> Result<NodeId, ParserError> {
        let start = self.curr_span();
        let operand_id = match self.peek_token.token_type {
            TokenType::When => None,
            _ => Some(self.parse_expression(Precedence::Lowest)?),
        };
        let mut branches = Vec::new();
        while self.peek_token.token_type == TokenType::When {
            self.read_token();
            let condition_id = self.parse_expression(Precedence::Lowest)?;
            self.expect_token(TokenType::Then)?;
            let result_id = self.parse_expression(Precedence::Lowest)?;
            branches.push(CaseBranch {
                condition_id,
                result_id,
            });
        }
        if branches.is_empty() {
            return Err(self.unexpected_token_error("WHEN"));
        }
        let else_id = match self.peek_token.token_type {
            TokenType::Else => {
                self.read_token();
                Some(self.parse_expression(Precedence::Lowest)?)
            }
            _ => None,
        };
        self.expect_token(TokenType::End)?;
        let node = Expression::Case(CaseNode {
            operand_id,
            branches,
            else_id,
        });
        self.add_node(node, start)
    }

    /// Parses `CAST(expr AS type)` and `SAFE_CAST(expr AS type)`.
    fn parse_cast(&mut self) -> Result<NodeId, ParserError> {
        let start = self.curr_span();
        let safe = self.curr_token.token_type == TokenType::SafeCast;
        self.expect_token(TokenType::LParen)?;
        let expression_id = self.parse_expression(Precedence::Lowest)?;
        self.expect_token(TokenType::As)?;
        let target = self.parse_type()?;
        self.expect_token(TokenType::RParen)?;
        let node = Expression::Cast(CastNode {
            expression_id,
            target,
            safe,
        });
        self.add_node(node, start)
    }

    /// Parses type name up to the closing parenthesis of the enclosing call
    /// (`INT64`, `NUMERIC(10, 2)`, `ARRAY<STRUCT<a INT64>>`).
    fn parse_type(&mut self) -> Result<ColumnType, ParserError> {
        let start = self.peek_span();
        let mut text = String::new();
        let mut balance = 0usize;
        loop {
            match self.peek_token.token_type {
                TokenType::RParen if balance == 0 => break,
                TokenType::EOF | TokenType::Semicolon => break,
                TokenType::LParen => balance += 1,
                TokenType::RParen => balance -= 1,
                _ => {}
            }
            self.read_token();
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&self.curr_token.lexeme);
        }
        text.parse::<ColumnType>()
            .map_err(|_| ParserError::UnexpectedToken {
                expected: "type name".into(),
                found: match text.is_empty() {
                    true => self.peek_token.token_type.to_string(),
                    false => format!("`{text}`"),
                },
                span: start.to(&self.curr_span()),
            })
    }

    /// Parses `EXTRACT(part FROM expr)`.
    fn parse_extract(&mut self) -> Result<NodeId, ParserError> {
        let start = self.curr_span();
        self.expect_token(TokenType::LParen)?;
        let part = self.parse_date_part_name()?;
        self.expect_token(TokenType::From)?;
        let expression_id = self.parse_expression(Precedence::Lowest)?;
        // `AT TIME ZONE 'tz'`
        if self.peek_ident_is("AT") {
            self.read_token();
            self.expect_ident()?;
            self.expect_ident()?;
            self.parse_expression(Precedence::Lowest)?;
        }
        self.expect_token(TokenType::RParen)?;
        let node = Expression::Extract(ExtractNode {
            part,
            expression_id,
        });
        self.add_node(node, start)
    }

    /// Parses date part name such as `DAY` or `WEEK(MONDAY)`.
    fn parse_date_part_name(&mut self) -> Result<String, ParserError> {
        let part = self.expect_ident()?.to_ascii_uppercase();
        if !DATE_PARTS.contains(&part.as_str()) {
            return Err(ParserError::UnexpectedToken {
                expected: "date part".into(),
                found: format!("identifier `{part}`"),
                span: self.curr_span(),
            });
        }
        if part == "WEEK" && self.peek_token.token_type == TokenType::LParen {
            self.read_token();
            let weekday = self.expect_ident()?.to_ascii_uppercase();
            self.expect_token(TokenType::RParen)?;
            return Ok(format!("{part}({weekday})"));
        }
        Ok(part)
    }

    /// Parses `INTERVAL value unit [TO unit]`.
    fn parse_interval(&mut self) -> Result<NodeId, ParserError> {
        let start = self.curr_span();
        let value_id = self.parse_expression(Precedence::Unary)?;
        let mut unit = self.parse_date_part_name()?;
        if self.peek_ident_is("TO") {
            self.read_token();
            let to = self.parse_date_part_name()?;
            unit = format!("{unit} TO {to}");
        }
        let node = Expression::Interval(IntervalNode { value_id, unit });
        self.add_node(node, start)
    }

    fn parse_exists(&mut self) -> Result<NodeId, ParserError> {
        let start = self.curr_span();
        self.expect_token(TokenType::LParen)?;
        let query = self.parse_query()?;
        self.expect_token(TokenType::RParen)?;
        self.add_node(Expression::Exists(Box::new(query)), start)
    }

    /// Parses a function call, `peek_token` is the opening parenthesis.
    ///
    /// Supports `DISTINCT`, `*`, sub-query arguments (`ARRAY(SELECT ...)`), date part arguments,
    /// `IGNORE|RESPECT NULLS`, `ORDER BY` and `LIMIT` inside the argument list and a trailing `OVER (...)`.
    fn parse_function_call(
        &mut self,
        name: String,
        safe: bool,
        start: Span,
    ) -> Result<NodeId, ParserError> {
        self.expect_token(TokenType::LParen)?;
        let mut distinct = false;
        let mut star = false;
        let mut argument_ids = Vec::new();

        if self.peek_token.token_type == TokenType::Distinct {
            self.read_token();
            distinct = true;
        }
        if self.peek_token.token_type == TokenType::Star
            && self.token_after_peek().token_type == TokenType::RParen
        {
            self.read_token();
            star = true;
        } else if self.peek_token.token_type != TokenType::RParen {
            loop {
                let accepts_date_part = !argument_ids.is_empty()
                    && DATE_PART_FUNCTIONS.contains(&name.as_str());
                argument_ids.push(self.parse_function_argument(accepts_date_part)?);
                if self.peek_token.token_type != TokenType::Comma {
                    break;
                }
                self.read_token();
            }
        }
        if self.peek_ident_is("IGNORE") || self.peek_ident_is("RESPECT") {
            self.read_token();
            if !self.peek_ident_is("NULLS") {
                return Err(self.unexpected_token_error("NULLS"));
            }
            self.read_token();
        }
        let order_by = match self.peek_token.token_type {
            TokenType::Order => self.parse_order_by()?,
            _ => vec![],
        };
        if self.peek_token.token_type == TokenType::Limit {
            self.read_token();
            self.parse_expression(Precedence::Lowest)?;
        }
        self.expect_token(TokenType::RParen)?;

        let over = match self.peek_token.token_type {
            TokenType::Over => Some(self.parse_over()?),
            _ => None,
        };
        let node = Expression::FunctionCall(FunctionCallNode {
            name,
            safe,
            argument_ids,
            distinct,
            star,
            order_by,
            over,
        });
        self.add_node(node, start)
    }

    fn parse_function_argument(&mut self, accepts_date_part: bool) -> Result<NodeId, ParserError> {
        if matches!(
            self.peek_token.token_type,
            TokenType::Select | TokenType::With
        ) {
            let start = self.peek_span();
            let query = self.parse_query()?;
            return self.add_node(Expression::Subquery(Box::new(query)), start);
        }
        let is_date_part = accepts_date_part
            && matches!(&self.peek_token.token_type, TokenType::Ident(s) if DATE_PARTS.contains(&s.to_ascii_uppercase().as_str()))
            && matches!(
                self.token_after_peek().token_type,
                TokenType::Comma | TokenType::RParen | TokenType::LParen
            );
        if is_date_part {
            let start = self.peek_span();
            let part = self.parse_date_part_name()?;
            return self.add_node(Expression::DatePart(part), start);
        }
        self.parse_expression(Precedence::Lowest)
    }

    /// Parses `OVER (PARTITION BY ... ORDER BY ... ROWS|RANGE ...)`.
    fn parse_over(&mut self) -> Result<OverClause, ParserError> {
        self.expect_token(TokenType::Over)?;
        let start = self.curr_span();
        self.expect_token(TokenType::LParen)?;
        let partition_by = match self.peek_token.token_type {
            TokenType::Partition => {
                self.read_token();
                self.expect_token(TokenType::By)?;
                self.parse_expression_list()?
            }
            _ => vec![],
        };
        let order_by = match self.peek_token.token_type {
            TokenType::Order => self.parse_order_by()?,
            _ => vec![],
        };
        let frame = match self.peek_token.token_type {
            TokenType::Rows | TokenType::Range => Some(self.parse_window_frame()?),
            _ => None,
        };
        self.expect_token(TokenType::RParen)?;
        Ok(OverClause {
            partition_by,
            order_by,
            frame,
            span: start.to(&self.curr_span()),
        })
    }

    fn parse_window_frame(&mut self) -> Result<WindowFrame, ParserError> {
        let units = match self.peek_token.token_type {
            TokenType::Rows => FrameUnits::Rows,
            _ => FrameUnits::Range,
        };
        self.read_token();
        if self.peek_token.token_type == TokenType::Between {
            self.read_token();
            let start = self.parse_frame_bound()?;
            self.expect_token(TokenType::And)?;
            let end = self.parse_frame_bound()?;
            return Ok(WindowFrame {
                units,
                start,
                end: Some(end),
            });
        }
        let start = self.parse_frame_bound()?;
        Ok(WindowFrame {
            units,
            start,
            end: None,
        })
    }

    fn parse_frame_bound(&mut self) -> Result<FrameBound, ParserError> {
        match self.peek_token.token_type {
            TokenType::Unbounded => {
                self.read_token();
                match self.peek_token.token_type {
                    TokenType::Preceding => {
                        self.read_token();
                        Ok(FrameBound::UnboundedPreceding)
                    }
                    TokenType::Following => {
                        self.read_token();
                        Ok(FrameBound::UnboundedFollowing)
                    }
                    _ => Err(self.unexpected_token_error("PRECEDING or FOLLOWING")),
                }
            }
            TokenType::Current => {
                self.read_token();
                self.expect_token(TokenType::Row)?;
                Ok(FrameBound::CurrentRow)
            }
            _ => {
                let offset = self.parse_expression(Precedence::Between)?;
                match self.peek_token.token_type {
                    TokenType::Preceding => {
                        self.read_token();
                        Ok(FrameBound::Preceding(offset))
                    }
                    TokenType::Following => {
                        self.read_token();
                        Ok(FrameBound::Following(offset))
                    }
                    _ => Err(self.unexpected_token_error("PRECEDING or FOLLOWING")),
                }
            }
        }
    }

    /// Gets the correct infix parsing function based on `token_type`.
    ///
    /// Can fail if there exists no infix function for the given `token_type`
    fn infix_function(&self, token_type: &TokenType) -> Result<InfixFn, ParserError> {
        match token_type {
            TokenType::Plus => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::Plus, Precedence::Additive, left_id)
            }),
            TokenType::Minus => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::Minus, Precedence::Additive, left_id)
            }),
            TokenType::Concat => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::Concat, Precedence::Additive, left_id)
            }),
            TokenType::Star => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::Star, Precedence::Multiplicative, left_id)
            }),
            TokenType::Divide => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::Slash, Precedence::Multiplicative, left_id)
            }),
            TokenType::Equal => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::Equal, Precedence::Comparison, left_id)
            }),
            TokenType::NotEqual => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::NotEqual, Precedence::Comparison, left_id)
            }),
            TokenType::Greater => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::Greater, Precedence::Comparison, left_id)
            }),
            TokenType::GreaterEqual => Ok(|parser, left_id| {
                parser.parse_binary_op(
                    BinaryOperator::GreaterEqual,
                    Precedence::Comparison,
                    left_id,
                )
            }),
            TokenType::Less => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::Less, Precedence::Comparison, left_id)
            }),
            TokenType::LessEqual => Ok(|parser, left_id| {
                parser.parse_binary_op(BinaryOperator::LessEqual, Precedence::Comparison, left_id)
            }),
            TokenType::And => Ok(|parser, left_id| {
                parser.parse_logical_op(LogicalOperator::And, Precedence::LogicalAnd, left_id)
            }),
            TokenType::Or => Ok(|parser, left_id| {
                parser.parse_logical_op(LogicalOperator::Or, Precedence::LogicalOr, left_id)
            }),
            TokenType::Is => Ok(Self::parse_is_null),
            TokenType::In => Ok(|parser, left_id| parser.parse_in(left_id, false)),
            TokenType::Like => Ok(|parser, left_id| parser.parse_like(left_id, false)),
            TokenType::Between => Ok(|parser, left_id| parser.parse_between(left_id, false)),
            TokenType::Not => Ok(Self::parse_negated_infix),
            TokenType::Dot => Ok(Self::parse_field_access),
            TokenType::LBracket => Ok(Self::parse_subscript),
            _ => Err(ParserError::NoParseFn {
                found: token_type.to_string(),
                span: self.curr_span(),
            }),
        }
    }

    /// Parses a binary operator expression (`left <op> right`).
    ///
    /// - `op` is the binary operator type (e.g., Plus, Minus, Equal).
    /// - `precedence` is used to control how far the parser continues parsing the right-hand side.
    /// - `left_id` is the AST node ID of the already-parsed left-hand expression.
    fn parse_binary_op(
        &mut self,
        op: BinaryOperator,
        precedence: Precedence,
        left_id: NodeId,
    ) -> Result<NodeId, ParserError> {
        let right_id = self.parse_expression(precedence)?;
        let exp = Expression::Binary(BinaryExpressionNode {
            left_id,
            right_id,
            op,
        });
        let start = self.ast.span(left_id);
        self.add_node(exp, start)
    }

    /// Parses a logical operator expression (`left AND right`, `left OR right`).
    ///
    /// Works similarly to `parse_binary_op`
    fn parse_logical_op(
        &mut self,
        op: LogicalOperator,
        precedence: Precedence,
        left_id: NodeId,
    ) -> Result<NodeId, ParserError> {
        let right_id = self.parse_expression(precedence)?;
        let exp = Expression::Logical(LogicalExpressionNode {
            left_id,
            right_id,
            op,
        });
        let start = self.ast.span(left_id);
        self.add_node(exp, start)
    }

    /// Parses `x IS [NOT] NULL`.
    fn parse_is_null(&mut self, expression_id: NodeId) -> Result<NodeId, ParserError> {
        let negated = match self.peek_token.token_type {
            TokenType::Not => {
                self.read_token();
                true
            }
            _ => false,
        };
        self.expect_token(TokenType::Null)?;
        let start = self.ast.span(expression_id);
        let node = Expression::IsNull(IsNullNode {
            expression_id,
            negated,
        });
        self.add_node(node, start)
    }

    /// Parses `NOT IN`, `NOT LIKE` and `NOT BETWEEN`, `curr_token` is `NOT`.
    fn parse_negated_infix(&mut self, left_id: NodeId) -> Result<NodeId, ParserError> {
        match self.peek_token.token_type {
            TokenType::In => {
                self.read_token();
                self.parse_in(left_id, true)
            }
            TokenType::Like => {
                self.read_token();
                self.parse_like(left_id, true)
            }
            TokenType::Between => {
                self.read_token();
                self.parse_between(left_id, true)
            }
            _ => Err(self.unexpected_token_error("IN, LIKE or BETWEEN")),
        }
    }

    /// Parses `x [NOT] IN (list)`, `x [NOT] IN (query)` and `x [NOT] IN UNNEST(array)`.
    fn parse_in(&mut self, expression_id: NodeId, negated: bool) -> Result<NodeId, ParserError> {
        let start = self.ast.span(expression_id);
        if self.peek_ident_is("UNNEST") {
            self.read_token();
            self.expect_token(TokenType::LParen)?;
            let array = self.parse_expression(Precedence::Lowest)?;
            self.expect_token(TokenType::RParen)?;
            let node = Expression::InList(InListNode {
                expression_id,
                list: vec![array],
                negated,
                unnest: true,
            });
            return self.add_node(node, start);
        }
        self.expect_token(TokenType::LParen)?;
        if matches!(
            self.peek_token.token_type,
            TokenType::Select | TokenType::With
        ) {
            let query = self.parse_query()?;
            self.expect_token(TokenType::RParen)?;
            let node = Expression::InSubquery(InSubqueryNode {
                expression_id,
                query: Box::new(query),
                negated,
            });
            return self.add_node(node, start);
        }
        let list = self.parse_expression_list()?;
        self.expect_token(TokenType::RParen)?;
        let node = Expression::InList(InListNode {
            expression_id,
            list,
            negated,
            unnest: false,
        });
        self.add_node(node, start)
    }

    fn parse_like(&mut self, expression_id: NodeId, negated: bool) -> Result<NodeId, ParserError> {
        let pattern_id = self.parse_expression(Precedence::Like)?;
        let start = self.ast.span(expression_id);
        let node = Expression::Like(LikeNode {
            expression_id,
            pattern_id,
            negated,
        });
        self.add_node(node, start)
    }

    /// Parses `x [NOT] BETWEEN low AND high`. Bounds are parsed above `AND` precedence,
    /// so the `AND` separating them is never taken as a logical operator.
    fn parse_between(
        &mut self,
        expression_id: NodeId,
        negated: bool,
    ) -> Result<NodeId, ParserError> {
        let low_id = self.parse_expression(Precedence::Between)?;
        self.expect_token(TokenType::And)?;
        let high_id = self.parse_expression(Precedence::Between)?;
        let start = self.ast.span(expression_id);
        let node = Expression::Between(BetweenNode {
            expression_id,
            low_id,
            high_id,
            negated,
        });
        self.add_node(node, start)
    }

    /// Parses `(expr).field`.
    fn parse_field_access(&mut self, expression_id: NodeId) -> Result<NodeId, ParserError> {
        let field = self.expect_ident()?;
        let start = self.ast.span(expression_id);
        let node = Expression::FieldAccess(FieldAccessNode {
            expression_id,
            field,
        });
        self.add_node(node, start)
    }

    /// Parses `array[index]`, including `array[OFFSET(i)]` forms.
    fn parse_subscript(&mut self, expression_id: NodeId) -> Result<NodeId, ParserError> {
        let index_id = self.parse_expression(Precedence::Lowest)?;
        self.expect_token(TokenType::RBracket)?;
        let start = self.ast.span(expression_id);
        let node = Expression::Subscript(SubscriptNode {
            expression_id,
            index_id,
        });
        self.add_node(node, start)
    }

    /// Parses an expression using Pratt parsing.
    ///
    /// Flow:
    /// 1. Reads the next token to become `curr_token`.
    /// 2. Finds the matching prefix function and parses the initial part of the expression.
    /// 3. While the next token has higher precedence than the current one,
    ///    calls the matching infix function to extend the expression.
    fn parse_expression(&mut self, precedence: Precedence) -> Result<NodeId, ParserError> {
        self.enter_nested()?;
        let result = self.parse_expression_inner(precedence);
        self.depth -= 1;
        result
    }

    fn parse_expression_inner(&mut self, precedence: Precedence) -> Result<NodeId, ParserError> {
        // Assume we are starting this function in position where the expression we want to parse
        // starts from the peek token
        self.read_token();
        let prefix_function = self.prefix_function(&self.curr_token.token_type)?;
        let mut expression_node_id = prefix_function(self)?;

        while self.peek_precedence() > precedence {
            self.read_token();
            let infix_function = self.infix_function(&self.curr_token.token_type)?;
            expression_node_id = infix_function(self, expression_node_id)?;
        }

        Ok(expression_node_id)
    }

    /// Precedence of `peek_token` in infix position. `NOT` takes the precedence of
    /// the operator it negates.
    fn peek_precedence(&self) -> Precedence {
        match self.peek_token.token_type {
            TokenType::Not => match self.token_after_peek().token_type {
                TokenType::In | TokenType::Like | TokenType::Between => {
                    self.token_after_peek().token_type.precedence()
                }
                _ => Precedence::Lowest,
            },
            _ => self.peek_token.token_type.precedence(),
        }
    }

    /// Increases nesting depth, fails when it would exceed `max_depth`.
    fn enter_nested(&mut self) -> Result<(), ParserError> {
        if self.depth >= self.max_depth {
            return Err(ParserError::MaxDepthExceeded {
                max_depth: self.max_depth,
                span: self.peek_span(),
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Finishes height bookkeeping of the innermost query. The query counts as one level
    /// above its tallest node in the enclosing query.
    fn leave_query(&mut self) {
        let height = self.query_heights.pop().unwrap_or_default() + 1;
        self.last_query_height = height;
        if let Some(outer) = self.query_heights.last_mut() {
            *outer = (*outer).max(height);
        }
    }

    /// Advances the parser by one token. Reading past the end keeps returning EOF.
    fn read_token(&mut self) {
        let next = self.token_at(self.next).clone();
        self.curr_token = mem::replace(&mut self.peek_token, next);
        self.next += 1;
    }

    fn token_at(&self, index: usize) -> &Token {
        // `tokens` always ends with EOF
        &self.tokens[index.min(self.tokens.len() - 1)]
    }

    fn token_after_peek(&self) -> &Token {
        self.token_at(self.next)
    }

    fn peek_ident_is(&self, word: &str) -> bool {
        matches!(&self.peek_token.token_type, TokenType::Ident(s) if s.eq_ignore_ascii_case(word))
    }

    fn curr_span(&self) -> Span {
        Span::from_token(&self.curr_token)
    }

    fn peek_span(&self) -> Span {
        Span::from_token(&self.peek_token)
    }

    /// Consumes the next token if it matches the expected type.
    /// Otherwise, returns an `UnexpectedToken` error.
    fn expect_token(&mut self, expected_type: TokenType) -> Result<(), ParserError> {
        if self.peek_token.token_type == expected_type {
            self.read_token();
            Ok(())
        } else {
            Err(self.unexpected_token_error(&expected_type.to_string()))
        }
    }

    /// Consumes the next token if it's an identifier (plain or backtick-quoted) and returns its value.
    fn expect_ident(&mut self) -> Result<String, ParserError> {
        match &self.peek_token.token_type {
            TokenType::Ident(s) | TokenType::QuotedIdent(s) => {
                let value = s.clone();
                self.read_token();
                Ok(value)
            }
            _ => Err(self.unexpected_token_error("identifier")),
        }
    }

    /// Helper to create a consistent `UnexpectedToken` error.
    fn unexpected_token_error(&self, expected: &str) -> ParserError {
        ParserError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.peek_token.token_type.to_string(),
            span: self.peek_span(),
        }
    }

    /// Adds node spanning from `start` to the current token.
    ///
    /// Left-associative chains such as `a AND b AND c` are built in a loop, so they grow the tree
    /// without growing parser recursion. The node is rejected when its height on top of the
    /// current depth exceeds `max_depth`.
    fn add_node(&mut self, expression: Expression, start: Span) -> Result<NodeId, ParserError> {
        let span = start.to(&self.curr_span());
        let node_id = self.ast.add_node(expression, span);

        // Leaves have height 0.
        let mut height = self
            .ast
            .children(node_id)
            .iter()
            .map(|child| self.heights.get(child).copied().unwrap_or_default())
            .max()
            .map_or(0, |tallest| tallest + 1);
        if !self.ast.subqueries(node_id).is_empty() {
            height = height.max(self.last_query_height);
        }
        if self.depth + height > self.max_depth {
            return Err(ParserError::MaxDepthExceeded {
                max_depth: self.max_depth,
                span: self.curr_span(),
            });
        }

        self.heights.insert(node_id, height);
        if let Some(query_height) = self.query_heights.last_mut() {
            *query_height = (*query_height).max(height);
        }
        Ok(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_ok(input: &str) -> Ast {
        let tokens = tokenize(input).unwrap();
        match parse(tokens) {
            Ok(ast) => ast,
            Err(errors) => panic!("Expected successful parse of {input:?}, got {errors:?}"),
        }
    }

    fn parse_with_errors(input: &str) -> ParseOutcome {
        let tokens = tokenize(input).unwrap();
        let outcome = Parser::new(tokens).parse_program();
        assert!(!outcome.errors.is_empty(), "Expected errors for {input:?}");
        outcome
    }

    fn single_select(ast: &Ast) -> &Select {
        assert_eq!(ast.statements().len(), 1);
        let SetExpr::Select(select) = &ast.statements()[0].body else {
            panic!("Expected select body, got {:?}", ast.statements()[0].body);
        };
        select
    }

    fn projection(ast: &Ast, idx: usize) -> NodeId {
        let select = single_select(ast);
        let SelectItem::Expression { expression_id, .. } = &select.projections[idx] else {
            panic!("Expected expression projection");
        };
        *expression_id
    }

    fn assert_column_ref(ast: &Ast, node_id: NodeId, qualifier: Option<&str>, name: &str) {
        let Expression::ColumnRef(column) = ast.node(node_id) else {
            panic!("Expected ColumnRef, got {:?}", ast.node(node_id));
        };
        assert_eq!(column.qualifier.as_deref(), qualifier, "qualifier mismatch");
        assert_eq!(column.name, name, "column name mismatch");
    }

    fn assert_function_call<'a>(ast: &'a Ast, node_id: NodeId, name: &str) -> &'a FunctionCallNode {
        let Expression::FunctionCall(call) = ast.node(node_id) else {
            panic!("Expected FunctionCall, got {:?}", ast.node(node_id));
        };
        assert_eq!(call.name, name);
        call
    }

    #[test]
    fn returns_empty_ast_on_empty_input() {
        let ast = parse_ok("");
        assert!(ast.statements().is_empty());
        let ast = parse_ok(";;");
        assert!(ast.statements().is_empty());
    }

    #[test]
    fn parses_simple_select() {
        // given
        let ast = parse_ok("SELECT o.id, amount AS total FROM `proj.sales.orders` AS o WHERE o.id > 10");

        // then
        let select = single_select(&ast);
        assert_eq!(select.projections.len(), 2);
        assert_column_ref(&ast, projection(&ast, 0), Some("o"), "id");
        let SelectItem::Expression { alias, .. } = &select.projections[1] else {
            panic!("Expected expression projection");
        };
        assert_eq!(alias.as_deref(), Some("total"));
        let from = select.from.as_ref().unwrap();
        assert!(matches!(&from.first.source, TableSource::Catalog(name) if name == "proj.sales.orders"));
        assert_eq!(from.first.alias.as_deref(), Some("o"));
        let Expression::Binary(cmp) = ast.node(select.where_clause.unwrap()) else {
            panic!("Expected binary WHERE");
        };
        assert_eq!(cmp.op, BinaryOperator::Greater);
    }

    #[test]
    fn parses_dotted_table_names_and_joins() {
        let ast = parse_ok(
            "SELECT * FROM proj.ds.a JOIN b USING (id) LEFT OUTER JOIN c ON a.id = c.id CROSS JOIN d, e",
        );
        let select = single_select(&ast);
        let from = select.from.as_ref().unwrap();
        assert!(matches!(&from.first.source, TableSource::Catalog(name) if name == "proj.ds.a"));
        let kinds: Vec<_> = from.joins.iter().map(|j| j.kind).collect();
        assert_eq!(
            kinds,
            vec![JoinKind::Inner, JoinKind::Left, JoinKind::Cross, JoinKind::Cross]
        );
        assert!(matches!(&from.joins[0].constraint, JoinConstraint::Using(cols) if cols == &vec!["id".to_string()]));
        assert!(matches!(from.joins[1].constraint, JoinConstraint::On(_)));
    }

    #[test]
    fn respects_operator_precedence() {
        // given
        let ast = parse_ok("SELECT a + b * c = d OR NOT e AND f");

        // then OR is the root
        let root = projection(&ast, 0);
        let Expression::Logical(or) = ast.node(root) else {
            panic!("Expected OR at root");
        };
        assert_eq!(or.op, LogicalOperator::Or);
        let Expression::Binary(eq) = ast.node(or.left_id) else {
            panic!("Expected comparison on the left");
        };
        assert_eq!(eq.op, BinaryOperator::Equal);
        let Expression::Binary(plus) = ast.node(eq.left_id) else {
            panic!("Expected addition");
        };
        assert_eq!(plus.op, BinaryOperator::Plus);
        assert!(matches!(ast.node(plus.right_id), Expression::Binary(BinaryExpressionNode { op: BinaryOperator::Star, .. })));
        let Expression::Logical(and) = ast.node(or.right_id) else {
            panic!("Expected AND on the right");
        };
        assert!(matches!(ast.node(and.left_id), Expression::Unary(UnaryExpressionNode { op: UnaryOperator::Not, .. })));
    }

    #[test]
    fn parses_between_not_in_like_and_is_null() {
        let ast = parse_ok(
            "SELECT * FROM t WHERE d BETWEEN 1 AND 5 AND x NOT IN (1, 2) AND s NOT LIKE 'a%' AND y IS NOT NULL",
        );
        let select = single_select(&ast);
        let mut kinds = Vec::new();
        let mut stack = vec![select.where_clause.unwrap()];
        while let Some(id) = stack.pop() {
            match ast.node(id) {
                Expression::Logical(node) => {
                    stack.push(node.right_id);
                    stack.push(node.left_id);
                }
                other => kinds.push(other.to_string()),
            }
        }
        assert_eq!(kinds, vec!["Between", "InList", "Like", "IsNull"]);
    }

    #[test]
    fn parses_with_clause_and_marks_cte_references() {
        // given forward reference from `a` to `b`
        let ast = parse_ok(
            "WITH a AS (SELECT * FROM b), b AS (SELECT 1 AS x) SELECT * FROM a JOIN orders USING (x)",
        );

        // then
        let query = &ast.statements()[0];
        let with = query.with.as_ref().unwrap();
        assert_eq!(
            with.ctes.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        let SetExpr::Select(a_body) = &with.ctes[0].query.body else {
            panic!("Expected select");
        };
        assert!(matches!(&a_body.from.as_ref().unwrap().first.source, TableSource::Cte(name) if name == "b"));
        let SetExpr::Select(main) = &query.body else {
            panic!("Expected select");
        };
        let from = main.from.as_ref().unwrap();
        assert!(matches!(&from.first.source, TableSource::Cte(name) if name == "a"));
        assert!(matches!(&from.joins[0].table.source, TableSource::Catalog(name) if name == "orders"));
    }

    #[test]
    fn parses_recursive_with_and_set_operations() {
        let ast = parse_ok(
            "WITH RECURSIVE n AS (SELECT 1 AS v UNION ALL SELECT v + 1 FROM n WHERE v < 10) SELECT v FROM n ORDER BY v DESC LIMIT 5",
        );
        let query = &ast.statements()[0];
        let with = query.with.as_ref().unwrap();
        assert!(with.recursive);
        assert!(with.ctes[0].is_recursive);
        let SetExpr::SetOperation(set_op) = &with.ctes[0].query.body else {
            panic!("Expected set operation");
        };
        assert_eq!(set_op.op, SetOperator::Union);
        assert!(!set_op.distinct);
        assert_eq!(query.order_by.len(), 1);
        assert!(query.order_by[0].descending);
        assert!(query.limit.is_some());
    }

    #[test]
    fn set_operation_requires_quantifier() {
        let outcome = parse_with_errors("SELECT 1 UNION SELECT 2");
        assert!(matches!(
            &outcome.errors[0],
            ParserError::UnexpectedToken { expected, .. } if expected == "ALL or DISTINCT"
        ));
    }

    #[test]
    fn parses_functions_window_and_qualify() {
        let ast = parse_ok(
            "SELECT COUNT(*), COUNT(DISTINCT id), SAFE.PARSE_DATE('%Y', s), DATE_TRUNC(d, MONTH), \
             ROW_NUMBER() OVER (PARTITION BY a ORDER BY b ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW) \
             FROM t QUALIFY ROW_NUMBER() OVER (ORDER BY b) = 1",
        );
        let count = assert_function_call(&ast, projection(&ast, 0), "COUNT");
        assert!(count.star);
        let distinct = assert_function_call(&ast, projection(&ast, 1), "COUNT");
        assert!(distinct.distinct);
        let safe = assert_function_call(&ast, projection(&ast, 2), "PARSE_DATE");
        assert!(safe.safe);
        let trunc = assert_function_call(&ast, projection(&ast, 3), "DATE_TRUNC");
        assert!(matches!(ast.node(trunc.argument_ids[1]), Expression::DatePart(p) if p == "MONTH"));
        let row_number = assert_function_call(&ast, projection(&ast, 4), "ROW_NUMBER");
        let over = row_number.over.as_ref().unwrap();
        assert_eq!(over.partition_by.len(), 1);
        assert_eq!(over.order_by.len(), 1);
        let frame = over.frame.as_ref().unwrap();
        assert_eq!(frame.units, FrameUnits::Rows);
        assert!(matches!(frame.start, FrameBound::UnboundedPreceding));
        assert!(matches!(frame.end, Some(FrameBound::CurrentRow)));
        assert!(single_select(&ast).qualify.is_some());
    }

    #[test]
    fn parses_typed_literals_cast_interval_extract_and_case() {
        let ast = parse_ok(
            "SELECT DATE '2024-01-01', CAST(x AS ARRAY<INT64>), SAFE_CAST(y AS NUMERIC(10, 2)), \
             DATE_SUB(CURRENT_DATE, INTERVAL 7 DAY), EXTRACT(YEAR FROM ts), \
             CASE WHEN a > 0 THEN 'p' ELSE 'n' END",
        );
        assert!(matches!(
            ast.node(projection(&ast, 0)),
            Expression::Literal(Literal::Typed { ty: ColumnType::Date, .. })
        ));
        let Expression::Cast(cast) = ast.node(projection(&ast, 1)) else {
            panic!("Expected cast");
        };
        assert_eq!(cast.target, ColumnType::Array(Box::new(ColumnType::Int64)));
        assert!(!cast.safe);
        let Expression::Cast(safe_cast) = ast.node(projection(&ast, 2)) else {
            panic!("Expected safe cast");
        };
        assert!(safe_cast.safe);
        assert_eq!(safe_cast.target, ColumnType::Numeric);
        let date_sub = assert_function_call(&ast, projection(&ast, 3), "DATE_SUB");
        assert_function_call(&ast, date_sub.argument_ids[0], "CURRENT_DATE");
        assert!(matches!(ast.node(date_sub.argument_ids[1]), Expression::Interval(i) if i.unit == "DAY"));
        assert!(matches!(ast.node(projection(&ast, 4)), Expression::Extract(e) if e.part == "YEAR"));
        let Expression::Case(case) = ast.node(projection(&ast, 5)) else {
            panic!("Expected case");
        };
        assert!(case.operand_id.is_none());
        assert_eq!(case.branches.len(), 1);
        assert!(case.else_id.is_some());
    }

    #[test]
    fn parses_column_paths_and_wildcards() {
        let ast = parse_ok("SELECT t.* EXCEPT (secret), * EXCEPT (a, b), t.rec.field, x FROM t");
        let select = single_select(&ast);
        assert!(matches!(
            &select.projections[0],
            SelectItem::QualifiedWildcard { qualifier, except, .. } if qualifier == "t" && except.len() == 1
        ));
        assert!(matches!(
            &select.projections[1],
            SelectItem::Wildcard { except, .. } if except.len() == 2
        ));
        let Expression::FieldAccess(access) = ast.node(projection(&ast, 2)) else {
            panic!("Expected field access");
        };
        assert_eq!(access.field, "field");
        assert_column_ref(&ast, access.expression_id, Some("t"), "rec");
        assert_column_ref(&ast, projection(&ast, 3), None, "x");
    }

    #[test]
    fn parses_subqueries_exists_and_unnest() {
        let ast = parse_ok(
            "SELECT (SELECT MAX(v) FROM u), x IN UNNEST(@ids) FROM t, UNNEST(t.tags) AS tag \
             WHERE EXISTS (SELECT 1 FROM u WHERE u.id = t.id) AND t.id IN (SELECT id FROM v)",
        );
        assert!(matches!(ast.node(projection(&ast, 0)), Expression::Subquery(_)));
        assert!(matches!(ast.node(projection(&ast, 1)), Expression::InList(InListNode { unnest: true, .. })));
        let select = single_select(&ast);
        let from = select.from.as_ref().unwrap();
        assert!(matches!(from.joins[0].table.source, TableSource::Unnest(_)));
        assert_eq!(from.joins[0].table.alias.as_deref(), Some("tag"));
    }

    #[test]
    fn spans_point_into_source() {
        // given
        let input = "SELECT\n  a / b\nFROM t";

        // when
        let ast = parse_ok(input);

        // then
        let span = ast.span(projection(&ast, 0));
        assert_eq!((span.line, span.column, span.length), (2, 3, 5));
        assert_eq!(&input[span.offset..span.offset + span.length], "a / b");
    }

    #[test]
    fn recovers_from_failing_cte_body() {
        // given broken first CTE
        let outcome = parse_with_errors("WITH a AS (SELECT FROM x), b AS (SELECT 1 AS v) SELECT * FROM b");

        // then the other CTE and the main body are still parsed
        assert_eq!(outcome.errors.len(), 1);
        let query = &outcome.ast.statements()[0];
        let with = query.with.as_ref().unwrap();
        assert_eq!(with.ctes.len(), 2);
        assert!(matches!(with.ctes[0].query.body, SetExpr::Invalid(_)));
        assert!(matches!(with.ctes[1].query.body, SetExpr::Select(_)));
        assert!(matches!(query.body, SetExpr::Select(_)));
    }

    #[test]
    fn keeps_with_clause_when_main_body_fails() {
        let outcome = parse_with_errors("WITH a AS (SELECT 1 AS v) SELECT v FROM a WHERE");
        assert_eq!(outcome.errors.len(), 1);
        let query = &outcome.ast.statements()[0];
        assert_eq!(query.with.as_ref().unwrap().ctes.len(), 1);
        assert!(matches!(query.body, SetExpr::Invalid(_)));
    }

    #[test]
    fn recovers_to_next_statement() {
        let outcome = parse_with_errors("SELECT FROM; SELECT 1; SELECT 2 3");
        assert_eq!(outcome.errors.len(), 2);
        assert!(matches!(outcome.errors[0], ParserError::NoParseFn { .. }));
        assert!(matches!(outcome.errors[1], ParserError::UnexpectedToken { .. }));
        assert_eq!(outcome.ast.statements().len(), 1);
    }

    #[test]
    fn returns_error_when_max_depth_exceeded() {
        // given
        let input = format!("SELECT {}1{}", "(".repeat(20), ")".repeat(20));
        let tokens = tokenize(&input).unwrap();

        // when
        let outcome = Parser::new(tokens).with_max_depth(10).parse_program();

        // then
        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(
            outcome.errors[0],
            ParserError::MaxDepthExceeded { max_depth: 10, .. }
        ));
    }

    fn assert_single_depth_error(outcome: &ParseOutcome) {
        assert_eq!(outcome.errors.len(), 1, "{:?}", outcome.errors);
        assert!(matches!(
            outcome.errors[0],
            ParserError::MaxDepthExceeded {
                max_depth: DEFAULT_MAX_DEPTH,
                ..
            }
        ));
        assert!(outcome.ast.statements().is_empty());
    }

    #[test]
    fn long_left_associative_chains_exceed_max_depth() {
        let chains = [
            format!("SELECT a FROM t WHERE {}", vec!["a = 1"; 10_000].join(" AND ")),
            format!("SELECT {}", vec!["1"; 10_000].join(" + ")),
            format!("SELECT {}", vec!["'a'"; 10_000].join(" || ")),
            format!("SELECT a{}", ".b".repeat(10_000)),
        ];
        for input in &chains {
            assert_single_depth_error(&parse_with_errors(input));
        }
    }

    #[test]
    fn long_set_operation_chain_exceeds_max_depth() {
        let input = vec!["SELECT 1"; 1_000].join(" UNION ALL ");
        assert_single_depth_error(&parse_with_errors(&input));
    }

    #[test]
    fn chain_wrapping_subquery_counts_subquery_height() {
        // given
        let inner = vec!["1"; 40].join(" + ");
        let input = format!("SELECT (SELECT {inner}) {}", " + 1".repeat(40));

        // when
        let outcome = parse_with_errors(&input);

        // then
        assert_single_depth_error(&outcome);
        parse_ok(&format!("SELECT (SELECT {inner}) + 1"));
    }

    #[test]
    fn short_chains_and_nesting_within_default_depth() {
        parse_ok(&format!("SELECT a FROM t WHERE {}", vec!["a = 1"; 40].join(" OR ")));
        parse_ok(&vec!["SELECT 1"; 40].join(" UNION ALL "));

        let mut query = "SELECT * FROM t".to_string();
        for _ in 0..60 {
            query = format!("SELECT * FROM ({query})");
        }
        parse_ok(&query);
        query = format!("SELECT * FROM ({query})");
        for _ in 0..10 {
            query = format!("SELECT * FROM ({query})");
        }
        assert_single_depth_error(&parse_with_errors(&query));
    }

    #[test]
    fn reports_unexpected_token_position() {
        let outcome = parse_with_errors("SELECT a\nFROM t WHERE a = = 1");
        let ParserError::NoParseFn { found, span } = &outcome.errors[0] else {
            panic!("Expected NoParseFn, got {:?}", outcome.errors[0]);
        };
        assert_eq!(found, "=");
        assert_eq!((span.line, span.column), (2, 18));
    }
}
