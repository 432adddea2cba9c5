//! Built-in function signatures and validation of function calls against them.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use catalog::ColumnType;
use itertools::Itertools;
use log::{debug, trace};

use crate::ast::{
    Ast, Expression, FunctionCallNode, JoinConstraint, Literal, NodeId, Select, SelectItem, Span,
    TableSource,
};

/// How a function may be used with respect to `OVER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// `OVER` is not allowed.
    Scalar,
    /// `OVER` is optional.
    Aggregate,
    /// `OVER` is required, `requires_order` tells if the window must have `ORDER BY`.
    Analytic { requires_order: bool },
}

/// Pattern that a single argument must match.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgType {
    /// Argument of this type, or of a type implicitly coercible to it (`INT64` for `FLOAT64`).
    Is(ColumnType),
    /// Any numeric type.
    Numeric,
    Any,
    /// Array of any element type.
    Array,
    /// Generic argument, all `T` arguments of a call must share a common type.
    T,
    /// Generic argument that must also be numeric.
    NumericT,
    /// Date part keyword (`DAY`, `MONTH`...).
    DatePart,
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Is(ty) => write!(f, "{ty}"),
            ArgType::Numeric => write!(f, "NUMBER"),
            ArgType::Any => write!(f, "ANY"),
            ArgType::Array => write!(f, "ARRAY"),
            ArgType::T | ArgType::NumericT => write!(f, "T"),
            ArgType::DatePart => write!(f, "DATE_PART"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnType {
    Is(ColumnType),
    /// Common type of the `T` arguments.
    T,
    /// Type of the argument at given index.
    Arg(usize),
    /// Type of the argument at given index, with `INT64` widened to `FLOAT64` (`AVG`, `ROUND`).
    FloatingArg(usize),
    /// Array of the type of the argument at given index (`ARRAY_AGG`).
    ArrayOfArg(usize),
    /// Result of dividing the first two arguments.
    Quotient,
}

/// Single overload of a function.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    params: Vec<ArgType>,
    /// Number of leading params that must be supplied.
    required: usize,
    /// Last param can be repeated.
    variadic: bool,
    returns: ReturnType,
}

impl Signature {
    pub fn new(params: Vec<ArgType>, returns: ReturnType) -> Self {
        Signature {
            required: params.len(),
            params,
            variadic: false,
            returns,
        }
    }

    /// Appends params that may be omitted.
    pub fn optional(mut self, params: Vec<ArgType>) -> Self {
        self.params.extend(params);
        self
    }

    /// Marks the last param as repeatable.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn returns(&self) -> &ReturnType {
        &self.returns
    }

    /// Returns the result type when `args` match this overload.
    pub fn resolve(&self, args: &[SuppliedArg]) -> Option<ColumnType> {
        if args.len() < self.required || (!self.variadic && args.len() > self.params.len()) {
            return None;
        }
        let mut generic: Option<ColumnType> = None;
        let mut generic_string_literal = false;
        for (idx, arg) in args.iter().enumerate() {
            let param = self.params.get(idx).or(self.params.last())?;
            match param {
                ArgType::T | ArgType::NumericT => {
                    if arg.kind == ArgKind::DatePart {
                        return None;
                    }
                    if arg.ty.is_unknown() {
                        continue;
                    }
                    if *param == ArgType::NumericT && !arg.ty.is_numeric() {
                        return None;
                    }
                    if arg.kind == ArgKind::StringLiteral {
                        generic_string_literal = true;
                        continue;
                    }
                    generic = match generic {
                        None => Some(arg.ty.clone()),
                        Some(current) => Some(ColumnType::coercion(&current, &arg.ty)?),
                    };
                }
                _ if !arg.matches(param) => return None,
                _ => {}
            }
        }
        if generic_string_literal {
            match &generic {
                None => generic = Some(ColumnType::String),
                Some(ty) if *ty == ColumnType::String || ty.is_temporal() => {}
                Some(_) => return None,
            }
        }

        let arg_type = |idx: usize| {
            args.get(idx)
                .map(|a| a.ty.clone())
                .unwrap_or(ColumnType::Unknown)
        };
        let ty = match &self.returns {
            ReturnType::Is(ty) => ty.clone(),
            ReturnType::T => generic.unwrap_or(ColumnType::Unknown),
            ReturnType::Arg(idx) => arg_type(*idx),
            ReturnType::FloatingArg(idx) => match arg_type(*idx) {
                ColumnType::Int64 => ColumnType::Float64,
                other => other,
            },
            ReturnType::ArrayOfArg(idx) => ColumnType::Array(Box::new(arg_type(*idx))),
            ReturnType::Quotient => quotient_type(&arg_type(0), &arg_type(1)),
        };
        Some(ty)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .enumerate()
            .map(|(idx, param)| {
                let variadic = if self.variadic && idx + 1 == self.params.len() {
                    ", ..."
                } else {
                    ""
                };
                match idx < self.required {
                    true => format!("{param}{variadic}"),
                    false => format!("[{param}]{variadic}"),
                }
            })
            .join(", ");
        write!(f, "({params})")
    }
}

/// Result type of `left / right`. Integer division yields `FLOAT64`.
pub fn quotient_type(left: &ColumnType, right: &ColumnType) -> ColumnType {
    if left.is_unknown() || right.is_unknown() {
        return ColumnType::Unknown;
    }
    match ColumnType::coercion(left, right) {
        Some(ColumnType::Int64) => ColumnType::Float64,
        Some(ty) if ty.is_numeric() => ty,
        _ => ColumnType::Unknown,
    }
}

/// How an argument was written, which matters for implicit coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Value,
    /// Bare string literal, coercible to temporal types.
    StringLiteral,
    DatePart,
}

/// Argument of a call as seen by overload resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SuppliedArg {
    pub ty: ColumnType,
    pub kind: ArgKind,
}

impl SuppliedArg {
    pub fn value(ty: ColumnType) -> Self {
        SuppliedArg {
            ty,
            kind: ArgKind::Value,
        }
    }

    /// Builds argument from an already typed node of `ast`.
    pub fn from_node(ast: &Ast, node_id: NodeId) -> Self {
        let kind = match ast.node(node_id) {
            Expression::DatePart(_) => ArgKind::DatePart,
            Expression::Literal(Literal::String(_)) => ArgKind::StringLiteral,
            _ => ArgKind::Value,
        };
        let ty = ast.ty(node_id).cloned().unwrap_or(ColumnType::Unknown);
        SuppliedArg { ty, kind }
    }

    fn matches(&self, param: &ArgType) -> bool {
        if self.kind == ArgKind::DatePart || *param == ArgType::DatePart {
            return self.kind == ArgKind::DatePart && *param == ArgType::DatePart;
        }
        if self.ty.is_unknown() {
            return true;
        }
        match param {
            ArgType::Is(expected) => {
                if self.kind == ArgKind::StringLiteral && expected.is_temporal() {
                    return true;
                }
                ColumnType::coercion(&self.ty, expected).as_ref() == Some(expected)
            }
            ArgType::Numeric => self.ty.is_numeric(),
            ArgType::Array => matches!(self.ty, ColumnType::Array(_)),
            ArgType::Any | ArgType::T | ArgType::NumericT => true,
            ArgType::DatePart => false,
        }
    }
}

impl fmt::Display for SuppliedArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ArgKind::DatePart => write!(f, "DATE_PART"),
            _ => write!(f, "{}", self.ty),
        }
    }
}

/// Registered function: its kind and overloads.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    name: String,
    kind: FunctionKind,
    signatures: Vec<Signature>,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>, kind: FunctionKind, signatures: Vec<Signature>) -> Self {
        FunctionSpec {
            name: name.into().to_ascii_uppercase(),
            kind,
            signatures,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Returns result type of the first overload matching `args`.
    pub fn resolve(&self, args: &[SuppliedArg]) -> Option<ColumnType> {
        self.signatures.iter().find_map(|s| s.resolve(args))
    }
}

/// Maps upper-case function names to their [`FunctionSpec`]s.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionSpec>,
}

static BUILTINS: LazyLock<FunctionRegistry> = LazyLock::new(FunctionRegistry::with_builtins);

impl FunctionRegistry {
    /// Shared registry of built-in functions.
    pub fn builtin() -> &'static FunctionRegistry {
        &BUILTINS
    }

    pub fn register(&mut self, spec: FunctionSpec) {
        self.functions.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(&name.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn scalar(&mut self, names: &[&str], signatures: Vec<Signature>) {
        self.add(names, FunctionKind::Scalar, signatures);
    }

    fn aggregate(&mut self, names: &[&str], signatures: Vec<Signature>) {
        self.add(names, FunctionKind::Aggregate, signatures);
    }

    fn analytic(&mut self, names: &[&str], requires_order: bool, signatures: Vec<Signature>) {
        self.add(names, FunctionKind::Analytic { requires_order }, signatures);
    }

    fn add(&mut self, names: &[&str], kind: FunctionKind, signatures: Vec<Signature>) {
        for name in names {
            self.register(FunctionSpec::new(*name, kind, signatures.clone()));
        }
    }

    fn with_builtins() -> FunctionRegistry {
        use ArgType::{Any, Array, DatePart, Numeric, NumericT, T};
        use ColumnType as C;

        let is = ArgType::Is;
        let ret = ReturnType::Is;
        let sig = Signature::new;

        let mut r = FunctionRegistry::default();

        // date and time
        r.scalar(&["CURRENT_DATE"], vec![sig(vec![], ret(C::Date)).optional(vec![is(C::String)])]);
        r.scalar(
            &["CURRENT_DATETIME"],
            vec![sig(vec![], ret(C::Datetime)).optional(vec![is(C::String)])],
        );
        r.scalar(&["CURRENT_TIME"], vec![sig(vec![], ret(C::Time)).optional(vec![is(C::String)])]);
        r.scalar(&["CURRENT_TIMESTAMP"], vec![sig(vec![], ret(C::Timestamp))]);
        r.scalar(
            &["DATE"],
            vec![
                sig(vec![is(C::Timestamp)], ret(C::Date)).optional(vec![is(C::String)]),
                sig(vec![is(C::Datetime)], ret(C::Date)),
                sig(vec![is(C::Date)], ret(C::Date)),
                sig(vec![is(C::Int64), is(C::Int64), is(C::Int64)], ret(C::Date)),
            ],
        );
        r.scalar(
            &["TIMESTAMP"],
            vec![
                sig(vec![is(C::String)], ret(C::Timestamp)).optional(vec![is(C::String)]),
                sig(vec![is(C::Date)], ret(C::Timestamp)).optional(vec![is(C::String)]),
                sig(vec![is(C::Datetime)], ret(C::Timestamp)).optional(vec![is(C::String)]),
                sig(vec![is(C::Timestamp)], ret(C::Timestamp)),
            ],
        );
        r.scalar(
            &["DATETIME"],
            vec![
                sig(vec![is(C::Date)], ret(C::Datetime)).optional(vec![is(C::Time)]),
                sig(vec![is(C::Timestamp)], ret(C::Datetime)).optional(vec![is(C::String)]),
                sig(vec![is(C::Datetime)], ret(C::Datetime)),
            ],
        );
        r.scalar(&["TIME"], vec![
            sig(vec![is(C::Timestamp)], ret(C::Time)).optional(vec![is(C::String)]),
            sig(vec![is(C::Datetime)], ret(C::Time)),
            sig(vec![is(C::Int64), is(C::Int64), is(C::Int64)], ret(C::Time)),
        ]);
        r.scalar(
            &["DATE_ADD", "DATE_SUB"],
            vec![sig(vec![is(C::Date), is(C::Interval)], ret(C::Date))],
        );
        r.scalar(
            &["DATETIME_ADD", "DATETIME_SUB"],
            vec![sig(vec![is(C::Datetime), is(C::Interval)], ret(C::Datetime))],
        );
        r.scalar(
            &["TIMESTAMP_ADD", "TIMESTAMP_SUB"],
            vec![sig(vec![is(C::Timestamp), is(C::Interval)], ret(C::Timestamp))],
        );
        r.scalar(
            &["TIME_ADD", "TIME_SUB"],
            vec![sig(vec![is(C::Time), is(C::Interval)], ret(C::Time))],
        );
        r.scalar(
            &["DATE_DIFF"],
            vec![sig(vec![is(C::Date), is(C::Date), DatePart], ret(C::Int64))],
        );
        r.scalar(
            &["DATETIME_DIFF"],
            vec![sig(vec![is(C::Datetime), is(C::Datetime), DatePart], ret(C::Int64))],
        );
        r.scalar(
            &["TIMESTAMP_DIFF"],
            vec![sig(vec![is(C::Timestamp), is(C::Timestamp), DatePart], ret(C::Int64))],
        );
        r.scalar(
            &["TIME_DIFF"],
            vec![sig(vec![is(C::Time), is(C::Time), DatePart], ret(C::Int64))],
        );
        r.scalar(&["DATE_TRUNC"], vec![sig(vec![is(C::Date), DatePart], ret(C::Date))]);
        r.scalar(
            &["DATETIME_TRUNC"],
            vec![sig(vec![is(C::Datetime), DatePart], ret(C::Datetime))],
        );
        r.scalar(
            &["TIMESTAMP_TRUNC"],
            vec![sig(vec![is(C::Timestamp), DatePart], ret(C::Timestamp)).optional(vec![is(C::String)])],
        );
        r.scalar(&["TIME_TRUNC"], vec![sig(vec![is(C::Time), DatePart], ret(C::Time))]);
        r.scalar(&["LAST_DAY"], vec![sig(vec![is(C::Date)], ret(C::Date)).optional(vec![DatePart])]);
        r.scalar(&["FORMAT_DATE"], vec![sig(vec![is(C::String), is(C::Date)], ret(C::String))]);
        r.scalar(
            &["FORMAT_DATETIME"],
            vec![sig(vec![is(C::String), is(C::Datetime)], ret(C::String))],
        );
        r.scalar(
            &["FORMAT_TIMESTAMP"],
            vec![sig(vec![is(C::String), is(C::Timestamp)], ret(C::String)).optional(vec![is(C::String)])],
        );
        r.scalar(&["PARSE_DATE"], vec![sig(vec![is(C::String), is(C::String)], ret(C::Date))]);
        r.scalar(
            &["PARSE_DATETIME"],
            vec![sig(vec![is(C::String), is(C::String)], ret(C::Datetime))],
        );
        r.scalar(
            &["PARSE_TIMESTAMP"],
            vec![sig(vec![is(C::String), is(C::String)], ret(C::Timestamp)).optional(vec![is(C::String)])],
        );
        r.scalar(
            &["UNIX_SECONDS", "UNIX_MILLIS", "UNIX_MICROS"],
            vec![sig(vec![is(C::Timestamp)], ret(C::Int64))],
        );
        r.scalar(&["UNIX_DATE"], vec![sig(vec![is(C::Date)], ret(C::Int64))]);
        r.scalar(
            &["TIMESTAMP_SECONDS", "TIMESTAMP_MILLIS", "TIMESTAMP_MICROS"],
            vec![sig(vec![is(C::Int64)], ret(C::Timestamp))],
        );
        r.scalar(&["DATE_FROM_UNIX_DATE"], vec![sig(vec![is(C::Int64)], ret(C::Date))]);
        r.scalar(
            &["GENERATE_DATE_ARRAY"],
            vec![
                sig(vec![is(C::Date), is(C::Date)], ret(C::Array(Box::new(C::Date))))
                    .optional(vec![is(C::Interval)]),
            ],
        );

        // string
        r.scalar(&["CONCAT"], vec![
            sig(vec![is(C::String)], ret(C::String)).variadic(),
            sig(vec![is(C::Bytes)], ret(C::Bytes)).variadic(),
        ]);
        r.scalar(
            &["LOWER", "UPPER", "INITCAP", "REVERSE"],
            vec![sig(vec![is(C::String)], ret(C::String))],
        );
        r.scalar(
            &["LENGTH", "CHAR_LENGTH", "CHARACTER_LENGTH"],
            vec![
                sig(vec![is(C::String)], ret(C::Int64)),
                sig(vec![is(C::Bytes)], ret(C::Int64)),
            ],
        );
        r.scalar(
            &["TRIM", "LTRIM", "RTRIM"],
            vec![sig(vec![is(C::String)], ret(C::String)).optional(vec![is(C::String)])],
        );
        r.scalar(
            &["SUBSTR", "SUBSTRING"],
            vec![sig(vec![is(C::String), is(C::Int64)], ret(C::String)).optional(vec![is(C::Int64)])],
        );
        r.scalar(
            &["REPLACE", "REGEXP_REPLACE"],
            vec![sig(vec![is(C::String), is(C::String), is(C::String)], ret(C::String))],
        );
        r.scalar(
            &["STARTS_WITH", "ENDS_WITH", "REGEXP_CONTAINS"],
            vec![sig(vec![is(C::String), is(C::String)], ret(C::Bool))],
        );
        r.scalar(&["STRPOS"], vec![sig(vec![is(C::String), is(C::String)], ret(C::Int64))]);
        r.scalar(
            &["REGEXP_EXTRACT"],
            vec![sig(vec![is(C::String), is(C::String)], ret(C::String))],
        );
        r.scalar(
            &["SPLIT"],
            vec![sig(vec![is(C::String)], ret(C::Array(Box::new(C::String)))).optional(vec![is(C::String)])],
        );
        r.scalar(&["LEFT", "RIGHT"], vec![sig(vec![is(C::String), is(C::Int64)], ret(C::String))]);
        r.scalar(
            &["LPAD", "RPAD"],
            vec![sig(vec![is(C::String), is(C::Int64)], ret(C::String)).optional(vec![is(C::String)])],
        );
        r.scalar(&["FORMAT"], vec![sig(vec![is(C::String)], ret(C::String)).optional(vec![Any]).variadic()]);
        r.scalar(
            &["TO_JSON_STRING"],
            vec![sig(vec![Any], ret(C::String)).optional(vec![is(C::Bool)])],
        );
        r.scalar(
            &["JSON_VALUE", "JSON_EXTRACT_SCALAR"],
            vec![sig(vec![Any], ret(C::String)).optional(vec![is(C::String)])],
        );
        r.scalar(&["GENERATE_UUID"], vec![sig(vec![], ret(C::String))]);
        r.scalar(&["FARM_FINGERPRINT"], vec![sig(vec![is(C::String)], ret(C::Int64))]);
        r.scalar(&["MD5", "SHA256"], vec![sig(vec![is(C::String)], ret(C::Bytes))]);

        // math
        r.scalar(&["ABS", "SIGN"], vec![sig(vec![Numeric], ReturnType::Arg(0))]);
        r.scalar(
            &["ROUND", "TRUNC"],
            vec![sig(vec![Numeric], ReturnType::FloatingArg(0)).optional(vec![is(C::Int64)])],
        );
        r.scalar(&["CEIL", "CEILING", "FLOOR"], vec![sig(vec![Numeric], ReturnType::FloatingArg(0))]);
        r.scalar(
            &["SQRT", "LN", "LOG10", "EXP"],
            vec![sig(vec![Numeric], ret(C::Float64))],
        );
        r.scalar(
            &["LOG"],
            vec![sig(vec![Numeric], ret(C::Float64)).optional(vec![Numeric])],
        );
        r.scalar(&["POW", "POWER"], vec![sig(vec![Numeric, Numeric], ret(C::Float64))]);
        r.scalar(&["MOD", "DIV"], vec![sig(vec![NumericT, NumericT], ReturnType::T)]);
        r.scalar(&["SAFE_DIVIDE"], vec![sig(vec![Numeric, Numeric], ReturnType::Quotient)]);
        r.scalar(&["IEEE_DIVIDE"], vec![sig(vec![Numeric, Numeric], ret(C::Float64))]);
        r.scalar(
            &["SAFE_ADD", "SAFE_SUBTRACT", "SAFE_MULTIPLY"],
            vec![sig(vec![NumericT, NumericT], ReturnType::T)],
        );
        r.scalar(&["SAFE_NEGATE"], vec![sig(vec![Numeric], ReturnType::Arg(0))]);
        r.scalar(&["GREATEST", "LEAST"], vec![sig(vec![T], ReturnType::T).variadic()]);
        r.scalar(&["RAND"], vec![sig(vec![], ret(C::Float64))]);

        // conditional
        r.scalar(&["IF"], vec![sig(vec![is(C::Bool), T, T], ReturnType::T)]);
        r.scalar(&["IFNULL", "NULLIF"], vec![sig(vec![T, T], ReturnType::T)]);
        r.scalar(&["COALESCE"], vec![sig(vec![T], ReturnType::T).variadic()]);

        // arrays
        r.scalar(&["ARRAY"], vec![sig(vec![Any], ReturnType::ArrayOfArg(0))]);
        r.scalar(&["ARRAY_LENGTH"], vec![sig(vec![Array], ret(C::Int64))]);
        r.scalar(
            &["ARRAY_TO_STRING"],
            vec![sig(vec![Array, is(C::String)], ret(C::String)).optional(vec![is(C::String)])],
        );
        r.scalar(&["ARRAY_CONCAT"], vec![sig(vec![Array], ReturnType::Arg(0)).variadic()]);
        r.scalar(&["ARRAY_REVERSE"], vec![sig(vec![Array], ReturnType::Arg(0))]);
        r.scalar(
            &["GENERATE_ARRAY"],
            vec![sig(vec![NumericT, NumericT], ReturnType::ArrayOfArg(0)).optional(vec![Numeric])],
        );
        r.scalar(
            &["OFFSET", "ORDINAL", "SAFE_OFFSET", "SAFE_ORDINAL"],
            vec![sig(vec![is(C::Int64)], ret(C::Int64))],
        );

        // aggregates
        r.aggregate(&["COUNT"], vec![sig(vec![], ret(C::Int64)).optional(vec![Any])]);
        r.aggregate(&["COUNTIF"], vec![sig(vec![is(C::Bool)], ret(C::Int64))]);
        r.aggregate(&["SUM"], vec![sig(vec![Numeric], ReturnType::Arg(0))]);
        r.aggregate(&["AVG"], vec![sig(vec![Numeric], ReturnType::FloatingArg(0))]);
        r.aggregate(&["MIN", "MAX", "ANY_VALUE"], vec![sig(vec![Any], ReturnType::Arg(0))]);
        r.aggregate(&["ARRAY_AGG"], vec![sig(vec![Any], ReturnType::ArrayOfArg(0))]);
        r.aggregate(
            &["STRING_AGG"],
            vec![sig(vec![is(C::String)], ret(C::String)).optional(vec![is(C::String)])],
        );
        r.aggregate(&["LOGICAL_AND", "LOGICAL_OR"], vec![sig(vec![is(C::Bool)], ret(C::Bool))]);
        r.aggregate(
            &[
                "STDDEV",
                "STDDEV_POP",
                "STDDEV_SAMP",
                "VARIANCE",
                "VAR_POP",
                "VAR_SAMP",
            ],
            vec![sig(vec![Numeric], ret(C::Float64))],
        );
        r.aggregate(&["APPROX_COUNT_DISTINCT"], vec![sig(vec![Any], ret(C::Int64))]);
        r.aggregate(
            &["APPROX_QUANTILES"],
            vec![sig(vec![Any, is(C::Int64)], ReturnType::ArrayOfArg(0))],
        );

        // analytic
        r.analytic(&["ROW_NUMBER"], false, vec![sig(vec![], ret(C::Int64))]);
        r.analytic(&["RANK", "DENSE_RANK"], true, vec![sig(vec![], ret(C::Int64))]);
        r.analytic(&["PERCENT_RANK", "CUME_DIST"], true, vec![sig(vec![], ret(C::Float64))]);
        r.analytic(&["NTILE"], true, vec![sig(vec![is(C::Int64)], ret(C::Int64))]);
        r.analytic(
            &["LAG", "LEAD"],
            true,
            vec![sig(vec![T], ReturnType::T).optional(vec![is(C::Int64), T])],
        );
        r.analytic(&["FIRST_VALUE", "LAST_VALUE"], false, vec![sig(vec![Any], ReturnType::Arg(0))]);
        r.analytic(
            &["NTH_VALUE"],
            false,
            vec![sig(vec![Any, is(C::Int64)], ReturnType::Arg(0))],
        );

        debug!("registered {} built-in functions", r.len());
        r
    }
}

/// Problems with function calls.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionDiagnostic {
    /// Argument types match no overload.
    SignatureMismatch {
        name: String,
        supplied_types: Vec<String>,
        expected: Vec<String>,
        span: Span,
    },
    /// Function is not in the registry.
    UnknownFunction { name: String, span: Span },
    /// Analytic function used without `OVER`.
    MissingOverClause { name: String, span: Span },
    /// `OVER` used with a scalar function.
    UnexpectedOverClause { name: String, span: Span },
    /// Window of a ranking or navigation function has no `ORDER BY`.
    MissingWindowOrder { name: String, span: Span },
    AggregateNotAllowed {
        name: String,
        clause: Clause,
        span: Span,
    },
    WindowFunctionNotAllowed {
        name: String,
        clause: Clause,
        span: Span,
    },
}

/// Clause an expression belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    Select,
    Join,
    Where,
    GroupBy,
    Having,
    Qualify,
    /// Query level `ORDER BY`, `LIMIT`, `OFFSET`.
    Query,
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Select => write!(f, "SELECT list"),
            Clause::Join => write!(f, "FROM clause"),
            Clause::Where => write!(f, "WHERE"),
            Clause::GroupBy => write!(f, "GROUP BY"),
            Clause::Having => write!(f, "HAVING"),
            Clause::Qualify => write!(f, "QUALIFY"),
            Clause::Query => write!(f, "ORDER BY"),
        }
    }
}

fn clause_roots(select: &Select) -> Vec<(NodeId, Clause)> {
    let mut roots = Vec::new();
    for item in &select.projections {
        if let SelectItem::Expression { expression_id, .. } = item {
            roots.push((*expression_id, Clause::Select));
        }
    }
    for table in select.tables() {
        if let TableSource::Unnest(id) = table.source {
            roots.push((id, Clause::Join));
        }
    }
    if let Some(from) = &select.from {
        for join in &from.joins {
            if let JoinConstraint::On(id) = join.constraint {
                roots.push((id, Clause::Join));
            }
        }
    }
    roots.extend(select.where_clause.map(|id| (id, Clause::Where)));
    roots.extend(select.group_by.iter().map(|&id| (id, Clause::GroupBy)));
    roots.extend(select.having.map(|id| (id, Clause::Having)));
    roots.extend(select.qualify.map(|id| (id, Clause::Qualify)));
    roots
}

/// Checks every function call of an [`Ast`] annotated by type inference.
pub struct FunctionValidator<'a> {
    ast: &'a Ast,
    registry: &'a FunctionRegistry,
    diagnostics: Vec<FunctionDiagnostic>,
}

impl<'a> FunctionValidator<'a> {
    pub fn new(ast: &'a Ast, registry: &'a FunctionRegistry) -> Self {
        FunctionValidator {
            ast,
            registry,
            diagnostics: Vec::new(),
        }
    }

    pub fn validate(mut self) -> Vec<FunctionDiagnostic> {
        let ast = self.ast;
        let mut roots = Vec::new();
        for statement in ast.statements() {
            ast.for_each_query(statement, &mut |query| {
                for select in query.body.selects() {
                    roots.extend(clause_roots(select));
                }
                roots.extend(query.expression_roots().into_iter().map(|id| (id, Clause::Query)));
            });
        }
        for (root, clause) in roots {
            ast.walk_expression(root, &mut |id| {
                if let Expression::FunctionCall(call) = ast.node(id) {
                    self.check_call(id, call, clause);
                }
            });
        }
        debug!("function validator found {} problems", self.diagnostics.len());
        self.diagnostics
    }

    fn check_call(&mut self, node_id: NodeId, call: &FunctionCallNode, clause: Clause) {
        let span = self.ast.span(node_id);
        let name = call.name.clone();
        let Some(spec) = self.registry.get(&call.name) else {
            trace!("unknown function {name}");
            self.diagnostics
                .push(FunctionDiagnostic::UnknownFunction { name, span });
            return;
        };

        match (spec.kind(), &call.over) {
            (FunctionKind::Analytic { .. }, None) => {
                self.diagnostics
                    .push(FunctionDiagnostic::MissingOverClause { name: name.clone(), span });
            }
            (FunctionKind::Scalar, Some(_)) => {
                self.diagnostics
                    .push(FunctionDiagnostic::UnexpectedOverClause { name: name.clone(), span });
            }
            (FunctionKind::Analytic { requires_order: true }, Some(over))
                if over.order_by.is_empty() =>
            {
                self.diagnostics
                    .push(FunctionDiagnostic::MissingWindowOrder { name: name.clone(), span });
            }
            _ => {}
        }

        match (spec.kind(), &call.over, clause) {
            (_, Some(_), Clause::Where | Clause::GroupBy | Clause::Having | Clause::Join) => {
                self.diagnostics.push(FunctionDiagnostic::WindowFunctionNotAllowed {
                    name: name.clone(),
                    clause,
                    span,
                });
            }
            (FunctionKind::Aggregate, None, Clause::Where | Clause::GroupBy | Clause::Join) => {
                self.diagnostics.push(FunctionDiagnostic::AggregateNotAllowed {
                    name: name.clone(),
                    clause,
                    span,
                });
            }
            _ => {}
        }

        let args: Vec<SuppliedArg> = match call.star {
            true => vec![],
            false => call
                .argument_ids
                .iter()
                .map(|&id| SuppliedArg::from_node(self.ast, id))
                .collect(),
        };
        if spec.resolve(&args).is_none() {
            self.diagnostics.push(FunctionDiagnostic::SignatureMismatch {
                supplied_types: args.iter().map(|a| a.to_string()).collect(),
                expected: spec
                    .signatures()
                    .iter()
                    .map(|s| format!("{name}{s}"))
                    .collect(),
                name,
                span,
            });
        }
    }
}
