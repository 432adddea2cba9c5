use crate::parser::Precedence;
use std::fmt;

#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    Ident(String),
    /// Backtick-quoted identifier, may contain dots and dashes (`project-1.dataset.table`).
    QuotedIdent(String),
    /// `@name` query parameter (or `?` positional parameter).
    Parameter(String),
    Int(i64),
    /// Integer literal that does not fit into i64.
    BigInt(String),
    Float(f64),
    String(String),
    Bytes(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    EOF,
    Comma,
    Dot,
    Semicolon,
    NotEqual,
    Equal,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Plus,
    Minus,
    Star, // Used for both `SELECT *` and multiplication, disambiguated by the parser
    Divide,
    Concat,
    True,
    False,
    Null,
    With,
    Recursive,
    As,
    Select,
    Distinct,
    All,
    From,
    Where,
    Group,
    By,
    Having,
    Qualify,
    Order,
    Asc,
    Desc,
    Limit,
    Offset,
    Union,
    Intersect,
    Except,
    Join,
    Inner,
    Left,
    Right,
    Full,
    Outer,
    Cross,
    On,
    Using,
    And,
    Or,
    Not,
    Is,
    In,
    Like,
    Between,
    Case,
    When,
    Then,
    Else,
    End,
    Cast,
    SafeCast,
    Extract,
    Interval,
    Exists,
    Over,
    Partition,
    Rows,
    Range,
    Unbounded,
    Preceding,
    Following,
    Current,
    Row,
}

impl TokenType {
    /// Returns the operator precedence for this token type when it appears in infix position.
    ///
    /// Higher precedence values bind tighter. `NOT` is only an infix operator as part of
    /// `NOT IN`, `NOT LIKE` and `NOT BETWEEN`, so the parser asks for the precedence of the
    /// token following it instead of this one.
    /// Non-operator tokens default to the lowest precedence.
    pub(super) fn precedence(&self) -> Precedence {
        match self {
            TokenType::Or => Precedence::LogicalOr,
            TokenType::And => Precedence::LogicalAnd,
            TokenType::Between => Precedence::Between,
            TokenType::Like => Precedence::Like,
            TokenType::In => Precedence::In,
            TokenType::Is => Precedence::Is,

            TokenType::Equal
            | TokenType::NotEqual
            | TokenType::Less
            | TokenType::LessEqual
            | TokenType::Greater
            | TokenType::GreaterEqual => Precedence::Comparison,

            TokenType::Plus | TokenType::Minus | TokenType::Concat => Precedence::Additive,

            TokenType::Star | TokenType::Divide => Precedence::Multiplicative,

            TokenType::Dot | TokenType::LBracket => Precedence::Primary,

            // Everything else defaults to the lowest precedence
            _ => Precedence::Lowest,
        }
    }

    /// Maps a bare word to its keyword token, or `None` if it is a plain identifier.
    pub(super) fn keyword(word: &str) -> Option<TokenType> {
        let token_type = match word.to_ascii_lowercase().as_str() {
            "true" => TokenType::True,
            "false" => TokenType::False,
            "null" => TokenType::Null,
            "with" => TokenType::With,
            "recursive" => TokenType::Recursive,
            "as" => TokenType::As,
            "select" => TokenType::Select,
            "distinct" => TokenType::Distinct,
            "all" => TokenType::All,
            "from" => TokenType::From,
            "where" => TokenType::Where,
            "group" => TokenType::Group,
            "by" => TokenType::By,
            "having" => TokenType::Having,
            "qualify" => TokenType::Qualify,
            "order" => TokenType::Order,
            "asc" => TokenType::Asc,
            "desc" => TokenType::Desc,
            "limit" => TokenType::Limit,
            "offset" => TokenType::Offset,
            "union" => TokenType::Union,
            "intersect" => TokenType::Intersect,
            "except" => TokenType::Except,
            "join" => TokenType::Join,
            "inner" => TokenType::Inner,
            "left" => TokenType::Left,
            "right" => TokenType::Right,
            "full" => TokenType::Full,
            "outer" => TokenType::Outer,
            "cross" => TokenType::Cross,
            "on" => TokenType::On,
            "using" => TokenType::Using,
            "and" => TokenType::And,
            "or" => TokenType::Or,
            "not" => TokenType::Not,
            "is" => TokenType::Is,
            "in" => TokenType::In,
            "like" => TokenType::Like,
            "between" => TokenType::Between,
            "case" => TokenType::Case,
            "when" => TokenType::When,
            "then" => TokenType::Then,
            "else" => TokenType::Else,
            "end" => TokenType::End,
            "cast" => TokenType::Cast,
            "safe_cast" => TokenType::SafeCast,
            "extract" => TokenType::Extract,
            "interval" => TokenType::Interval,
            "exists" => TokenType::Exists,
            "over" => TokenType::Over,
            "partition" => TokenType::Partition,
            "rows" => TokenType::Rows,
            "range" => TokenType::Range,
            "unbounded" => TokenType::Unbounded,
            "preceding" => TokenType::Preceding,
            "following" => TokenType::Following,
            "current" => TokenType::Current,
            "row" => TokenType::Row,
            _ => return None,
        };
        Some(token_type)
    }

    /// Returns `true` for keywords that may also be used as function names
    /// (`LEFT(s, 3)`, `RIGHT(s, 3)`, `arr[OFFSET(0)]`).
    pub(super) fn is_function_keyword(&self) -> bool {
        matches!(self, TokenType::Left | TokenType::Right | TokenType::Offset)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Ident(s) => write!(f, "identifier `{s}`"),
            TokenType::QuotedIdent(s) => write!(f, "identifier `{s}`"),
            TokenType::Parameter(s) => write!(f, "parameter `@{s}`"),
            TokenType::Int(i) => write!(f, "integer `{i}`"),
            TokenType::BigInt(i) => write!(f, "integer `{i}`"),
            TokenType::Float(fl) => write!(f, "float `{fl}`"),
            TokenType::String(s) => write!(f, "string \"{s}\""),
            TokenType::Bytes(s) => write!(f, "bytes b\"{s}\""),
            TokenType::LParen => write!(f, "("),
            TokenType::RParen => write!(f, ")"),
            TokenType::LBracket => write!(f, "["),
            TokenType::RBracket => write!(f, "]"),
            TokenType::EOF => write!(f, "end of input"),
            TokenType::Comma => write!(f, ","),
            TokenType::Dot => write!(f, "."),
            TokenType::Semicolon => write!(f, ";"),
            TokenType::NotEqual => write!(f, "!="),
            TokenType::Equal => write!(f, "="),
            TokenType::Greater => write!(f, ">"),
            TokenType::GreaterEqual => write!(f, ">="),
            TokenType::Less => write!(f, "<"),
            TokenType::LessEqual => write!(f, "<="),
            TokenType::Plus => write!(f, "+"),
            TokenType::Minus => write!(f, "-"),
            TokenType::Star => write!(f, "*"),
            TokenType::Divide => write!(f, "/"),
            TokenType::Concat => write!(f, "||"),
            TokenType::True => write!(f, "TRUE"),
            TokenType::False => write!(f, "FALSE"),
            TokenType::Null => write!(f, "NULL"),
            TokenType::With => write!(f, "WITH"),
            TokenType::Recursive => write!(f, "RECURSIVE"),
            TokenType::As => write!(f, "AS"),
            TokenType::Select => write!(f, "SELECT"),
            TokenType::Distinct => write!(f, "DISTINCT"),
            TokenType::All => write!(f, "ALL"),
            TokenType::From => write!(f, "FROM"),
            TokenType::Where => write!(f, "WHERE"),
            TokenType::Group => write!(f, "GROUP"),
            TokenType::By => write!(f, "BY"),
            TokenType::Having => write!(f, "HAVING"),
            TokenType::Qualify => write!(f, "QUALIFY"),
            TokenType::Order => write!(f, "ORDER"),
            TokenType::Asc => write!(f, "ASC"),
            TokenType::Desc => write!(f, "DESC"),
            TokenType::Limit => write!(f, "LIMIT"),
            TokenType::Offset => write!(f, "OFFSET"),
            TokenType::Union => write!(f, "UNION"),
            TokenType::Intersect => write!(f, "INTERSECT"),
            TokenType::Except => write!(f, "EXCEPT"),
            TokenType::Join => write!(f, "JOIN"),
            TokenType::Inner => write!(f, "INNER"),
            TokenType::Left => write!(f, "LEFT"),
            TokenType::Right => write!(f, "RIGHT"),
            TokenType::Full => write!(f, "FULL"),
            TokenType::Outer => write!(f, "OUTER"),
            TokenType::Cross => write!(f, "CROSS"),
            TokenType::On => write!(f, "ON"),
            TokenType::Using => write!(f, "USING"),
            TokenType::And => write!(f, "AND"),
            TokenType::Or => write!(f, "OR"),
            TokenType::Not => write!(f, "NOT"),
            TokenType::Is => write!(f, "IS"),
            TokenType::In => write!(f, "IN"),
            TokenType::Like => write!(f, "LIKE"),
            TokenType::Between => write!(f, "BETWEEN"),
            TokenType::Case => write!(f, "CASE"),
            TokenType::When => write!(f, "WHEN"),
            TokenType::Then => write!(f, "THEN"),
            TokenType::Else => write!(f, "ELSE"),
            TokenType::End => write!(f, "END"),
            TokenType::Cast => write!(f, "CAST"),
            TokenType::SafeCast => write!(f, "SAFE_CAST"),
            TokenType::Extract => write!(f, "EXTRACT"),
            TokenType::Interval => write!(f, "INTERVAL"),
            TokenType::Exists => write!(f, "EXISTS"),
            TokenType::Over => write!(f, "OVER"),
            TokenType::Partition => write!(f, "PARTITION"),
            TokenType::Rows => write!(f, "ROWS"),
            TokenType::Range => write!(f, "RANGE"),
            TokenType::Unbounded => write!(f, "UNBOUNDED"),
            TokenType::Preceding => write!(f, "PRECEDING"),
            TokenType::Following => write!(f, "FOLLOWING"),
            TokenType::Current => write!(f, "CURRENT"),
            TokenType::Row => write!(f, "ROW"),
        }
    }
}

/// Single lexical unit together with its position in the source text.
///
/// `line` and `column` are 1-based and point at the first character of the token.
/// `offset` is the 0-based character offset of that character.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    /// Raw source text of the token.
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Token {
    pub fn new(
        token_type: TokenType,
        lexeme: impl Into<String>,
        line: usize,
        column: usize,
        offset: usize,
    ) -> Token {
        Token {
            token_type,
            lexeme: lexeme.into(),
            line,
            column,
            offset,
        }
    }

    /// Length of the token in characters.
    pub fn len(&self) -> usize {
        self.lexeme.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.lexeme.is_empty()
    }
}
