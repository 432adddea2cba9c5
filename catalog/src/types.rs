//! Types module - BigQuery column types known to the catalog and the validator.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents all types a column (or an expression) can have in the supported BigQuery subset.
///
/// [`ColumnType::Unknown`] is the explicit "could not resolve" sentinel. It is never silently
/// replaced with a concrete type; consumers treat it as "skip further checks".
///
/// On the wire (catalog JSON files, reports) a type is written in BigQuery's own spelling,
/// e.g. `"TIMESTAMP"`, `"ARRAY<STRING>"` or `"STRUCT<id INT64, tags ARRAY<STRING>>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Date,
    Datetime,
    Time,
    Timestamp,
    String,
    Bytes,
    Int64,
    Numeric,
    BigNumeric,
    Float64,
    Bool,
    Interval,
    Json,
    Array(Box<ColumnType>),
    Struct(Vec<StructField>),
    Unknown,
}

/// Single named field of a [`ColumnType::Struct`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: String,
    pub ty: ColumnType,
}

impl StructField {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        StructField {
            name: name.into(),
            ty,
        }
    }
}

/// Error returned when a type name cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeParseError {
    #[error("unknown type name '{0}'")]
    UnknownTypeName(String),
    #[error("malformed type '{input}': {reason}")]
    Malformed { input: String, reason: String },
}

impl ColumnType {
    /// Maps a scalar BigQuery type name (or one of its aliases) to a [`ColumnType`].
    /// Parameterized types (`ARRAY<..>`, `STRUCT<..>`) are handled by [`ColumnType::from_str`].
    pub fn from_name(name: &str) -> Option<ColumnType> {
        let ty = match name.to_ascii_uppercase().as_str() {
            "DATE" => ColumnType::Date,
            "DATETIME" => ColumnType::Datetime,
            "TIME" => ColumnType::Time,
            "TIMESTAMP" => ColumnType::Timestamp,
            "STRING" => ColumnType::String,
            "BYTES" => ColumnType::Bytes,
            "INT64" | "INT" | "INTEGER" | "SMALLINT" | "BIGINT" | "TINYINT" | "BYTEINT" => {
                ColumnType::Int64
            }
            "NUMERIC" | "DECIMAL" => ColumnType::Numeric,
            "BIGNUMERIC" | "BIGDECIMAL" => ColumnType::BigNumeric,
            "FLOAT64" | "FLOAT" => ColumnType::Float64,
            "BOOL" | "BOOLEAN" => ColumnType::Bool,
            "INTERVAL" => ColumnType::Interval,
            "JSON" => ColumnType::Json,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ColumnType::Unknown)
    }

    /// Returns `true` for INT64, NUMERIC, BIGNUMERIC and FLOAT64.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int64 | ColumnType::Numeric | ColumnType::BigNumeric | ColumnType::Float64
        )
    }

    /// Returns `true` for DATE, DATETIME, TIME and TIMESTAMP.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::Datetime | ColumnType::Time | ColumnType::Timestamp
        )
    }

    /// Position of numeric type in the implicit widening chain INT64 -> NUMERIC -> BIGNUMERIC -> FLOAT64.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            ColumnType::Int64 => Some(0),
            ColumnType::Numeric => Some(1),
            ColumnType::BigNumeric => Some(2),
            ColumnType::Float64 => Some(3),
            _ => None,
        }
    }

    /// Returns `Some(type)` where `type` can hold both values of `lhs` and `rhs` without an explicit cast.
    /// If such type does not exist `None` is returned.
    ///
    /// [`ColumnType::Unknown`] coerces with anything and yields [`ColumnType::Unknown`].
    pub fn coercion(lhs: &ColumnType, rhs: &ColumnType) -> Option<ColumnType> {
        if lhs.is_unknown() || rhs.is_unknown() {
            return Some(ColumnType::Unknown);
        }
        if lhs == rhs {
            return Some(lhs.clone());
        }
        if let (Some(l), Some(r)) = (lhs.numeric_rank(), rhs.numeric_rank()) {
            return Some(if l >= r { lhs.clone() } else { rhs.clone() });
        }
        match (lhs, rhs) {
            (ColumnType::Date, ColumnType::Datetime) | (ColumnType::Datetime, ColumnType::Date) => {
                Some(ColumnType::Datetime)
            }
            (ColumnType::Array(l), ColumnType::Array(r)) => {
                ColumnType::coercion(l, r).map(|inner| ColumnType::Array(Box::new(inner)))
            }
            _ => None,
        }
    }

    /// Returns type of field `name` if this is a struct containing such field.
    /// Field names are matched case-insensitively, as in BigQuery.
    pub fn field(&self, name: &str) -> Option<&ColumnType> {
        match self {
            ColumnType::Struct(fields) => fields
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(name))
                .map(|f| &f.ty),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Date => write!(f, "DATE"),
            ColumnType::Datetime => write!(f, "DATETIME"),
            ColumnType::Time => write!(f, "TIME"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
            ColumnType::String => write!(f, "STRING"),
            ColumnType::Bytes => write!(f, "BYTES"),
            ColumnType::Int64 => write!(f, "INT64"),
            ColumnType::Numeric => write!(f, "NUMERIC"),
            ColumnType::BigNumeric => write!(f, "BIGNUMERIC"),
            ColumnType::Float64 => write!(f, "FLOAT64"),
            ColumnType::Bool => write!(f, "BOOL"),
            ColumnType::Interval => write!(f, "INTERVAL"),
            ColumnType::Json => write!(f, "JSON"),
            ColumnType::Array(inner) => write!(f, "ARRAY<{inner}>"),
            ColumnType::Struct(fields) => {
                write!(f, "STRUCT<")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", field.name, field.ty)?;
                }
                write!(f, ">")
            }
            ColumnType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = TypeNameParser {
            input: s,
            chars: s.chars().collect(),
            pos: 0,
        };
        let ty = parser.parse_type()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(parser.malformed("unexpected trailing characters"));
        }
        Ok(ty)
    }
}

impl TryFrom<String> for ColumnType {
    type Error = TypeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

/// Small recursive-descent parser for type names such as `ARRAY<STRUCT<a INT64, b STRING>>`.
struct TypeNameParser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl TypeNameParser<'_> {
    fn parse_type(&mut self) -> Result<ColumnType, TypeParseError> {
        let word = self.read_word();
        if word.is_empty() {
            return Err(self.malformed("expected type name"));
        }
        match word.to_ascii_uppercase().as_str() {
            "ARRAY" => {
                self.expect('<')?;
                let inner = self.parse_type()?;
                self.expect('>')?;
                Ok(ColumnType::Array(Box::new(inner)))
            }
            "STRUCT" => {
                self.expect('<')?;
                let mut fields = Vec::new();
                loop {
                    let name = self.read_word();
                    if name.is_empty() {
                        return Err(self.malformed("expected struct field name"));
                    }
                    let ty = self.parse_type()?;
                    fields.push(StructField::new(name, ty));
                    self.skip_whitespace();
                    match self.chars.get(self.pos) {
                        Some(',') => self.pos += 1,
                        _ => break,
                    }
                }
                self.expect('>')?;
                Ok(ColumnType::Struct(fields))
            }
            _ => {
                let ty = ColumnType::from_name(&word)
                    .ok_or_else(|| TypeParseError::UnknownTypeName(word.clone()))?;
                // Parameterized scalars such as STRING(10) or NUMERIC(10, 2) carry no extra meaning here.
                self.skip_whitespace();
                if self.chars.get(self.pos) == Some(&'(') {
                    while self.pos < self.chars.len() && self.chars[self.pos] != ')' {
                        self.pos += 1;
                    }
                    self.expect(')')?;
                }
                Ok(ty)
            }
        }
    }

    fn read_word(&mut self) -> String {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.chars.len()
            && (self.chars[self.pos].is_ascii_alphanumeric() || self.chars[self.pos] == '_')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn expect(&mut self, ch: char) -> Result<(), TypeParseError> {
        self.skip_whitespace();
        if self.chars.get(self.pos) == Some(&ch) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.malformed(&format!("expected '{ch}'")))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn malformed(&self, reason: &str) -> TypeParseError {
        TypeParseError::Malformed {
            input: self.input.to_string(),
            reason: reason.to_string(),
        }
    }
}
