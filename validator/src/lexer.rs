use thiserror::Error;

use super::tokens::{Token, TokenType};

/// Error returned when the input cannot be split into tokens. Lex errors are fatal for the query.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum LexError {
    #[error("unterminated string literal starting at {line}:{column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("unterminated block comment starting at {line}:{column}")]
    UnterminatedComment { line: usize, column: usize },
    #[error("unterminated quoted identifier starting at {line}:{column}")]
    UnterminatedIdentifier { line: usize, column: usize },
    #[error("unexpected character '{ch}' at {line}:{column}")]
    UnexpectedCharacter { ch: char, line: usize, column: usize },
}

impl LexError {
    /// Returns `(line, column)` the error points at.
    pub fn position(&self) -> (usize, usize) {
        match self {
            LexError::UnterminatedString { line, column }
            | LexError::UnterminatedComment { line, column }
            | LexError::UnterminatedIdentifier { line, column }
            | LexError::UnexpectedCharacter { line, column, .. } => (*line, *column),
        }
    }
}

/// Splits `text` into tokens. The returned vector always ends with [`TokenType::EOF`].
pub fn tokenize(text: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(text);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = token.token_type == TokenType::EOF;
        tokens.push(token);
        if is_eof {
            return Ok(tokens);
        }
    }
}

/// Responsible for transforming BigQuery SQL text into a stream of [`Token`]s.
///
/// The [`Lexer`] processes the input character-by-character, keeping track of the position,
/// line and column of the current character, so every token (and every error) points at a
/// real place in the source. Comments are skipped and never produce tokens.
pub struct Lexer {
    /// Input characters collected into a vector to simplify access logic.
    input: Vec<char>,
    /// Index of the current character (`input.len()` once the input is exhausted).
    pos: usize,
    /// Next character index to be read.
    read_pos: usize,
    /// Current character being processed (`'\0'` at the end of input).
    ch: char,
    /// 1-based column of the current character.
    column: usize,
    /// 1-based line of the current character.
    line: usize,
}

/// Position where the token currently being read starts.
#[derive(Clone, Copy)]
struct Start {
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Lexer {
        let mut lexer = Lexer {
            input: input.chars().collect(),
            pos: 0,
            read_pos: 0,
            column: 0,
            ch: '\0',
            line: 1,
        };
        lexer.read_char();
        lexer
    }

    /// Reads the next char and updates [`Lexer`] internal state, while accounting for end of input
    /// and new lines.
    fn read_char(&mut self) {
        if self.ch == '\n' && self.pos < self.input.len() {
            self.line += 1;
            self.column = 0;
        }
        self.column += 1;
        if self.read_pos >= self.input.len() {
            self.ch = '\0';
            self.pos = self.input.len();
            self.read_pos = self.input.len() + 1;
            return;
        }
        self.ch = self.input[self.read_pos];
        self.pos = self.read_pos;
        self.read_pos += 1;
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_char(&self) -> char {
        self.peek_nth(1)
    }

    /// Returns character `n` positions after the current one.
    fn peek_nth(&self, n: usize) -> char {
        self.input.get(self.pos + n).copied().unwrap_or('\0')
    }

    fn start(&self) -> Start {
        Start {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn create_token(&self, token_type: TokenType, start: Start) -> Token {
        let end = self.pos.min(self.input.len());
        let lexeme: String = self.input[start.pos.min(end)..end].iter().collect();
        Token::new(token_type, lexeme, start.line, start.column, start.pos)
    }

    /// Skips whitespace together with `--`, `#` and `/* */` comments.
    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while !self.is_at_end() && self.ch.is_whitespace() {
                self.read_char();
            }
            if self.is_at_end() {
                return Ok(());
            }
            let line_comment =
                self.ch == '#' || (self.ch == '-' && self.peek_char() == '-');
            if line_comment {
                while !self.is_at_end() && self.ch != '\n' {
                    self.read_char();
                }
            } else if self.ch == '/' && self.peek_char() == '*' {
                let start = self.start();
                self.read_char();
                self.read_char();
                loop {
                    if self.is_at_end() {
                        return Err(LexError::UnterminatedComment {
                            line: start.line,
                            column: start.column,
                        });
                    }
                    if self.ch == '*' && self.peek_char() == '/' {
                        self.read_char();
                        self.read_char();
                        break;
                    }
                    self.read_char();
                }
            } else {
                return Ok(());
            }
        }
    }

    /// Reads an identifier (or keyword) from current position.
    fn read_identifier(&mut self) -> String {
        let pos = self.pos;
        while self.ch.is_alphanumeric() || self.ch == '_' {
            self.read_char();
        }
        self.input[pos..self.pos].iter().collect()
    }

    /// Reads a numeric literal. Literals with a decimal point or an exponent are floats,
    /// the rest are integers (or [`TokenType::BigInt`] when they overflow i64).
    fn read_numeric(&mut self, start: Start) -> Token {
        let mut is_float = false;
        while self.ch.is_ascii_digit() {
            self.read_char();
        }
        if self.ch == '.' {
            is_float = true;
            self.read_char();
            while self.ch.is_ascii_digit() {
                self.read_char();
            }
        }
        let has_exponent = matches!(self.ch, 'e' | 'E')
            && (self.peek_char().is_ascii_digit()
                || (matches!(self.peek_char(), '+' | '-') && self.peek_nth(2).is_ascii_digit()));
        if has_exponent {
            is_float = true;
            self.read_char();
            if matches!(self.ch, '+' | '-') {
                self.read_char();
            }
            while self.ch.is_ascii_digit() {
                self.read_char();
            }
        }
        let literal: String = self.input[start.pos..self.pos].iter().collect();
        let token_type = match is_float {
            true => match literal.parse::<f64>() {
                Ok(float) => TokenType::Float(float),
                Err(_) => TokenType::BigInt(literal),
            },
            false => match literal.parse::<i64>() {
                Ok(integer) => TokenType::Int(integer),
                Err(_) => TokenType::BigInt(literal),
            },
        };
        self.create_token(token_type, start)
    }

    /// Reads a string literal starting at the current quote character.
    ///
    /// Supports single and double quotes, triple-quoted strings and backslash escapes.
    /// In raw strings backslashes are kept verbatim (they still prevent the next quote from
    /// closing the literal).
    fn read_string(&mut self, start: Start, raw: bool) -> Result<String, LexError> {
        let quote = self.ch;
        let triple = self.peek_char() == quote && self.peek_nth(2) == quote;
        let quote_len = if triple { 3 } else { 1 };
        for _ in 0..quote_len {
            self.read_char();
        }

        let unterminated = LexError::UnterminatedString {
            line: start.line,
            column: start.column,
        };
        let mut result = String::new();
        loop {
            if self.is_at_end() {
                return Err(unterminated);
            }
            if self.ch == quote
                && (!triple || (self.peek_char() == quote && self.peek_nth(2) == quote))
            {
                for _ in 0..quote_len {
                    self.read_char();
                }
                return Ok(result);
            }
            if !triple && self.ch == '\n' {
                return Err(unterminated);
            }
            if self.ch == '\\' {
                self.read_char();
                if self.is_at_end() {
                    return Err(unterminated);
                }
                if raw {
                    result.push('\\');
                    result.push(self.ch);
                } else {
                    match self.ch {
                        'n' => result.push('\n'),
                        'r' => result.push('\r'),
                        't' => result.push('\t'),
                        '0' => result.push('\0'),
                        ch => result.push(ch),
                    }
                }
            } else {
                result.push(self.ch);
            }
            self.read_char();
        }
    }

    /// Reads backtick-quoted identifier such as `` `project.dataset.table` ``.
    fn read_quoted_identifier(&mut self, start: Start) -> Result<Token, LexError> {
        self.read_char();
        let mut result = String::new();
        loop {
            if self.is_at_end() || self.ch == '\n' {
                return Err(LexError::UnterminatedIdentifier {
                    line: start.line,
                    column: start.column,
                });
            }
            match self.ch {
                '`' => {
                    self.read_char();
                    return Ok(self.create_token(TokenType::QuotedIdent(result), start));
                }
                '\\' => {
                    self.read_char();
                    result.push(self.ch);
                }
                ch => result.push(ch),
            }
            self.read_char();
        }
    }

    fn read_parameter(&mut self, start: Start) -> Result<Token, LexError> {
        self.read_char();
        // `@@name` system variables are treated as parameters as well.
        if self.ch == '@' {
            self.read_char();
        }
        if !(self.ch.is_alphabetic() || self.ch == '_') {
            return Err(LexError::UnexpectedCharacter {
                ch: '@',
                line: start.line,
                column: start.column,
            });
        }
        let name = self.read_identifier();
        Ok(self.create_token(TokenType::Parameter(name), start))
    }

    fn unexpected(&self, start: Start) -> LexError {
        LexError::UnexpectedCharacter {
            ch: self.input[start.pos],
            line: start.line,
            column: start.column,
        }
    }

    /// Returns the next token from the input stream.
    ///
    /// Helpers that read multi-character tokens (`read_string`, `read_identifier`, `read_numeric`...)
    /// leave the lexer on the first character after the token, so they return immediately.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments()?;
        let start = self.start();
        if self.is_at_end() {
            return Ok(self.create_token(TokenType::EOF, start));
        }

        let token_type = match self.ch {
            '!' => match self.peek_char() {
                '=' => {
                    self.read_char();
                    TokenType::NotEqual
                }
                _ => return Err(self.unexpected(start)),
            },
            '>' => match self.peek_char() {
                '=' => {
                    self.read_char();
                    TokenType::GreaterEqual
                }
                _ => TokenType::Greater,
            },
            '<' => match self.peek_char() {
                '=' => {
                    self.read_char();
                    TokenType::LessEqual
                }
                '>' => {
                    self.read_char();
                    TokenType::NotEqual
                }
                _ => TokenType::Less,
            },
            '|' => match self.peek_char() {
                '|' => {
                    self.read_char();
                    TokenType::Concat
                }
                _ => return Err(self.unexpected(start)),
            },
            '.' => match self.peek_char() {
                peek_ch if peek_ch.is_ascii_digit() => return Ok(self.read_numeric(start)),
                _ => TokenType::Dot,
            },
            '+' => TokenType::Plus,
            '-' => TokenType::Minus,
            '*' => TokenType::Star,
            '/' => TokenType::Divide,
            '(' => TokenType::LParen,
            ')' => TokenType::RParen,
            '[' => TokenType::LBracket,
            ']' => TokenType::RBracket,
            ',' => TokenType::Comma,
            ';' => TokenType::Semicolon,
            '=' => TokenType::Equal,
            '?' => TokenType::Parameter(String::from("?")),
            '@' => return self.read_parameter(start),
            '`' => return self.read_quoted_identifier(start),
            '\'' | '"' => {
                let value = self.read_string(start, false)?;
                return Ok(self.create_token(TokenType::String(value), start));
            }
            ch if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_identifier();
                let prefix = ident.to_ascii_lowercase();
                let is_prefix = matches!(prefix.as_str(), "r" | "b" | "rb" | "br");
                if is_prefix && matches!(self.ch, '\'' | '"') {
                    let value = self.read_string(start, prefix.contains('r'))?;
                    let token_type = match prefix.contains('b') {
                        true => TokenType::Bytes(value),
                        false => TokenType::String(value),
                    };
                    return Ok(self.create_token(token_type, start));
                }
                let token_type = TokenType::keyword(&ident).unwrap_or(TokenType::Ident(ident));
                return Ok(self.create_token(token_type, start));
            }
            ch if ch.is_ascii_digit() => return Ok(self.read_numeric(start)),
            _ => return Err(self.unexpected(start)),
        };
        self.read_char();
        Ok(self.create_token(token_type, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_works(input: &str, expected_tokens: &[TokenType]) {
        let tokens = tokenize(input).unwrap();
        let actual: Vec<_> = tokens.iter().map(|t| t.token_type.clone()).collect();
        assert_eq!(
            expected_tokens,
            actual.as_slice(),
            "Tokens for input {input:?} don't match"
        );
    }

    fn ident(name: &str) -> TokenType {
        TokenType::Ident(name.into())
    }

    #[test]
    fn test_empty() {
        assert_works("", &[TokenType::EOF]);
        assert_works("   -- only comment", &[TokenType::EOF]);
    }

    #[test]
    fn test_single_char_tokens() {
        assert_works(
            "()[]+-*/,;.=",
            &[
                TokenType::LParen,
                TokenType::RParen,
                TokenType::LBracket,
                TokenType::RBracket,
                TokenType::Plus,
                TokenType::Minus,
                TokenType::Star,
                TokenType::Divide,
                TokenType::Comma,
                TokenType::Semicolon,
                TokenType::Dot,
                TokenType::Equal,
                TokenType::EOF,
            ],
        );
    }

    #[test]
    fn test_multichar_operators() {
        assert_works(
            "a != b <> c <= d >= e || f < g > h",
            &[
                ident("a"),
                TokenType::NotEqual,
                ident("b"),
                TokenType::NotEqual,
                ident("c"),
                TokenType::LessEqual,
                ident("d"),
                TokenType::GreaterEqual,
                ident("e"),
                TokenType::Concat,
                ident("f"),
                TokenType::Less,
                ident("g"),
                TokenType::Greater,
                ident("h"),
                TokenType::EOF,
            ],
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_works(
            "select Select SELECT sElEcT qualify WITH recursive",
            &[
                TokenType::Select,
                TokenType::Select,
                TokenType::Select,
                TokenType::Select,
                TokenType::Qualify,
                TokenType::With,
                TokenType::Recursive,
                TokenType::EOF,
            ],
        );
    }

    #[test]
    fn test_numeric_literals() {
        assert_works(
            "42 3.14 .5 1e3 2.5E-2 99999999999999999999",
            &[
                TokenType::Int(42),
                TokenType::Float(3.14),
                TokenType::Float(0.5),
                TokenType::Float(1000.0),
                TokenType::Float(0.025),
                TokenType::BigInt("99999999999999999999".into()),
                TokenType::EOF,
            ],
        );
    }

    #[test]
    fn test_string_literals() {
        assert_works(
            r#"'it\'s' "double" r'\d+' b'abc' '''multi
line''' """x"y""""#,
            &[
                TokenType::String("it's".into()),
                TokenType::String("double".into()),
                TokenType::String("\\d+".into()),
                TokenType::Bytes("abc".into()),
                TokenType::String("multi\nline".into()),
                TokenType::String("x\"y".into()),
                TokenType::EOF,
            ],
        );
    }

    #[test]
    fn test_quoted_identifiers_and_parameters() {
        assert_works(
            "SELECT * FROM `my-project.sales.orders` WHERE d > @start_date AND x = ?",
            &[
                TokenType::Select,
                TokenType::Star,
                TokenType::From,
                TokenType::QuotedIdent("my-project.sales.orders".into()),
                TokenType::Where,
                ident("d"),
                TokenType::Greater,
                TokenType::Parameter("start_date".into()),
                TokenType::And,
                ident("x"),
                TokenType::Equal,
                TokenType::Parameter("?".into()),
                TokenType::EOF,
            ],
        );
    }

    #[test]
    fn test_comments_are_skipped_and_positions_are_real() {
        // given
        let input = "SELECT a -- trailing\n# hash comment\n/* block\ncomment */ FROM t";

        // when
        let tokens = tokenize(input).unwrap();

        // then
        let kinds: Vec<_> = tokens.iter().map(|t| t.token_type.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenType::Select,
                ident("a"),
                TokenType::From,
                ident("t"),
                TokenType::EOF
            ]
        );
        let from = &tokens[2];
        assert_eq!((from.line, from.column), (4, 12));
        assert_eq!(from.offset, input.find("FROM").unwrap());
        assert_eq!(from.lexeme, "FROM");
        let t = &tokens[3];
        assert_eq!((t.line, t.column, t.len()), (4, 17, 1));
    }

    #[test]
    fn test_token_positions_on_first_line() {
        let tokens = tokenize("SELECT  x").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column, tokens[0].offset), (1, 1, 0));
        assert_eq!((tokens[1].line, tokens[1].column, tokens[1].offset), (1, 9, 8));
        assert_eq!(tokens[2].token_type, TokenType::EOF);
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            tokenize("SELECT 'abc").unwrap_err(),
            LexError::UnterminatedString { line: 1, column: 8 }
        );
        assert_eq!(
            tokenize("SELECT '''abc''").unwrap_err(),
            LexError::UnterminatedString { line: 1, column: 8 }
        );
    }

    #[test]
    fn test_unterminated_comment_and_identifier() {
        assert_eq!(
            tokenize("SELECT 1\n/* never closed").unwrap_err(),
            LexError::UnterminatedComment { line: 2, column: 1 }
        );
        assert_eq!(
            tokenize("SELECT * FROM `proj.ds").unwrap_err(),
            LexError::UnterminatedIdentifier {
                line: 1,
                column: 15
            }
        );
    }

    #[test]
    fn test_unexpected_character() {
        assert_eq!(
            tokenize("SELECT a ! b").unwrap_err(),
            LexError::UnexpectedCharacter {
                ch: '!',
                line: 1,
                column: 10
            }
        );
        assert_eq!(
            tokenize("SELECT $x").unwrap_err(),
            LexError::UnexpectedCharacter {
                ch: '$',
                line: 1,
                column: 8
            }
        );
    }
}
