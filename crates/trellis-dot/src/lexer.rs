//! Tokenizer for the workflow language.
//!
//! Scanning is driven by hand so every token and every error carries an exact
//! 1-based line/column; the identifier, number, and duration-suffix shapes are
//! small `winnow` parsers run against the remaining input.

use trellis_types::{Result, TrellisError};
use winnow::ascii::digit1;
use winnow::combinator::{alt, not, opt, terminated};
use winnow::token::take_while;
use winnow::{ModalResult, Parser};

use crate::tokens::{Token, TokenKind};

const UNDIRECTED_EDGE: &str = "Undirected edges (--) are not supported; use directed edges (->)";

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parse an identifier: [A-Za-z_][A-Za-z0-9_]*
fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, is_ident_start),
        take_while(0.., is_ident_continue),
    )
        .take()
        .parse_next(input)
}

/// Optional sign, then `digits[.digits]` or `.digits`.
fn number_literal<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        opt('-'),
        alt((
            (digit1, opt(('.', digit1))).take(),
            ('.', digit1).take(),
        )),
    )
        .take()
        .parse_next(input)
}

/// A duration unit that is not the start of a longer identifier.
fn duration_unit<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    terminated(
        alt(("ms", "s", "m", "h", "d")),
        not(take_while(1, is_ident_continue)),
    )
    .parse_next(input)
}

/// Convert source text into tokens, ending with an `Eof` token.
///
/// Fails on the first malformed input; there is no partial result.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer<'s> {
    rest: &'s str,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            rest: source,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                self.tokens.push(Token::new(TokenKind::Eof, "", line, column));
                break;
            };
            match c {
                '{' => self.punct(TokenKind::LBrace),
                '}' => self.punct(TokenKind::RBrace),
                '[' => self.punct(TokenKind::LBracket),
                ']' => self.punct(TokenKind::RBracket),
                '=' => self.punct(TokenKind::Equals),
                ',' => self.punct(TokenKind::Comma),
                ';' => self.punct(TokenKind::Semicolon),
                '"' => self.string()?,
                '-' => match self.peek_second() {
                    Some('>') => {
                        self.advance(2);
                        self.tokens.push(Token::new(TokenKind::Arrow, "->", line, column));
                    }
                    Some('-') => return Err(self.error_at(UNDIRECTED_EDGE, line, column)),
                    _ => self.number()?,
                },
                '.' if self.peek_second().is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                '.' => self.punct(TokenKind::Dot),
                c if c.is_ascii_digit() => self.number()?,
                c if is_ident_start(c) => self.word()?,
                other => {
                    return Err(self.error_at(
                        format!("Unexpected character: '{other}'"),
                        line,
                        column,
                    ))
                }
            }
        }
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest.chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.rest = &self.rest[c.len_utf8()..];
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume `len` bytes worth of characters.
    fn advance(&mut self, len: usize) {
        let target = self.rest.len().saturating_sub(len);
        while self.rest.len() > target {
            if self.bump().is_none() {
                break;
            }
        }
    }

    fn error_at(&self, message: impl Into<String>, line: usize, column: usize) -> TrellisError {
        TrellisError::Lex {
            message: message.into(),
            line,
            column,
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            if self.rest.starts_with("//") {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
            } else if self.rest.starts_with("/*") {
                let (line, column) = (self.line, self.column);
                match self.rest[2..].find("*/") {
                    Some(end) => self.advance(end + 4),
                    None => return Err(self.error_at("Unterminated block comment", line, column)),
                }
            } else if self.peek().is_some_and(char::is_whitespace) {
                self.bump();
            } else {
                return Ok(());
            }
        }
    }

    fn punct(&mut self, kind: TokenKind) {
        let (line, column) = (self.line, self.column);
        if let Some(c) = self.bump() {
            self.tokens.push(Token::new(kind, c.to_string(), line, column));
        }
    }

    fn word(&mut self) -> Result<()> {
        let (line, column) = (self.line, self.column);
        let mut input = self.rest;
        let word = identifier
            .parse_next(&mut input)
            .map_err(|_| self.error_at("Expected identifier", line, column))?;
        self.advance(word.len());
        let kind = TokenKind::keyword(word).unwrap_or(TokenKind::Identifier);
        self.tokens.push(Token::new(kind, word, line, column));
        Ok(())
    }

    fn number(&mut self) -> Result<()> {
        let (line, column) = (self.line, self.column);
        let mut input = self.rest;
        let Ok(text) = number_literal.parse_next(&mut input) else {
            let c = self.peek().unwrap_or('-');
            return Err(self.error_at(format!("Unexpected character: '{c}'"), line, column));
        };
        self.advance(text.len());

        if !text.contains('.') {
            if let Ok(Some(unit)) = opt(duration_unit).parse_next(&mut input) {
                self.advance(unit.len());
                self.tokens.push(Token::new(
                    TokenKind::Duration,
                    format!("{text}{unit}"),
                    line,
                    column,
                ));
                return Ok(());
            }
            self.tokens
                .push(Token::new(TokenKind::Integer, text, line, column));
            return Ok(());
        }

        let normalized = if let Some(frac) = text.strip_prefix("-.") {
            format!("-0.{frac}")
        } else if text.starts_with('.') {
            format!("0{text}")
        } else {
            text.to_string()
        };
        self.tokens
            .push(Token::new(TokenKind::Float, normalized, line, column));
        Ok(())
    }

    fn string(&mut self) -> Result<()> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut value = String::new();
        loop {
            let (esc_line, esc_column) = (self.line, self.column);
            match self.bump() {
                None => return Err(self.error_at("Unterminated string", line, column)),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('"') => value.push('"'),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some(other) => {
                        return Err(self.error_at(
                            format!("Invalid escape sequence: \\{other}"),
                            esc_line,
                            esc_column,
                        ))
                    }
                    None => return Err(self.error_at("Unterminated string", line, column)),
                },
                Some(c) => value.push(c),
            }
        }
        self.tokens
            .push(Token::new(TokenKind::String, value, line, column));
        Ok(())
    }
}
