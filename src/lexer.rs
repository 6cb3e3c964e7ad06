use thiserror::Error;

use crate::token::{Position, Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unterminated string literal starting at {start}")]
    UnterminatedString { start: Position },
    #[error("Unexpected character '{character}' at {position}")]
    UnexpectedCharacter { character: char, position: Position },
}

pub type LexResult<T> = Result<T, LexError>;

fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

fn is_digit(byte: u8) -> bool {
    byte.is_ascii_digit()
}

fn is_number_body(byte: u8) -> bool {
    byte.is_ascii_digit() || byte == b'.'
}

/// Identifiers are any run of bytes that is not whitespace, bracket, colon or
/// dot. A leading digit starts a number instead.
fn is_ident_body(byte: u8) -> bool {
    !is_space(byte) && !matches!(byte, b'(' | b')' | b':' | b'.')
}

pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> LexResult<Option<Token>> {
        self.skip_trivia();
        let byte = match self.peek() {
            Some(byte) => byte,
            None => return Ok(None),
        };
        let start = self.position();

        let kind = match byte {
            b'(' => {
                self.advance();
                TokenKind::LParen
            }
            b')' => {
                self.advance();
                TokenKind::RParen
            }
            b':' => {
                self.advance();
                TokenKind::Colon
            }
            b'.' => {
                self.advance();
                TokenKind::Dot
            }
            b'"' => return self.read_string(start).map(Some),
            _ if is_digit(byte) || (byte == b'-' && self.peek_at(1).is_some_and(is_digit)) => {
                self.read_number()
            }
            _ => self.read_identifier(start)?,
        };

        Ok(Some(Token::new(kind, Span::new(start, self.position()))))
    }

    /// Whitespace and line comments may follow each other in any order, so
    /// both are consumed to a fixed point.
    fn skip_trivia(&mut self) {
        loop {
            let before = self.pos;
            while self.peek().is_some_and(is_space) {
                self.advance();
            }
            if self.peek() == Some(b';') {
                while self.peek().is_some_and(|byte| byte != b'\n') {
                    self.advance();
                }
            }
            if self.pos == before {
                return;
            }
        }
    }

    fn read_number(&mut self) -> TokenKind {
        let mut lexeme = String::new();
        if self.peek() == Some(b'-') {
            lexeme.push('-');
            self.advance();
        }
        while let Some(byte) = self.peek() {
            if !is_number_body(byte) {
                break;
            }
            lexeme.push(byte as char);
            self.advance();
        }
        TokenKind::Number(lexeme)
    }

    fn read_identifier(&mut self, start: Position) -> LexResult<TokenKind> {
        let mut lexeme = String::new();
        while let Some(byte) = self.peek() {
            if !is_ident_body(byte) {
                break;
            }
            lexeme.push(byte as char);
            self.advance();
        }
        if lexeme.is_empty() {
            return Err(LexError::UnexpectedCharacter {
                character: self.peek().unwrap_or(0) as char,
                position: start,
            });
        }
        Ok(TokenKind::Ident(lexeme))
    }

    fn read_string(&mut self, start: Position) -> LexResult<Token> {
        self.advance(); // opening quote
        let mut decoded = String::new();
        loop {
            let byte = self
                .peek()
                .ok_or(LexError::UnterminatedString { start })?;
            match byte {
                b'"' => {
                    self.advance();
                    let span = Span::new(start, self.position());
                    return Ok(Token::new(TokenKind::String(decoded), span));
                }
                b'\\' => {
                    self.advance();
                    let escaped = self
                        .peek()
                        .ok_or(LexError::UnterminatedString { start })?;
                    decoded.push(match escaped {
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'\\' => '\\',
                        b'f' => '\x0c',
                        b'b' => '\x08',
                        b'"' => '"',
                        other => other as char,
                    });
                    self.advance();
                }
                other => {
                    decoded.push(other as char);
                    self.advance();
                }
            }
        }
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
            offset: self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.input.get(self.pos + ahead).copied()
    }

    fn advance(&mut self) {
        if let Some(&byte) = self.input.get(self.pos) {
            self.pos += 1;
            if byte == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token>> {
    Lexer::new(input).tokenize()
}
