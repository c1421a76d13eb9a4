//! On-demand scanner for Lox source code.

use crate::cursor::Cursor;
use crate::token::{Token, TokenKind};

/// Scanner producing one token per call.
///
/// The scanner never fails: lexical errors come back as
/// [`TokenKind::Error`] tokens and the caller decides how to report them.
///
/// # Example
///
/// ```
/// use lox_lex::{Scanner, TokenKind};
///
/// let mut scanner = Scanner::new("var answer = 42;");
/// assert_eq!(scanner.next_token().kind, TokenKind::Var);
/// assert_eq!(scanner.next_token().kind, TokenKind::Identifier);
/// ```
pub struct Scanner<'a> {
    cursor: Cursor<'a>,

    /// Starting byte position of the token being scanned.
    start: usize,

    /// Line on which the current token starts.
    start_line: u32,
}

impl<'a> Scanner<'a> {
    /// Creates a scanner over `source`.
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
            start: 0,
            start_line: 1,
        }
    }

    /// Returns the next token, or an `Eof` token at the end of input.
    pub fn next_token(&mut self) -> Token<'a> {
        self.skip_whitespace_and_comments();

        self.start = self.cursor.position();
        self.start_line = self.cursor.line();

        if self.cursor.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.cursor.peek();
        self.cursor.advance();

        match c {
            '(' => self.make_token(TokenKind::LeftParen),
            ')' => self.make_token(TokenKind::RightParen),
            '{' => self.make_token(TokenKind::LeftBrace),
            '}' => self.make_token(TokenKind::RightBrace),
            ',' => self.make_token(TokenKind::Comma),
            '.' => self.make_token(TokenKind::Dot),
            '-' => self.make_token(TokenKind::Minus),
            '+' => self.make_token(TokenKind::Plus),
            ';' => self.make_token(TokenKind::Semicolon),
            '/' => self.make_token(TokenKind::Slash),
            '*' => self.make_token(TokenKind::Star),
            '!' => self.two_char('=', TokenKind::BangEqual, TokenKind::Bang),
            '=' => self.two_char('=', TokenKind::EqualEqual, TokenKind::Equal),
            '<' => self.two_char('=', TokenKind::LessEqual, TokenKind::Less),
            '>' => self.two_char('=', TokenKind::GreaterEqual, TokenKind::Greater),
            '"' => self.string(),
            c if c.is_ascii_digit() => self.number(),
            c if is_identifier_start(c) => self.identifier(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.cursor.peek() {
                ' ' | '\r' | '\t' | '\n' => self.cursor.advance(),
                '/' if self.cursor.peek_next() == '/' => {
                    // A line comment runs until the end of the line.
                    while self.cursor.peek() != '\n' && !self.cursor.is_at_end() {
                        self.cursor.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn two_char(&mut self, second: char, matched: TokenKind, single: TokenKind) -> Token<'a> {
        if self.cursor.match_char(second) {
            self.make_token(matched)
        } else {
            self.make_token(single)
        }
    }

    fn string(&mut self) -> Token<'a> {
        while self.cursor.peek() != '"' && !self.cursor.is_at_end() {
            self.cursor.advance();
        }

        if self.cursor.is_at_end() {
            return self.error_token("Unterminated string.");
        }

        // The closing quote.
        self.cursor.advance();
        self.make_token(TokenKind::String)
    }

    fn number(&mut self) -> Token<'a> {
        while self.cursor.peek().is_ascii_digit() {
            self.cursor.advance();
        }

        // A fractional part only counts with a digit after the dot.
        if self.cursor.peek() == '.' && self.cursor.peek_next().is_ascii_digit() {
            self.cursor.advance();
            while self.cursor.peek().is_ascii_digit() {
                self.cursor.advance();
            }
        }

        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'a> {
        while is_identifier_continue(self.cursor.peek()) {
            self.cursor.advance();
        }

        let kind = keyword_kind(self.cursor.slice_from(self.start));
        self.make_token(kind)
    }

    fn make_token(&self, kind: TokenKind) -> Token<'a> {
        Token {
            kind,
            lexeme: self.cursor.slice_from(self.start),
            line: self.start_line,
        }
    }

    fn error_token(&self, message: &'static str) -> Token<'a> {
        Token {
            kind: TokenKind::Error,
            lexeme: message,
            line: self.start_line,
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn keyword_kind(text: &str) -> TokenKind {
    match text {
        "and" => TokenKind::And,
        "class" => TokenKind::Class,
        "else" => TokenKind::Else,
        "false" => TokenKind::False,
        "for" => TokenKind::For,
        "fun" => TokenKind::Fun,
        "if" => TokenKind::If,
        "nil" => TokenKind::Nil,
        "or" => TokenKind::Or,
        "print" => TokenKind::Print,
        "return" => TokenKind::Return,
        "super" => TokenKind::Super,
        "this" => TokenKind::This,
        "true" => TokenKind::True,
        "var" => TokenKind::Var,
        "while" => TokenKind::While,
        _ => TokenKind::Identifier,
    }
}
