//! The scanner that produces tokens from source text.

use super::{Token, TokenKind};

/// A scanner that tokenizes Skiff source code.
///
/// Line breaks are significant to the parser, so runs of them are reported as
/// a single `Newline` token instead of being discarded with the rest of the
/// whitespace.
pub struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Scanner<'a> {
    /// Creates a new scanner for the given source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    /// Returns the next token from the source.
    pub fn next_token(&mut self) -> Token {
        if let Some(newline) = self.skip_blank() {
            return newline;
        }

        let line = self.line;
        let Some(ch) = self.advance() else {
            return Token::new(TokenKind::Eos, String::new(), line);
        };

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBrack,
            ']' => TokenKind::RBrack,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '?' => TokenKind::Question,
            '~' => TokenKind::Tilde,
            '^' => TokenKind::Caret,

            '+' => self.select3('+', TokenKind::PlusPlus, '=', TokenKind::PlusEq, TokenKind::Plus),
            '-' => self.select3('-', TokenKind::MinusMinus, '=', TokenKind::MinusEq, TokenKind::Minus),
            '*' => self.select3('*', TokenKind::StarStar, '=', TokenKind::StarEq, TokenKind::Star),
            '/' => self.select('=', TokenKind::SlashEq, TokenKind::Slash),
            '<' => self.select3('=', TokenKind::LtEq, '<', TokenKind::LtLt, TokenKind::Lt),
            '>' => self.select3('=', TokenKind::GtEq, '>', TokenKind::GtGt, TokenKind::Gt),
            '=' => self.select3('=', TokenKind::EqEq, '>', TokenKind::FatArrow, TokenKind::Eq),
            '!' => self.select('=', TokenKind::BangEq, TokenKind::Bang),
            '&' => self.select('&', TokenKind::AmpAmp, TokenKind::Amp),
            '|' => self.select('|', TokenKind::PipePipe, TokenKind::Pipe),
            ':' => self.select('=', TokenKind::ColonEq, TokenKind::Colon),
            '.' => return self.scan_dots(line),

            '"' => return self.scan_string(line),
            '0'..='9' => return self.scan_number(ch, line),
            _ if is_id_start(ch) => return self.scan_identifier(ch, line),

            _ => {
                return Token::new(
                    TokenKind::Invalid,
                    format!("invalid character {:?}", ch),
                    line,
                )
            }
        };

        Token::new(kind, String::new(), line)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.next();
        if ch == Some('\n') {
            self.line += 1;
        }
        ch
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next()
    }

    /// Consumes `next` and returns `then` when it is next, otherwise `other`.
    fn select(&mut self, next: char, then: TokenKind, other: TokenKind) -> TokenKind {
        if self.peek() == Some(next) {
            self.advance();
            then
        } else {
            other
        }
    }

    /// Two-way lookahead variant of [`select`](Self::select).
    fn select3(
        &mut self,
        a: char,
        then_a: TokenKind,
        b: char,
        then_b: TokenKind,
        other: TokenKind,
    ) -> TokenKind {
        match self.peek() {
            Some(ch) if ch == a => {
                self.advance();
                then_a
            }
            Some(ch) if ch == b => {
                self.advance();
                then_b
            }
            _ => other,
        }
    }

    /// Skips spaces, tabs, carriage returns and comments. A run of line
    /// breaks produces one `Newline` token reported at the line it started
    /// on; block comments count lines but stay whitespace.
    fn skip_blank(&mut self) -> Option<Token> {
        let mut newline_at = None;
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('\n') => {
                    newline_at.get_or_insert(self.line);
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
                _ => break,
            }
        }
        newline_at.map(|line| Token::new(TokenKind::Newline, String::new(), line))
    }

    fn scan_dots(&mut self, line: usize) -> Token {
        if self.peek() == Some('.') && self.peek_next() == Some('.') {
            self.advance();
            self.advance();
            Token::new(TokenKind::Ellipsis, String::new(), line)
        } else {
            Token::new(TokenKind::Dot, String::new(), line)
        }
    }

    fn scan_string(&mut self, line: usize) -> Token {
        let mut value = String::new();
        loop {
            match self.advance() {
                Some('"') => return Token::new(TokenKind::Str, value, line),
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(ch) => {
                        return Token::new(
                            TokenKind::Invalid,
                            format!("unknown escape sequence '\\{}'", ch),
                            line,
                        )
                    }
                    None => {
                        return Token::new(
                            TokenKind::Invalid,
                            "unterminated string literal".into(),
                            line,
                        )
                    }
                },
                Some('\n') | None => {
                    return Token::new(
                        TokenKind::Invalid,
                        "unterminated string literal".into(),
                        line,
                    )
                }
                Some(ch) => value.push(ch),
            }
        }
    }

    fn scan_number(&mut self, first: char, line: usize) -> Token {
        let mut lexeme = String::from(first);
        let mut kind = TokenKind::Int;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                lexeme.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            kind = TokenKind::Float;
            lexeme.push('.');
            self.advance();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    lexeme.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = self.peek_next();
            let exponent_follows = match sign {
                Some('+' | '-') => {
                    let mut iter = self.chars.clone();
                    iter.next();
                    iter.next();
                    iter.next().is_some_and(|c| c.is_ascii_digit())
                }
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if exponent_follows {
                kind = TokenKind::Float;
                lexeme.push('e');
                self.advance();
                if let Some(s @ ('+' | '-')) = self.peek() {
                    lexeme.push(s);
                    self.advance();
                }
                while let Some(ch) = self.peek() {
                    if ch.is_ascii_digit() {
                        lexeme.push(ch);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        Token::new(kind, lexeme, line)
    }

    fn scan_identifier(&mut self, first: char, line: usize) -> Token {
        let mut lexeme = String::from(first);
        while let Some(ch) = self.peek() {
            if is_id_continue(ch) {
                lexeme.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let kind = match lexeme.as_str() {
            "nil" => TokenKind::Nil,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "var" => TokenKind::Var,
            "const" => TokenKind::Const,
            "func" => TokenKind::Func,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "not" => TokenKind::Not,
            _ => TokenKind::Id,
        };
        Token::new(kind, lexeme, line)
    }
}

fn is_id_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_id_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}
