//! Scanner: source buffer -> token stream.
//!
//! Whitespace, `//` line comments and `/* ... */` block comments are
//! skipped entirely; they never reach the token stream. Every token
//! carries the 1-based line/column of its first character so later
//! stages can build a [`SourceLocation`] without re-scanning.

use crate::error::{CompileError, Result, SourceLocation};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Int,
    Char,
    Void,
    If,
    Else,
    For,
    While,
    Return,
    Sizeof,
    Struct,
    Union,
}

impl Keyword {
    fn from_str(s: &str) -> Option<Keyword> {
        Some(match s {
            "int" => Keyword::Int,
            "char" => Keyword::Char,
            "void" => Keyword::Void,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "for" => Keyword::For,
            "while" => Keyword::While,
            "return" => Keyword::Return,
            "sizeof" => Keyword::Sizeof,
            "struct" => Keyword::Struct,
            "union" => Keyword::Union,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Integer(i64),
    /// Decoded character literal value, already sign-extended from the
    /// underlying signed 8-bit byte the way the rest of this dialect's
    /// `char` arithmetic works.
    Character(i64),
    /// Decoded byte payload of a string literal, including the implicit
    /// trailing zero.
    Str(Vec<u8>),
    Keyword(Keyword),
    /// A fixed lexeme: punctuators and the `#`/`##` preprocessor markers.
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(&self.kind, TokenKind::Punct(s) if *s == p)
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(&self.kind, TokenKind::Keyword(k) if *k == kw)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }
}

/// Punctuators, longest first so the scanner's linear scan never matches a
/// short prefix (`=`) before a longer one that starts with it (`==`).
const PUNCTUATORS: &[&str] = &[
    "->", "==", "!=", "<=", ">=", "##", "+", "-", "*", "/", "(", ")", "{", "}", "[", "]", ",", ";",
    "=", "<", ">", "&", ".", "#",
];

pub struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    file: PathBuf,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str, file: &Path) -> Self {
        Scanner {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            file: file.to_path_buf(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let loc = self.here();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    location: loc,
                });
                break;
            };
            let token = if c.is_ascii_digit() {
                self.scan_integer(loc)
            } else if c == b'\'' {
                self.scan_character(loc)?
            } else if c == b'"' {
                self.scan_string(loc)?
            } else if is_ident_start(c) {
                self.scan_ident_or_keyword(loc)
            } else if let Some(p) = self.match_punct() {
                Token {
                    kind: TokenKind::Punct(p),
                    location: loc,
                }
            } else {
                return Err(CompileError::lex(
                    loc,
                    format!("unexpected character '{}'", c as char),
                ));
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn here(&self) -> SourceLocation {
        SourceLocation::new(self.file.clone(), self.line, self.col)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.here();
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            None => {
                                return Err(CompileError::lex(start, "unterminated block comment"));
                            }
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn scan_integer(&mut self, loc: SourceLocation) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let value: i64 = text.parse().unwrap_or(i64::MAX);
        Token {
            kind: TokenKind::Integer(value),
            location: loc,
        }
    }

    fn scan_ident_or_keyword(&mut self, loc: SourceLocation) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap()
            .to_string();
        let kind = match Keyword::from_str(&text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(text),
        };
        Token { kind, location: loc }
    }

    fn scan_character(&mut self, loc: SourceLocation) -> Result<Token> {
        self.advance(); // opening '
        let value = self.scan_escaped_byte(&loc)?;
        if self.peek() != Some(b'\'') {
            return Err(CompileError::lex(loc, "unterminated character literal"));
        }
        self.advance(); // closing '
        Ok(Token {
            kind: TokenKind::Character(value as i8 as i64),
            location: loc,
        })
    }

    fn scan_string(&mut self, loc: SourceLocation) -> Result<Token> {
        self.advance(); // opening "
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => return Err(CompileError::lex(loc, "unterminated string literal")),
                Some(b'"') => {
                    self.advance();
                    break;
                }
                _ => bytes.push(self.scan_escaped_byte(&loc)?),
            }
        }
        bytes.push(0);
        Ok(Token {
            kind: TokenKind::Str(bytes),
            location: loc,
        })
    }

    /// Scans one character-literal "element": either a plain byte or a
    /// backslash escape. Shared by character and string literals.
    fn scan_escaped_byte(&mut self, start: &SourceLocation) -> Result<u8> {
        let c = self
            .advance()
            .ok_or_else(|| CompileError::lex(start.clone(), "unexpected end of input"))?;
        if c != b'\\' {
            return Ok(c);
        }
        let e = self
            .advance()
            .ok_or_else(|| CompileError::lex(start.clone(), "unexpected end of input"))?;
        let value = match e {
            b'a' => 7,
            b'b' => 8,
            b'f' => 12,
            b'n' => 10,
            b'r' => 13,
            b't' => 9,
            // The corpus asserts '\v' == 8, colliding with '\b'. Followed
            // literally here; see DESIGN.md.
            b'v' => 8,
            b'e' => 27,
            b'"' => b'"',
            b'\'' => b'\'',
            b'?' => b'?',
            b'\\' => b'\\',
            b'x' | b'X' => {
                let mut value: u32 = 0;
                let mut any = false;
                while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                    let d = self.advance().unwrap();
                    value = value.wrapping_mul(16).wrapping_add(hex_digit(d));
                    any = true;
                }
                if !any {
                    return Err(CompileError::lex(
                        start.clone(),
                        "\\x escape with no hex digits",
                    ));
                }
                return Ok((value & 0xff) as u8);
            }
            b'0'..=b'7' => {
                let mut value: u32 = (e - b'0') as u32;
                for _ in 0..2 {
                    if matches!(self.peek(), Some(c) if (b'0'..=b'7').contains(&c)) {
                        let d = self.advance().unwrap();
                        value = value * 8 + (d - b'0') as u32;
                    } else {
                        break;
                    }
                }
                return Ok((value & 0xff) as u8);
            }
            other if other.is_ascii_alphabetic() => other,
            other => other,
        };
        Ok(value)
    }

    fn match_punct(&mut self) -> Option<&'static str> {
        for p in PUNCTUATORS {
            if self.src[self.pos..].starts_with(p.as_bytes()) {
                for _ in 0..p.len() {
                    self.advance();
                }
                return Some(p);
            }
        }
        None
    }
}

fn hex_digit(c: u8) -> u32 {
    match c {
        b'0'..=b'9' => (c - b'0') as u32,
        b'a'..=b'f' => (c - b'a' + 10) as u32,
        b'A'..=b'F' => (c - b'A' + 10) as u32,
        _ => unreachable!("caller already checked is_ascii_hexdigit"),
    }
}

pub(crate) fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

pub(crate) fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(src: &str) -> Vec<TokenKind> {
        Scanner::new(src, Path::new("test.c"))
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn skips_whitespace_and_comments() {
        let kinds = tokenize("  // comment\n/* block */ 42 ");
        assert_eq!(kinds, vec![TokenKind::Integer(42), TokenKind::Eof]);
    }

    #[test]
    fn punctuators_prefer_longest_match() {
        let kinds = tokenize("== = != !");
        // `!` alone is not a recognized punctuator in this dialect.
        assert!(matches!(kinds[0], TokenKind::Punct("==")));
        assert!(matches!(kinds[1], TokenKind::Punct("=")));
        assert!(matches!(kinds[2], TokenKind::Punct("!=")));
    }

    #[test]
    fn keywords_vs_identifiers() {
        let kinds = tokenize("int intx struct Struct");
        assert!(matches!(kinds[0], TokenKind::Keyword(Keyword::Int)));
        assert!(matches!(&kinds[1], TokenKind::Ident(s) if s == "intx"));
        assert!(matches!(kinds[2], TokenKind::Keyword(Keyword::Struct)));
        assert!(matches!(&kinds[3], TokenKind::Ident(s) if s == "Struct"));
    }

    #[test]
    fn character_escapes_match_corpus() {
        assert_eq!(tokenize("'\\v'")[0], TokenKind::Character(8));
        assert_eq!(tokenize("'\\b'")[0], TokenKind::Character(8));
        assert_eq!(tokenize("'\\e'")[0], TokenKind::Character(27));
        assert_eq!(tokenize("'\\x0aB'")[0], TokenKind::Character(-85));
        assert_eq!(tokenize("'\\x00ff'")[0], TokenKind::Character(-1));
        assert_eq!(tokenize("'\\127'")[0], TokenKind::Character(87));
        assert_eq!(tokenize("'\\A'")[0], TokenKind::Character(65));
    }

    #[test]
    fn string_literal_carries_trailing_zero() {
        let kinds = tokenize("\"ab\"");
        match &kinds[0] {
            TokenKind::Str(bytes) => assert_eq!(bytes, &[b'a', b'b', 0]),
            other => panic!("expected string literal, got {other:?}"),
        }
    }

    #[test]
    fn string_octal_then_digit() {
        // "\1500" decodes as octal \150 (= 'h' = 104) followed by the
        // literal character '0' (48).
        let kinds = tokenize("\"\\1500\"");
        match &kinds[0] {
            TokenKind::Str(bytes) => assert_eq!(bytes, &[104, 48, 0]),
            other => panic!("expected string literal, got {other:?}"),
        }
    }
}
