//! The Slang lexer: turns source text into a lazy stream of [`Token`]s.

use super::token::{Keyword, Operator, Token, TokenKind};
use crate::error::{Error, Result};
use crate::source::SourceLocation;

/// Configuration knobs for the scanner. The only one currently exposed is
/// the column width tabs expand to, which matters for error messages.
#[derive(Debug, Clone, Copy)]
pub struct ScannerConfig {
    /// Number of columns a tab character advances.
    pub tab_width: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig { tab_width: 4 }
    }
}

/// Produces a lazy, finite stream of tokens from a source string.
///
/// `Scanner` does not buffer the whole token stream: each call to
/// [`Scanner::next_token`] advances the cursor and returns exactly one
/// token (terminating on a never-ending stream of [`TokenKind::Eof`]).
pub struct Scanner<'src> {
    source: &'src [u8],
    pos: usize,
    line: u32,
    column: u32,
    config: ScannerConfig,
    eof_emitted: bool,
}

impl<'src> Scanner<'src> {
    /// Create a scanner over `source` using the default configuration.
    pub fn new(source: &'src str) -> Self {
        Self::with_config(source, ScannerConfig::default())
    }

    /// Create a scanner with an explicit configuration (e.g. a non-default tab width).
    pub fn with_config(source: &'src str, config: ScannerConfig) -> Self {
        Scanner {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            config,
            eof_emitted: false,
        }
    }

    /// Scan the whole input eagerly into a vector of tokens (including the
    /// trailing `Eof`). Convenience wrapper around [`Scanner::next_token`].
    pub fn scan_all(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = matches!(tok.kind, TokenKind::Eof);
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else if c == b'\t' {
            self.column += self.config.tab_width;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(0x0c)
                | Some(0x0b) => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            None => break,
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
    }

    fn is_ident_start(c: u8) -> bool {
        c.is_ascii_alphabetic() || c == b'_'
    }

    fn is_ident_continue(c: u8) -> bool {
        c.is_ascii_alphanumeric() || c == b'_'
    }

    /// Produce the next token, or [`TokenKind::Eof`] forever once the input
    /// is exhausted.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();
        let start = self.location();

        let Some(c) = self.peek() else {
            self.eof_emitted = true;
            return Ok(Token::new(TokenKind::Eof, "", start));
        };

        if Self::is_ident_start(c) {
            return Ok(self.scan_identifier(start));
        }
        if c == b'$' && self.peek_at(1).is_some_and(Self::is_ident_start) {
            return Ok(self.scan_macro_identifier(start));
        }
        if c.is_ascii_digit() {
            return self.scan_number(start);
        }
        if c == b'"' {
            return self.scan_string(start);
        }

        self.scan_operator(start)
    }

    fn scan_identifier(&mut self, start: SourceLocation) -> Token {
        let begin = self.pos;
        while self.peek().is_some_and(Self::is_ident_continue) {
            self.advance();
        }
        let text = std::str::from_utf8(&self.source[begin..self.pos])
            .unwrap()
            .to_string();

        // `name!` is a macro name, not a plain identifier.
        if self.peek() == Some(b'!') {
            self.advance();
            let lexeme = format!("{text}!");
            return Token::new(TokenKind::MacroName(text), lexeme, start);
        }

        if let Some(kw) = Keyword::from_str(&text) {
            return Token::new(TokenKind::Keyword(kw), text, start);
        }
        Token::new(TokenKind::Identifier(text.clone()), text, start)
    }

    fn scan_macro_identifier(&mut self, start: SourceLocation) -> Token {
        self.advance(); // '$'
        let begin = self.pos;
        while self.peek().is_some_and(Self::is_ident_continue) {
            self.advance();
        }
        let name = std::str::from_utf8(&self.source[begin..self.pos])
            .unwrap()
            .to_string();
        let lexeme = format!("${name}");
        Token::new(TokenKind::MacroIdentifier(name), lexeme, start)
    }

    fn scan_number(&mut self, start: SourceLocation) -> Result<Token> {
        let begin = self.pos;

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.advance();
            self.advance();
            let hex_begin = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let hex_text = std::str::from_utf8(&self.source[hex_begin..self.pos]).unwrap();
            if hex_text.is_empty() {
                return Err(Error::UnexpectedCharacter {
                    location: start,
                    ch: 'x',
                });
            }
            self.reject_alpha_suffix(start)?;
            let value = u32::from_str_radix(hex_text, 16)
                .map_err(|_| Error::InvalidSuffix { location: start })? as i32;
            let lexeme = std::str::from_utf8(&self.source[begin..self.pos])
                .unwrap()
                .to_string();
            return Ok(Token::new(TokenKind::IntLiteral(value), lexeme, start));
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            let mut probe = self.pos + 1;
            if matches!(self.source.get(probe), Some(b'+') | Some(b'-')) {
                probe += 1;
            }
            if self.source.get(probe).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                while self.pos < probe {
                    self.advance();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = save;
            }
        }

        self.reject_alpha_suffix(start)?;

        let text = std::str::from_utf8(&self.source[begin..self.pos]).unwrap();
        if is_float {
            let value: f32 = text
                .parse()
                .map_err(|_| Error::InvalidSuffix { location: start })?;
            Ok(Token::new(
                TokenKind::FloatLiteral(value),
                text.to_string(),
                start,
            ))
        } else {
            let value: i32 = text
                .parse()
                .map_err(|_| Error::InvalidSuffix { location: start })?;
            Ok(Token::new(
                TokenKind::IntLiteral(value),
                text.to_string(),
                start,
            ))
        }
    }

    fn reject_alpha_suffix(&mut self, start: SourceLocation) -> Result<()> {
        if self
            .peek()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == b'_')
        {
            return Err(Error::InvalidSuffix { location: start });
        }
        Ok(())
    }

    fn scan_string(&mut self, start: SourceLocation) -> Result<Token> {
        self.advance(); // opening quote
        let mut value = String::new();
        let lexeme_begin = self.pos - 1;
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return Err(Error::UnterminatedString { location: start });
                }
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    let esc_loc = self.location();
                    let Some(e) = self.advance() else {
                        return Err(Error::UnterminatedString { location: start });
                    };
                    value.push(match e {
                        b't' => '\t',
                        b'n' => '\n',
                        b'r' => '\r',
                        b'f' => 0x0c as char,
                        b'v' => 0x0b as char,
                        b'"' => '"',
                        b'\'' => '\'',
                        b'\\' => '\\',
                        _ => return Err(Error::InvalidEscape { location: esc_loc }),
                    });
                }
                Some(c) => {
                    self.advance();
                    value.push(c as char);
                }
            }
        }
        self.reject_alpha_suffix(start)?;
        let lexeme = std::str::from_utf8(&self.source[lexeme_begin..self.pos])
            .unwrap_or("")
            .to_string();
        Ok(Token::new(TokenKind::StringLiteral(value), lexeme, start))
    }

    fn scan_operator(&mut self, start: SourceLocation) -> Result<Token> {
        let remaining = &self.source[self.pos..];
        for (text, op) in Operator::TABLE {
            let bytes = text.as_bytes();
            if remaining.len() >= bytes.len() && &remaining[..bytes.len()] == bytes {
                for _ in 0..bytes.len() {
                    self.advance();
                }
                return Ok(Token::new(TokenKind::Operator(*op), *text, start));
            }
        }
        let ch = self.peek().unwrap() as char;
        Err(Error::UnexpectedCharacter {
            location: start,
            ch,
        })
    }
}

/// Lazily yields tokens one at a time; stops after the first `Eof`.
impl Iterator for Scanner<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.eof_emitted {
            return None;
        }
        match self.next_token() {
            Ok(tok) => {
                if matches!(tok.kind, TokenKind::Eof) {
                    self.eof_emitted = true;
                }
                Some(Ok(tok))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Scanner::new(src)
            .scan_all()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn hex_literal() {
        let toks = kinds("0x12");
        assert_eq!(toks[0], TokenKind::IntLiteral(18));
    }

    #[test]
    fn float_with_exponent() {
        let toks = kinds("1.2e-8");
        let TokenKind::FloatLiteral(f) = toks[0] else {
            panic!("expected float literal");
        };
        assert!((f - 1.2e-8).abs() < 1e-15);
    }

    #[test]
    fn string_escape() {
        let toks = kinds(r#""s\n""#);
        assert_eq!(toks[0], TokenKind::StringLiteral("s\n".to_string()));
    }

    #[test]
    fn macro_name_and_identifier() {
        let toks = kinds("a_b! $x");
        assert_eq!(toks[0], TokenKind::MacroName("a_b".to_string()));
        assert_eq!(toks[1], TokenKind::MacroIdentifier("x".to_string()));
    }

    #[test]
    fn multi_char_operators() {
        let toks = kinds(":: <<=");
        assert_eq!(toks[0], TokenKind::Operator(Operator::ColonColon));
        assert_eq!(toks[1], TokenKind::Operator(Operator::ShlEq));
    }

    #[test]
    fn unterminated_string_is_lexical_error() {
        let mut scanner = Scanner::new("\"abc\ndef\"");
        assert!(scanner.next_token().is_err());
    }

    #[test]
    fn skips_comments() {
        let toks = kinds("1 // comment\n/* block */ 2");
        assert_eq!(toks[0], TokenKind::IntLiteral(1));
        assert_eq!(toks[1], TokenKind::IntLiteral(2));
    }
}
