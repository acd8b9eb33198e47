//! Hand-written scanner for NAAb source.
//!
//! Produces a flat token vector with `(line, column)` positions. Polyglot
//! blocks are the one unusual case: between `<<lang` and `>>` the scanner does
//! not tokenize at all, it captures the raw byte span verbatim (interior
//! whitespace included) together with the optional `[a, b, …]` bound-variable
//! list that directly follows the language name.

use std::{iter::Peekable, str::Chars};

use crate::token::{keyword, Span, Token, TokenKind};

/// A scan failure with the position of the offending byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer<'a> {
    iter: Peekable<Chars<'a>>,
    tokens: Vec<Token>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            iter: input.chars().peekable(),
            tokens: Vec::new(),
            line: 1,
            column: 1,
        }
    }

    /// Scans the whole input, ending the stream with an `Eof` token.
    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        loop {
            self.skip_trivia()?;
            let span = self.span();
            let Some(&c) = self.iter.peek() else {
                self.tokens.push(Token::new(TokenKind::Eof, span));
                return Ok(self.tokens);
            };
            match c {
                'a'..='z' | 'A'..='Z' | '_' => self.lex_word(),
                '0'..='9' => self.lex_number(span)?,
                '"' | '\'' => self.lex_string(span)?,
                _ => self.lex_operator(span)?,
            }
        }
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.iter.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_if(&mut self, expected: char) -> bool {
        if self.iter.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn push(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token::new(kind, span));
    }

    /// Skips whitespace, `//` line comments, and `/* */` block comments.
    fn skip_trivia(&mut self) -> LexResult<()> {
        loop {
            match self.iter.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut lookahead = self.iter.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some('/') => {
                            while let Some(&c) = self.iter.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.bump();
                            }
                        }
                        Some('*') => {
                            let open = self.span();
                            self.bump();
                            self.bump();
                            loop {
                                match self.bump() {
                                    Some('*') if self.bump_if('/') => break,
                                    Some(_) => {}
                                    None => {
                                        return Err(LexError {
                                            message: "unterminated block comment".to_owned(),
                                            span: open,
                                        });
                                    }
                                }
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_word(&mut self) {
        let span = self.span();
        let mut word = String::new();
        while let Some(&c) = self.iter.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = keyword(&word).unwrap_or(TokenKind::Ident(word));
        self.push(kind, span);
    }

    fn lex_number(&mut self, span: Span) -> LexResult<()> {
        let mut text = String::new();
        while let Some(&c) = self.iter.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        // A `.` continues the number only when followed by a digit; `1..5`
        // must leave the range operator intact.
        let mut is_float = false;
        if self.iter.peek() == Some(&'.') {
            let mut lookahead = self.iter.clone();
            lookahead.next();
            if matches!(lookahead.peek(), Some(d) if d.is_ascii_digit()) {
                is_float = true;
                text.push('.');
                self.bump();
                while let Some(&c) = self.iter.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        let kind = if is_float {
            let value = text.parse::<f64>().map_err(|_| LexError {
                message: format!("invalid float literal `{text}`"),
                span,
            })?;
            TokenKind::Float(value)
        } else {
            let value = text.parse::<i64>().map_err(|_| LexError {
                message: format!("integer literal `{text}` out of range"),
                span,
            })?;
            TokenKind::Int(value)
        };
        self.push(kind, span);
        Ok(())
    }

    fn lex_string(&mut self, span: Span) -> LexResult<()> {
        let quote = self.bump().expect("peeked quote");
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some('\'') => text.push('\''),
                    Some('0') => text.push('\0'),
                    // Unknown escapes are preserved as backslash + char.
                    Some(other) => {
                        text.push('\\');
                        text.push(other);
                    }
                    None => {
                        return Err(LexError {
                            message: "unterminated string literal".to_owned(),
                            span,
                        });
                    }
                },
                Some(c) => text.push(c),
                None => {
                    return Err(LexError {
                        message: "unterminated string literal".to_owned(),
                        span,
                    });
                }
            }
        }
        self.push(TokenKind::Str(text), span);
        Ok(())
    }

    fn lex_operator(&mut self, span: Span) -> LexResult<()> {
        let c = self.bump().expect("peeked operator byte");
        let kind = match c {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '+' => TokenKind::Plus,
            '-' => {
                if self.bump_if('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '?' => TokenKind::Question,
            '.' => {
                if self.bump_if('.') {
                    if self.bump_if('=') {
                        TokenKind::DotDotEq
                    } else {
                        TokenKind::DotDot
                    }
                } else {
                    TokenKind::Dot
                }
            }
            '=' => {
                if self.bump_if('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.bump_if('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '>' => {
                if self.bump_if('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '<' => {
                // `<<` followed by a letter opens a polyglot block; any other
                // `<<` is two comparison tokens.
                if self.iter.peek() == Some(&'<') {
                    let mut lookahead = self.iter.clone();
                    lookahead.next();
                    if matches!(lookahead.peek(), Some(l) if l.is_ascii_alphabetic()) {
                        self.bump();
                        return self.lex_inline_block(span);
                    }
                }
                if self.bump_if('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '&' => {
                if self.bump_if('&') {
                    TokenKind::AndAnd
                } else {
                    return Err(LexError {
                        message: "unexpected byte `&`".to_owned(),
                        span,
                    });
                }
            }
            '|' => {
                if self.bump_if('>') {
                    TokenKind::Pipeline
                } else if self.bump_if('|') {
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            other => {
                return Err(LexError {
                    message: format!("unexpected byte `{other}`"),
                    span,
                });
            }
        };
        self.push(kind, span);
        Ok(())
    }

    /// Lexes `<<lang[a, b] … >>` after the opening `<<` has been consumed.
    ///
    /// The interior is captured byte-for-byte up to (not including) the
    /// closing `>>`.
    fn lex_inline_block(&mut self, span: Span) -> LexResult<()> {
        let mut language = String::new();
        while let Some(&c) = self.iter.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '#' {
                language.push(c);
                self.bump();
            } else {
                break;
            }
        }

        let mut bound = Vec::new();
        if self.iter.peek() == Some(&'[') {
            self.bump();
            loop {
                while matches!(self.iter.peek(), Some(c) if c.is_whitespace()) {
                    self.bump();
                }
                match self.iter.peek() {
                    Some(']') => {
                        self.bump();
                        break;
                    }
                    Some(c) if c.is_alphanumeric() || *c == '_' => {
                        let mut name = String::new();
                        while let Some(&c) = self.iter.peek() {
                            if c.is_alphanumeric() || c == '_' {
                                name.push(c);
                                self.bump();
                            } else {
                                break;
                            }
                        }
                        bound.push(name);
                        while matches!(self.iter.peek(), Some(c) if c.is_whitespace()) {
                            self.bump();
                        }
                        if self.iter.peek() == Some(&',') {
                            self.bump();
                        }
                    }
                    _ => {
                        return Err(LexError {
                            message: format!(
                                "invalid bound-variable list in `<<{language}` block"
                            ),
                            span: self.span(),
                        });
                    }
                }
            }
        }

        let mut code = String::new();
        loop {
            match self.iter.peek() {
                Some('>') => {
                    let mut lookahead = self.iter.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'>') {
                        self.bump();
                        self.bump();
                        break;
                    }
                    code.push('>');
                    self.bump();
                }
                Some(&c) => {
                    code.push(c);
                    self.bump();
                }
                None => {
                    return Err(LexError {
                        message: format!("unterminated `<<{language}` block"),
                        span,
                    });
                }
            }
        }

        self.push(
            TokenKind::InlineBlock {
                language,
                bound,
                code,
            },
            span,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .lex()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_let_statement() {
        assert_eq!(
            kinds("let foo = 42;"),
            vec![
                TokenKind::Let,
                TokenKind::Ident("foo".into()),
                TokenKind::Assign,
                TokenKind::Int(42),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn range_does_not_eat_float_dot() {
        assert_eq!(
            kinds("1..5"),
            vec![
                TokenKind::Int(1),
                TokenKind::DotDot,
                TokenKind::Int(5),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("1.5..=2"),
            vec![
                TokenKind::Float(1.5),
                TokenKind::DotDotEq,
                TokenKind::Int(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn fn_synonyms() {
        assert_eq!(kinds("fn")[0], TokenKind::Fn);
        assert_eq!(kinds("func")[0], TokenKind::Fn);
        assert_eq!(kinds("function")[0], TokenKind::Fn);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\q""#)[0],
            TokenKind::Str("a\nb\\q".to_owned())
        );
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = Lexer::new("  \"oops").lex().unwrap_err();
        assert_eq!(err.span, Span::new(1, 3));
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn inline_block_preserves_interior() {
        let toks = kinds("let y = <<python[x]  x * 2\n  done >>;");
        let TokenKind::InlineBlock {
            language,
            bound,
            code,
        } = &toks[3]
        else {
            panic!("expected inline block, got {:?}", toks[3]);
        };
        assert_eq!(language, "python");
        assert_eq!(bound, &["x".to_owned()]);
        assert_eq!(code, "  x * 2\n  done ");
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let err = Lexer::new("<<js 1 + 1").lex().unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn generics_still_lex_as_comparisons() {
        assert_eq!(
            kinds("Box<int>"),
            vec![
                TokenKind::Ident("Box".into()),
                TokenKind::Lt,
                TokenKind::Ident("int".into()),
                TokenKind::Gt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn pipeline_and_union_tokens() {
        assert_eq!(
            kinds("a |> b | c || d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Pipeline,
                TokenKind::Ident("b".into()),
                TokenKind::Pipe,
                TokenKind::Ident("c".into()),
                TokenKind::OrOr,
                TokenKind::Ident("d".into()),
                TokenKind::Eof,
            ]
        );
    }
}
