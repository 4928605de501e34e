//! Tokenizer for template script
//!
//! Text outside `<% ... %>` tags is passed through as [`Tok::Text`]. Inside a
//! tag the usual expression tokens are produced until the closing `%>`.

use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Text(String),
    /// `<%=`
    OpenEcho,
    /// `<%`
    OpenCode,
    /// `%>`
    Close,
    /// `$name`
    Var(String),
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub offset: usize,
}

/// Multi-character operators first so the longest match wins
const PUNCTS: &[&str] = &[
    "===", "!==", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "->", "++", "--", "+=", "-=", "~=", "(", ")", "[",
    "]", ",", ".", "?", ":", "!", "<", ">", "+", "-", "*", "/", "%", "~", "=", ";",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, RenderError> {
    Lexer { source, pos: 0 }.run()
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
}

impl Lexer<'_> {
    fn rest(&self) -> &str {
        &self.source[self.pos..]
    }

    fn run(mut self) -> Result<Vec<Token>, RenderError> {
        let mut tokens = Vec::new();

        while self.pos < self.source.len() {
            let start = self.pos;
            match self.rest().find("<%") {
                Some(0) => {}
                Some(found) => {
                    tokens.push(Token {
                        tok: Tok::Text(self.rest()[..found].to_string()),
                        offset: start,
                    });
                    self.pos += found;
                }
                None => {
                    tokens.push(Token {
                        tok: Tok::Text(self.rest().to_string()),
                        offset: start,
                    });
                    break;
                }
            }

            let tag_start = self.pos;
            if self.rest().starts_with("<%=") {
                tokens.push(Token {
                    tok: Tok::OpenEcho,
                    offset: tag_start,
                });
                self.pos += 3;
            } else {
                tokens.push(Token {
                    tok: Tok::OpenCode,
                    offset: tag_start,
                });
                self.pos += 2;
            }
            self.code(&mut tokens, tag_start)?;
        }

        Ok(tokens)
    }

    /// Lexes one tag body, consuming the closing `%>`
    fn code(&mut self, tokens: &mut Vec<Token>, tag_start: usize) -> Result<(), RenderError> {
        loop {
            let skipped = self.rest().len() - self.rest().trim_start().len();
            self.pos += skipped;

            let offset = self.pos;
            let Some(c) = self.rest().chars().next() else {
                return Err(RenderError::syntax(tag_start, "unclosed tag"));
            };

            if self.rest().starts_with("%>") {
                tokens.push(Token { tok: Tok::Close, offset });
                self.pos += 2;
                return Ok(());
            }

            let tok = match c {
                '$' => {
                    self.pos += 1;
                    let name = self.word();
                    if name.is_empty() {
                        return Err(RenderError::syntax(offset, "expected variable name after '$'"));
                    }
                    Tok::Var(name)
                }
                c if c.is_alphabetic() || c == '_' => Tok::Ident(self.word()),
                c if c.is_ascii_digit() => self.number(offset)?,
                '\'' | '"' => self.string(c, offset)?,
                _ => match PUNCTS.iter().find(|p| self.rest().starts_with(**p)) {
                    Some(p) => {
                        self.pos += p.len();
                        Tok::Punct(*p)
                    }
                    None => return Err(RenderError::syntax(offset, format!("unexpected character '{}'", c))),
                },
            };
            tokens.push(Token { tok, offset });
        }
    }

    fn word(&mut self) -> String {
        let len = self
            .rest()
            .char_indices()
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(self.rest().len());
        let word = self.rest()[..len].to_string();
        self.pos += len;
        word
    }

    fn number(&mut self, offset: usize) -> Result<Tok, RenderError> {
        let rest = self.rest();
        let mut len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let mut is_float = false;

        let bytes = rest.as_bytes();
        if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
            is_float = true;
            len += 1 + rest[len + 1..].bytes().take_while(u8::is_ascii_digit).count();
        }

        let text = &rest[..len];
        let tok = if is_float {
            text.parse()
                .map(Tok::Float)
                .map_err(|_| RenderError::syntax(offset, format!("invalid number '{}'", text)))?
        } else {
            text.parse()
                .map(Tok::Int)
                .map_err(|_| RenderError::syntax(offset, format!("integer '{}' out of range", text)))?
        };
        self.pos += len;
        Ok(tok)
    }

    fn string(&mut self, quote: char, offset: usize) -> Result<Tok, RenderError> {
        let mut value = String::new();
        let mut chars = self.rest().char_indices().skip(1);

        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, 'n')) if quote == '"' => value.push('\n'),
                    Some((_, 't')) if quote == '"' => value.push('\t'),
                    Some((_, escaped)) if escaped == quote || escaped == '\\' => value.push(escaped),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                },
                c if c == quote => {
                    self.pos += i + c.len_utf8();
                    return Ok(Tok::Str(value));
                }
                c => value.push(c),
            }
        }

        Err(RenderError::syntax(offset, "unterminated string literal"))
    }
}
