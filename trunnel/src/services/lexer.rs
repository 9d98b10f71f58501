//! Tokenizer for the schema language.
//!
//! Turns schema text into a flat list of tokens. Identifiers written in
//! all-uppercase are constant references; `/** ... */` comments are doc
//! annotations that bind to the next declaration or member, while plain
//! comments are discarded.

use crate::models::error::SchemaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    ConstIdent(String),
    Int(u64),
    Annotation(String),

    KwUnion,
    KwStruct,
    KwExtern,
    KwTrunnel,
    KwContext,
    KwU8,
    KwU16,
    KwU32,
    KwU64,
    KwChar,
    KwIn,
    KwConst,
    KwNulterm,
    KwWith,
    KwDefault,
    KwFail,
    KwIgnore,
    KwEos,

    Semi,
    LBrace,
    RBrace,
    At,
    LBracket,
    RBracket,
    Minus,
    Eq,
    Comma,
    Colon,
    Dot,
    DotDot,
    Ellipsis,
}

impl TokenKind {
    /// Rendering used by syntax-error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) | TokenKind::ConstIdent(s) => s.clone(),
            TokenKind::Int(v) => v.to_string(),
            TokenKind::Annotation(_) => "documentation comment".to_string(),
            TokenKind::KwUnion => "union".into(),
            TokenKind::KwStruct => "struct".into(),
            TokenKind::KwExtern => "extern".into(),
            TokenKind::KwTrunnel => "trunnel".into(),
            TokenKind::KwContext => "context".into(),
            TokenKind::KwU8 => "u8".into(),
            TokenKind::KwU16 => "u16".into(),
            TokenKind::KwU32 => "u32".into(),
            TokenKind::KwU64 => "u64".into(),
            TokenKind::KwChar => "char".into(),
            TokenKind::KwIn => "IN".into(),
            TokenKind::KwConst => "const".into(),
            TokenKind::KwNulterm => "nulterm".into(),
            TokenKind::KwWith => "with".into(),
            TokenKind::KwDefault => "default".into(),
            TokenKind::KwFail => "fail".into(),
            TokenKind::KwIgnore => "ignore".into(),
            TokenKind::KwEos => "eos".into(),
            TokenKind::Semi => ";".into(),
            TokenKind::LBrace => "{".into(),
            TokenKind::RBrace => "}".into(),
            TokenKind::At => "@".into(),
            TokenKind::LBracket => "[".into(),
            TokenKind::RBracket => "]".into(),
            TokenKind::Minus => "-".into(),
            TokenKind::Eq => "=".into(),
            TokenKind::Comma => ",".into(),
            TokenKind::Colon => ":".into(),
            TokenKind::Dot => ".".into(),
            TokenKind::DotDot => "..".into(),
            TokenKind::Ellipsis => "...".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

fn keyword(s: &str) -> Option<TokenKind> {
    Some(match s {
        "union" => TokenKind::KwUnion,
        "struct" => TokenKind::KwStruct,
        "extern" => TokenKind::KwExtern,
        "trunnel" => TokenKind::KwTrunnel,
        "context" => TokenKind::KwContext,
        "u8" => TokenKind::KwU8,
        "u16" => TokenKind::KwU16,
        "u32" => TokenKind::KwU32,
        "u64" => TokenKind::KwU64,
        "char" => TokenKind::KwChar,
        "IN" => TokenKind::KwIn,
        "const" => TokenKind::KwConst,
        "nulterm" => TokenKind::KwNulterm,
        "with" => TokenKind::KwWith,
        "default" => TokenKind::KwDefault,
        "fail" => TokenKind::KwFail,
        "ignore" => TokenKind::KwIgnore,
        "eos" => TokenKind::KwEos,
        _ => return None,
    })
}

/// An all-uppercase identifier names a constant; it needs at least one
/// uppercase letter and no lowercase ones (`_`-only names are ordinary
/// identifiers).
fn is_const_ident(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_uppercase()) && !s.chars().any(|c| c.is_ascii_lowercase())
}

pub struct Lexer<'src> {
    input: &'src [u8],
    cursor: usize,
    line: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(input: &'src str) -> Self {
        Self {
            input: input.as_bytes(),
            cursor: 0,
            line: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, SchemaError> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.input.get(self.cursor) {
            match c {
                b' ' | b'\t' | b'\r' => {
                    self.cursor += 1;
                }
                b'\n' => {
                    self.cursor += 1;
                    self.line += 1;
                }
                b'/' => self.lex_comment(&mut tokens)?,
                b'0'..=b'9' => self.lex_int(&mut tokens)?,
                c if c == b'_' || c.is_ascii_alphabetic() => {
                    self.lex_word(&mut tokens);
                }
                _ => self.lex_punctuation(&mut tokens)?,
            }
        }
        Ok(tokens)
    }

    fn error_here(&self) -> SchemaError {
        let c = self.input.get(self.cursor).copied().unwrap_or(0) as char;
        SchemaError::Lexer {
            text: c.to_string(),
            line: self.line,
        }
    }

    fn lex_word(&mut self, tokens: &mut Vec<Token>) {
        let start = self.cursor;
        while self
            .input
            .get(self.cursor)
            .is_some_and(|c| *c == b'_' || c.is_ascii_alphanumeric())
        {
            self.cursor += 1;
        }
        let word = std::str::from_utf8(&self.input[start..self.cursor]).unwrap_or("");
        let kind = if let Some(kw) = keyword(word) {
            kw
        } else if is_const_ident(word) {
            TokenKind::ConstIdent(word.to_string())
        } else {
            TokenKind::Ident(word.to_string())
        };
        tokens.push(Token {
            kind,
            line: self.line,
        });
    }

    fn lex_int(&mut self, tokens: &mut Vec<Token>) -> Result<(), SchemaError> {
        let start = self.cursor;
        let hex = self.input[self.cursor..].starts_with(b"0x")
            || self.input[self.cursor..].starts_with(b"0X");
        if hex {
            self.cursor += 2;
            while self
                .input
                .get(self.cursor)
                .is_some_and(|c| c.is_ascii_hexdigit())
            {
                self.cursor += 1;
            }
        } else {
            while self
                .input
                .get(self.cursor)
                .is_some_and(|c| c.is_ascii_digit())
            {
                self.cursor += 1;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.cursor]).unwrap_or("");
        let parsed = if hex {
            u64::from_str_radix(&text[2..], 16)
        } else {
            text.parse::<u64>()
        };
        let value = parsed.map_err(|_| SchemaError::syntax(self.line, format!("integer literal {text} out of range")))?;
        tokens.push(Token {
            kind: TokenKind::Int(value),
            line: self.line,
        });
        Ok(())
    }

    fn lex_comment(&mut self, tokens: &mut Vec<Token>) -> Result<(), SchemaError> {
        let rest = &self.input[self.cursor..];
        if rest.starts_with(b"//") {
            while self
                .input
                .get(self.cursor)
                .is_some_and(|&c| c != b'\n')
            {
                self.cursor += 1;
            }
            return Ok(());
        }
        if !rest.starts_with(b"/*") {
            return Err(self.error_here());
        }
        let is_annotation = rest.starts_with(b"/**") && !rest.starts_with(b"/**/");
        let start = self.cursor;
        let start_line = self.line;
        self.cursor += 2;
        loop {
            match self.input.get(self.cursor) {
                None => {
                    return Err(SchemaError::syntax(start_line, "unterminated comment"));
                }
                Some(b'*') if self.input.get(self.cursor + 1) == Some(&b'/') => {
                    self.cursor += 2;
                    break;
                }
                Some(b'\n') => {
                    self.cursor += 1;
                    self.line += 1;
                }
                Some(_) => {
                    self.cursor += 1;
                }
            }
        }
        if is_annotation {
            let text = std::str::from_utf8(&self.input[start..self.cursor])
                .unwrap_or("")
                .to_string();
            tokens.push(Token {
                kind: TokenKind::Annotation(text),
                line: start_line,
            });
        }
        Ok(())
    }

    fn lex_punctuation(&mut self, tokens: &mut Vec<Token>) -> Result<(), SchemaError> {
        let rest = &self.input[self.cursor..];
        let (kind, len) = if rest.starts_with(b"...") {
            (TokenKind::Ellipsis, 3)
        } else if rest.starts_with(b"..") {
            (TokenKind::DotDot, 2)
        } else {
            let kind = match rest[0] {
                b'.' => TokenKind::Dot,
                b';' => TokenKind::Semi,
                b'{' => TokenKind::LBrace,
                b'}' => TokenKind::RBrace,
                b'@' => TokenKind::At,
                b'[' => TokenKind::LBracket,
                b']' => TokenKind::RBracket,
                b'-' => TokenKind::Minus,
                b'=' => TokenKind::Eq,
                b',' => TokenKind::Comma,
                b':' => TokenKind::Colon,
                _ => return Err(self.error_here()),
            };
            (kind, 1)
        };
        self.cursor += len;
        tokens.push(Token {
            kind,
            line: self.line,
        });
        Ok(())
    }
}
