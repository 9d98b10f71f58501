//! Recursive-descent parser for the schema language.
//!
//! Consumes the token stream from [`super::lexer`] and produces a
//! [`File`]. Inline struct declarations are lifted out of their
//! containing struct and appended to the file's declaration list, in
//! source order. Length clauses on unions and `[..-K]` arrays desugar
//! into length-constrained members here, so later stages only ever see
//! the canonical member forms.

use crate::models::ast::*;
use crate::models::error::SchemaError;
use crate::services::lexer::{Lexer, Token, TokenKind};

/// Tokenize and parse a whole schema file.
pub fn parse_schema(input: &str) -> Result<File, SchemaError> {
    let tokens = Lexer::new(input).tokenize()?;
    SchemaParser::new(tokens).parse_file()
}

pub struct SchemaParser {
    tokens: Vec<Token>,
    pos: usize,
    /// Struct declarations found inline in member position, lifted to
    /// top level once the file is fully parsed.
    lingering: Vec<StructDecl>,
}

impl SchemaParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            lingering: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self, wanted: &str) -> SchemaError {
        match self.tokens.get(self.pos) {
            Some(tok) => SchemaError::syntax(
                tok.line,
                format!("expected {wanted}, found `{}`", tok.kind.describe()),
            ),
            None => SchemaError::syntax(self.line(), format!("expected {wanted}, found end of file")),
        }
    }

    fn expect(&mut self, kind: TokenKind, wanted: &str) -> Result<Token, SchemaError> {
        match self.peek() {
            Some(k) if *k == kind => Ok(self.advance().unwrap()),
            _ => Err(self.unexpected(wanted)),
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek() == Some(&kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, wanted: &str) -> Result<String, SchemaError> {
        match self.peek() {
            Some(TokenKind::Ident(_)) => {
                let Some(Token {
                    kind: TokenKind::Ident(name),
                    ..
                }) = self.advance()
                else {
                    unreachable!()
                };
                Ok(name)
            }
            _ => Err(self.unexpected(wanted)),
        }
    }

    fn take_annotation(&mut self) -> Option<String> {
        if let Some(TokenKind::Annotation(_)) = self.peek() {
            if let Some(Token {
                kind: TokenKind::Annotation(text),
                ..
            }) = self.advance()
            {
                return Some(text);
            }
        }
        None
    }

    pub fn parse_file(mut self) -> Result<File, SchemaError> {
        let mut file = File::default();
        while self.peek().is_some() {
            let doc = self.take_annotation();
            match self.peek() {
                Some(TokenKind::KwConst) => {
                    let mut decl = self.parse_const()?;
                    decl.doc = doc;
                    file.constants.push(decl);
                }
                Some(TokenKind::KwExtern) => {
                    file.extern_structs.push(self.parse_extern()?);
                }
                Some(TokenKind::KwTrunnel) => {
                    file.options.extend(self.parse_options()?);
                }
                Some(TokenKind::KwContext) => {
                    let mut decl = self.parse_context()?;
                    decl.doc = doc;
                    file.declarations.push(decl);
                    self.eat(TokenKind::Semi);
                }
                Some(TokenKind::KwStruct) => {
                    self.expect(TokenKind::KwStruct, "declaration")?;
                    let mut decl = self.parse_struct_after_kw()?;
                    decl.doc = doc;
                    file.declarations.push(decl);
                    self.eat(TokenKind::Semi);
                }
                _ => return Err(self.unexpected("declaration")),
            }
        }
        file.declarations.append(&mut self.lingering);
        Ok(file)
    }

    fn parse_const(&mut self) -> Result<ConstDecl, SchemaError> {
        self.expect(TokenKind::KwConst, "`const`")?;
        let name = match self.peek() {
            Some(TokenKind::ConstIdent(_)) => {
                let Some(Token {
                    kind: TokenKind::ConstIdent(name),
                    ..
                }) = self.advance()
                else {
                    unreachable!()
                };
                name
            }
            _ => return Err(self.unexpected("an uppercase constant name")),
        };
        self.expect(TokenKind::Eq, "`=`")?;
        let value = match self.peek() {
            Some(TokenKind::Int(_)) => {
                let Some(Token {
                    kind: TokenKind::Int(v),
                    ..
                }) = self.advance()
                else {
                    unreachable!()
                };
                v
            }
            _ => return Err(self.unexpected("an integer literal")),
        };
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(ConstDecl {
            name,
            value,
            doc: None,
        })
    }

    fn parse_extern(&mut self) -> Result<ExternStructDecl, SchemaError> {
        self.expect(TokenKind::KwExtern, "`extern`")?;
        self.expect(TokenKind::KwStruct, "`struct`")?;
        let name = self.expect_ident("a structure name")?;
        let context_list = self.parse_opt_with_context()?;
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(ExternStructDecl { name, context_list })
    }

    fn parse_options(&mut self) -> Result<Vec<String>, SchemaError> {
        self.expect(TokenKind::KwTrunnel, "`trunnel`")?;
        let line = self.line();
        let word = self.expect_ident("`option` or `options`")?;
        if word != "option" && word != "options" {
            return Err(SchemaError::syntax(
                line,
                "Bad syntax for 'trunnel options'",
            ));
        }
        let options = self.parse_id_list()?;
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(options)
    }

    fn parse_id_list(&mut self) -> Result<Vec<String>, SchemaError> {
        let mut ids = vec![self.expect_ident("an identifier")?];
        while self.eat(TokenKind::Comma) {
            ids.push(self.expect_ident("an identifier")?);
        }
        Ok(ids)
    }

    fn parse_opt_with_context(&mut self) -> Result<Vec<String>, SchemaError> {
        if !self.eat(TokenKind::KwWith) {
            return Ok(Vec::new());
        }
        self.expect(TokenKind::KwContext, "`context`")?;
        self.parse_id_list()
    }

    fn parse_context(&mut self) -> Result<StructDecl, SchemaError> {
        self.expect(TokenKind::KwContext, "`context`")?;
        let name = self.expect_ident("a context name")?;
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut members = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            let doc = self.take_annotation();
            let ty = self.parse_int_type()?;
            let field = self.expect_ident("a field name")?;
            self.expect(TokenKind::Semi, "`;`")?;
            let mut member = Member::new(MemberKind::Int(IntMember {
                ty,
                name: field,
                constraint: None,
            }));
            member.doc = doc;
            members.push(member);
        }
        let mut decl = StructDecl::new(name, members, Vec::new());
        decl.is_context = true;
        Ok(decl)
    }

    fn parse_int_type(&mut self) -> Result<IntType, SchemaError> {
        let width = match self.peek() {
            Some(TokenKind::KwU8) => 8,
            Some(TokenKind::KwU16) => 16,
            Some(TokenKind::KwU32) => 32,
            Some(TokenKind::KwU64) => 64,
            _ => return Err(self.unexpected("an integer type")),
        };
        self.advance();
        Ok(IntType { width })
    }

    /// Body of a struct declaration, the `struct` keyword already
    /// consumed: `NAME [with context a, b] { members }`.
    fn parse_struct_after_kw(&mut self) -> Result<StructDecl, SchemaError> {
        let name = self.expect_ident("a structure name")?;
        let context_list = self.parse_opt_with_context()?;
        self.expect(TokenKind::LBrace, "`{`")?;
        let members = self.parse_member_list(true)?;
        self.expect(TokenKind::RBrace, "`}`")?;
        Ok(StructDecl::new(name, members, context_list))
    }

    /// Member list of a struct body (`allow_eos`) or a union case.
    /// `eos`, `...`, and remainder arrays must close their list.
    fn parse_member_list(&mut self, allow_eos: bool) -> Result<Vec<Member>, SchemaError> {
        let mut members = Vec::new();
        loop {
            match self.peek() {
                None | Some(TokenKind::RBrace) => break,
                Some(TokenKind::KwEos) if allow_eos => {
                    self.advance();
                    self.expect(TokenKind::Semi, "`;`")?;
                    members.push(Member::new(MemberKind::Eos));
                    if self.peek() != Some(&TokenKind::RBrace) {
                        return Err(SchemaError::syntax(
                            self.line(),
                            "'eos' must be the last member",
                        ));
                    }
                    break;
                }
                _ => {}
            }
            let doc = self.take_annotation();
            let mut member = self.parse_struct_member()?;
            member.doc = doc;
            self.expect(TokenKind::Semi, "`;`")?;
            let ends_extent = matches!(
                &member.kind,
                MemberKind::VarArray(VarArrayMember {
                    width_field: None,
                    ..
                })
            );
            members.push(member);
            if ends_extent && self.peek() != Some(&TokenKind::RBrace) {
                return Err(SchemaError::syntax(
                    self.line(),
                    "a remainder array must be the last member",
                ));
            }
        }
        Ok(members)
    }

    fn parse_struct_member(&mut self) -> Result<Member, SchemaError> {
        match self.peek() {
            Some(TokenKind::KwU8 | TokenKind::KwU16 | TokenKind::KwU32 | TokenKind::KwU64) => {
                let ty = self.parse_int_type()?;
                let name = self.expect_ident("a member name")?;
                if self.peek() == Some(&TokenKind::LBracket) {
                    return self.parse_array_suffix(ArrayBase::Int(ty), name);
                }
                let constraint = if self.eat(TokenKind::KwIn) {
                    self.expect(TokenKind::LBracket, "`[`")?;
                    let ranges = self.parse_int_list()?;
                    self.expect(TokenKind::RBracket, "`]`")?;
                    Some(IntConstraint::new(ranges))
                } else {
                    None
                };
                Ok(Member::new(MemberKind::Int(IntMember {
                    ty,
                    name,
                    constraint,
                })))
            }
            Some(TokenKind::KwChar) => {
                self.advance();
                let name = self.expect_ident("a member name")?;
                if self.peek() != Some(&TokenKind::LBracket) {
                    return Err(self.unexpected("`[` (char members must be arrays)"));
                }
                self.parse_array_suffix(ArrayBase::Char, name)
            }
            Some(TokenKind::KwStruct) => {
                self.advance();
                let type_name = self.expect_ident("a structure name")?;
                let type_name = if matches!(
                    self.peek(),
                    Some(TokenKind::LBrace | TokenKind::KwWith)
                ) {
                    // Inline declaration: parse it in place and lift it
                    // to top level.
                    let context_list = self.parse_opt_with_context()?;
                    self.expect(TokenKind::LBrace, "`{`")?;
                    let body = self.parse_member_list(true)?;
                    self.expect(TokenKind::RBrace, "`}`")?;
                    self.lingering
                        .push(StructDecl::new(type_name.clone(), body, context_list));
                    type_name
                } else {
                    type_name
                };
                let name = self.expect_ident("a member name")?;
                if self.peek() == Some(&TokenKind::LBracket) {
                    return self.parse_array_suffix(ArrayBase::Struct(type_name), name);
                }
                Ok(Member::new(MemberKind::Struct(StructRefMember {
                    struct_name: type_name,
                    name,
                })))
            }
            Some(TokenKind::KwNulterm) => {
                self.advance();
                let name = self.expect_ident("a member name")?;
                Ok(Member::new(MemberKind::NulTerm { name }))
            }
            Some(TokenKind::At) => {
                self.advance();
                let line = self.line();
                let kw = self.expect_ident("`ptr`")?;
                if kw != "ptr" {
                    return Err(SchemaError::syntax(line, "Expected 'ptr'"));
                }
                let name = self.expect_ident("a member name")?;
                Ok(Member::new(MemberKind::Position { name }))
            }
            Some(TokenKind::KwUnion) => self.parse_union(),
            _ => Err(self.unexpected("a struct member")),
        }
    }

    /// Bracket suffix of an array member: `[N]`, `[field]`,
    /// `[ctx.field]`, `[..-K]`, or `[]`.
    fn parse_array_suffix(&mut self, base: ArrayBase, name: String) -> Result<Member, SchemaError> {
        self.expect(TokenKind::LBracket, "`[`")?;
        match self.peek() {
            Some(TokenKind::RBracket) => {
                self.advance();
                Ok(Member::new(MemberKind::VarArray(VarArrayMember {
                    base,
                    name,
                    width_field: None,
                    width_info: None,
                })))
            }
            Some(TokenKind::DotDot) => {
                self.advance();
                self.expect(TokenKind::Minus, "`-`")?;
                let leftover = self.parse_width()?;
                self.expect(TokenKind::RBracket, "`]`")?;
                let array = Member::new(MemberKind::VarArray(VarArrayMember {
                    base,
                    name,
                    width_field: None,
                    width_info: None,
                }));
                Ok(Member::new(MemberKind::LenConstrained(
                    LenConstrainedMember {
                        length_field: None,
                        length_info: None,
                        leftover: Some(leftover),
                        members: vec![array],
                    },
                )))
            }
            Some(TokenKind::Int(_) | TokenKind::ConstIdent(_)) => {
                let width = self.parse_width()?;
                self.expect(TokenKind::RBracket, "`]`")?;
                Ok(Member::new(MemberKind::FixedArray(FixedArrayMember {
                    base,
                    name,
                    width,
                })))
            }
            Some(TokenKind::Ident(_)) => {
                let field = self.parse_field_ref()?;
                self.expect(TokenKind::RBracket, "`]`")?;
                Ok(Member::new(MemberKind::VarArray(VarArrayMember {
                    base,
                    name,
                    width_field: Some(field),
                    width_info: None,
                })))
            }
            _ => Err(self.unexpected("an array width")),
        }
    }

    fn parse_width(&mut self) -> Result<ArrayWidth, SchemaError> {
        match self.peek() {
            Some(TokenKind::Int(_)) => {
                let Some(Token {
                    kind: TokenKind::Int(v),
                    ..
                }) = self.advance()
                else {
                    unreachable!()
                };
                Ok(ArrayWidth::Lit(v))
            }
            Some(TokenKind::ConstIdent(_)) => {
                let Some(Token {
                    kind: TokenKind::ConstIdent(name),
                    ..
                }) = self.advance()
                else {
                    unreachable!()
                };
                Ok(ArrayWidth::Const(name))
            }
            _ => Err(self.unexpected("an integer or constant name")),
        }
    }

    fn parse_field_ref(&mut self) -> Result<FieldRef, SchemaError> {
        let first = self.expect_ident("a field name")?;
        if self.eat(TokenKind::Dot) {
            let field = self.expect_ident("a context field name")?;
            Ok(FieldRef::Context { ctx: first, field })
        } else {
            Ok(FieldRef::Local(first))
        }
    }

    fn parse_bound(&mut self) -> Result<Bound, SchemaError> {
        match self.peek() {
            Some(TokenKind::Int(_)) => {
                let Some(Token {
                    kind: TokenKind::Int(v),
                    ..
                }) = self.advance()
                else {
                    unreachable!()
                };
                Ok(Bound::Lit(v))
            }
            Some(TokenKind::ConstIdent(_)) => {
                let Some(Token {
                    kind: TokenKind::ConstIdent(name),
                    ..
                }) = self.advance()
                else {
                    unreachable!()
                };
                Ok(Bound::Const(name))
            }
            _ => Err(self.unexpected("an integer or constant name")),
        }
    }

    fn parse_int_list(&mut self) -> Result<Vec<IntRange>, SchemaError> {
        let mut ranges = Vec::new();
        loop {
            let lo = self.parse_bound()?;
            let hi = if self.eat(TokenKind::DotDot) {
                self.parse_bound()?
            } else {
                lo.clone()
            };
            ranges.push(IntRange { lo, hi });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(ranges)
    }

    fn parse_union(&mut self) -> Result<Member, SchemaError> {
        self.expect(TokenKind::KwUnion, "`union`")?;
        let name = self.expect_ident("a union name")?;
        self.expect(TokenKind::LBracket, "`[`")?;
        let tag_field = self.parse_field_ref()?;
        self.expect(TokenKind::RBracket, "`]`")?;

        enum LengthClause {
            None,
            Field(FieldRef),
            Leftover(ArrayWidth),
        }
        let length = if self.eat(TokenKind::KwWith) {
            let line = self.line();
            let kw = self.expect_ident("`length`")?;
            if kw != "length" {
                return Err(SchemaError::syntax(line, "Expected 'length'"));
            }
            if self.eat(TokenKind::DotDot) {
                self.expect(TokenKind::Minus, "`-`")?;
                LengthClause::Leftover(self.parse_width()?)
            } else {
                LengthClause::Field(self.parse_field_ref()?)
            }
        } else {
            LengthClause::None
        };

        self.expect(TokenKind::LBrace, "`{`")?;
        let mut cases = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            cases.push(self.parse_union_case()?);
        }

        let union = Member::new(MemberKind::Union(UnionMember {
            name,
            tag_field,
            tag_info: None,
            cases,
        }));
        Ok(match length {
            LengthClause::None => union,
            LengthClause::Field(field) => Member::new(MemberKind::LenConstrained(
                LenConstrainedMember {
                    length_field: Some(field),
                    length_info: None,
                    leftover: None,
                    members: vec![union],
                },
            )),
            LengthClause::Leftover(k) => Member::new(MemberKind::LenConstrained(
                LenConstrainedMember {
                    length_field: None,
                    length_info: None,
                    leftover: Some(k),
                    members: vec![union],
                },
            )),
        })
    }

    fn parse_union_case(&mut self) -> Result<UnionCase, SchemaError> {
        let tags = if self.eat(TokenKind::KwDefault) {
            None
        } else {
            Some(self.parse_int_list()?)
        };
        self.expect(TokenKind::Colon, "`:`")?;

        let mut members = Vec::new();
        loop {
            match self.peek() {
                None
                | Some(
                    TokenKind::RBrace
                    | TokenKind::Int(_)
                    | TokenKind::ConstIdent(_)
                    | TokenKind::KwDefault,
                ) => break,
                Some(TokenKind::Semi) => {
                    // An empty case body is written `tag: ;`.
                    self.advance();
                    continue;
                }
                Some(TokenKind::KwFail) => {
                    self.advance();
                    self.expect(TokenKind::Semi, "`;`")?;
                    members.push(Member::new(MemberKind::Fail));
                }
                Some(TokenKind::KwIgnore) | Some(TokenKind::Ellipsis) => {
                    self.advance();
                    self.expect(TokenKind::Semi, "`;`")?;
                    members.push(Member::new(MemberKind::Ignore));
                }
                _ => {
                    let doc = self.take_annotation();
                    let mut member = self.parse_struct_member()?;
                    member.doc = doc;
                    self.expect(TokenKind::Semi, "`;`")?;
                    let ends_extent = matches!(
                        &member.kind,
                        MemberKind::VarArray(VarArrayMember {
                            width_field: None,
                            ..
                        })
                    );
                    members.push(member);
                    if ends_extent {
                        break;
                    }
                }
            }
        }
        Ok(UnionCase { tags, members })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> File {
        parse_schema(input).expect("parse failed")
    }

    #[test]
    fn test_const_decl() {
        let f = parse("const MAX_LEN = 16;");
        assert_eq!(f.constants.len(), 1);
        assert_eq!(f.constants[0].name, "MAX_LEN");
        assert_eq!(f.constants[0].value, 16);
    }

    #[test]
    fn test_basic_struct() {
        let f = parse("struct point { u8 x; u8 y; }");
        let s = f.declaration("point").unwrap();
        assert_eq!(s.members.len(), 2);
        assert!(!s.is_context);
        assert!(matches!(&s.members[0].kind, MemberKind::Int(m) if m.name == "x"));
    }

    #[test]
    fn test_int_constraint() {
        let f = parse("struct r { u16 n IN [1..3, 9, MAGIC]; }");
        let s = f.declaration("r").unwrap();
        let MemberKind::Int(m) = &s.members[0].kind else {
            panic!("not an int");
        };
        let c = m.constraint.as_ref().unwrap();
        assert_eq!(c.ranges.len(), 3);
        assert_eq!(c.ranges[0].lo, Bound::Lit(1));
        assert_eq!(c.ranges[0].hi, Bound::Lit(3));
        assert_eq!(c.ranges[2].lo, Bound::Const("MAGIC".into()));
    }

    #[test]
    fn test_arrays() {
        let f = parse(
            "struct a { u8 n; u8 fixed[4]; char label[LEN]; u16 var[n]; \
             struct other others[n]; }
             struct other { u8 x; }",
        );
        let s = f.declaration("a").unwrap();
        assert!(matches!(
            &s.members[1].kind,
            MemberKind::FixedArray(FixedArrayMember {
                width: ArrayWidth::Lit(4),
                ..
            })
        ));
        assert!(matches!(
            &s.members[2].kind,
            MemberKind::FixedArray(FixedArrayMember {
                base: ArrayBase::Char,
                width: ArrayWidth::Const(_),
                ..
            })
        ));
        assert!(matches!(
            &s.members[3].kind,
            MemberKind::VarArray(VarArrayMember {
                width_field: Some(FieldRef::Local(_)),
                ..
            })
        ));
        assert!(matches!(
            &s.members[4].kind,
            MemberKind::VarArray(VarArrayMember {
                base: ArrayBase::Struct(_),
                ..
            })
        ));
    }

    #[test]
    fn test_remainder_and_eos() {
        let f = parse("struct r { u8 n; u8 rest[]; }");
        let s = f.declaration("r").unwrap();
        assert!(matches!(
            &s.members[1].kind,
            MemberKind::VarArray(VarArrayMember {
                width_field: None,
                ..
            })
        ));

        let f = parse("struct e { u8 n; eos; }");
        assert!(matches!(
            f.declaration("e").unwrap().members[1].kind,
            MemberKind::Eos
        ));
    }

    #[test]
    fn test_remainder_must_be_last() {
        assert!(parse_schema("struct r { u8 rest[]; u8 n; }").is_err());
        assert!(parse_schema("struct e { eos; u8 n; }").is_err());
    }

    #[test]
    fn test_leftover_array_desugars() {
        let f = parse("struct l { u8 xs[..-2]; u16 trailer; }");
        let s = f.declaration("l").unwrap();
        let MemberKind::LenConstrained(lc) = &s.members[0].kind else {
            panic!("not desugared");
        };
        assert!(lc.length_field.is_none());
        assert!(matches!(lc.leftover, Some(ArrayWidth::Lit(2))));
        assert!(matches!(
            &lc.members[0].kind,
            MemberKind::VarArray(VarArrayMember {
                width_field: None,
                ..
            })
        ));
    }

    #[test]
    fn test_union_with_length() {
        let f = parse(
            "struct u { u8 tag; u8 len; \
             union body[tag] with length len { \
               1: u32 x; \
               2: u8 y[..-0]; \
               default: ignore; \
             }; eos; }",
        );
        let s = f.declaration("u").unwrap();
        let MemberKind::LenConstrained(lc) = &s.members[2].kind else {
            panic!("length clause not desugared");
        };
        assert_eq!(lc.length_field, Some(FieldRef::Local("len".into())));
        let MemberKind::Union(u) = &lc.members[0].kind else {
            panic!("missing union");
        };
        assert_eq!(u.name, "body");
        assert_eq!(u.cases.len(), 3);
        assert!(u.cases[2].is_default());
        assert!(matches!(u.cases[2].members[0].kind, MemberKind::Ignore));
    }

    #[test]
    fn test_union_case_forms() {
        let f = parse(
            "struct u { u8 tag; \
             union v[tag] { 1: ; 2: fail; 3..5: u8 a; u8 b; 6: u8 rest[]; }; }",
        );
        let s = f.declaration("u").unwrap();
        let MemberKind::Union(u) = &s.members[1].kind else {
            panic!("missing union");
        };
        assert_eq!(u.cases.len(), 4);
        assert!(u.cases[0].members.is_empty());
        assert!(matches!(u.cases[1].members[0].kind, MemberKind::Fail));
        assert_eq!(u.cases[2].members.len(), 2);
        let tags = u.cases[2].tags.as_ref().unwrap();
        assert_eq!(tags[0].lo, Bound::Lit(3));
        assert_eq!(tags[0].hi, Bound::Lit(5));
    }

    #[test]
    fn test_context_and_extern() {
        let f = parse(
            "context stream { u8 version; u64 id; }
             extern struct other with context stream;
             struct msg with context stream { u8 kind; }",
        );
        let ctx = f.declaration("stream").unwrap();
        assert!(ctx.is_context);
        assert_eq!(ctx.members.len(), 2);
        assert_eq!(f.extern_structs[0].name, "other");
        assert_eq!(f.extern_structs[0].context_list, ["stream".to_string()]);
        assert_eq!(
            f.declaration("msg").unwrap().context_list,
            ["stream".to_string()]
        );
    }

    #[test]
    fn test_context_qualified_width() {
        let f = parse("struct m with context c { u8 body[c.len]; }");
        let s = f.declaration("m").unwrap();
        assert!(matches!(
            &s.members[0].kind,
            MemberKind::VarArray(VarArrayMember {
                width_field: Some(FieldRef::Context { .. }),
                ..
            })
        ));
    }

    #[test]
    fn test_inline_struct_lifted() {
        let f = parse("struct outer { struct inner { u8 x; } in_member; }");
        assert!(f.declaration("inner").is_some());
        let outer = f.declaration("outer").unwrap();
        assert!(matches!(
            &outer.members[0].kind,
            MemberKind::Struct(StructRefMember { struct_name, .. }) if struct_name == "inner"
        ));
    }

    #[test]
    fn test_position_member() {
        let f = parse("struct p { u8 n; @ptr mark; }");
        assert!(matches!(
            &f.declaration("p").unwrap().members[1].kind,
            MemberKind::Position { name } if name == "mark"
        ));
        assert!(parse_schema("struct p { @nope mark; }").is_err());
    }

    #[test]
    fn test_options_and_docs() {
        let f = parse(
            "trunnel options opaque;\n/** A structure. */\nstruct s { /** Field. */ u8 x; }",
        );
        assert_eq!(f.options, ["opaque".to_string()]);
        let s = f.declaration("s").unwrap();
        assert_eq!(s.doc.as_deref(), Some("/** A structure. */"));
        assert_eq!(s.members[0].doc.as_deref(), Some("/** Field. */"));
    }

    #[test]
    fn test_trunnel_options_bad_keyword() {
        let err = parse_schema("trunnel nonsense opaque;").unwrap_err();
        assert!(err.to_string().contains("trunnel options"));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = parse_schema("struct s {\n  u8 ;\n}").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
