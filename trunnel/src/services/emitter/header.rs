//! Declaration and prototype emission for the generated header.
//!
//! Layouts honor the `opaque` and `very_opaque` options: by default a
//! struct's layout is guarded so client code can ask for an opaque
//! build, `opaque` hides it unless explicitly exposed, and
//! `very_opaque` moves the layout into the module entirely.

use crate::models::ast::*;

use super::accessors::AccessorEmitter;
use super::{format_contexts, CWriter};

pub struct DeclarationEmitter<'a> {
    file: &'a File,
    in_c_file: bool,
}

impl<'a> DeclarationEmitter<'a> {
    pub fn new(file: &'a File, in_c_file: bool) -> Self {
        Self { file, in_c_file }
    }

    pub fn emit(&self, w: &mut CWriter, order: &[String]) {
        for es in &self.file.extern_structs {
            if !self.in_c_file {
                w.w(&format!("struct {}_st;", es.name));
            }
        }
        for c in &self.file.constants {
            w.annotation(&c.doc);
            w.w(&format!("#define {} {}", c.name, c.value));
        }
        for name in order {
            if let Some(decl) = self.file.declaration(name) {
                self.struct_decl(w, decl);
            }
        }
    }

    fn struct_decl(&self, w: &mut CWriter, decl: &StructDecl) {
        let name = &decl.name;
        let upname = name.to_uppercase();
        w.annotation(&decl.doc);
        if self.file.has_option("very_opaque") && !self.in_c_file {
            w.w(&format!("typedef struct {name}_st {name}_t;"));
            return;
        }
        if self.file.has_option("opaque") && !self.in_c_file {
            w.w(&format!(
                "#if defined(TRUNNEL_EXPOSE_{upname}_)\nstruct {name}_st {{"
            ));
        } else {
            w.w(&format!(
                "#if !defined(TRUNNEL_OPAQUE) && !defined(TRUNNEL_OPAQUE_{upname})\n\
                 struct {name}_st {{"
            ));
        }
        w.push_indent(2);
        self.members(w, &decl.members);
        w.pop_indent(2);
        w.w("  uint8_t trunnel_error_code_;\n};\n#endif");
        if !self.in_c_file {
            w.w(&format!("typedef struct {name}_st {name}_t;"));
        }
        w.blank();
    }

    fn members(&self, w: &mut CWriter, members: &[Member]) {
        for member in members {
            let c_name = &member.c_name;
            match &member.kind {
                MemberKind::Int(im) => {
                    w.annotation(&member.doc);
                    w.w(&format!("uint{}_t {c_name};", im.ty.width));
                }
                MemberKind::Struct(sm) => {
                    w.annotation(&member.doc);
                    w.w(&format!("struct {}_st *{c_name};", sm.struct_name));
                }
                MemberKind::NulTerm { .. } => {
                    w.annotation(&member.doc);
                    w.w(&format!("char *{c_name};"));
                }
                MemberKind::Position { .. } => {
                    w.annotation(&member.doc);
                    w.w(&format!("const uint8_t *{c_name};"));
                }
                MemberKind::FixedArray(fa) => {
                    w.annotation(&member.doc);
                    let width = &fa.width;
                    match &fa.base {
                        ArrayBase::Struct(sn) => {
                            w.w(&format!("struct {sn}_st *{c_name}[{width}];"))
                        }
                        // One extra byte reserves space for a NUL.
                        ArrayBase::Char => w.w(&format!("char {c_name}[{width}+1];")),
                        ArrayBase::Int(ty) => {
                            w.w(&format!("uint{}_t {c_name}[{width}];", ty.width))
                        }
                    }
                }
                MemberKind::VarArray(va) => {
                    w.annotation(&member.doc);
                    match &va.base {
                        ArrayBase::Char => w.w(&format!("trunnel_string_t {c_name};")),
                        ArrayBase::Struct(sn) => w.w(&format!(
                            "TRUNNEL_DYNARRAY_HEAD(, struct {sn}_st *) {c_name};"
                        )),
                        ArrayBase::Int(ty) => w.w(&format!(
                            "TRUNNEL_DYNARRAY_HEAD(, uint{}_t) {c_name};",
                            ty.width
                        )),
                    }
                }
                MemberKind::Union(u) => {
                    w.annotation(&member.doc);
                    // Branch members coexist inline, distinguished by
                    // their union-prefixed names.
                    for case in &u.cases {
                        self.members(w, &case.members);
                    }
                }
                MemberKind::LenConstrained(lc) => self.members(w, &lc.members),
                MemberKind::Eos | MemberKind::Fail | MemberKind::Ignore => {}
            }
        }
    }
}

pub struct PrototypeEmitter<'a> {
    file: &'a File,
    docstrings: bool,
}

impl<'a> PrototypeEmitter<'a> {
    pub fn new(file: &'a File, docstrings: bool) -> Self {
        Self { file, docstrings }
    }

    pub fn emit(&self, w: &mut CWriter, order: &[String]) {
        for name in order {
            if let Some(decl) = self.file.declaration(name) {
                self.struct_prototypes(w, decl);
            }
        }
    }

    fn docstring(&self, w: &mut CWriter, text: &str) {
        if self.docstrings {
            w.docstring(text);
        }
    }

    fn struct_prototypes(&self, w: &mut CWriter, decl: &StructDecl) {
        let name = &decl.name;
        self.docstring(
            w,
            &format!("Return a newly allocated {name} with all elements set to zero."),
        );
        w.w(&format!("{name}_t *{name}_new(void);"));
        self.docstring(
            w,
            &format!(
                "Release all storage held by the {name} in 'victim'. (Do \
                 nothing if 'victim' is NULL.)"
            ),
        );
        w.w(&format!("void {name}_free({name}_t *victim);"));

        if !decl.is_context {
            self.parse_encode_prototypes(w, name, &decl.context_list);
        }
        AccessorEmitter::prototypes().emit_struct(w, decl);
        w.blank();
    }

    fn parse_encode_prototypes(&self, w: &mut CWriter, name: &str, contexts: &[String]) {
        let formals = format_contexts(contexts, true);
        self.docstring(
            w,
            &format!(
                "Try to parse a {name} from the buffer in 'input', using up to \
                 'len_in' bytes from the input buffer. On success, return the \
                 number of bytes consumed and set *output to the newly \
                 allocated {name}_t. On failure, return -2 if the input \
                 appears truncated, and -1 if the input is otherwise invalid."
            ),
        );
        w.w(&format!(
            "ssize_t {name}_parse({name}_t **output, const uint8_t *input, const size_t len_in{formals});"
        ));
        self.docstring(
            w,
            &format!(
                "Return the number of bytes we expect to need to encode the \
                 {name} in 'obj'. On failure, return a negative value. Note \
                 that this value may be an overestimate, and can even be an \
                 underestimate for certain unencodeable objects."
            ),
        );
        w.w(&format!(
            "ssize_t {name}_encoded_len(const {name}_t *obj{formals});"
        ));
        self.docstring(
            w,
            &format!(
                "Try to encode the {name} from 'input' into the buffer at \
                 'output', using up to 'avail' bytes of the output buffer. On \
                 success, return the number of bytes used. On failure, return \
                 -2 if the buffer was not long enough, and -1 if the input was \
                 invalid."
            ),
        );
        w.w(&format!(
            "ssize_t {name}_encode(uint8_t *output, size_t avail, const {name}_t *input{formals});"
        ));
        self.docstring(
            w,
            &format!(
                "Check whether the internal state of the {name} in 'obj' is \
                 consistent. Return NULL if it is, and a short message if it \
                 is not."
            ),
        );
        w.w(&format!(
            "const char *{name}_check(const {name}_t *obj{formals});"
        ));
        self.docstring(
            w,
            "Clear any errors that were set on the object 'obj' by its setter \
             functions. Return true iff errors were cleared.",
        );
        w.w(&format!("int {name}_clear_errors({name}_t *obj);"));
    }
}

/// Prototypes for an extern struct, emitted into the module so the
/// generated bodies can call into the sibling compilation unit.
pub fn emit_extern_prototypes(w: &mut CWriter, es: &ExternStructDecl) {
    let name = &es.name;
    w.w(&format!("{name}_t *{name}_new(void);"));
    w.w(&format!("void {name}_free({name}_t *victim);"));
    let formals = format_contexts(&es.context_list, true);
    w.w(&format!(
        "ssize_t {name}_parse({name}_t **output, const uint8_t *input, const size_t len_in{formals});"
    ));
    w.w(&format!(
        "ssize_t {name}_encoded_len(const {name}_t *obj{formals});"
    ));
    w.w(&format!(
        "ssize_t {name}_encode(uint8_t *output, size_t avail, const {name}_t *input{formals});"
    ));
    w.w(&format!(
        "const char *{name}_check(const {name}_t *obj{formals});"
    ));
    w.w(&format!("int {name}_clear_errors({name}_t *obj);"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::annotator::annotate;
    use crate::services::checker::check;
    use crate::services::parser::parse_schema;

    fn emit_decls(input: &str) -> String {
        let mut file = parse_schema(input).unwrap();
        let order = check(&mut file).unwrap();
        annotate(&mut file);
        let mut w = CWriter::new();
        DeclarationEmitter::new(&file, false).emit(&mut w, &order);
        w.into_string()
    }

    fn emit_protos(input: &str) -> String {
        let mut file = parse_schema(input).unwrap();
        let order = check(&mut file).unwrap();
        annotate(&mut file);
        let mut w = CWriter::new();
        PrototypeEmitter::new(&file, true).emit(&mut w, &order);
        w.into_string()
    }

    #[test]
    fn test_layout_field_mapping() {
        let out = emit_decls(
            "struct inner { u8 x; }
             struct s { u16 n; struct inner i; nulterm name; u8 raw[4]; \
               char tag[8]; struct inner fixed[2]; u8 var[n]; @ptr mark; }",
        );
        assert!(out.contains("uint16_t n;"));
        assert!(out.contains("struct inner_st *i;"));
        assert!(out.contains("char *name;"));
        assert!(out.contains("uint8_t raw[4];"));
        assert!(out.contains("char tag[8+1];"));
        assert!(out.contains("struct inner_st *fixed[2];"));
        assert!(out.contains("TRUNNEL_DYNARRAY_HEAD(, uint8_t) var;"));
        assert!(out.contains("const uint8_t *mark;"));
        assert!(out.contains("uint8_t trunnel_error_code_;"));
    }

    #[test]
    fn test_char_var_array_is_string() {
        let out = emit_decls("struct s { u8 n; char name[n]; }");
        assert!(out.contains("trunnel_string_t name;"));
    }

    #[test]
    fn test_union_branches_inline_prefixed() {
        let out = emit_decls(
            "struct s { u8 t; union u[t] { 1: u32 a; 2: nulterm b; default: fail; }; }",
        );
        assert!(out.contains("uint32_t u_a;"));
        assert!(out.contains("char *u_b;"));
    }

    #[test]
    fn test_default_layout_guard() {
        let out = emit_decls("struct cell { u8 x; }");
        assert!(out.contains(
            "#if !defined(TRUNNEL_OPAQUE) && !defined(TRUNNEL_OPAQUE_CELL)"
        ));
        assert!(out.contains("typedef struct cell_st cell_t;"));
    }

    #[test]
    fn test_opaque_layout_guard() {
        let out = emit_decls("trunnel options opaque; struct cell { u8 x; }");
        assert!(out.contains("#if defined(TRUNNEL_EXPOSE_CELL_)"));
    }

    #[test]
    fn test_very_opaque_typedef_only() {
        let out = emit_decls("trunnel options very_opaque; struct cell { u8 x; }");
        assert!(out.contains("typedef struct cell_st cell_t;"));
        assert!(!out.contains("uint8_t x;"));
    }

    #[test]
    fn test_constants_emitted_as_defines() {
        let out = emit_decls("/** Max. */ const MAX_LEN = 16; struct s { u8 x; }");
        assert!(out.contains("/** Max. */"));
        assert!(out.contains("#define MAX_LEN 16"));
    }

    #[test]
    fn test_prototypes_with_contexts() {
        let out = emit_protos(
            "context ctx { u8 v; } struct s with context ctx { u8 body[ctx.v]; }",
        );
        assert!(out.contains(
            "ssize_t s_parse(s_t **output, const uint8_t *input, const size_t len_in, const ctx_t *ctx_ctx);"
        ));
        assert!(out.contains("const char *s_check(const s_t *obj, const ctx_t *ctx_ctx);"));
        // Contexts get allocation and accessors but no parse/encode.
        assert!(out.contains("ctx_t *ctx_new(void);"));
        assert!(!out.contains("ctx_parse("));
    }

    #[test]
    fn test_extern_forward_declared() {
        let out = emit_decls("extern struct other; struct s { struct other o; }");
        assert!(out.starts_with("struct other_st;"));
    }
}
