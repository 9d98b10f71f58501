//! C code emission.
//!
//! Turns a checked, annotated [`File`] into the text of a header and a
//! module. Each generated function family lives in its own submodule;
//! everything writes through [`CWriter`], which handles indentation and
//! doc-comment wrapping. Structures are emitted in the topological
//! order computed by the checker, so every struct's functions precede
//! their callers and two runs over the same input produce identical
//! bytes.

pub mod accessors;
pub mod body;
pub mod boilerplate;
pub mod encode;
pub mod header;
pub mod parse;

use crate::models::ast::*;

/// Emit the `.h` file: boilerplate, declarations, prototypes, footer.
pub fn emit_header(file: &File, order: &[String], h_fname: &str) -> String {
    let mut w = CWriter::new();
    w.raw(&boilerplate::header_preamble(h_fname));
    header::DeclarationEmitter::new(file, false).emit(&mut w, order);
    header::PrototypeEmitter::new(file, true).emit(&mut w, order);
    w.raw(boilerplate::HEADER_FOOTER);
    w.into_string()
}

/// Emit the `.c` file: boilerplate, per-struct function bodies in
/// topological order.
pub fn emit_module(file: &File, order: &[String], h_fname: &str, c_fname: &str) -> String {
    let mut w = CWriter::new();
    w.raw(&boilerplate::module_preamble(file, order, h_fname, c_fname));
    if file.has_option("very_opaque") {
        header::DeclarationEmitter::new(file, true).emit(&mut w, order);
    }
    for es in &file.extern_structs {
        w.w(&format!("typedef struct {0}_st {0}_t;", es.name));
        header::emit_extern_prototypes(&mut w, es);
    }
    for name in order {
        let Some(decl) = file.declaration(name) else {
            continue;
        };
        body::emit_new_fn(&mut w, decl);
        body::emit_free_fns(&mut w, decl);
        accessors::AccessorEmitter::bodies().emit_struct(&mut w, decl);
        body::emit_check_fn(&mut w, file, decl);
        body::emit_encoded_len_fn(&mut w, file, decl);
        encode::emit_clear_errors_fn(&mut w, decl);
        encode::EncodeEmitter::new(file, decl).emit(&mut w);
        parse::ParseEmitter::new(file, decl).emit(&mut w);
    }
    w.into_string()
}

/// Indentation-tracking writer for generated C.
///
/// Lines are indented to the current level, except blank lines and
/// preprocessor directives, which always land in column zero.
pub struct CWriter {
    out: String,
    indent: usize,
}

impl Default for CWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CWriter {
    pub fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
        }
    }

    pub fn into_string(self) -> String {
        self.out
    }

    /// Write a block of code, indenting each line.
    pub fn w(&mut self, code: &str) {
        for line in code.split('\n') {
            if line.is_empty() || line.chars().all(|c| c.is_whitespace()) {
                self.out.push('\n');
            } else if line.starts_with('#') {
                self.out.push_str(line);
                self.out.push('\n');
            } else {
                for _ in 0..self.indent {
                    self.out.push(' ');
                }
                self.out.push_str(line);
                self.out.push('\n');
            }
        }
        // split('\n') yields one empty trailing chunk for a trailing
        // newline; drop the line it produced.
        if code.ends_with('\n') {
            self.out.pop();
        }
    }

    /// Write text verbatim, no indentation, no newline handling.
    pub fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    pub fn comment(&mut self, text: &str) {
        self.w(&format!("/* {text} */"));
    }

    /// Comment announcing work on a struct member.
    pub fn elt_header(&mut self, action: &str, name: &str) {
        self.blank();
        self.w(&format!("/* {action} {name} */"));
    }

    /// Emit a wrapped `/** ... */` doc comment. Interior whitespace is
    /// collapsed; output is wrapped near 70 columns.
    pub fn docstring(&mut self, text: &str) {
        let mut line = String::from("/**");
        for word in text.split_whitespace() {
            if line.len() + 1 + word.len() > 70 && line.len() > 4 {
                self.out.push_str(&line);
                self.out.push('\n');
                line = String::from(" *");
            }
            line.push(' ');
            line.push_str(word);
        }
        self.out.push_str(&line);
        self.out.push('\n');
        self.out.push_str(" */\n");
    }

    /// Write a schema doc annotation (`/** ... */` text carried through
    /// from the input) followed by a newline.
    pub fn annotation(&mut self, doc: &Option<String>) {
        if let Some(text) = doc {
            self.w(text);
        }
    }

    pub fn push_indent(&mut self, n: usize) {
        self.indent += n;
    }

    pub fn pop_indent(&mut self, n: usize) {
        self.indent = self.indent.saturating_sub(n);
    }
}

/// Open a block iterating `idx` from 0 to `bound_expr`, run `body` on
/// each element, and close the block. Shared by every generator that
/// walks an array member.
pub fn iterate_elements(w: &mut CWriter, bound_expr: &str, extra_decl: &str, body: &str) {
    w.w("{");
    w.push_indent(2);
    if !extra_decl.is_empty() {
        w.w(extra_decl);
    }
    w.w("unsigned idx;");
    w.w(&format!("for (idx = 0; idx < {bound_expr}; ++idx) {{"));
    w.push_indent(2);
    w.w(body);
    w.pop_indent(2);
    w.w("}");
    w.pop_indent(2);
    w.w("}");
}

/// Bound expression for iterating a variable array.
pub fn dynarray_len(c_name: &str) -> String {
    format!("TRUNNEL_DYNARRAY_LEN(&obj->{c_name})")
}

/// Byte-order conversion function applied when encoding a field of the
/// given width (host to network).
pub fn hton_fn(width: u8) -> &'static str {
    match width {
        8 => "",
        16 => "trunnel_htons",
        32 => "trunnel_htonl",
        _ => "trunnel_htonll",
    }
}

/// Byte-order conversion function applied when parsing a field of the
/// given width (network to host).
pub fn ntoh_fn(width: u8) -> &'static str {
    match width {
        8 => "",
        16 => "trunnel_ntohs",
        32 => "trunnel_ntohl",
        _ => "trunnel_ntohll",
    }
}

/// Context formal parameters (`, const foo_t *foo_ctx`) for a context
/// list, or the matching call arguments.
pub fn format_contexts(contexts: &[String], declaration: bool) -> String {
    contexts
        .iter()
        .map(|c| {
            if declaration {
                format!(", const {c}_t *{c}_ctx")
            } else {
                format!(", {c}_ctx")
            }
        })
        .collect()
}

/// C expression reading a referenced field: a member of the object
/// being handled, or a field of a caller-supplied context.
pub fn field_expr(field: &FieldRef, info: Option<&IntFieldInfo>) -> String {
    match field {
        FieldRef::Context { ctx, field } => format!("{ctx}_ctx->{field}"),
        FieldRef::Local(name) => match info {
            Some(info) => format!("obj->{}", info.c_name),
            None => format!("obj->{name}"),
        },
    }
}

/// C expression that is true iff `value` satisfies the constraint.
/// Checks that are always true for the field's width are not emitted.
pub fn int_constraint_expr(value: &str, constraint: &IntConstraint, width: u8) -> String {
    let maximum = IntType { width }.max();
    let mut tests = Vec::with_capacity(constraint.ranges.len());
    for (range, &(lo, hi)) in constraint.ranges.iter().zip(&constraint.resolved) {
        if lo == hi {
            tests.push(format!("{value} == {}", range.lo));
        } else if lo == 0 {
            tests.push(format!("{value} <= {}", range.hi));
        } else if hi == maximum {
            tests.push(format!("{value} >= {}", range.lo));
        } else {
            tests.push(format!(
                "({value} >= {} && {value} <= {})",
                range.lo, range.hi
            ));
        }
    }
    format!("({})", tests.join(" || "))
}

/// Case labels for one union branch. A multi-value range expands to one
/// label per value; single values keep any constant name they were
/// written with.
pub fn write_case_labels(w: &mut CWriter, case: &UnionCase, resolved: &[(u64, u64)]) {
    w.blank();
    let Some(tags) = &case.tags else {
        w.w("default:");
        return;
    };
    for (range, &(lo, hi)) in tags.iter().zip(resolved) {
        if lo == hi {
            w.w(&format!("case {}:", range.lo));
        } else {
            for value in lo..=hi {
                w.w(&format!("case {value}:"));
            }
        }
    }
}

/// Resolve a union case's tag ranges to numeric pairs. The checker has
/// validated every constant, so lookups cannot fail.
pub fn resolve_case_tags(file: &File, case: &UnionCase) -> Vec<(u64, u64)> {
    let Some(tags) = &case.tags else {
        return Vec::new();
    };
    let value_of = |bound: &Bound| match bound {
        Bound::Lit(v) => *v,
        Bound::Const(name) => file
            .constants
            .iter()
            .find(|c| c.name == *name)
            .map(|c| c.value)
            .unwrap_or(0),
    };
    tags.iter()
        .map(|r| (value_of(&r.lo), value_of(&r.hi)))
        .collect()
}

/// Element type of an array in C, as `(type, needs_extra_const)`.
/// Struct elements are stored as pointers, so their accessors need an
/// extra `const` to make the pointee immutable too.
pub fn element_type(base: &ArrayBase) -> (String, bool) {
    match base {
        ArrayBase::Char => ("char".to_string(), false),
        ArrayBase::Int(ty) => (format!("uint{}_t", ty.width), false),
        ArrayBase::Struct(name) => (format!("struct {name}_st *"), true),
    }
}
