//! Encode-function generation.
//!
//! The generated function checks the object, then writes each member in
//! declaration order, maintaining `written` (bytes emitted), `ptr`
//! (output cursor), and `avail` (bytes usable). Invariants throughout:
//! `written <= avail` and `ptr == output + written`. Returns the byte
//! count on success, -2 when the buffer is too short, -1 when the
//! object cannot be encoded.
//!
//! Length fields that bound an extent are back-patched: their output
//! position is remembered when they are written, and filled in once the
//! extent's actual size is known. Past a leftover-bytes boundary,
//! `avail` has been clamped to the structure's exact end, so a
//! shortfall there is an invalid-object error rather than a truncation
//! whenever the caller's original buffer was big enough.

use crate::models::ast::*;

use super::{
    dynarray_len, field_expr, format_contexts, hton_fn, iterate_elements, resolve_case_tags,
    write_case_labels, CWriter,
};

/// `typename_clear_errors`: reset the deferred-setter-failure flag.
pub fn emit_clear_errors_fn(w: &mut CWriter, decl: &StructDecl) {
    if decl.is_context {
        return;
    }
    let name = &decl.name;
    w.w(&format!(
        "int\n\
         {name}_clear_errors({name}_t *obj)\n\
         {{\n\
         \x20 int r = obj->trunnel_error_code_;\n\
         \x20 obj->trunnel_error_code_ = 0;\n\
         \x20 return r;\n\
         }}"
    ));
    w.blank();
}

pub struct EncodeEmitter<'a> {
    file: &'a File,
    decl: &'a StructDecl,
    need_truncated: bool,
    lc_depth: u32,
}

impl<'a> EncodeEmitter<'a> {
    pub fn new(file: &'a File, decl: &'a StructDecl) -> Self {
        Self {
            file,
            decl,
            need_truncated: false,
            lc_depth: 0,
        }
    }

    pub fn emit(mut self, w: &mut CWriter) {
        if self.decl.is_context {
            return;
        }
        let name = &self.decl.name;
        let formals = format_contexts(&self.decl.context_list, true);
        let args = format_contexts(&self.decl.context_list, false);
        // A leftover-bytes extent clamps `avail` mid-function.
        let optconst = if self.decl.has_leftover_field {
            ""
        } else {
            "const "
        };

        w.w(&format!(
            "ssize_t\n\
             {name}_encode(uint8_t *output, {optconst}size_t avail, const {name}_t *obj{formals})\n\
             {{"
        ));
        w.push_indent(2);
        w.w(
            "ssize_t result = 0;\n\
             size_t written = 0;\n\
             uint8_t *ptr = output;\n\
             const char *msg;",
        );
        w.w(&format!(
            "#ifdef TRUNNEL_CHECK_ENCODED_LEN\n\
             const ssize_t encoded_len = {name}_encoded_len(obj{args});\n\
             #endif"
        ));
        if self.decl.has_leftover_field {
            w.w("int enforce_avail = 0;\nconst size_t avail_orig = avail;");
        }
        w.blank();
        if !self.decl.length_fields.is_empty() {
            for info in &self.decl.length_fields {
                w.w(&format!("uint8_t *backptr_{} = NULL;", info.c_name));
            }
            w.blank();
        }
        w.w(&format!(
            "if (NULL != (msg = {name}_check(obj{args})))\n\
             \x20 goto check_failed;"
        ));
        w.blank();
        w.w("#ifdef TRUNNEL_CHECK_ENCODED_LEN");
        w.w("trunnel_assert(encoded_len >= 0);");
        w.w("#endif");

        self.members(w, &self.decl.members.clone());

        w.blank();
        w.w("trunnel_assert(ptr == output + written);");
        if self.decl.has_leftover_field {
            w.w(
                "if (enforce_avail && avail != written)\n\
                 \x20 goto check_failed;",
            );
        }
        w.w(
            "#ifdef TRUNNEL_CHECK_ENCODED_LEN\n\
             {\n\
             \x20 trunnel_assert(encoded_len >= 0);\n\
             \x20 trunnel_assert((size_t)encoded_len == written);\n\
             }\n\
             #endif",
        );
        w.blank();
        w.w("return written;");
        w.blank();
        w.pop_indent(2);
        if self.need_truncated {
            w.w(" truncated:\n  result = -2;\n  goto fail;");
        }
        w.w(
            " check_failed:\n\
             \x20 (void)msg;\n\
             \x20 result = -1;\n\
             \x20 goto fail;\n\
             \x20fail:\n\
             \x20 trunnel_assert(result < 0);\n\
             \x20 return result;",
        );
        w.w("}");
        w.blank();
    }

    /// Bounds check before writing `needed` bytes. Past a leftover
    /// boundary the shortfall only counts as truncation when even the
    /// caller's original buffer was too small.
    fn check_avail(&mut self, needed: &str, after_leftover: bool) -> String {
        self.need_truncated = true;
        if after_leftover {
            format!(
                "trunnel_assert(written <= avail);\n\
                 if (avail - written < {needed}) {{\n\
                 \x20 if (avail_orig - written < {needed})\n\
                 \x20   goto truncated;\n\
                 \x20 else\n\
                 \x20   goto check_failed;\n\
                 }}"
            )
        } else {
            format!(
                "trunnel_assert(written <= avail);\n\
                 if (avail - written < {needed})\n\
                 \x20 goto truncated;"
            )
        }
    }

    fn encode_integer(&mut self, width: u8, element: &str, after_leftover: bool) -> String {
        let nbytes = width / 8;
        let hton = hton_fn(width);
        let avail = self.check_avail(&nbytes.to_string(), after_leftover);
        format!(
            "{avail}\n\
             trunnel_set_uint{width}(ptr, {hton}({element}));\n\
             written += {nbytes}; ptr += {nbytes};"
        )
    }

    fn encode_struct(&mut self, struct_name: &str, element: &str) -> String {
        let args = format_contexts(self.file.context_list_of(struct_name), false);
        format!(
            "trunnel_assert(written <= avail);\n\
             result = {struct_name}_encode(ptr, avail - written, {element}{args});\n\
             if (result < 0)\n\
             \x20 goto fail;\n\
             written += result; ptr += result;"
        )
    }

    fn members(&mut self, w: &mut CWriter, members: &[Member]) {
        for member in members {
            self.member(w, member);
        }
    }

    fn member(&mut self, w: &mut CWriter, member: &Member) {
        let c_name = &member.c_name;
        let alf = member.after_leftover;
        match &member.kind {
            MemberKind::Int(im) => {
                w.elt_header("Encode", &member.describe());
                if self
                    .decl
                    .length_fields
                    .iter()
                    .any(|info| info.c_name == *c_name)
                {
                    w.w(&format!("backptr_{c_name} = ptr;"));
                }
                let code = self.encode_integer(im.ty.width, &format!("obj->{c_name}"), alf);
                w.w(&code);
            }
            MemberKind::Struct(sm) => {
                w.elt_header("Encode", &member.describe());
                let code = self.encode_struct(&sm.struct_name, &format!("obj->{c_name}"));
                w.w(&code);
            }
            MemberKind::FixedArray(fa) => {
                w.elt_header("Encode", &member.describe());
                let width = fa.width.to_string();
                match &fa.base {
                    ArrayBase::Char => {
                        let avail = self.check_avail(&width, alf);
                        w.w(&avail);
                        w.w(&format!(
                            "{{\n\
                             \x20 size_t len = strlen(obj->{c_name});\n\
                             \x20 trunnel_assert(len <= {width});\n\
                             \x20 memcpy(ptr, obj->{c_name}, len);\n\
                             \x20 memset(ptr + len, 0, {width} - len);\n\
                             \x20 written += {width}; ptr += {width};\n\
                             }}"
                        ));
                    }
                    ArrayBase::Int(ty) if ty.width == 8 => {
                        let avail = self.check_avail(&width, alf);
                        w.w(&avail);
                        w.w(&format!(
                            "memcpy(ptr, obj->{c_name}, {width});\n\
                             written += {width}; ptr += {width};"
                        ));
                    }
                    ArrayBase::Int(ty) => {
                        let body =
                            self.encode_integer(ty.width, &format!("obj->{c_name}[idx]"), alf);
                        iterate_elements(w, &width, "", &body);
                    }
                    ArrayBase::Struct(sn) => {
                        let body = self.encode_struct(sn, &format!("obj->{c_name}[idx]"));
                        iterate_elements(w, &width, "", &body);
                    }
                }
            }
            MemberKind::VarArray(va) => {
                w.elt_header("Encode", &member.describe());
                if va.base.is_bytes() {
                    w.w(&format!(
                        "{{\n\
                         \x20 size_t elt_len = TRUNNEL_DYNARRAY_LEN(&obj->{c_name});"
                    ));
                    if let Some(width_field) = &va.width_field {
                        let wexpr = field_expr(width_field, va.width_info.as_ref());
                        w.w(&format!("  trunnel_assert({wexpr} == elt_len);"));
                    }
                    w.push_indent(2);
                    let avail = self.check_avail("elt_len", alf);
                    w.w(&avail);
                    w.pop_indent(2);
                    w.w(&format!(
                        "  if (elt_len)\n\
                         \x20   memcpy(ptr, obj->{c_name}.elts_, elt_len);\n\
                         \x20 written += elt_len; ptr += elt_len;\n\
                         }}"
                    ));
                } else {
                    let body = match &va.base {
                        ArrayBase::Struct(sn) => self.encode_struct(
                            sn,
                            &format!("TRUNNEL_DYNARRAY_GET(&obj->{c_name}, idx)"),
                        ),
                        ArrayBase::Int(ty) => self.encode_integer(
                            ty.width,
                            &format!("TRUNNEL_DYNARRAY_GET(&obj->{c_name}, idx)"),
                            alf,
                        ),
                        ArrayBase::Char => unreachable!(),
                    };
                    iterate_elements(w, &dynarray_len(c_name), "", &body);
                }
            }
            MemberKind::NulTerm { .. } => {
                w.elt_header("Encode", &member.describe());
                w.w(&format!(
                    "{{\n\
                     \x20 size_t len = strlen(obj->{c_name});"
                ));
                w.push_indent(2);
                let avail = self.check_avail("len + 1", alf);
                w.w(&avail);
                w.pop_indent(2);
                w.w(&format!(
                    "  memcpy(ptr, obj->{c_name}, len + 1);\n\
                     \x20 ptr += len + 1; written += len + 1;\n\
                     }}"
                ));
            }
            MemberKind::LenConstrained(lc) => self.len_constrained(w, member, lc),
            MemberKind::Union(u) => {
                w.elt_header("Encode", &member.describe());
                w.w("trunnel_assert(written <= avail);");
                let tag = field_expr(&u.tag_field, u.tag_info.as_ref());
                w.w(&format!("switch ({tag}) {{"));
                for case in &u.cases {
                    let resolved = resolve_case_tags(self.file, case);
                    w.push_indent(2);
                    write_case_labels(w, case, &resolved);
                    w.push_indent(2);
                    self.members(w, &case.members);
                    w.w("break;");
                    w.pop_indent(4);
                }
                w.w("}");
            }
            MemberKind::Fail => {
                // check() rejected any object that could get here.
                w.w("trunnel_assert(0);");
            }
            MemberKind::Position { .. } | MemberKind::Eos | MemberKind::Ignore => {}
        }
    }

    fn len_constrained(&mut self, w: &mut CWriter, member: &Member, lc: &LenConstrainedMember) {
        let nested = self.lc_depth > 0;
        w.w("{");
        w.push_indent(2);
        if lc.length_field.is_some() {
            w.w("size_t written_before_union = written;");
        }
        self.lc_depth += 1;
        self.members(w, &lc.members);
        self.lc_depth -= 1;

        match (&lc.length_field, &lc.length_info) {
            (Some(field @ FieldRef::Context { .. }), _) => {
                // A context-supplied length cannot be back-patched; the
                // extent must come out exactly that long.
                let expr = field_expr(field, None);
                w.w(&format!(
                    "trunnel_assert(written >= written_before_union);\n\
                     if (written - written_before_union != {expr})\n\
                     \x20 goto check_failed;"
                ));
            }
            (Some(_), Some(info)) => {
                let width = info.width;
                let hton = hton_fn(width);
                w.comment(&format!(
                    "Write the length field back to {}",
                    lc.length_field.as_ref().unwrap()
                ));
                w.w("trunnel_assert(written >= written_before_union);");
                w.w(&format!(
                    "#if UINT{width}_MAX < SIZE_MAX\n\
                     if (written - written_before_union > UINT{width}_MAX)\n\
                     \x20 goto check_failed;\n\
                     #endif"
                ));
                w.w(&format!(
                    "trunnel_set_uint{width}(backptr_{}, {hton}(written - written_before_union));",
                    info.c_name
                ));
            }
            _ if nested => {
                // A nested extent is always zero-leftover: the enclosed
                // members already ran to the end of the outer extent,
                // and the outer length accounting covers them.
            }
            _ => {
                let leftover = lc
                    .leftover
                    .as_ref()
                    .map(|k| k.to_string())
                    .unwrap_or_default();
                let avail = self.check_avail(&leftover, member.after_leftover);
                w.w(&avail);
                w.w(&format!(
                    "avail = written + {leftover};\n\
                     enforce_avail = 1;"
                ));
            }
        }
        w.pop_indent(2);
        w.w("}");
    }
}
