//! Parse-function generation.
//!
//! `typename_parse_into` fills an already-allocated object from an
//! input buffer, maintaining `ptr` (input cursor) and `remaining`
//! (bytes left); `ptr + remaining == input + len_in` throughout.
//! Failures jump forward to shared epilogue labels: `truncated` returns
//! -2, `relay_fail` propagates a child's result, `trunnel_alloc_failed`
//! and `fail` return -1. Inside a length-constrained region (or a
//! remainder loop) the boundary is already known, so truncation there
//! is invalid input: both redirect to `fail`.
//!
//! `typename_parse` is a thin wrapper that allocates the object and
//! frees it again if parsing fails.

use crate::models::ast::*;

use super::{
    field_expr, format_contexts, iterate_elements, ntoh_fn, resolve_case_tags, write_case_labels,
    CWriter,
};

#[derive(Default)]
struct NeedLabels {
    truncated: bool,
    relay_fail: bool,
    alloc_failed: bool,
    fail: bool,
}

pub struct ParseEmitter<'a> {
    file: &'a File,
    decl: &'a StructDecl,
    need: NeedLabels,
    truncated_label: &'static str,
    struct_fail_label: &'static str,
}

impl<'a> ParseEmitter<'a> {
    pub fn new(file: &'a File, decl: &'a StructDecl) -> Self {
        Self {
            file,
            decl,
            need: NeedLabels::default(),
            truncated_label: "truncated",
            struct_fail_label: "relay_fail",
        }
    }

    fn need_label(&mut self, label: &str) {
        match label {
            "truncated" => self.need.truncated = true,
            "relay_fail" => self.need.relay_fail = true,
            "trunnel_alloc_failed" => self.need.alloc_failed = true,
            _ => self.need.fail = true,
        }
    }

    pub fn emit(mut self, w: &mut CWriter) {
        if self.decl.is_context {
            return;
        }
        let name = self.decl.name.clone();
        let formals = format_contexts(&self.decl.context_list, true);
        let args = format_contexts(&self.decl.context_list, false);

        w.docstring(&format!(
            "As {name}_parse(), but do not allocate the output object."
        ));
        w.w(&format!(
            "static ssize_t\n\
             {name}_parse_into({name}_t *obj, const uint8_t *input, const size_t len_in{formals})\n\
             {{\n\
             \x20 const uint8_t *ptr = input;\n\
             \x20 size_t remaining = len_in;\n\
             \x20 ssize_t result = 0;\n\
             \x20 (void)result;"
        ));
        w.push_indent(2);
        for ctx in &self.decl.context_list {
            w.w(&format!("if ({ctx}_ctx == NULL)\n  return -1;"));
        }

        self.members(w, &self.decl.members.clone());

        w.w("trunnel_assert(ptr + remaining == input + len_in);");
        w.w("return len_in - remaining;");
        w.blank();
        w.pop_indent(2);
        if self.need.truncated {
            w.w(" truncated:\n  return -2;");
        }
        if self.need.relay_fail {
            w.w(" relay_fail:\n  trunnel_assert(result < 0);\n  return result;");
        }
        if self.need.alloc_failed {
            w.w(" trunnel_alloc_failed:\n  return -1;");
        }
        if self.need.fail {
            w.w(" fail:\n  result = -1;\n  return result;");
        }
        w.w("}");
        w.blank();

        w.w(&format!(
            "ssize_t\n\
             {name}_parse({name}_t **output, const uint8_t *input, const size_t len_in{formals})\n\
             {{\n\
             \x20 ssize_t result;\n\
             \x20 *output = {name}_new();\n\
             \x20 if (NULL == *output)\n\
             \x20   return -1;\n\
             \x20 result = {name}_parse_into(*output, input, len_in{args});\n\
             \x20 if (result < 0) {{\n\
             \x20   {name}_free(*output);\n\
             \x20   *output = NULL;\n\
             \x20 }}\n\
             \x20 return result;\n\
             }}"
        ));
        w.blank();
    }

    fn parse_integer(&mut self, width: u8, element: &str) -> String {
        let nbytes = width / 8;
        let ntoh = ntoh_fn(width);
        let truncated = self.truncated_label;
        self.need_label(truncated);
        format!(
            "CHECK_REMAINING({nbytes}, {truncated});\n\
             {element} = {ntoh}(trunnel_get_uint{width}(ptr));\n\
             remaining -= {nbytes}; ptr += {nbytes};"
        )
    }

    fn parse_struct_into(&mut self, struct_name: &str, target: &str) -> String {
        let args = format_contexts(self.file.context_list_of(struct_name), false);
        let fail = self.struct_fail_label;
        self.need_label(fail);
        format!(
            "result = {struct_name}_parse(&{target}, ptr, remaining{args});\n\
             if (result < 0)\n\
             \x20 goto {fail};\n\
             trunnel_assert((size_t)result <= remaining);\n\
             remaining -= result; ptr += result;"
        )
    }

    fn members(&mut self, w: &mut CWriter, members: &[Member]) {
        for member in members {
            self.member(w, member);
        }
    }

    fn member(&mut self, w: &mut CWriter, member: &Member) {
        let c_name = &member.c_name;
        match &member.kind {
            MemberKind::Int(im) => {
                w.elt_header("Parse", &member.describe());
                let code = self.parse_integer(im.ty.width, &format!("obj->{c_name}"));
                w.w(&code);
                if let Some(constraint) = &im.constraint {
                    let expr = super::int_constraint_expr(
                        &format!("obj->{c_name}"),
                        constraint,
                        im.ty.width,
                    );
                    self.need_label("fail");
                    w.w(&format!("if (! {expr})\n  goto fail;"));
                }
            }
            MemberKind::Struct(sm) => {
                w.elt_header("Parse", &member.describe());
                let code = self.parse_struct_into(&sm.struct_name, &format!("obj->{c_name}"));
                w.w(&code);
            }
            MemberKind::FixedArray(fa) => self.fixed_array(w, member, fa),
            MemberKind::VarArray(va) => self.var_array(w, member, va),
            MemberKind::NulTerm { .. } => {
                w.elt_header("Parse", &member.describe());
                let truncated = self.truncated_label;
                self.need_label(truncated);
                self.need_label("fail");
                w.w(&format!(
                    "{{\n\
                     \x20 uint8_t *eos = (uint8_t*)memchr(ptr, 0, remaining);\n\
                     \x20 size_t memlen;\n\
                     \x20 if (eos == NULL)\n\
                     \x20   goto {truncated};\n\
                     \x20 trunnel_assert(eos >= ptr);\n\
                     \x20 trunnel_assert((size_t)(eos - ptr) < SIZE_MAX - 1);\n\
                     \x20 memlen = ((size_t)(eos - ptr)) + 1;\n\
                     \x20 if (!(obj->{c_name} = trunnel_malloc(memlen)))\n\
                     \x20   goto fail;\n\
                     \x20 memcpy(obj->{c_name}, ptr, memlen);\n\
                     \x20 remaining -= memlen; ptr += memlen;\n\
                     }}"
                ));
            }
            MemberKind::Position { .. } => {
                w.w(&format!("obj->{c_name} = ptr;"));
            }
            MemberKind::LenConstrained(lc) => self.len_constrained(w, lc),
            MemberKind::Union(u) => {
                w.elt_header("Parse", &member.describe());
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
            MemberKind::Eos => {
                self.need_label("fail");
                w.w("if (remaining)\n  goto fail;");
            }
            MemberKind::Ignore => {
                w.comment("Skip to end of union");
                w.w("ptr += remaining; remaining = 0;");
            }
            MemberKind::Fail => {
                self.need_label("fail");
                w.w("goto fail;");
            }
        }
    }

    fn fixed_array(&mut self, w: &mut CWriter, member: &Member, fa: &FixedArrayMember) {
        let c_name = &member.c_name;
        w.elt_header("Parse", &member.describe());
        let width = fa.width.to_string();
        match &fa.base {
            ArrayBase::Struct(sn) => {
                let body = self.parse_struct_into(sn, &format!("obj->{c_name}[idx]"));
                iterate_elements(w, &width, "", &body);
            }
            base => {
                let truncated = self.truncated_label;
                self.need_label(truncated);
                let multiplier = match base {
                    ArrayBase::Int(ty) if ty.width > 8 => format!("{} * ", ty.bytes()),
                    _ => String::new(),
                };
                w.w(&format!(
                    "CHECK_REMAINING({multiplier}{width}, {truncated});\n\
                     memcpy(obj->{c_name}, ptr, {multiplier}{width});"
                ));
                if let ArrayBase::Int(ty) = base {
                    if ty.width > 8 {
                        let ntoh = ntoh_fn(ty.width);
                        w.w(&format!(
                            "{{\n\
                             \x20 unsigned idx;\n\
                             \x20 for (idx = 0; idx < {width}; ++idx)\n\
                             \x20   obj->{c_name}[idx] = {ntoh}(obj->{c_name}[idx]);\n\
                             }}"
                        ));
                    }
                }
                w.w(&format!(
                    "remaining -= {multiplier}{width}; ptr += {multiplier}{width};"
                ));
            }
        }
    }

    fn var_array(&mut self, w: &mut CWriter, member: &Member, va: &VarArrayMember) {
        let c_name = &member.c_name;
        w.elt_header("Parse", &member.describe());
        let width_expr = va
            .width_field
            .as_ref()
            .map(|f| field_expr(f, va.width_info.as_ref()));

        if va.base.is_bytes() {
            let truncated = self.truncated_label;
            self.need_label(truncated);
            let wexpr = match &width_expr {
                Some(expr) => {
                    w.w(&format!("CHECK_REMAINING({expr}, {truncated});"));
                    expr.clone()
                }
                None => "remaining".to_string(),
            };
            if matches!(va.base, ArrayBase::Char) {
                self.need_label("fail");
                w.w(&format!(
                    "if ({}_setstr0_{c_name}(obj, (const char*)ptr, {wexpr}))\n\
                     \x20 goto fail;",
                    self.decl.name
                ));
            } else {
                self.need_label("trunnel_alloc_failed");
                w.w(&format!(
                    "TRUNNEL_DYNARRAY_EXPAND(uint8_t, &obj->{c_name}, {wexpr}, {{}});\n\
                     obj->{c_name}.n_ = {wexpr};\n\
                     if ({wexpr})\n\
                     \x20 memcpy(obj->{c_name}.elts_, ptr, {wexpr});"
                ));
            }
            w.w(&format!("ptr += {wexpr}; remaining -= {wexpr};"));
            return;
        }

        self.need_label("trunnel_alloc_failed");
        let (elttype, on_fail) = match &va.base {
            ArrayBase::Struct(sn) => (format!("{sn}_t *"), format!("{{{sn}_free(elt);}}")),
            ArrayBase::Int(ty) => (format!("uint{}_t", ty.width), "{}".to_string()),
            ArrayBase::Char => unreachable!(),
        };
        if let Some(expr) = &width_expr {
            w.w(&format!(
                "TRUNNEL_DYNARRAY_EXPAND({elttype}, &obj->{c_name}, {expr}, {{}});"
            ));
        }
        w.w("{");
        w.w(&format!("  {elttype} elt;"));
        let saved = (self.truncated_label, self.struct_fail_label);
        match &width_expr {
            Some(expr) => {
                w.w("  unsigned idx;");
                w.w(&format!("  for (idx = 0; idx < {expr}; ++idx) {{"));
            }
            None => {
                // A truncated element inside a runs-to-end array means
                // the input is corrupt, not short: the boundary is
                // already exact.
                w.w("  while (remaining > 0) {");
                self.truncated_label = "fail";
                self.struct_fail_label = "fail";
            }
        }
        w.push_indent(4);
        let body = match &va.base {
            ArrayBase::Struct(sn) => self.parse_struct_into(sn, "elt"),
            ArrayBase::Int(ty) => self.parse_integer(ty.width, "elt"),
            ArrayBase::Char => unreachable!(),
        };
        w.w(&body);
        w.w(&format!(
            "TRUNNEL_DYNARRAY_ADD({elttype}, &obj->{c_name}, elt, {on_fail});"
        ));
        w.pop_indent(2);
        w.w("}");
        w.pop_indent(2);
        if width_expr.is_none() {
            self.truncated_label = saved.0;
            self.struct_fail_label = saved.1;
        }
        w.w("}");
    }

    fn len_constrained(&mut self, w: &mut CWriter, lc: &LenConstrainedMember) {
        let truncated = self.truncated_label;
        self.need_label(truncated);
        match (&lc.length_field, &lc.length_info, &lc.leftover) {
            (Some(field), info, _) => {
                let expr = field_expr(field, info.as_ref());
                w.w(&format!(
                    "{{\n\
                     \x20 size_t remaining_after;\n\
                     \x20 CHECK_REMAINING({expr}, {truncated});\n\
                     \x20 remaining_after = remaining - {expr};\n\
                     \x20 remaining = {expr};"
                ));
            }
            (None, _, Some(leftover)) => {
                w.w(&format!(
                    "{{\n\
                     \x20 size_t remaining_after;\n\
                     \x20 CHECK_REMAINING({leftover}, {truncated});\n\
                     \x20 remaining_after = {leftover};\n\
                     \x20 remaining = remaining - {leftover};"
                ));
            }
            _ => unreachable!(),
        }
        w.push_indent(2);
        // Children cannot be "truncated" once their extent is exact.
        let saved = (self.truncated_label, self.struct_fail_label);
        self.truncated_label = "fail";
        self.struct_fail_label = "fail";
        self.members(w, &lc.members);
        self.truncated_label = saved.0;
        self.struct_fail_label = saved.1;
        self.need_label("fail");
        w.pop_indent(2);
        w.w(
            "  if (remaining != 0)\n\
             \x20   goto fail;\n\
             \x20 remaining = remaining_after;\n\
             }",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::annotator::annotate;
    use crate::services::checker::check;
    use crate::services::parser::parse_schema;

    fn emit(input: &str) -> String {
        let mut file = parse_schema(input).unwrap();
        let order = check(&mut file).unwrap();
        annotate(&mut file);
        let mut w = CWriter::new();
        for name in &order {
            let decl = file.declaration(name).unwrap();
            ParseEmitter::new(&file, decl).emit(&mut w);
        }
        w.into_string()
    }

    #[test]
    fn test_integer_parse_with_constraint() {
        let out = emit("struct r { u16 n IN [1..3, 9]; eos; }");
        assert!(out.contains("CHECK_REMAINING(2, truncated);"));
        assert!(out.contains("obj->n = trunnel_ntohs(trunnel_get_uint16(ptr));"));
        assert!(out.contains("remaining -= 2; ptr += 2;"));
        assert!(out.contains(
            "if (! ((obj->n >= 1 && obj->n <= 3) || obj->n == 9))\n    goto fail;"
        ));
        assert!(out.contains("if (remaining)\n    goto fail;"));
        assert!(out.contains(" truncated:\n  return -2;"));
        assert!(out.contains(" fail:\n  result = -1;\n  return result;"));
    }

    #[test]
    fn test_parse_wrapper_frees_on_failure() {
        let out = emit("struct s { u8 a; }");
        assert!(out.contains("*output = s_new();"));
        assert!(out.contains("result = s_parse_into(*output, input, len_in);"));
        assert!(out.contains("s_free(*output);"));
        assert!(out.contains("*output = NULL;"));
    }

    #[test]
    fn test_byte_var_array_parse() {
        let out = emit("struct b { u8 n; u8 body[n]; eos; }");
        assert!(out.contains("CHECK_REMAINING(obj->n, truncated);"));
        assert!(out.contains("TRUNNEL_DYNARRAY_EXPAND(uint8_t, &obj->body, obj->n, {});"));
        assert!(out.contains("obj->body.n_ = obj->n;"));
        assert!(out.contains("if (obj->n)\n    memcpy(obj->body.elts_, ptr, obj->n);"));
        assert!(out.contains("ptr += obj->n; remaining -= obj->n;"));
        assert!(out.contains(" trunnel_alloc_failed:\n  return -1;"));
    }

    #[test]
    fn test_char_var_array_uses_setstr0() {
        let out = emit("struct s { u8 n; char name[n]; }");
        assert!(out.contains("if (s_setstr0_name(obj, (const char*)ptr, obj->n))"));
    }

    #[test]
    fn test_struct_var_array_loops() {
        let out = emit(
            "struct inner { u8 x; } struct s { u8 n; struct inner xs[n]; }",
        );
        assert!(out.contains("TRUNNEL_DYNARRAY_EXPAND(inner_t *, &obj->xs, obj->n, {});"));
        assert!(out.contains("inner_t * elt;"));
        assert!(out.contains("for (idx = 0; idx < obj->n; ++idx) {"));
        assert!(out.contains("result = inner_parse(&elt, ptr, remaining);"));
        assert!(out.contains("TRUNNEL_DYNARRAY_ADD(inner_t *, &obj->xs, elt, {inner_free(elt);});"));
        assert!(out.contains(" relay_fail:\n  trunnel_assert(result < 0);"));
    }

    #[test]
    fn test_remainder_array_truncation_is_invalid() {
        let out = emit("struct s { u8 n; u16 rest[]; }");
        assert!(out.contains("while (remaining > 0) {"));
        // Inside the loop both failure modes collapse to `fail`.
        assert!(out.contains("CHECK_REMAINING(2, fail);"));
    }

    #[test]
    fn test_nulterm_parse() {
        let out = emit("struct s { nulterm name; }");
        assert!(out.contains("uint8_t *eos = (uint8_t*)memchr(ptr, 0, remaining);"));
        assert!(out.contains("if (eos == NULL)\n      goto truncated;"));
        assert!(out.contains("memlen = ((size_t)(eos - ptr)) + 1;"));
        assert!(out.contains("if (!(obj->name = trunnel_malloc(memlen)))"));
    }

    #[test]
    fn test_length_constrained_parse() {
        let out = emit(
            "struct u { u8 tag; u8 len; \
             union body[tag] with length len { 1: u32 x; default: ignore; }; eos; }",
        );
        assert!(out.contains("size_t remaining_after;"));
        assert!(out.contains("CHECK_REMAINING(obj->len, truncated);"));
        assert!(out.contains("remaining_after = remaining - obj->len;"));
        assert!(out.contains("remaining = obj->len;"));
        // Children parse against the exact extent: truncation is fail.
        assert!(out.contains("CHECK_REMAINING(4, fail);"));
        assert!(out.contains("if (remaining != 0)\n      goto fail;"));
        assert!(out.contains("remaining = remaining_after;"));
        // The ignore default consumes the extent.
        assert!(out.contains("ptr += remaining; remaining = 0;"));
    }

    #[test]
    fn test_leftover_parse() {
        let out = emit("struct l { u8 xs[..-2]; u16 trailer; }");
        assert!(out.contains("CHECK_REMAINING(2, truncated);"));
        assert!(out.contains("remaining_after = 2;"));
        assert!(out.contains("remaining = remaining - 2;"));
    }

    #[test]
    fn test_union_cases_and_synthetic_default() {
        let out = emit("struct s { u8 t; union u[t] { 1..2: u8 a; }; }");
        assert!(out.contains("switch (obj->t) {"));
        assert!(out.contains("case 1:"));
        assert!(out.contains("case 2:"));
        assert!(out.contains("default:"));
        assert!(out.contains("goto fail;"));
    }

    #[test]
    fn test_position_member_snapshots_pointer() {
        let out = emit("struct s { u8 a; @ptr mark; u8 b; }");
        assert!(out.contains("obj->mark = ptr;"));
    }

    #[test]
    fn test_fixed_int_array_byteswaps() {
        let out = emit("struct s { u32 words[4]; }");
        assert!(out.contains("CHECK_REMAINING(4 * 4, truncated);"));
        assert!(out.contains("memcpy(obj->words, ptr, 4 * 4);"));
        assert!(out.contains("obj->words[idx] = trunnel_ntohl(obj->words[idx]);"));
        assert!(out.contains("remaining -= 4 * 4; ptr += 4 * 4;"));
    }

    #[test]
    fn test_context_formals_and_null_checks() {
        let out = emit(
            "context c { u8 v; } struct s with context c { u8 body[c.v]; }",
        );
        assert!(out.contains(
            "s_parse_into(s_t *obj, const uint8_t *input, const size_t len_in, const c_t *c_ctx)"
        ));
        assert!(out.contains("if (c_ctx == NULL)\n    return -1;"));
        assert!(out.contains("CHECK_REMAINING(c_ctx->v, truncated);"));
    }
}
