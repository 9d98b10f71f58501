//! Allocation, disposal, validation, and length-estimation bodies.

use crate::models::ast::*;

use super::{
    dynarray_len, format_contexts, int_constraint_expr, iterate_elements, resolve_case_tags,
    write_case_labels, CWriter,
};

/// `typename_new`: calloc a zeroed object. Constrained integers whose
/// lowest admissible value is nonzero get that value instead, so a
/// fresh object passes `check`.
pub fn emit_new_fn(w: &mut CWriter, decl: &StructDecl) {
    let name = &decl.name;
    w.w(&format!(
        "{name}_t *\n\
         {name}_new(void)\n\
         {{\n\
         \x20 {name}_t *val = trunnel_calloc(1, sizeof({name}_t));\n\
         \x20 if (NULL == val)\n\
         \x20   return NULL;"
    ));
    w.push_indent(2);
    for member in &decl.members {
        if let MemberKind::Int(im) = &member.kind {
            if im.minimum() != 0 {
                if let Some(c) = &im.constraint {
                    w.w(&format!("val->{} = {};", member.c_name, c.ranges[0].lo));
                }
            }
        }
    }
    w.pop_indent(2);
    w.w("  return val;");
    w.w("}");
    w.blank();
}

/// `typename_clear` and `typename_free`: release every owned pointer,
/// including members of union branches that were never selected.
pub fn emit_free_fns(w: &mut CWriter, decl: &StructDecl) {
    let name = &decl.name;
    w.docstring("Release all storage held inside 'obj', but do not free 'obj'.");
    w.w(&format!(
        "static void\n\
         {name}_clear({name}_t *obj)\n\
         {{\n\
         \x20 (void) obj;"
    ));
    w.push_indent(2);
    clear_members(w, &decl.members);
    w.pop_indent(2);
    w.w(&format!(
        "}}\n\
         \n\
         void\n\
         {name}_free({name}_t *obj)\n\
         {{\n\
         \x20 if (obj == NULL)\n\
         \x20   return;\n\
         \x20 {name}_clear(obj);\n\
         \x20 trunnel_memwipe(obj, sizeof({name}_t));\n\
         \x20 trunnel_free_(obj);\n\
         }}"
    ));
    w.blank();
}

fn clear_members(w: &mut CWriter, members: &[Member]) {
    for member in members {
        let c_name = &member.c_name;
        match &member.kind {
            MemberKind::Struct(sm) => {
                w.w(&format!(
                    "{0}_free(obj->{c_name});\nobj->{c_name} = NULL;",
                    sm.struct_name
                ));
            }
            MemberKind::FixedArray(fa) => {
                if let ArrayBase::Struct(sn) = &fa.base {
                    iterate_elements(
                        w,
                        &fa.width.to_string(),
                        "",
                        &format!("{sn}_free(obj->{c_name}[idx]);"),
                    );
                }
            }
            MemberKind::VarArray(va) => {
                if let ArrayBase::Struct(sn) = &va.base {
                    iterate_elements(
                        w,
                        &dynarray_len(c_name),
                        "",
                        &format!("{sn}_free(TRUNNEL_DYNARRAY_GET(&obj->{c_name}, idx));"),
                    );
                }
                w.w(&format!("TRUNNEL_DYNARRAY_WIPE(&obj->{c_name});"));
                w.w(&format!("TRUNNEL_DYNARRAY_CLEAR(&obj->{c_name});"));
            }
            MemberKind::NulTerm { .. } => {
                w.w(&format!("trunnel_wipestr(obj->{c_name});"));
                w.w(&format!("trunnel_free(obj->{c_name});"));
            }
            MemberKind::Union(u) => {
                for case in &u.cases {
                    clear_members(w, &case.members);
                }
            }
            MemberKind::LenConstrained(lc) => clear_members(w, &lc.members),
            MemberKind::Int(_)
            | MemberKind::Position { .. }
            | MemberKind::Eos
            | MemberKind::Fail
            | MemberKind::Ignore => {}
        }
    }
}

/// `typename_check`: walk the members in declaration order and return
/// the first failure description, or NULL when the object can encode.
pub fn emit_check_fn(w: &mut CWriter, file: &File, decl: &StructDecl) {
    if decl.is_context {
        return;
    }
    let name = &decl.name;
    let formals = format_contexts(&decl.context_list, true);
    w.w(&format!(
        "const char *\n{name}_check(const {name}_t *obj{formals})\n{{"
    ));
    w.push_indent(2);
    w.w(
        "if (obj == NULL)\n\
         \x20 return \"Object was NULL\";\n\
         if (obj->trunnel_error_code_)\n\
         \x20 return \"A set function failed on this object\";",
    );
    for ctx in &decl.context_list {
        w.w(&format!(
            "if ({ctx}_ctx == NULL)\n  return \"Context was NULL\";"
        ));
    }
    check_members(w, file, &decl.members);
    w.w("return NULL;");
    w.pop_indent(2);
    w.w("}");
    w.blank();
}

fn check_members(w: &mut CWriter, file: &File, members: &[Member]) {
    for member in members {
        let c_name = &member.c_name;
        match &member.kind {
            MemberKind::Int(im) => {
                if let Some(constraint) = &im.constraint {
                    let expr =
                        int_constraint_expr(&format!("obj->{c_name}"), constraint, im.ty.width);
                    w.w(&format!(
                        "if (! {expr})\n  return \"Integer out of bounds\";"
                    ));
                }
            }
            MemberKind::Struct(sm) => {
                let args = format_contexts(file.context_list_of(&sm.struct_name), false);
                w.w(&format!(
                    "{{\n\
                     \x20 const char *msg;\n\
                     \x20 if (NULL != (msg = {0}_check(obj->{c_name}{args})))\n\
                     \x20   return msg;\n\
                     }}",
                    sm.struct_name
                ));
            }
            MemberKind::FixedArray(fa) => match &fa.base {
                ArrayBase::Struct(sn) => {
                    let args = format_contexts(file.context_list_of(sn), false);
                    iterate_elements(
                        w,
                        &fa.width.to_string(),
                        "const char *msg;",
                        &format!(
                            "if (NULL != (msg = {sn}_check(obj->{c_name}[idx]{args})))\n\
                             \x20 return msg;"
                        ),
                    );
                }
                ArrayBase::Char => {
                    w.w(&format!(
                        "if (obj->{c_name}[{}] != 0)\n\
                         \x20 return \"String not terminated\";",
                        fa.width
                    ));
                }
                ArrayBase::Int(_) => {}
            },
            MemberKind::VarArray(va) => {
                if let ArrayBase::Struct(sn) = &va.base {
                    let args = format_contexts(file.context_list_of(sn), false);
                    iterate_elements(
                        w,
                        &dynarray_len(c_name),
                        "const char *msg;",
                        &format!(
                            "if (NULL != (msg = {sn}_check(TRUNNEL_DYNARRAY_GET(&obj->{c_name}, idx){args})))\n\
                             \x20 return msg;"
                        ),
                    );
                }
                if let Some(width_field) = &va.width_field {
                    let wexpr = super::field_expr(width_field, va.width_info.as_ref());
                    w.w(&format!(
                        "if (TRUNNEL_DYNARRAY_LEN(&obj->{c_name}) != {wexpr})\n\
                         \x20 return \"Length mismatch for {}\";",
                        va.name
                    ));
                }
            }
            MemberKind::NulTerm { .. } => {
                w.w(&format!(
                    "if (NULL == obj->{c_name})\n  return \"Missing {c_name}\";"
                ));
            }
            MemberKind::Union(u) => {
                let tag = super::field_expr(&u.tag_field, u.tag_info.as_ref());
                w.w(&format!("switch ({tag}) {{"));
                for case in &u.cases {
                    let resolved = resolve_case_tags(file, case);
                    w.push_indent(2);
                    write_case_labels(w, case, &resolved);
                    w.push_indent(2);
                    check_members(w, file, &case.members);
                    w.pop_indent(4);
                    w.w("    break;");
                }
                w.w("}");
            }
            MemberKind::LenConstrained(lc) => check_members(w, file, &lc.members),
            MemberKind::Fail => {
                w.push_indent(2);
                w.w("return \"Bad tag for union\";");
                w.pop_indent(2);
            }
            MemberKind::Position { .. } | MemberKind::Eos | MemberKind::Ignore => {}
        }
    }
}

/// `typename_encoded_len`: sum a lower bound on the encoded size of
/// every member; exact for everything except unencodeable objects.
pub fn emit_encoded_len_fn(w: &mut CWriter, file: &File, decl: &StructDecl) {
    if decl.is_context {
        return;
    }
    let name = &decl.name;
    let formals = format_contexts(&decl.context_list, true);
    let args = format_contexts(&decl.context_list, false);
    w.w(&format!(
        "ssize_t\n\
         {name}_encoded_len(const {name}_t *obj{formals})\n\
         {{\n\
         \x20 ssize_t result = 0;"
    ));
    w.push_indent(2);
    w.blank();
    w.w(&format!(
        "if (NULL != {name}_check(obj{args}))\n\
         \x20  return -1;"
    ));
    encoded_len_members(w, file, &decl.members);
    w.blank();
    w.w("return result;");
    w.pop_indent(2);
    w.w("}");
    w.blank();
}

fn encoded_len_members(w: &mut CWriter, file: &File, members: &[Member]) {
    for member in members {
        let c_name = &member.c_name;
        match &member.kind {
            MemberKind::Int(im) => {
                w.elt_header("Length of", &member.describe());
                w.w(&format!("result += {};", im.ty.bytes()));
            }
            MemberKind::Struct(sm) => {
                w.elt_header("Length of", &member.describe());
                let args = format_contexts(file.context_list_of(&sm.struct_name), false);
                w.w(&format!(
                    "result += {}_encoded_len(obj->{c_name}{args});",
                    sm.struct_name
                ));
            }
            MemberKind::FixedArray(fa) => {
                w.elt_header("Length of", &member.describe());
                match &fa.base {
                    ArrayBase::Struct(sn) => {
                        let args = format_contexts(file.context_list_of(sn), false);
                        iterate_elements(
                            w,
                            &fa.width.to_string(),
                            "",
                            &format!("result += {sn}_encoded_len(obj->{c_name}[idx]{args});"),
                        );
                    }
                    ArrayBase::Int(ty) if ty.width > 8 => {
                        w.w(&format!("result += {} * {};", fa.width, ty.bytes()));
                    }
                    _ => w.w(&format!("result += {};", fa.width)),
                }
            }
            MemberKind::VarArray(va) => {
                w.elt_header("Length of", &member.describe());
                match &va.base {
                    ArrayBase::Struct(sn) => {
                        let args = format_contexts(file.context_list_of(sn), false);
                        iterate_elements(
                            w,
                            &dynarray_len(c_name),
                            "",
                            &format!(
                                "result += {sn}_encoded_len(TRUNNEL_DYNARRAY_GET(&obj->{c_name}, idx){args});"
                            ),
                        );
                    }
                    ArrayBase::Int(ty) if ty.width > 8 => {
                        w.w(&format!(
                            "result += {} * TRUNNEL_DYNARRAY_LEN(&obj->{c_name});",
                            ty.bytes()
                        ));
                    }
                    _ => w.w(&format!(
                        "result += TRUNNEL_DYNARRAY_LEN(&obj->{c_name});"
                    )),
                }
            }
            MemberKind::NulTerm { .. } => {
                w.elt_header("Length of", &member.describe());
                w.w(&format!("result += strlen(obj->{c_name}) + 1;"));
            }
            MemberKind::Union(u) => {
                let tag = super::field_expr(&u.tag_field, u.tag_info.as_ref());
                w.w(&format!("switch ({tag}) {{"));
                for case in &u.cases {
                    let resolved = resolve_case_tags(file, case);
                    w.push_indent(2);
                    write_case_labels(w, case, &resolved);
                    w.push_indent(2);
                    encoded_len_members(w, file, &case.members);
                    w.w("break;");
                    w.pop_indent(4);
                }
                w.w("}");
            }
            MemberKind::LenConstrained(lc) => encoded_len_members(w, file, &lc.members),
            MemberKind::Fail => {
                // check() rejects any object that would reach this arm.
                w.w("trunnel_assert(0);");
            }
            MemberKind::Position { .. } | MemberKind::Eos | MemberKind::Ignore => {}
        }
    }
}
