//! Accessor generation: getters, setters, and length management for
//! every non-assertion member of a structure.
//!
//! Every set function that can fail returns -1 and records an error
//! code on the object, so a later encode refuses to run until
//! `clear_errors` is called. The same emitter produces the prototypes
//! for the header (with doc comments) and the bodies for the module.

use crate::models::ast::*;

use super::{int_constraint_expr, CWriter};

pub struct AccessorEmitter {
    prototypes_only: bool,
}

impl AccessorEmitter {
    pub fn prototypes() -> Self {
        Self {
            prototypes_only: true,
        }
    }

    pub fn bodies() -> Self {
        Self {
            prototypes_only: false,
        }
    }

    pub fn emit_struct(&self, w: &mut CWriter, decl: &StructDecl) {
        self.members(w, &decl.name, &decl.members);
    }

    fn members(&self, w: &mut CWriter, st: &str, members: &[Member]) {
        for member in members {
            match &member.kind {
                MemberKind::Int(im) => self.int_accessors(w, st, member, im),
                MemberKind::Struct(sm) => self.struct_accessors(w, st, member, sm),
                MemberKind::NulTerm { .. } => self.string_accessors(w, st, member),
                MemberKind::FixedArray(fa) => self.fixed_array_accessors(w, st, member, fa),
                MemberKind::VarArray(va) => self.var_array_accessors(w, st, member, va),
                MemberKind::Position { .. } => self.position_accessor(w, st, member),
                MemberKind::Union(u) => {
                    for case in &u.cases {
                        self.members(w, st, &case.members);
                    }
                }
                MemberKind::LenConstrained(lc) => self.members(w, st, &lc.members),
                MemberKind::Eos | MemberKind::Fail | MemberKind::Ignore => {}
            }
        }
    }

    /// Emit one accessor: doc comment plus prototype in header mode,
    /// return type, declaration, and body in module mode.
    fn func(&self, w: &mut CWriter, doc: &str, rv: &str, decl: &str, body: &str) {
        if self.prototypes_only {
            w.docstring(doc);
            w.w(&format!("{rv} {decl};"));
        } else {
            w.w(rv);
            w.w(decl);
            w.w(body);
            w.blank();
        }
    }

    fn int_accessors(&self, w: &mut CWriter, st: &str, member: &Member, im: &IntMember) {
        let nm = &member.c_name;
        let tp = format!("uint{}_t", im.ty.width);

        self.func(
            w,
            &format!("Return the value of the {nm} field of the {st}_t in 'inp'"),
            &tp,
            &format!("{st}_get_{nm}(const {st}_t *inp)"),
            &format!("{{\n  return inp->{nm};\n}}"),
        );

        let mut body = String::from("{\n");
        if let Some(constraint) = &im.constraint {
            let expr = int_constraint_expr("val", constraint, im.ty.width);
            body.push_str(&format!(
                "  if (! {expr}) {{\n\
                 \x20    TRUNNEL_SET_ERROR_CODE(inp);\n\
                 \x20    return -1;\n\
                 \x20 }}\n"
            ));
        }
        body.push_str(&format!("  inp->{nm} = val;\n  return 0;\n}}"));
        self.func(
            w,
            &format!(
                "Set the value of the {nm} field of the {st}_t in 'inp' to 'val'. \
                 Return 0 on success; return -1 and set the error code on 'inp' \
                 on failure."
            ),
            "int",
            &format!("{st}_set_{nm}({st}_t *inp, {tp} val)"),
            &body,
        );
    }

    fn struct_accessors(&self, w: &mut CWriter, st: &str, member: &Member, sm: &StructRefMember) {
        let nm = &member.c_name;
        let sn = &sm.struct_name;
        let tp = format!("struct {sn}_st *");

        self.func(
            w,
            &format!("Return the value of the {nm} field of the {st}_t in 'inp'"),
            &tp,
            &format!("{st}_get_{nm}({st}_t *inp)"),
            &format!("{{\n  return inp->{nm};\n}}"),
        );
        self.func(
            w,
            &format!("As {st}_get_{nm}, but take and return a const pointer"),
            &format!("const {tp}"),
            &format!("{st}_getconst_{nm}(const {st}_t *inp)"),
            &format!("{{\n  return {st}_get_{nm}(({st}_t*) inp);\n}}"),
        );
        self.func(
            w,
            &format!(
                "Set the value of the {nm} field of the {st}_t in 'inp' to 'val'. \
                 Free the old value if any. Steals the reference to 'val'. \
                 Return 0 on success; return -1 and set the error code on 'inp' \
                 on failure."
            ),
            "int",
            &format!("{st}_set_{nm}({st}_t *inp, {tp}val)"),
            &format!(
                "{{\n\
                 \x20 if (inp->{nm} && inp->{nm} != val)\n\
                 \x20   {sn}_free(inp->{nm});\n\
                 \x20 return {st}_set0_{nm}(inp, val);\n\
                 }}"
            ),
        );
        self.func(
            w,
            &format!("As {st}_set_{nm}, but does not free the previous value."),
            "int",
            &format!("{st}_set0_{nm}({st}_t *inp, {tp}val)"),
            &format!("{{\n  inp->{nm} = val;\n  return 0;\n}}"),
        );
    }

    fn string_accessors(&self, w: &mut CWriter, st: &str, member: &Member) {
        let nm = &member.c_name;
        self.func(
            w,
            &format!("Return the value of the {nm} field of the {st}_t in 'inp'"),
            "const char *",
            &format!("{st}_get_{nm}(const {st}_t *inp)"),
            &format!("{{\n  return inp->{nm};\n}}"),
        );
        self.func(
            w,
            &format!(
                "Set the value of the {nm} field of the {st}_t in 'inp' to 'val'. \
                 Free the old value if any. Does not steal the reference to \
                 'val'. Return 0 on success; return -1 and set the error code \
                 on 'inp' on failure."
            ),
            "int",
            &format!("{st}_set_{nm}({st}_t *inp, const char *val)"),
            &format!(
                "{{\n\
                 \x20 trunnel_free(inp->{nm});\n\
                 \x20 if (NULL == (inp->{nm} = trunnel_strdup(val))) {{\n\
                 \x20   TRUNNEL_SET_ERROR_CODE(inp);\n\
                 \x20   return -1;\n\
                 \x20 }}\n\
                 \x20 return 0;\n\
                 }}"
            ),
        );
    }

    fn position_accessor(&self, w: &mut CWriter, st: &str, member: &Member) {
        let nm = &member.c_name;
        self.func(
            w,
            &format!("Return the position for {nm} when we parsed this object"),
            "const uint8_t *",
            &format!("{st}_get_{nm}(const {st}_t *inp)"),
            &format!("{{\n  return inp->{nm};\n}}"),
        );
    }

    fn fixed_array_accessors(
        &self,
        w: &mut CWriter,
        st: &str,
        member: &Member,
        fa: &FixedArrayMember,
    ) {
        let nm = &member.c_name;
        let width = &fa.width;
        let (elt, owned) = super::element_type(&fa.base);
        let extraconst = if owned { " const " } else { "" };

        self.func(
            w,
            &format!(
                "Return the (constant) length of the array holding the {nm} \
                 field of the {st}_t in 'inp'."
            ),
            "size_t",
            &format!("{st}_getlen_{nm}(const {st}_t *inp)"),
            &format!("{{\n  (void)inp;\n  return {width};\n}}"),
        );
        self.func(
            w,
            &format!(
                "Return the element at position 'idx' of the fixed array field \
                 {nm} of the {st}_t in 'inp'."
            ),
            &elt,
            &format!("{st}_get_{nm}({st}_t *inp, size_t idx)"),
            &format!(
                "{{\n  trunnel_assert(idx < {width});\n  return inp->{nm}[idx];\n}}"
            ),
        );
        self.func(
            w,
            &format!("As {st}_get_{nm}, but take and return a const pointer"),
            &format!("{extraconst}{elt}"),
            &format!("{st}_getconst_{nm}(const {st}_t *inp, size_t idx)"),
            &format!("{{\n  return {st}_get_{nm}(({st}_t*)inp, idx);\n}}"),
        );

        let free_note = if owned {
            " Free the previous value, if any."
        } else {
            ""
        };
        let set_doc = format!(
            "Change the element at position 'idx' of the fixed array field \
             {nm} of the {st}_t in 'inp', so that it will hold the \
             value 'elt'.{free_note}"
        );
        let tail = format!("  inp->{nm}[idx] = elt;\n  return 0;\n}}");
        if let ArrayBase::Struct(sn) = &fa.base {
            self.func(
                w,
                &set_doc,
                "int",
                &format!("{st}_set_{nm}({st}_t *inp, size_t idx, {elt} elt)"),
                &format!(
                    "{{\n\
                     \x20 trunnel_assert(idx < {width});\n\
                     \x20 if (inp->{nm}[idx] && inp->{nm}[idx] != elt)\n\
                     \x20   {sn}_free(inp->{nm}[idx]);\n\
                     \x20 return {st}_set0_{nm}(inp, idx, elt);\n\
                     }}"
                ),
            );
            self.func(
                w,
                &format!("As {st}_set_{nm}, but does not free the previous value."),
                "int",
                &format!("{st}_set0_{nm}({st}_t *inp, size_t idx, {elt} elt)"),
                &format!("{{\n  trunnel_assert(idx < {width});\n{tail}"),
            );
        } else {
            self.func(
                w,
                &set_doc,
                "int",
                &format!("{st}_set_{nm}({st}_t *inp, size_t idx, {elt} elt)"),
                &format!("{{\n  trunnel_assert(idx < {width});\n{tail}"),
            );
        }

        self.func(
            w,
            &format!("Return a pointer to the {width}-element array field {nm} of 'inp'."),
            &format!("{elt} *"),
            &format!("{st}_getarray_{nm}({st}_t *inp)"),
            &format!("{{\n  return inp->{nm};\n}}"),
        );
        self.func(
            w,
            &format!("As {st}_get_{nm}, but take and return a const pointer"),
            &format!("const {elt}{extraconst} *"),
            &format!("{st}_getconstarray_{nm}(const {st}_t *inp)"),
            &format!(
                "{{\n  return (const {elt}{extraconst} *){st}_getarray_{nm}(({st}_t*)inp);\n}}"
            ),
        );
    }

    fn var_array_accessors(
        &self,
        w: &mut CWriter,
        st: &str,
        member: &Member,
        va: &VarArrayMember,
    ) {
        let nm = &member.c_name;
        let (elt, owned) = super::element_type(&va.base);
        let extraconst = if owned { " const " } else { "" };
        // Capacity cap: the width field cannot represent more elements
        // than its own maximum.
        let maxlen = va
            .width_info
            .as_ref()
            .map(|info| format!("UINT{}_MAX", info.width));

        self.func(
            w,
            &format!(
                "Return the length of the dynamic array holding the {nm} field \
                 of the {st}_t in 'inp'."
            ),
            "size_t",
            &format!("{st}_getlen_{nm}(const {st}_t *inp)"),
            &format!("{{\n  return TRUNNEL_DYNARRAY_LEN(&inp->{nm});\n}}"),
        );
        self.func(
            w,
            &format!(
                "Return the element at position 'idx' of the dynamic array \
                 field {nm} of the {st}_t in 'inp'."
            ),
            &elt,
            &format!("{st}_get_{nm}({st}_t *inp, size_t idx)"),
            &format!("{{\n  return TRUNNEL_DYNARRAY_GET(&inp->{nm}, idx);\n}}"),
        );
        self.func(
            w,
            &format!("As {st}_get_{nm}, but take and return a const pointer"),
            &format!("{extraconst}{elt}"),
            &format!("{st}_getconst_{nm}(const {st}_t *inp, size_t idx)"),
            &format!("{{\n  return {st}_get_{nm}(({st}_t*)inp, idx);\n}}"),
        );

        let free_note = if owned {
            " Free the previous value, if any."
        } else {
            ""
        };
        let set_doc = format!(
            "Change the element at position 'idx' of the dynamic array field \
             {nm} of the {st}_t in 'inp', so that it will hold the \
             value 'elt'.{free_note}"
        );
        let tail = format!("  TRUNNEL_DYNARRAY_SET(&inp->{nm}, idx, elt);\n  return 0;\n}}");
        if let ArrayBase::Struct(sn) = &va.base {
            self.func(
                w,
                &set_doc,
                "int",
                &format!("{st}_set_{nm}({st}_t *inp, size_t idx, {elt} elt)"),
                &format!(
                    "{{\n\
                     \x20 {sn}_t *oldval = TRUNNEL_DYNARRAY_GET(&inp->{nm}, idx);\n\
                     \x20 if (oldval && oldval != elt)\n\
                     \x20   {sn}_free(oldval);\n\
                     \x20 return {st}_set0_{nm}(inp, idx, elt);\n\
                     }}"
                ),
            );
            self.func(
                w,
                &format!("As {st}_set_{nm}, but does not free the previous value."),
                "int",
                &format!("{st}_set0_{nm}({st}_t *inp, size_t idx, {elt} elt)"),
                &format!("{{\n{tail}"),
            );
        } else {
            self.func(
                w,
                &set_doc,
                "int",
                &format!("{st}_set_{nm}({st}_t *inp, size_t idx, {elt} elt)"),
                &format!("{{\n{tail}"),
            );
        }

        let mut add_body = String::from("{\n");
        if let Some(maxlen) = &maxlen {
            add_body.push_str(&format!(
                "#if SIZE_MAX >= {maxlen}\n\
                 \x20 if (inp->{nm}.n_ == {maxlen})\n\
                 \x20   goto trunnel_alloc_failed;\n\
                 #endif\n"
            ));
        }
        add_body.push_str(&format!(
            "  TRUNNEL_DYNARRAY_ADD({elt}, &inp->{nm}, elt, {{}});\n\
             \x20 return 0;\n\
             \x20trunnel_alloc_failed:\n\
             \x20 TRUNNEL_SET_ERROR_CODE(inp);\n\
             \x20 return -1;\n\
             }}"
        ));
        self.func(
            w,
            &format!(
                "Append a new element 'elt' to the dynamic array field {nm} of \
                 the {st}_t in 'inp'."
            ),
            "int",
            &format!("{st}_add_{nm}({st}_t *inp, {elt} elt)"),
            &add_body,
        );

        self.func(
            w,
            &format!("Return a pointer to the variable-length array field {nm} of 'inp'."),
            &format!("{elt} *"),
            &format!("{st}_getarray_{nm}({st}_t *inp)"),
            &format!("{{\n  return inp->{nm}.elts_;\n}}"),
        );
        self.func(
            w,
            &format!("As {st}_get_{nm}, but take and return a const pointer"),
            &format!("const {elt}{extraconst} *"),
            &format!("{st}_getconstarray_{nm}(const {st}_t *inp)"),
            &format!(
                "{{\n  return (const {elt}{extraconst} *){st}_getarray_{nm}(({st}_t*)inp);\n}}"
            ),
        );

        self.setlen_accessor(w, st, nm, va, &elt, maxlen.as_deref());
        if matches!(va.base, ArrayBase::Char) {
            self.char_string_accessors(w, st, nm, maxlen.as_deref());
        }
    }

    fn setlen_accessor(
        &self,
        w: &mut CWriter,
        st: &str,
        nm: &str,
        va: &VarArrayMember,
        elt: &str,
        maxlen: Option<&str>,
    ) {
        let is_char = matches!(va.base, ArrayBase::Char);
        let fill = if matches!(va.base, ArrayBase::Struct(_)) {
            "Fill extra elements with NULL; free removed elements."
        } else {
            "Fill extra elements with 0."
        };

        let mut body = String::from("{\n");
        if !is_char {
            body.push_str(&format!("  {elt} *newptr;\n"));
        }
        let mut need_failed = !is_char;
        if let Some(maxlen) = maxlen {
            need_failed = true;
            body.push_str(&format!(
                "#if {maxlen} < SIZE_MAX\n\
                 \x20 if (newlen > {maxlen})\n\
                 \x20   goto trunnel_alloc_failed;\n\
                 #endif\n"
            ));
        }
        if is_char {
            body.push_str(&format!(
                "  return trunnel_string_setlen(&inp->{nm}, newlen,\n\
                 \x20           &inp->trunnel_error_code_);\n"
            ));
        } else {
            let freefn = match &va.base {
                ArrayBase::Struct(sn) => format!("(trunnel_free_fn_t) {sn}_free"),
                _ => "(trunnel_free_fn_t) NULL".to_string(),
            };
            body.push_str(&format!(
                "  newptr = trunnel_dynarray_setlen(&inp->{nm}.allocated_,\n\
                 \x20                &inp->{nm}.n_, inp->{nm}.elts_, newlen,\n\
                 \x20                sizeof(inp->{nm}.elts_[0]), {freefn},\n\
                 \x20                &inp->trunnel_error_code_);\n\
                 \x20 if (newlen != 0 && newptr == NULL)\n\
                 \x20   goto trunnel_alloc_failed;\n\
                 \x20 inp->{nm}.elts_ = newptr;\n\
                 \x20 return 0;\n"
            ));
        }
        if need_failed {
            body.push_str(
                " trunnel_alloc_failed:\n\
                 \x20 TRUNNEL_SET_ERROR_CODE(inp);\n\
                 \x20 return -1;\n",
            );
        }
        body.push('}');
        self.func(
            w,
            &format!(
                "Change the length of the variable-length array field {nm} of \
                 'inp' to 'newlen'.{fill} Return 0 on success; return -1 and \
                 set the error code on 'inp' on failure."
            ),
            "int",
            &format!("{st}_setlen_{nm}({st}_t *inp, size_t newlen)"),
            &body,
        );
    }

    fn char_string_accessors(&self, w: &mut CWriter, st: &str, nm: &str, maxlen: Option<&str>) {
        self.func(
            w,
            &format!(
                "Return the value of the {nm} field of a {st}_t as a \
                 NUL-terminated string."
            ),
            "const char *",
            &format!("{st}_getstr_{nm}({st}_t *inp)"),
            &format!("{{\n  return trunnel_string_getstr(&inp->{nm});\n}}"),
        );

        let mut body = String::from("{\n");
        if let Some(maxlen) = maxlen {
            body.push_str(&format!(
                "#if {maxlen} < SIZE_MAX\n\
                 \x20 if (len > {maxlen}) {{\n\
                 \x20   TRUNNEL_SET_ERROR_CODE(inp);\n\
                 \x20   return -1;\n\
                 \x20 }}\n\
                 #endif\n"
            ));
        }
        body.push_str(&format!(
            "  return trunnel_string_setstr0(&inp->{nm}, val, len, &inp->trunnel_error_code_);\n}}"
        ));
        self.func(
            w,
            &format!(
                "Set the value of the {nm} field of a {st}_t to a given string \
                 of length 'len'. Return 0 on success; return -1 and set the \
                 error code on 'inp' on failure."
            ),
            "int",
            &format!("{st}_setstr0_{nm}({st}_t *inp, const char *val, size_t len)"),
            &body,
        );
        self.func(
            w,
            &format!(
                "Set the value of the {nm} field of a {st}_t to a given \
                 NUL-terminated string. Return 0 on success; return -1 and set \
                 the error code on 'inp' on failure."
            ),
            "int",
            &format!("{st}_setstr_{nm}({st}_t *inp, const char *val)"),
            &format!("{{\n  return {st}_setstr0_{nm}(inp, val, strlen(val));\n}}"),
        );
    }
}
