//! Annotation pass: attaches derived attributes to a checked AST.
//!
//! Every named member gets its `c_name` (prefixed with the union name
//! inside unions), width/tag/length field references are resolved to
//! copied `(c_name, width)` facts, and the `after_leftover` flag is
//! threaded through the member sequence so the encoder knows which
//! buffer-bounds policy applies. Purely structural; cannot fail once
//! the checker has accepted the file.

use rustc_hash::FxHashMap;

use crate::models::ast::*;

pub fn annotate(file: &mut File) {
    for decl in &mut file.declarations {
        annotate_struct(decl);
    }
}

fn annotate_struct(decl: &mut StructDecl) {
    let mut pass = StructAnnotator {
        int_members: FxHashMap::default(),
        prefix: String::new(),
        after_leftover: false,
        length_fields: Vec::new(),
        has_leftover_field: false,
        lc_depth: 0,
    };
    pass.members(&mut decl.members);

    pass.length_fields.sort_by(|a, b| a.c_name.cmp(&b.c_name));
    pass.length_fields.dedup();
    decl.length_fields = pass.length_fields;
    decl.has_leftover_field = pass.has_leftover_field;
}

struct StructAnnotator {
    /// Integer members annotated so far, by declared name. Field
    /// references resolve against this map, which is why it tracks
    /// members in declaration order.
    int_members: FxHashMap<String, IntFieldInfo>,
    prefix: String,
    after_leftover: bool,
    length_fields: Vec<IntFieldInfo>,
    has_leftover_field: bool,
    /// How many length-constrained extents enclose the current walk.
    lc_depth: u32,
}

impl StructAnnotator {
    fn members(&mut self, members: &mut [Member]) {
        for member in members {
            self.member(member);
        }
    }

    fn member(&mut self, member: &mut Member) {
        if let Some(name) = member.name() {
            member.c_name = format!("{}{}", self.prefix, name);
        }
        member.after_leftover = self.after_leftover;

        match &mut member.kind {
            MemberKind::Int(im) => {
                self.int_members.insert(
                    im.name.clone(),
                    IntFieldInfo {
                        c_name: member.c_name.clone(),
                        width: im.ty.width,
                    },
                );
            }
            MemberKind::VarArray(va) => {
                if let Some(FieldRef::Local(name)) = &va.width_field {
                    va.width_info = self.int_members.get(name).cloned();
                }
            }
            MemberKind::Union(_) => self.union(member),
            MemberKind::LenConstrained(lc) => {
                let nested = self.lc_depth > 0;
                match &lc.length_field {
                    Some(FieldRef::Local(name)) => {
                        if let Some(info) = self.int_members.get(name).cloned() {
                            lc.length_info = Some(info.clone());
                            self.length_fields.push(info);
                        }
                    }
                    Some(FieldRef::Context { .. }) => {}
                    // A nested (zero-leftover) extent never clamps the
                    // output buffer, so it does not put later members
                    // into after-leftover mode.
                    None if !nested => self.has_leftover_field = true,
                    None => {}
                }
                let crosses_leftover = lc.leftover.is_some() && !nested;
                self.lc_depth += 1;
                self.members(&mut lc.members);
                self.lc_depth -= 1;
                if crosses_leftover {
                    self.after_leftover = true;
                }
            }
            MemberKind::Struct(_)
            | MemberKind::NulTerm { .. }
            | MemberKind::FixedArray(_)
            | MemberKind::Position { .. }
            | MemberKind::Eos
            | MemberKind::Fail
            | MemberKind::Ignore => {}
        }
    }

    fn union(&mut self, member: &mut Member) {
        let MemberKind::Union(u) = &mut member.kind else {
            unreachable!()
        };
        if let FieldRef::Local(name) = &u.tag_field {
            u.tag_info = self.int_members.get(name).cloned();
        }
        self.prefix = format!("{}_", u.name);
        // Each branch sees the incoming flag; a branch that crosses a
        // leftover boundary raises it for the members after the union,
        // not for its sibling branches.
        let incoming = self.after_leftover;
        let mut outgoing = incoming;
        for case in &mut u.cases {
            self.after_leftover = incoming;
            self.members(&mut case.members);
            outgoing |= self.after_leftover;
        }
        self.after_leftover = outgoing;
        self.prefix = String::new();
    }
}
