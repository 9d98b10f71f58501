//! Semantic analysis for a parsed schema.
//!
//! Validates names, types, and constraints, computes the struct
//! dependency graph, and produces the topological emission order. The
//! checker also performs the few AST rewrites that later stages rely
//! on: constraint ranges are resolved against declared constants and
//! sorted, and unions without a default branch get a synthetic
//! `fail`-only default appended.
//!
//! A single error aborts the whole compilation with a message naming
//! the offending struct or member.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::models::ast::*;
use crate::models::error::SchemaError;

/// How an integer field is referenced elsewhere in its struct. A field
/// may serve one role only; mixing them is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    /// Union tag.
    Tag,
    /// Variable-array element count.
    ArrayLength,
    /// Length of a length-constrained extent.
    ExtentLength,
}

impl Usage {
    fn for_ref_kind(kind: RefKind) -> Usage {
        match kind {
            RefKind::Tag => Usage::Tag,
            RefKind::ArrayLength => Usage::ArrayLength,
            RefKind::ExtentLength => Usage::ExtentLength,
        }
    }
}

/// What a field reference is being used as; selects the wording of
/// error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Tag,
    ArrayLength,
    ExtentLength,
}

impl RefKind {
    fn describe(self) -> &'static str {
        match self {
            RefKind::Tag => "tag",
            RefKind::ArrayLength => "array length",
            RefKind::ExtentLength => "union length",
        }
    }
}

/// Validate `file` and return the names of its declarations (contexts
/// included, externs excluded) in emission order: topologically sorted
/// so that no struct precedes one it contains, ties broken by name.
pub fn check(file: &mut File) -> Result<Vec<String>, SchemaError> {
    let mut checker = Checker::collect(file)?;
    for decl in &mut file.declarations {
        checker.check_struct(decl)?;
    }
    checker.finish()
}

struct Checker {
    const_values: FxHashMap<String, u64>,
    /// Declared and extern structure names; context names live apart.
    struct_names: FxHashSet<String>,
    context_names: FxHashSet<String>,
    /// Integer fields of each context, by name, with widths.
    context_fields: FxHashMap<String, FxHashMap<String, u8>>,
    /// Direct dependencies of each declaration (contained structs plus
    /// declared contexts).
    struct_uses: FxHashMap<String, FxHashSet<String>>,
    struct_contexts: FxHashMap<String, FxHashSet<String>>,
    extern_names: FxHashSet<String>,
}

impl Checker {
    /// Pass 1: global name tables. Duplicate names and conflicting
    /// options fail here.
    fn collect(file: &File) -> Result<Self, SchemaError> {
        if file.has_option("opaque") && file.has_option("very_opaque") {
            return Err(SchemaError::semantic(
                "can't use both 'opaque' and 'very_opaque'",
            ));
        }

        let mut const_values = FxHashMap::default();
        for c in &file.constants {
            if const_values.insert(c.name.clone(), c.value).is_some() {
                return Err(SchemaError::semantic(format!(
                    "duplicate constant name {}",
                    c.name
                )));
            }
        }

        let mut struct_names = FxHashSet::default();
        let mut context_names = FxHashSet::default();
        let mut context_fields = FxHashMap::default();
        let mut struct_uses = FxHashMap::default();
        let mut struct_contexts = FxHashMap::default();
        let mut extern_names = FxHashSet::default();

        for es in &file.extern_structs {
            if !struct_names.insert(es.name.clone()) {
                return Err(SchemaError::semantic(format!(
                    "duplicate structure name {}",
                    es.name
                )));
            }
            extern_names.insert(es.name.clone());
            struct_uses.insert(es.name.clone(), FxHashSet::default());
            struct_contexts.insert(
                es.name.clone(),
                es.context_list.iter().cloned().collect(),
            );
        }

        for d in &file.declarations {
            if struct_names.contains(&d.name) || context_names.contains(&d.name) {
                return Err(SchemaError::semantic(format!(
                    "duplicate structure name {}",
                    d.name
                )));
            }
            if d.is_context {
                context_names.insert(d.name.clone());
                let fields = d
                    .members
                    .iter()
                    .filter_map(|m| match &m.kind {
                        MemberKind::Int(im) => Some((im.name.clone(), im.ty.width)),
                        _ => None,
                    })
                    .collect();
                context_fields.insert(d.name.clone(), fields);
            } else {
                struct_names.insert(d.name.clone());
            }
        }

        Ok(Self {
            const_values,
            struct_names,
            context_names,
            context_fields,
            struct_uses,
            struct_contexts,
            extern_names,
        })
    }

    /// Pass 2: walk one declaration's members in order.
    fn check_struct(&mut self, decl: &mut StructDecl) -> Result<(), SchemaError> {
        for ctx in &decl.context_list {
            if !self.context_names.contains(ctx) {
                return Err(SchemaError::semantic(format!(
                    "Unrecognized context {} in {}",
                    ctx, decl.name
                )));
            }
        }

        let mut walk = StructWalk {
            checker: self,
            struct_name: decl.name.clone(),
            context_list: decl.context_list.clone(),
            field_names: FxHashSet::default(),
            int_fields: FxHashMap::default(),
            usage: FxHashMap::default(),
            uses: decl.context_list.iter().cloned().collect(),
            len_depth: 0,
            member_prefix: String::new(),
        };
        walk.members(&mut decl.members)?;

        decl.referenced_int_fields = walk.usage.keys().cloned().collect();
        let uses = walk.uses;
        self.struct_uses.insert(decl.name.clone(), uses);
        self.struct_contexts.insert(
            decl.name.clone(),
            decl.context_list.iter().cloned().collect(),
        );
        Ok(())
    }

    /// Passes 3 and 4: cycle detection, context consistency, and the
    /// deterministic topological sort.
    fn finish(self) -> Result<Vec<String>, SchemaError> {
        let mut closure = self.struct_uses.clone();

        // Reflexive-transitive closure by fixed point: keep folding each
        // node's successors' successor-sets into it until nothing grows.
        loop {
            let mut changed = false;
            let names: Vec<String> = closure.keys().cloned().collect();
            for name in &names {
                let direct: Vec<String> = closure[name].iter().cloned().collect();
                let mut additions: Vec<String> = Vec::new();
                for used in &direct {
                    if let Some(transitive) = closure.get(used) {
                        for t in transitive {
                            if !closure[name].contains(t) {
                                additions.push(t.clone());
                            }
                        }
                    }
                }
                if !additions.is_empty() {
                    changed = true;
                    closure.get_mut(name).unwrap().extend(additions);
                }
            }
            if !changed {
                break;
            }
        }

        let mut names: Vec<&String> = closure.keys().collect();
        names.sort();
        for name in &names {
            if closure[*name].contains(*name) {
                return Err(SchemaError::semantic(format!(
                    "There is a cycle in the {name} structure"
                )));
            }
        }

        let empty = FxHashSet::default();
        for name in &names {
            let own_contexts = self.struct_contexts.get(*name).unwrap_or(&empty);
            let mut used: Vec<&String> = closure[*name].iter().collect();
            used.sort();
            for u in used {
                let needed = self.struct_contexts.get(u).unwrap_or(&empty);
                let mut missing: Vec<&String> =
                    needed.difference(own_contexts).collect();
                if !missing.is_empty() {
                    missing.sort();
                    let list = missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(",");
                    return Err(SchemaError::semantic(format!(
                        "{name} contains {u}, which uses contexts ({list}), \
                         but {name} does not use those contexts."
                    )));
                }
            }
        }

        // Kahn-style elimination over the direct-dependency map; ties
        // broken by name so two runs emit identical output.
        let mut remaining = self.struct_uses;
        let mut removed: FxHashSet<String> = FxHashSet::default();
        let mut order = Vec::new();
        while !remaining.is_empty() {
            for uses in remaining.values_mut() {
                uses.retain(|u| !removed.contains(u));
            }
            let mut ready: Vec<String> = remaining
                .iter()
                .filter(|(_, uses)| uses.is_empty())
                .map(|(name, _)| name.clone())
                .collect();
            ready.sort();
            debug_assert!(!ready.is_empty());
            for name in &ready {
                remaining.remove(name);
                removed.insert(name.clone());
            }
            order.extend(ready);
        }

        Ok(order
            .into_iter()
            .filter(|n| !self.extern_names.contains(n))
            .collect())
    }

    fn expand_constant(&self, name: &str, containing: &str) -> Result<u64, SchemaError> {
        self.const_values.get(name).copied().ok_or_else(|| {
            SchemaError::semantic(format!(
                "Unrecognized constant {name} in {containing}"
            ))
        })
    }

    fn resolve_bound(&self, bound: &Bound, containing: &str) -> Result<u64, SchemaError> {
        match bound {
            Bound::Lit(v) => Ok(*v),
            Bound::Const(name) => self.expand_constant(name, containing),
        }
    }

    /// Check a list of inclusive ranges against `maximum`, returning the
    /// resolved numeric ranges in input order.
    fn check_integer_list(
        &self,
        ranges: &[IntRange],
        maximum: u64,
        containing: &str,
    ) -> Result<Vec<(u64, u64)>, SchemaError> {
        let mut resolved = Vec::with_capacity(ranges.len());
        for range in ranges {
            let lo = self.resolve_bound(&range.lo, containing)?;
            let hi = self.resolve_bound(&range.hi, containing)?;
            if lo > hi {
                return Err(SchemaError::semantic(format!(
                    "Bad range in {containing}"
                )));
            }
            if lo > maximum || hi > maximum {
                let v = if lo > maximum { lo } else { hi };
                return Err(SchemaError::semantic(format!(
                    "Tag value {v} out of range in {containing}"
                )));
            }
            resolved.push((lo, hi));
        }
        Ok(resolved)
    }
}

/// Per-struct walk state for pass 2.
struct StructWalk<'a> {
    checker: &'a Checker,
    struct_name: String,
    context_list: Vec<String>,
    /// All member names seen so far, raw and union-prefixed.
    field_names: FxHashSet<String>,
    /// Integer members seen so far, by declared name, with widths.
    int_fields: FxHashMap<String, u8>,
    /// Role each referenced integer plays (tag / array length / extent
    /// length).
    usage: FxHashMap<String, Usage>,
    uses: FxHashSet<String>,
    len_depth: u32,
    member_prefix: String,
}

impl StructWalk<'_> {
    fn members(&mut self, members: &mut [Member]) -> Result<(), SchemaError> {
        for member in members {
            self.member(member)?;
        }
        Ok(())
    }

    fn member(&mut self, member: &mut Member) -> Result<(), SchemaError> {
        match &mut member.kind {
            MemberKind::Int(im) => {
                self.add_member_name(&im.name)?;
                self.int_fields.insert(im.name.clone(), im.ty.width);
                let containing = format!("{}.{}", self.struct_name, im.name);
                if let Some(constraint) = &mut im.constraint {
                    let resolved = self.checker.check_integer_list(
                        &constraint.ranges,
                        im.ty.max(),
                        &containing,
                    )?;
                    // Sort the written ranges and the resolved pairs
                    // together, by resolved lower bound.
                    let mut paired: Vec<(IntRange, (u64, u64))> = constraint
                        .ranges
                        .drain(..)
                        .zip(resolved)
                        .collect();
                    paired.sort_by_key(|(_, r)| *r);
                    constraint.resolved = paired.iter().map(|(_, r)| *r).collect();
                    constraint.ranges = paired.into_iter().map(|(r, _)| r).collect();
                }
            }
            MemberKind::Struct(sm) => {
                self.add_member_name(&sm.name)?;
                if !self.checker.struct_names.contains(&sm.struct_name) {
                    return Err(SchemaError::semantic(format!(
                        "Unrecognized structure {} used in {}",
                        sm.struct_name, self.struct_name
                    )));
                }
                self.uses.insert(sm.struct_name.clone());
            }
            MemberKind::NulTerm { name } | MemberKind::Position { name } => {
                self.add_member_name(name)?;
            }
            MemberKind::FixedArray(fa) => {
                self.add_member_name(&fa.name)?;
                let containing = format!("{}.{}", self.struct_name, fa.name);
                if let ArrayWidth::Const(c) = &fa.width {
                    self.checker.expand_constant(c, &containing)?;
                }
                self.check_array_base(&fa.base, &fa.name)?;
            }
            MemberKind::VarArray(va) => {
                self.add_member_name(&va.name)?;
                let inside = format!("{}.{}", self.struct_name, va.name);
                if let Some(width_field) = &va.width_field {
                    self.check_int_field(width_field, RefKind::ArrayLength, &inside)?;
                }
                self.check_array_base(&va.base, &va.name)?;
            }
            MemberKind::Union(_) => return self.union(member),
            MemberKind::LenConstrained(_) => return self.len_constrained(member),
            MemberKind::Eos | MemberKind::Fail => {}
            MemberKind::Ignore => {
                if self.len_depth == 0 {
                    return Err(SchemaError::semantic(
                        "'...' found outside of a length-constrained element",
                    ));
                }
            }
        }
        Ok(())
    }

    fn union(&mut self, member: &mut Member) -> Result<(), SchemaError> {
        let MemberKind::Union(u) = &mut member.kind else {
            unreachable!()
        };
        self.add_member_name(&u.name)?;
        let inside = format!("{}.{}", self.struct_name, u.name);
        self.check_int_field(&u.tag_field, RefKind::Tag, &inside)?;

        let tag_max = match &u.tag_field {
            FieldRef::Local(name) => IntType {
                width: self.int_fields[name],
            }
            .max(),
            FieldRef::Context { ctx, field } => IntType {
                width: self.checker.context_fields[ctx][field],
            }
            .max(),
        };

        self.member_prefix = format!("{}_", u.name);
        let mut matching: Vec<(u64, u64)> = Vec::new();
        let mut found_defaults = 0usize;
        for case in &mut u.cases {
            match &case.tags {
                Some(tags) => {
                    matching.extend(self.checker.check_integer_list(
                        tags,
                        tag_max,
                        &inside,
                    )?);
                }
                None => found_defaults += 1,
            }
            // Integers declared inside one branch must not be referenced
            // by later members; scope them to the branch.
            let saved = self.int_fields.clone();
            self.members(&mut case.members)?;
            self.int_fields = saved;
        }
        self.member_prefix = String::new();

        matching.sort_unstable();
        let mut last_hi: Option<u64> = None;
        for (lo, hi) in matching {
            if last_hi.is_some_and(|prev| lo <= prev) {
                return Err(SchemaError::semantic(format!(
                    "Duplicate tag values in {inside}"
                )));
            }
            last_hi = Some(hi);
        }

        if found_defaults > 1 {
            return Err(SchemaError::semantic(format!(
                "Multiple default cases in {inside}"
            )));
        } else if found_defaults == 0 {
            u.cases.push(UnionCase {
                tags: None,
                members: vec![Member::new(MemberKind::Fail)],
            });
        }
        Ok(())
    }

    fn len_constrained(&mut self, member: &mut Member) -> Result<(), SchemaError> {
        let MemberKind::LenConstrained(lc) = &mut member.kind else {
            unreachable!()
        };
        if let Some(length_field) = &lc.length_field {
            let inside = self.struct_name.clone();
            self.check_int_field(length_field, RefKind::ExtentLength, &inside)?;
        }
        let leftover_value = match &lc.leftover {
            Some(ArrayWidth::Const(c)) => {
                Some(self.checker.expand_constant(c, &self.struct_name)?)
            }
            Some(ArrayWidth::Lit(v)) => Some(*v),
            None => None,
        };
        self.len_depth += 1;
        // A zero-leftover extent nested in another extent is a no-op
        // boundary ("runs to the end of the enclosing extent") and is
        // allowed; any other nesting is rejected.
        if self.len_depth >= 2 && leftover_value != Some(0) {
            return Err(SchemaError::semantic(
                "Nested fields with length constraints.",
            ));
        }
        let result = self.members(&mut lc.members);
        self.len_depth -= 1;
        result
    }

    fn check_array_base(&mut self, base: &ArrayBase, member_name: &str) -> Result<(), SchemaError> {
        if let ArrayBase::Struct(target) = base {
            if !self.checker.struct_names.contains(target) {
                return Err(SchemaError::semantic(format!(
                    "Unrecognized structure {} used in {}.{}",
                    target, self.struct_name, member_name
                )));
            }
            self.uses.insert(target.clone());
        }
        Ok(())
    }

    fn add_member_name(&mut self, name: &str) -> Result<(), SchemaError> {
        self.insert_name(name)?;
        if !self.member_prefix.is_empty() {
            let prefixed = format!("{}{}", self.member_prefix, name);
            self.insert_name(&prefixed)?;
        }
        Ok(())
    }

    fn insert_name(&mut self, name: &str) -> Result<(), SchemaError> {
        if !self.field_names.insert(name.to_string()) {
            return Err(SchemaError::semantic(format!(
                "duplicate field {}.{}",
                self.struct_name, name
            )));
        }
        Ok(())
    }

    /// A tag, array-length, or extent-length reference must name an
    /// integer field declared earlier in this struct, or a field of a
    /// declared context; the same integer may not serve two different
    /// roles.
    fn check_int_field(
        &mut self,
        field: &FieldRef,
        kind: RefKind,
        inside: &str,
    ) -> Result<(), SchemaError> {
        let name = match field {
            FieldRef::Context { ctx, field } => {
                if !self.checker.context_names.contains(ctx) {
                    return Err(SchemaError::semantic(format!(
                        "Unrecognized context {} for {} in {}",
                        ctx,
                        kind.describe(),
                        inside
                    )));
                }
                if !self.context_list.contains(ctx) {
                    return Err(SchemaError::semantic(format!(
                        "Context {} for {} in {} is not declared with 'with context'",
                        ctx,
                        kind.describe(),
                        inside
                    )));
                }
                if !self.checker.context_fields[ctx].contains_key(field) {
                    return Err(SchemaError::semantic(format!(
                        "Unrecognized {} field {}.{} for {}",
                        kind.describe(),
                        ctx,
                        field,
                        inside
                    )));
                }
                return Ok(());
            }
            FieldRef::Local(name) => name,
        };

        if !self.field_names.contains(name) {
            return Err(SchemaError::semantic(format!(
                "Unrecognized {} field {} for {}",
                kind.describe(),
                name,
                inside
            )));
        }
        if !self.int_fields.contains_key(name) {
            return Err(SchemaError::semantic(format!(
                "Non-integer {} field {} for {}",
                kind.describe(),
                name,
                inside
            )));
        }
        let wanted = Usage::for_ref_kind(kind);
        match self.usage.get(name) {
            Some(current) if *current != wanted => {
                return Err(SchemaError::semantic(format!(
                    "Invalid mixed usage for field {name}"
                )));
            }
            Some(_) => {}
            None => {
                self.usage.insert(name.clone(), wanted);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::parser::parse_schema;

    fn checked(input: &str) -> (File, Vec<String>) {
        let mut file = parse_schema(input).expect("parse failed");
        let order = check(&mut file).expect("check failed");
        (file, order)
    }

    fn check_err(input: &str) -> String {
        let mut file = parse_schema(input).expect("parse failed");
        check(&mut file).expect_err("check unexpectedly passed").to_string()
    }

    #[test]
    fn test_topological_order_with_name_tiebreak() {
        let (_, order) = checked(
            "struct outer { struct mid m; }
             struct mid { struct leaf_b b; struct leaf_a a; }
             struct leaf_b { u8 x; }
             struct leaf_a { u8 x; }",
        );
        assert_eq!(order, ["leaf_a", "leaf_b", "mid", "outer"]);
    }

    #[test]
    fn test_cycle_detected() {
        let msg = check_err(
            "struct a { struct b b_member; }
             struct b { struct a a_member; }",
        );
        assert!(msg.contains("There is a cycle in the"), "{msg}");
    }

    #[test]
    fn test_self_cycle_detected() {
        let msg = check_err("struct a { struct a inner; }");
        assert_eq!(msg, "There is a cycle in the a structure");
    }

    #[test]
    fn test_duplicate_names() {
        assert_eq!(
            check_err("const X = 1; const X = 2;"),
            "duplicate constant name X"
        );
        assert_eq!(
            check_err("struct s { u8 x; } struct s { u8 y; }"),
            "duplicate structure name s"
        );
        assert_eq!(
            check_err("struct s { u8 x; u16 x; }"),
            "duplicate field s.x"
        );
    }

    #[test]
    fn test_duplicate_field_via_union_prefix() {
        // `u_x` collides with the union-prefixed name of `x` in `u`.
        let msg = check_err("struct s { u8 t; u8 u_x; union u[t] { 1: u8 x; }; }");
        assert_eq!(msg, "duplicate field s.u_x");
    }

    #[test]
    fn test_unknown_struct() {
        let msg = check_err("struct s { struct ghost g; }");
        assert_eq!(msg, "Unrecognized structure ghost used in s");
    }

    #[test]
    fn test_constraint_out_of_range() {
        let msg = check_err("struct s { u8 n IN [250..300]; }");
        assert_eq!(msg, "Tag value 300 out of range in s.n");
    }

    #[test]
    fn test_constraint_bad_range() {
        let msg = check_err("struct s { u8 n IN [9..3]; }");
        assert_eq!(msg, "Bad range in s.n");
    }

    #[test]
    fn test_constraint_ranges_sorted_and_resolved() {
        let (file, _) = checked("const HIGH = 200; struct s { u8 n IN [HIGH, 1..3]; }");
        let s = file.declaration("s").unwrap();
        let MemberKind::Int(im) = &s.members[0].kind else {
            panic!()
        };
        let c = im.constraint.as_ref().unwrap();
        assert_eq!(c.resolved, vec![(1, 3), (200, 200)]);
        assert_eq!(c.ranges[1].lo, Bound::Const("HIGH".into()));
    }

    #[test]
    fn test_duplicate_tags() {
        let msg = check_err(
            "struct u { u8 t; union v[t] { 1..5: u8 a; 3: u8 b; default: fail; }; }",
        );
        assert_eq!(msg, "Duplicate tag values in u.v");
    }

    #[test]
    fn test_multiple_defaults() {
        let msg = check_err(
            "struct u { u8 t; union v[t] { default: fail; default: ignore; }; }",
        );
        assert_eq!(msg, "Multiple default cases in u.v");
    }

    #[test]
    fn test_synthetic_default_appended() {
        let (file, _) = checked("struct u { u8 t; union v[t] { 1: u8 a; }; }");
        let s = file.declaration("u").unwrap();
        let MemberKind::Union(u) = &s.members[1].kind else {
            panic!()
        };
        assert_eq!(u.cases.len(), 2);
        assert!(u.cases[1].is_default());
        assert!(matches!(u.cases[1].members[0].kind, MemberKind::Fail));
    }

    #[test]
    fn test_tag_field_must_be_declared_and_integer() {
        assert_eq!(
            check_err("struct u { u8 t; union v[missing] { 1: ; }; }"),
            "Unrecognized tag field missing for u.v"
        );
        assert_eq!(
            check_err("struct u { nulterm t; union v[t] { 1: ; }; }"),
            "Non-integer tag field t for u.v"
        );
    }

    #[test]
    fn test_mixed_usage_rejected() {
        let msg = check_err(
            "struct u { u8 n; u8 body[n]; union v[n] { 1: ; default: fail; }; }",
        );
        assert_eq!(msg, "Invalid mixed usage for field n");
    }

    #[test]
    fn test_shared_array_length_allowed() {
        checked("struct s { u8 n; u8 a[n]; u8 b[n]; }");
    }

    #[test]
    fn test_tag_out_of_range_for_width() {
        let msg = check_err("struct u { u8 t; union v[t] { 300: u8 a; }; }");
        assert_eq!(msg, "Tag value 300 out of range in u.v");
    }

    #[test]
    fn test_union_scoped_int_not_referencable_later() {
        let msg = check_err(
            "struct u { u8 t; union v[t] { 1: u8 inner_len; }; u8 body[inner_len]; }",
        );
        assert_eq!(msg, "Non-integer array length field inner_len for u.body");
    }

    #[test]
    fn test_nested_length_constraints_rejected() {
        let msg = check_err(
            "struct s { u8 len; u8 t; \
             union v[t] with length len { 1: u8 inner[..-2]; }; }",
        );
        assert_eq!(msg, "Nested fields with length constraints.");
    }

    #[test]
    fn test_ignore_outside_extent_rejected() {
        let msg = check_err("struct s { u8 t; union v[t] { 1: ignore; }; }");
        assert_eq!(msg, "'...' found outside of a length-constrained element");
    }

    #[test]
    fn test_context_consistency() {
        let msg = check_err(
            "context ctx { u8 v; }
             struct inner with context ctx { u8 body[ctx.v]; }
             struct outer { struct inner i; }",
        );
        assert!(
            msg.contains("outer contains inner, which uses contexts (ctx)"),
            "{msg}"
        );
    }

    #[test]
    fn test_context_fields_validated() {
        assert_eq!(
            check_err(
                "context ctx { u8 v; }
                 struct s with context ctx { u8 body[ctx.nope]; }"
            ),
            "Unrecognized array length field ctx.nope for s.body"
        );
        assert_eq!(
            check_err("struct s { u8 body[ghost.v]; }"),
            "Unrecognized context ghost for array length in s.body"
        );
        assert_eq!(
            check_err(
                "context ctx { u8 v; }
                 struct s { u8 body[ctx.v]; }"
            ),
            "Context ctx for array length in s.body is not declared with 'with context'"
        );
    }

    #[test]
    fn test_contexts_precede_users_in_order() {
        let (_, order) = checked(
            "context zz { u8 v; }
             struct aa with context zz { u8 x; }",
        );
        assert_eq!(order, ["zz", "aa"]);
    }

    #[test]
    fn test_extern_structs_usable_but_not_emitted() {
        let (_, order) = checked(
            "extern struct ext;
             struct s { struct ext e; }",
        );
        assert_eq!(order, ["s"]);
    }

    #[test]
    fn test_extern_context_mismatch_detected() {
        let msg = check_err(
            "context ctx { u8 v; }
             extern struct ext with context ctx;
             struct s { struct ext e; }",
        );
        assert!(msg.contains("s contains ext"), "{msg}");
    }

    #[test]
    fn test_unknown_constant_in_width() {
        assert_eq!(
            check_err("struct s { u8 arr[NOPE]; }"),
            "Unrecognized constant NOPE in s.arr"
        );
    }

    #[test]
    fn test_referenced_int_fields_recorded() {
        let (file, _) = checked("struct s { u8 n; u8 len; u8 a[n]; u8 t; }");
        let s = file.declaration("s").unwrap();
        assert!(s.referenced_int_fields.contains("n"));
        assert!(!s.referenced_int_fields.contains("len"));
        assert!(!s.referenced_int_fields.contains("t"));
    }

    #[test]
    fn test_option_conflict() {
        assert_eq!(
            check_err("trunnel options opaque, very_opaque; struct s { u8 x; }"),
            "can't use both 'opaque' and 'very_opaque'"
        );
    }

    #[test]
    fn test_deterministic_order_repeated() {
        let input = "struct b { u8 x; } struct a { u8 x; } struct c { struct a a; struct b b; }";
        let (_, first) = checked(input);
        for _ in 0..5 {
            let (_, again) = checked(input);
            assert_eq!(first, again);
        }
        assert_eq!(first, ["a", "b", "c"]);
    }
}
