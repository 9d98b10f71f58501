use rustc_hash::FxHashSet;
use serde::Serialize;
use std::fmt;

/// Root of a parsed schema file: constants, structure declarations
/// (contexts included), extern declarations, and compilation options.
///
/// Inline struct declarations are lifted to top level by the parser and
/// appear after the outer declarations, in source order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct File {
    pub constants: Vec<ConstDecl>,
    pub declarations: Vec<StructDecl>,
    pub extern_structs: Vec<ExternStructDecl>,
    pub options: Vec<String>,
}

impl File {
    pub fn declaration(&self, name: &str) -> Option<&StructDecl> {
        self.declarations.iter().find(|d| d.name == name)
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    /// Context list of a declared or extern struct. Unknown names have
    /// been rejected by the checker, so an empty list only means "no
    /// contexts".
    pub fn context_list_of(&self, name: &str) -> &[String] {
        if let Some(d) = self.declaration(name) {
            return &d.context_list;
        }
        for es in &self.extern_structs {
            if es.name == name {
                return &es.context_list;
            }
        }
        &[]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstDecl {
    pub name: String,
    pub value: u64,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExternStructDecl {
    pub name: String,
    pub context_list: Vec<String>,
}

/// A structure declaration, or a context declaration when `is_context`
/// is set (contexts have no wire representation and only hold integer
/// fields).
#[derive(Debug, Clone, Serialize)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<Member>,
    pub doc: Option<String>,
    pub context_list: Vec<String>,
    pub is_context: bool,

    /// Integer fields referenced elsewhere in this struct as a tag, an
    /// array length, or an extent length. Recorded by the checker.
    #[serde(skip)]
    pub referenced_int_fields: FxHashSet<String>,
    /// Integers used as the length of a length-constrained extent,
    /// sorted by c_name. Recorded by the annotator; the encoder emits
    /// one back-patch pointer per entry.
    pub length_fields: Vec<IntFieldInfo>,
    /// True iff this struct contains a leftover-bytes extent.
    pub has_leftover_field: bool,
}

impl StructDecl {
    pub fn new(name: String, members: Vec<Member>, context_list: Vec<String>) -> Self {
        Self {
            name,
            members,
            doc: None,
            context_list,
            is_context: false,
            referenced_int_fields: FxHashSet::default(),
            length_fields: Vec::new(),
            has_leftover_field: false,
        }
    }
}

/// One member of a structure. The declared name lives in the kind; the
/// `c_name` (union-prefixed where applicable) and the `after_leftover`
/// flag are filled in by the annotator.
#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub doc: Option<String>,
    pub c_name: String,
    pub after_leftover: bool,
    pub kind: MemberKind,
}

impl Member {
    pub fn new(kind: MemberKind) -> Self {
        Self {
            doc: None,
            c_name: String::new(),
            after_leftover: false,
            kind,
        }
    }

    /// Schema-level rendering of this member, used in generated-code
    /// comments ("Encode u8 tag", "Parse union body[tag]").
    pub fn describe(&self) -> String {
        let c_name = &self.c_name;
        match &self.kind {
            MemberKind::Int(m) => match &m.constraint {
                Some(c) => {
                    let ranges: Vec<String> = c
                        .ranges
                        .iter()
                        .map(|r| {
                            if r.lo == r.hi {
                                r.lo.to_string()
                            } else {
                                format!("{}..{}", r.lo, r.hi)
                            }
                        })
                        .collect();
                    format!("{} {c_name} IN [{}]", m.ty, ranges.join(", "))
                }
                None => format!("{} {c_name}", m.ty),
            },
            MemberKind::Struct(m) => format!("struct {} {c_name}", m.struct_name),
            MemberKind::NulTerm { .. } => format!("nulterm {c_name}"),
            MemberKind::FixedArray(m) => {
                format!("{} {c_name}[{}]", base_name(&m.base), m.width)
            }
            MemberKind::VarArray(m) => {
                let width = m
                    .width_field
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_default();
                format!("{} {c_name}[{width}]", base_name(&m.base))
            }
            MemberKind::Union(m) => format!("union {c_name}[{}]", m.tag_field),
            MemberKind::Position { name } => format!("@{name}"),
            MemberKind::LenConstrained(_) => "length-constrained region".to_string(),
            MemberKind::Eos => "eos".to_string(),
            MemberKind::Fail => "fail".to_string(),
            MemberKind::Ignore => "ignore".to_string(),
        }
    }

    /// Declared name, for the kinds that have one.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            MemberKind::Int(m) => Some(&m.name),
            MemberKind::Struct(m) => Some(&m.name),
            MemberKind::NulTerm { name } => Some(name),
            MemberKind::FixedArray(m) => Some(&m.name),
            MemberKind::VarArray(m) => Some(&m.name),
            MemberKind::Union(m) => Some(&m.name),
            MemberKind::Position { name } => Some(name),
            MemberKind::LenConstrained(_)
            | MemberKind::Eos
            | MemberKind::Fail
            | MemberKind::Ignore => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum MemberKind {
    Int(IntMember),
    Struct(StructRefMember),
    NulTerm { name: String },
    FixedArray(FixedArrayMember),
    VarArray(VarArrayMember),
    Union(UnionMember),
    LenConstrained(LenConstrainedMember),
    Position { name: String },
    Eos,
    Fail,
    Ignore,
}

/// A fixed-width unsigned integer type (8, 16, 32, or 64 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntType {
    pub width: u8,
}

impl IntType {
    pub fn max(self) -> u64 {
        match self.width {
            8 => u8::MAX as u64,
            16 => u16::MAX as u64,
            32 => u32::MAX as u64,
            _ => u64::MAX,
        }
    }

    pub fn bytes(self) -> u8 {
        self.width / 8
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.width)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntMember {
    pub ty: IntType,
    pub name: String,
    pub constraint: Option<IntConstraint>,
}

impl IntMember {
    /// Lowest value admitted by the constraint (0 when unconstrained).
    /// `new` uses this to initialize constrained fields to a valid value.
    pub fn minimum(&self) -> u64 {
        match &self.constraint {
            Some(c) => c.resolved.first().map(|r| r.0).unwrap_or(0),
            None => 0,
        }
    }
}

/// A constraint over an integer field: the value must fall in the union
/// of the inclusive ranges. Bounds may be written as literals or as
/// constant names; the checker records the numeric ranges in `resolved`
/// and sorts both lists by resolved lower bound.
#[derive(Debug, Clone, Serialize)]
pub struct IntConstraint {
    pub ranges: Vec<IntRange>,
    pub resolved: Vec<(u64, u64)>,
}

impl IntConstraint {
    pub fn new(ranges: Vec<IntRange>) -> Self {
        Self {
            ranges,
            resolved: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntRange {
    pub lo: Bound,
    pub hi: Bound,
}

/// A range bound: an integer literal or a reference to a declared
/// constant. Constant references survive into the emitted C so that the
/// generated sources keep the symbolic name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Bound {
    Lit(u64),
    Const(String),
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Lit(v) => write!(f, "{v}"),
            Bound::Const(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StructRefMember {
    pub struct_name: String,
    pub name: String,
}

fn base_name(base: &ArrayBase) -> String {
    match base {
        ArrayBase::Int(ty) => ty.to_string(),
        ArrayBase::Char => "char".to_string(),
        ArrayBase::Struct(name) => format!("struct {name}"),
    }
}

/// Element type of a fixed or variable array.
#[derive(Debug, Clone, Serialize)]
pub enum ArrayBase {
    Int(IntType),
    Char,
    Struct(String),
}

impl ArrayBase {
    /// True for element types stored as raw bytes (char or u8); these
    /// arrays encode and parse with a single memcpy.
    pub fn is_bytes(&self) -> bool {
        matches!(self, ArrayBase::Char | ArrayBase::Int(IntType { width: 8 }))
    }
}

/// Element count of a fixed array: a literal or a constant name (kept
/// symbolic for the emitted C).
#[derive(Debug, Clone, Serialize)]
pub enum ArrayWidth {
    Lit(u64),
    Const(String),
}

impl fmt::Display for ArrayWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayWidth::Lit(v) => write!(f, "{v}"),
            ArrayWidth::Const(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FixedArrayMember {
    pub base: ArrayBase,
    pub name: String,
    pub width: ArrayWidth,
}

#[derive(Debug, Clone, Serialize)]
pub struct VarArrayMember {
    pub base: ArrayBase,
    pub name: String,
    /// None for a remainder array (extends to the end of the enclosing
    /// extent).
    pub width_field: Option<FieldRef>,
    /// Resolved facts about a local width field; None for remainder
    /// arrays and context-qualified references.
    pub width_info: Option<IntFieldInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnionMember {
    pub name: String,
    pub tag_field: FieldRef,
    pub tag_info: Option<IntFieldInfo>,
    pub cases: Vec<UnionCase>,
}

/// One branch of a tagged union: the tag ranges it matches (None for the
/// default branch) and the members it contributes.
#[derive(Debug, Clone, Serialize)]
pub struct UnionCase {
    pub tags: Option<Vec<IntRange>>,
    pub members: Vec<Member>,
}

impl UnionCase {
    pub fn is_default(&self) -> bool {
        self.tags.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LenConstrainedMember {
    /// Exactly one of `length_field` and `leftover` is set. A leftover
    /// count may be written as a constant name; it stays symbolic for
    /// the emitted C.
    pub length_field: Option<FieldRef>,
    pub length_info: Option<IntFieldInfo>,
    pub leftover: Option<ArrayWidth>,
    pub members: Vec<Member>,
}

/// A reference to an integer field: a member of the same struct declared
/// earlier, or a field of a caller-supplied context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldRef {
    Local(String),
    Context { ctx: String, field: String },
}

impl FieldRef {
    /// Parse a written reference: `name` or `ctx.name`.
    pub fn parse(text: &str) -> Self {
        match text.split_once('.') {
            Some((ctx, field)) => FieldRef::Context {
                ctx: ctx.to_string(),
                field: field.to_string(),
            },
            None => FieldRef::Local(text.to_string()),
        }
    }

    pub fn is_context(&self) -> bool {
        matches!(self, FieldRef::Context { .. })
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Local(name) => write!(f, "{name}"),
            FieldRef::Context { ctx, field } => write!(f, "{ctx}.{field}"),
        }
    }
}

/// Resolved facts about a referenced local integer field: its C name
/// (which differs from the declared name inside unions) and its width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntFieldInfo {
    pub c_name: String,
    pub width: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_type_max() {
        assert_eq!(IntType { width: 8 }.max(), 255);
        assert_eq!(IntType { width: 16 }.max(), 65535);
        assert_eq!(IntType { width: 32 }.max(), 4294967295);
        assert_eq!(IntType { width: 64 }.max(), u64::MAX);
    }

    #[test]
    fn test_field_ref_parse() {
        assert_eq!(FieldRef::parse("len"), FieldRef::Local("len".into()));
        assert_eq!(
            FieldRef::parse("ctx.version"),
            FieldRef::Context {
                ctx: "ctx".into(),
                field: "version".into()
            }
        );
    }

    #[test]
    fn test_array_base_is_bytes() {
        assert!(ArrayBase::Char.is_bytes());
        assert!(ArrayBase::Int(IntType { width: 8 }).is_bytes());
        assert!(!ArrayBase::Int(IntType { width: 16 }).is_bytes());
        assert!(!ArrayBase::Struct("foo".into()).is_bytes());
    }

    #[test]
    fn test_file_lookup() {
        let mut file = File::default();
        file.declarations
            .push(StructDecl::new("point".into(), vec![], vec!["ctx".into()]));
        file.extern_structs.push(ExternStructDecl {
            name: "other".into(),
            context_list: vec![],
        });
        assert!(file.declaration("point").is_some());
        assert!(file.declaration("other").is_none());
        assert_eq!(file.context_list_of("point"), ["ctx".to_string()]);
        assert!(file.context_list_of("other").is_empty());
    }

    #[test]
    fn test_member_name() {
        let m = Member::new(MemberKind::Int(IntMember {
            ty: IntType { width: 16 },
            name: "tag".into(),
            constraint: None,
        }));
        assert_eq!(m.name(), Some("tag"));
        assert_eq!(Member::new(MemberKind::Eos).name(), None);
    }

    #[test]
    fn test_int_member_minimum() {
        let mut c = IntConstraint::new(vec![IntRange {
            lo: Bound::Lit(3),
            hi: Bound::Lit(9),
        }]);
        c.resolved = vec![(3, 9)];
        let m = IntMember {
            ty: IntType { width: 8 },
            name: "n".into(),
            constraint: Some(c),
        };
        assert_eq!(m.minimum(), 3);
    }
}
