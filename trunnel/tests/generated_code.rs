//! End-to-end pipeline tests: schema text in, C text out.
//!
//! These check the emitted code's structure and contracts; nothing here
//! runs a C compiler.

use pretty_assertions::assert_eq;
use trunnel::compile;

fn braces_balance(text: &str) {
    let mut depth: i64 = 0;
    for c in text.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        assert!(depth >= 0, "unbalanced braces");
    }
    assert_eq!(depth, 0, "unbalanced braces");
}

fn no_template_leftovers(text: &str) {
    for artifact in ["{c_name}", "{name}", "{width}", "{expr}", "\\x20"] {
        assert!(
            !text.contains(artifact),
            "template artifact {artifact:?} leaked into output"
        );
    }
}

#[test]
fn integer_with_range_scenario() {
    let out = compile("struct r { u16 n IN [1..3, 9]; eos; }", "r", &[]).unwrap();
    // Two bytes required, else truncated (-2).
    assert!(out.module.contains("CHECK_REMAINING(2, truncated);"));
    assert!(out.module.contains(" truncated:\n  return -2;"));
    // Constraint violation is invalid input (-1).
    assert!(out
        .module
        .contains("if (! ((obj->n >= 1 && obj->n <= 3) || obj->n == 9))"));
    assert!(out.module.contains(" fail:\n  result = -1;\n  return result;"));
    // Network byte order both ways.
    assert!(out.module.contains("trunnel_ntohs(trunnel_get_uint16(ptr))"));
    assert!(out.module.contains("trunnel_set_uint16(ptr, trunnel_htons(obj->n));"));
    // Trailing data rejected.
    assert!(out.module.contains("if (remaining)\n    goto fail;"));
    braces_balance(&out.module);
    braces_balance(&out.header);
    no_template_leftovers(&out.module);
    no_template_leftovers(&out.header);
}

#[test]
fn byte_array_scenario() {
    let out = compile("struct b { u8 n; u8 body[n]; eos; }", "b", &[]).unwrap();
    // Parse: bounds-checked bulk copy sized by the width field.
    assert!(out.module.contains("CHECK_REMAINING(obj->n, truncated);"));
    assert!(out.module.contains("memcpy(obj->body.elts_, ptr, obj->n);"));
    // Encode: length consistency was already checked.
    assert!(out.module.contains("trunnel_assert(obj->n == elt_len);"));
    // Check ties the array length to the width field.
    assert!(out
        .module
        .contains("if (TRUNNEL_DYNARRAY_LEN(&obj->body) != obj->n)"));
    assert!(out.module.contains("return \"Length mismatch for body\";"));
    braces_balance(&out.module);
}

#[test]
fn tagged_union_with_length_scenario() {
    let out = compile(
        "struct u { u8 tag; u8 len; \
         union u[tag] with length len { \
           1: u32 x; \
           2: u8 y[..-0]; \
           default: ignore; \
         }; eos; }",
        "u",
        &[],
    )
    .unwrap();
    // The length field back-patches after the union is encoded.
    assert!(out.module.contains("uint8_t *backptr_len = NULL;"));
    assert!(out.module.contains("backptr_len = ptr;"));
    assert!(out
        .module
        .contains("trunnel_set_uint8(backptr_len, (written - written_before_union));"));
    // Overflow of the length field is a check failure, guarded for
    // widths narrower than size_t.
    assert!(out.module.contains("#if UINT8_MAX < SIZE_MAX"));
    assert!(out
        .module
        .contains("if (written - written_before_union > UINT8_MAX)"));
    // Parse constrains the extent and requires it fully consumed.
    assert!(out.module.contains("remaining_after = remaining - obj->len;"));
    assert!(out.module.contains("remaining = obj->len;"));
    assert!(out.module.contains("if (remaining != 0)"));
    // Unknown tags hit the written default, which skips the extent.
    assert!(out.module.contains("default:"));
    assert!(out.module.contains("ptr += remaining; remaining = 0;"));
    braces_balance(&out.module);
}

#[test]
fn leftover_bytes_scenario() {
    let out = compile("struct l { u8 xs[..-2]; u16 trailer; }", "l", &[]).unwrap();
    // Parse: reserve exactly two bytes past the array.
    assert!(out.module.contains("remaining_after = 2;"));
    assert!(out.module.contains("remaining = remaining - 2;"));
    // Encode: clamp avail at the boundary and demand exact consumption.
    assert!(out.module.contains("avail = written + 2;"));
    assert!(out.module.contains("enforce_avail = 1;"));
    assert!(out.module.contains("if (enforce_avail && avail != written)"));
    // Past the boundary, a shortfall with a sufficient original buffer
    // means the object can never encode: -1, not -2.
    assert!(out.module.contains("if (avail_orig - written < 2)"));
    braces_balance(&out.module);
}

#[test]
fn cycle_rejection_scenario() {
    let err = compile(
        "struct a { struct b b_member; } struct b { struct a a_member; }",
        "t",
        &[],
    )
    .unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("There is a cycle in the a structure")
            || msg.contains("There is a cycle in the b structure"),
        "{msg}"
    );
}

#[test]
fn duplicate_tag_rejection_scenario() {
    let err = compile(
        "struct u { u8 t; union v[t] { 1..5: u8 a; 3: u8 b; default: fail; }; }",
        "t",
        &[],
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Duplicate tag values in u.v");
}

#[test]
fn kitchen_sink_compiles_cleanly() {
    let schema = r#"
        const VERSION = 3;
        const N_WORDS = 4;

        context conn {
          u8 proto;
        }

        extern struct handshake with context conn;

        /** A fixed-size record. */
        struct coords {
          u16 x;
          u16 y;
        }

        struct packet with context conn {
          u8 version IN [VERSION];
          u8 kind;
          u8 n_coords;
          u16 len;
          @ptr start_of_body;
          char magic[8];
          u32 words[N_WORDS];
          nulterm label;
          struct coords origin;
          struct coords path[n_coords];
          union body[kind] with length len {
            1: u32 value;
            2: nulterm text;
            3: struct handshake hs;
            default: ignore;
          };
          u8 rest[];
        }
    "#;
    let out = compile(schema, "packet", &[]).unwrap();

    // Topological order: coords precedes packet in both files.
    let coords_pos = out.module.find("coords_parse_into").unwrap();
    let packet_pos = out.module.find("packet_parse_into").unwrap();
    assert!(coords_pos < packet_pos);

    // Contexts thread through every generated signature.
    assert!(out.header.contains(
        "ssize_t packet_parse(packet_t **output, const uint8_t *input, const size_t len_in, const conn_t *conn_ctx);"
    ));
    // The extern struct resolves to prototypes in the module.
    assert!(out.module.contains("typedef struct handshake_st handshake_t;"));
    assert!(out
        .module
        .contains("result = handshake_parse(&obj->body_hs, ptr, remaining, conn_ctx);"));

    // Fixed char arrays reserve a NUL byte.
    assert!(out.header.contains("char magic[8+1];"));
    // Constant-width arrays stay symbolic.
    assert!(out.header.contains("uint32_t words[N_WORDS];"));
    assert!(out.module.contains("CHECK_REMAINING(4 * N_WORDS, truncated);"));
    // Position members snapshot the cursor and emit nothing.
    assert!(out.module.contains("obj->start_of_body = ptr;"));
    // Struct arrays parse in a loop.
    assert!(out
        .module
        .contains("result = coords_parse(&obj->path[idx], ptr, remaining);"));

    braces_balance(&out.header);
    braces_balance(&out.module);
    no_template_leftovers(&out.header);
    no_template_leftovers(&out.module);
}

#[test]
fn determinism_across_runs() {
    let schema = "struct zz { u8 a; } struct aa { u8 b; } struct mm { struct zz z; struct aa a; }";
    let first = compile(schema, "d", &[]).unwrap();
    for _ in 0..5 {
        let again = compile(schema, "d", &[]).unwrap();
        assert_eq!(first.header, again.header);
        assert_eq!(first.module, again.module);
    }
    // Tie-break by name: aa before zz even though zz was written first.
    let aa = first.module.find("aa_parse_into").unwrap();
    let zz = first.module.find("zz_parse_into").unwrap();
    assert!(aa < zz);
}

#[test]
fn opaque_options_change_header_only_guards() {
    let plain = compile("struct s { u8 x; }", "s", &[]).unwrap();
    assert!(plain
        .header
        .contains("#if !defined(TRUNNEL_OPAQUE) && !defined(TRUNNEL_OPAQUE_S)"));

    let opaque = compile("struct s { u8 x; }", "s", &["opaque".to_string()]).unwrap();
    assert!(opaque.header.contains("#if defined(TRUNNEL_EXPOSE_S_)"));
    assert!(opaque.module.contains("#define TRUNNEL_EXPOSE_S_"));

    let very = compile("struct s { u8 x; }", "s", &["very_opaque".to_string()]).unwrap();
    assert!(!very.header.contains("uint8_t x;"));
    // The layout moves into the module.
    assert!(very.module.contains("uint8_t x;"));
    assert!(very.module.contains("struct s_st {"));
}

#[test]
fn conflicting_options_rejected() {
    let err = compile(
        "struct s { u8 x; }",
        "s",
        &["opaque".to_string(), "very_opaque".to_string()],
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "can't use both 'opaque' and 'very_opaque'");
}

#[test]
fn zero_length_var_array_parse_has_no_element_work() {
    // A zero width field must be accepted: the memcpy is guarded.
    let out = compile("struct s { u8 n; u8 body[n]; }", "s", &[]).unwrap();
    assert!(out.module.contains("if (obj->n)\n    memcpy(obj->body.elts_, ptr, obj->n);"));
}

#[test]
fn docstrings_carry_into_header() {
    let out = compile(
        "/** One record. */ struct rec { /** Its tag. */ u8 tag; }",
        "rec",
        &[],
    )
    .unwrap();
    assert!(out.header.contains("/** One record. */"));
    assert!(out.header.contains("/** Its tag. */"));
}
