//! Trunnel: a code generator for binary wire-format codecs.
//!
//! Given a declarative schema describing fixed-width integers, arrays,
//! nul-terminated strings, tagged unions, and length-constrained
//! regions, trunnel emits a self-contained C parser and encoder, plus
//! allocation, disposal, validation, and accessor routines.
//!
//! The pipeline is strictly sequential:
//!
//! ```text
//! schema text -> [lexer] -> tokens -> [parser] -> AST
//!   -> [checker] -> validated AST + topologically sorted struct list
//!   -> [annotator] -> linked AST
//!   -> [emitter] -> header text + module text
//! ```

pub mod cli;
pub mod models;
pub mod services;

pub use models::error::SchemaError;

use models::ast::File;

/// Result of compiling one schema: the text of the two output files.
#[derive(Debug)]
pub struct CompiledSchema {
    pub header: String,
    pub module: String,
}

/// Parse, check, and annotate a schema, returning the linked AST and
/// the topological emission order.
pub fn analyze(input: &str, extra_options: &[String]) -> Result<(File, Vec<String>), SchemaError> {
    let mut file = services::parser::parse_schema(input)?;
    file.options.extend(extra_options.iter().cloned());
    let order = services::checker::check(&mut file)?;
    services::annotator::annotate(&mut file);
    Ok((file, order))
}

/// Run the whole pipeline over schema text. `basename` names the
/// output pair: `foo` produces `foo.h` / `foo.c` contents.
pub fn compile(
    input: &str,
    basename: &str,
    extra_options: &[String],
) -> Result<CompiledSchema, SchemaError> {
    let (file, order) = analyze(input, extra_options)?;
    let h_fname = format!("{basename}.h");
    let c_fname = format!("{basename}.c");
    let header = services::emitter::emit_header(&file, &order, &h_fname);
    let module = services::emitter::emit_module(&file, &order, &h_fname, &c_fname);
    Ok(CompiledSchema { header, module })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_produces_both_files() {
        let out = compile("struct point { u8 x; u8 y; }", "point", &[]).unwrap();
        assert!(out.header.contains("#ifndef TRUNNEL_POINT_H"));
        assert!(out.header.contains("struct point_st {"));
        assert!(out.module.contains("#include \"point.h\""));
        assert!(out.module.contains("point_parse_into"));
    }

    #[test]
    fn test_compile_rejects_bad_schema() {
        let err = compile("struct a { struct a inner; }", "a", &[]).unwrap_err();
        assert_eq!(err.to_string(), "There is a cycle in the a structure");
    }

    #[test]
    fn test_extra_options_injected() {
        let out = compile("struct s { u8 x; }", "s", &["opaque".to_string()]).unwrap();
        assert!(out.header.contains("#if defined(TRUNNEL_EXPOSE_S_)"));
        assert!(out.module.contains("#define TRUNNEL_EXPOSE_S_"));
    }

    #[test]
    fn test_determinism() {
        let input = "struct b { u8 x; } struct a { struct b b; } struct c { u8 y; }";
        let first = compile(input, "wire", &[]).unwrap();
        for _ in 0..3 {
            let again = compile(input, "wire", &[]).unwrap();
            assert_eq!(first.header, again.header);
            assert_eq!(first.module, again.module);
        }
    }

    #[test]
    fn test_topological_definition_order_in_module() {
        let out = compile(
            "struct outer { struct inner i; } struct inner { u8 x; }",
            "t",
            &[],
        )
        .unwrap();
        let inner_def = out.module.find("inner_parse_into(inner_t *obj").unwrap();
        let outer_def = out.module.find("outer_parse_into(outer_t *obj").unwrap();
        assert!(inner_def < outer_def);
    }
}
