//! Fixed file preambles and the embedded runtime support files.
//!
//! Every generated module includes `trunnel-impl.h`, which supplies the
//! byte-order helpers, dynamic-array macros, and allocator shims the
//! emitted bodies rely on. The runtime sources ship embedded in the
//! binary and are written out next to the generated code on request.

use std::path::Path;

use crate::models::ast::File;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const HEADER_FOOTER: &str = "\n#endif\n";

const RUNTIME_FILES: &[(&str, &str)] = &[
    ("trunnel.h", include_str!("../../../runtime/trunnel.h")),
    ("trunnel-impl.h", include_str!("../../../runtime/trunnel-impl.h")),
    ("trunnel.c", include_str!("../../../runtime/trunnel.c")),
];

/// Include-guard macro derived from the header file name.
pub fn guard_macro(h_fname: &str) -> String {
    let mangled: String = h_fname
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("TRUNNEL_{mangled}")
}

/// Identifier-safe rendering of the module name, used to name the
/// static-analyzer dead-code dummy.
fn csafe_name(c_fname: &str) -> String {
    Path::new(c_fname)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(c_fname)
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect()
}

pub fn header_preamble(h_fname: &str) -> String {
    let guard = guard_macro(h_fname);
    format!(
        "/* {h_fname} -- generated by trunnel v{VERSION}.\n\
         \x20* You probably shouldn't edit this file.\n\
         \x20*/\n\
         #ifndef {guard}\n\
         #define {guard}\n\
         \n\
         #include <stdint.h>\n\
         #include \"trunnel.h\"\n\
         \n"
    )
}

pub fn module_preamble(file: &File, order: &[String], h_fname: &str, c_fname: &str) -> String {
    let csafe = csafe_name(c_fname);
    let mut expose = String::new();
    if file.has_option("opaque") {
        for name in order {
            expose.push_str(&format!(
                "#define TRUNNEL_EXPOSE_{}_\n",
                name.to_uppercase()
            ));
        }
    }
    format!(
        "/* {c_fname} -- generated by trunnel v{VERSION}.\n\
         \x20* You probably shouldn't edit this file.\n\
         \x20*/\n\
         #include <stdlib.h>\n\
         #include \"trunnel-impl.h\"\n\
         {expose}#include \"{h_fname}\"\n\
         \n\
         #define TRUNNEL_SET_ERROR_CODE(obj) \\\n\
         \x20 do {{                              \\\n\
         \x20   (obj)->trunnel_error_code_ = 1; \\\n\
         \x20 }} while (0)\n\
         \n\
         #if defined(__COVERITY__) || defined(__clang_analyzer__)\n\
         /* If we're running a static analysis tool, we don't want it to complain\n\
         \x20* that some of our remaining-bytes checks are dead-code. */\n\
         int {csafe}_deadcode_dummy__ = 0;\n\
         #define OR_DEADCODE_DUMMY || {csafe}_deadcode_dummy__\n\
         #else\n\
         #define OR_DEADCODE_DUMMY\n\
         #endif\n\
         \n\
         #define CHECK_REMAINING(nbytes, label)                           \\\n\
         \x20 do {{                                                           \\\n\
         \x20   if (remaining < (nbytes) OR_DEADCODE_DUMMY) {{                \\\n\
         \x20     goto label;                                                \\\n\
         \x20   }}                                                            \\\n\
         \x20 }} while (0)\n\
         \n"
    )
}

/// Write the runtime support files into `target_dir`.
pub fn write_runtime_files(target_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(target_dir)?;
    for (name, content) in RUNTIME_FILES {
        let banner = format!("/* {name} -- copied from trunnel v{VERSION} */\n");
        std::fs::write(target_dir.join(name), format!("{banner}{content}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_macro() {
        assert_eq!(guard_macro("foo.h"), "TRUNNEL_FOO_H");
        assert_eq!(guard_macro("wire-format.h"), "TRUNNEL_WIRE_FORMAT_H");
    }

    #[test]
    fn test_csafe_name_strips_nonalpha() {
        assert_eq!(csafe_name("wire2.c"), "wirec");
        assert_eq!(csafe_name("dir/cell.c"), "cellc");
    }

    #[test]
    fn test_header_preamble_has_guard() {
        let text = header_preamble("cell.h");
        assert!(text.contains("#ifndef TRUNNEL_CELL_H"));
        assert!(text.contains("#define TRUNNEL_CELL_H"));
        assert!(text.contains("#include \"trunnel.h\""));
    }

    #[test]
    fn test_module_preamble_expose_defines() {
        let mut file = File::default();
        file.options.push("opaque".into());
        let order = vec!["cell".to_string()];
        let text = module_preamble(&file, &order, "cell.h", "cell.c");
        assert!(text.contains("#define TRUNNEL_EXPOSE_CELL_"));
        assert!(text.contains("#define CHECK_REMAINING(nbytes, label)"));
        // The expose define must come before the header include.
        let expose = text.find("TRUNNEL_EXPOSE_CELL_").unwrap();
        let include = text.find("#include \"cell.h\"").unwrap();
        assert!(expose < include);
    }

    #[test]
    fn test_runtime_files_written() {
        let dir = tempfile::tempdir().unwrap();
        write_runtime_files(dir.path()).unwrap();
        for name in ["trunnel.h", "trunnel-impl.h", "trunnel.c"] {
            let text = std::fs::read_to_string(dir.path().join(name)).unwrap();
            assert!(text.starts_with(&format!("/* {name} -- copied from trunnel")));
        }
    }
}
