use thiserror::Error;

/// Errors produced while turning a schema file into C sources.
///
/// Every stage of the pipeline reports through this type: the lexer and
/// parser with positioned variants, the checker with a single
/// human-readable message naming the offending struct or member.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unmatched input {text:?} on line {line}")]
    Lexer { text: String, line: usize },

    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("{message}")]
    Semantic { message: String },
}

impl SchemaError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        SchemaError::Syntax {
            line,
            message: message.into(),
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        SchemaError::Semantic {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_display_is_bare_message() {
        let err = SchemaError::semantic("duplicate structure name foo");
        assert_eq!(err.to_string(), "duplicate structure name foo");
    }

    #[test]
    fn test_syntax_display_names_line() {
        let err = SchemaError::syntax(12, "expected ';'");
        assert_eq!(err.to_string(), "syntax error at line 12: expected ';'");
    }
}
