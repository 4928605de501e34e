//! Error types for plates

use thiserror::Error;

/// Errors surfaced to callers of the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Locale error: {0}")]
    Locale(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Invalid render data: {0}")]
    Data(#[from] serde_json::Error),
}

/// Faults raised while executing compiled template source
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Undefined variable: ${name}")]
    UndefinedVariable { name: String },

    #[error("Call to undefined function {name}()")]
    UndefinedFunction { name: String },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Section error: {0}")]
    Section(String),

    #[error("Include depth limit of {limit} exceeded while rendering {name}")]
    IncludeDepth { name: String, limit: usize },

    #[error("Include of {name} failed: {source}")]
    Include {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Function {name}() failed: {message}")]
    Function { name: String, message: String },
}

impl RenderError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}

/// Failures of a cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Failed to lock cache entry {key}")]
    Lock {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_not_found_message() {
        let err = Error::TemplateNotFound {
            name: "users.profile".to_string(),
        };
        assert!(err.to_string().contains("users.profile"));
    }

    #[test]
    fn test_include_error_keeps_source() {
        let err = RenderError::Include {
            name: "partials.nav".to_string(),
            source: Box::new(Error::TemplateNotFound {
                name: "partials.nav".to_string(),
            }),
        };

        let msg = err.to_string();
        assert!(msg.contains("partials.nav"));
        assert!(msg.contains("Template not found"));
    }

    #[test]
    fn test_undefined_variable_message() {
        let err = RenderError::UndefinedVariable {
            name: "user".to_string(),
        };
        assert_eq!(err.to_string(), "Undefined variable: $user");
    }
}
