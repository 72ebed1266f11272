//! Unified error types for the dotprompt library.
//!
//! Every fallible stage of the rendering pipeline reports through the single
//! [`Error`] enum: Picoschema translation, tool and schema lookup, partial
//! registration, helper registration, and template compilation/rendering.
//! YAML frontmatter failures are the one exception; the document parser
//! recovers from those locally and never surfaces them.

/// Result type alias for dotprompt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the dotprompt library.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A Picoschema definition could not be translated to JSON Schema.
    #[error("Picoschema: {0}")]
    Picoschema(String),

    /// A tool name was neither registered nor resolvable.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A named schema reference could not be resolved.
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// A schema was registered with an empty name or a null body.
    #[error("Invalid schema definition: {0}")]
    InvalidSchema(String),

    /// A helper name was redefined with a different function.
    #[error("Helper '{0}' is already registered with a different function")]
    HelperConflict(String),

    /// A sentinel marker in the rendered stream was malformed.
    #[error("Invalid marker: {0}")]
    InvalidMarker(String),

    /// A user-supplied resolver failed.
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// A resolver observed a caller cancellation signal.
    #[error("Operation was cancelled")]
    Cancelled,

    /// Template compilation error from the template backend.
    #[error("Template error: {0}")]
    Template(#[from] handlebars::TemplateError),

    /// Render-time error from the template backend, including unknown
    /// partials and unknown helpers.
    #[error("Render error: {0}")]
    Render(#[from] handlebars::RenderError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a Picoschema translation error.
    #[must_use]
    pub fn picoschema(msg: impl Into<String>) -> Self {
        Self::Picoschema(msg.into())
    }

    /// Create a tool-not-found error.
    #[must_use]
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Create a schema-not-found error.
    #[must_use]
    pub fn schema_not_found(name: impl Into<String>) -> Self {
        Self::SchemaNotFound(name.into())
    }

    /// Create an invalid-schema error.
    #[must_use]
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }

    /// Create a helper redefinition conflict error.
    #[must_use]
    pub fn helper_conflict(name: impl Into<String>) -> Self {
        Self::HelperConflict(name.into())
    }

    /// Create an invalid-marker error.
    #[must_use]
    pub fn invalid_marker(msg: impl Into<String>) -> Self {
        Self::InvalidMarker(msg.into())
    }

    /// Create a resolver failure error.
    #[must_use]
    pub fn resolver(msg: impl Into<String>) -> Self {
        Self::Resolver(msg.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn picoschema_creates_error() {
        let err = Error::picoschema("unsupported scalar type 'str'");
        assert!(matches!(err, Error::Picoschema(_)));
        assert!(err.to_string().contains("unsupported scalar type"));
    }

    #[test]
    fn tool_not_found_creates_error() {
        let err = Error::tool_not_found("weather");
        assert!(matches!(err, Error::ToolNotFound(_)));
        assert!(err.to_string().contains("weather"));
    }

    #[test]
    fn schema_not_found_creates_error() {
        let err = Error::schema_not_found("Person");
        assert!(err.to_string().contains("Person"));
    }

    #[test]
    fn helper_conflict_names_the_helper() {
        let err = Error::helper_conflict("role");
        assert!(err.to_string().contains("'role'"));
        assert!(err.to_string().contains("different function"));
    }

    #[test]
    fn from_json_error() {
        let json_err = serde_json::from_str::<i32>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn cancelled_display() {
        assert!(Error::Cancelled.to_string().contains("cancelled"));
    }

    #[test]
    fn error_chain_propagates() {
        fn inner() -> Result<()> {
            Err(Error::invalid_marker("bad media piece"))
        }

        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }

        assert!(matches!(outer().unwrap_err(), Error::InvalidMarker(_)));
    }
}
