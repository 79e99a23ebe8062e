use super::tool_error::{ToolError, ToolErrorKind};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShapingError {
    /// No allow-list is registered for the entity kind. This is a wiring bug
    /// in the tool layer, not bad upstream data.
    #[error("no field allow-list registered for entity kind '{0}'")]
    SchemaUnknown(String),
}

impl From<ShapingError> for ToolError {
    fn from(err: ShapingError) -> Self {
        match &err {
            ShapingError::SchemaUnknown(kind) => ToolError::new(
                ToolErrorKind::Internal,
                "SHAPING_SCHEMA_UNKNOWN",
                err.to_string(),
            )
            .with_details(serde_json::json!({ "entity_kind": kind })),
        }
    }
}
