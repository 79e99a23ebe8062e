mod auth_error;
mod mcp_error;
mod shaping_error;
mod tool_error;

pub use auth_error::AuthError;
pub use mcp_error::{ErrorCode, McpError};
pub use shaping_error::ShapingError;
pub use tool_error::{ToolError, ToolErrorKind};
