use crate::errors::ToolError;
use crate::utils::suggest::suggest;

pub fn unknown_tool_error(tool: &str, known_tools: &[String]) -> ToolError {
    let suggestions = suggest(tool, known_tools, 3);
    let mut err = ToolError::invalid_params(format!("Unknown tool: {}", tool));
    let hint = if suggestions.is_empty() {
        format!("Use one of: {}.", known_tools.join(", "))
    } else {
        format!("Did you mean: {}?", suggestions.join(", "))
    };
    err = err.with_hint(hint).with_details(serde_json::json!({
        "known_tools": known_tools,
        "did_you_mean": suggestions,
    }));
    err
}
