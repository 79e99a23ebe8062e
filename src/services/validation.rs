use crate::constants::limits::{MAX_PART_NUMBER_LENGTH, MAX_REQUESTED_QUANTITY};
use crate::errors::ToolError;
use serde_json::Value;

#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(
        &self,
        value: &Value,
        label: &str,
        trim: bool,
    ) -> Result<String, ToolError> {
        let text = value.as_str().ok_or_else(|| {
            ToolError::invalid_params(format!("{} must be a non-empty string", label))
        })?;
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        Ok(if trim {
            normalized.to_string()
        } else {
            text.to_string()
        })
    }

    pub fn ensure_optional_string(
        &self,
        value: Option<&Value>,
        label: &str,
        trim: bool,
    ) -> Result<Option<String>, ToolError> {
        match value {
            None => Ok(None),
            Some(val) if val.is_null() => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(val) => self.ensure_string(val, label, trim).map(Some),
        }
    }

    /// DigiKey or manufacturer part number. Any printable text is allowed;
    /// it is percent-encoded as a single path segment later.
    pub fn ensure_part_number(&self, value: Option<&Value>) -> Result<String, ToolError> {
        let value = value.ok_or_else(|| {
            ToolError::invalid_params("product_number is required")
                .with_hint("Pass a DigiKey or manufacturer part number, e.g. \"LM358DR\".")
        })?;
        let part = self.ensure_string(value, "product_number", true)?;
        if part.chars().count() > MAX_PART_NUMBER_LENGTH {
            return Err(ToolError::invalid_params(format!(
                "product_number must be at most {} characters",
                MAX_PART_NUMBER_LENGTH
            )));
        }
        if part.chars().any(char::is_control) {
            return Err(ToolError::invalid_params(
                "product_number must not contain control characters",
            ));
        }
        Ok(part)
    }

    /// Upstream ids are numeric but agents pass them either way.
    pub fn ensure_optional_id(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Option<String>, ToolError> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|id| Some(id.to_string()))
                .ok_or_else(|| {
                    ToolError::invalid_params(format!("{} must be a non-negative integer", label))
                }),
            Some(Value::String(text)) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                if !trimmed.chars().all(|c| c.is_ascii_digit()) {
                    return Err(ToolError::invalid_params(format!(
                        "{} must contain digits only",
                        label
                    )));
                }
                Ok(Some(trimmed.to_string()))
            }
            Some(_) => Err(ToolError::invalid_params(format!(
                "{} must be an integer or numeric string",
                label
            ))),
        }
    }

    pub fn ensure_id(&self, value: Option<&Value>, label: &str) -> Result<String, ToolError> {
        self.ensure_optional_id(value, label)?
            .ok_or_else(|| ToolError::invalid_params(format!("{} is required", label)))
    }

    /// Requested item count. Values above the tool's ceiling are accepted and
    /// clamped by the shaper; zero and negatives are rejected.
    pub fn ensure_limit(&self, value: Option<&Value>, fallback: usize) -> Result<usize, ToolError> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(fallback);
        };
        let numeric = value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<u64>().ok()))
            .filter(|n| *n >= 1)
            .ok_or_else(|| ToolError::invalid_params("limit must be a positive integer"))?;
        Ok(usize::try_from(numeric).unwrap_or(usize::MAX))
    }

    pub fn ensure_quantity(&self, value: Option<&Value>, fallback: Option<u64>) -> Result<u64, ToolError> {
        let raw = value.filter(|v| !v.is_null());
        let numeric = match raw {
            None => fallback.ok_or_else(|| {
                ToolError::invalid_params("requested_quantity is required")
            })?,
            Some(value) => value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse::<u64>().ok()))
                .ok_or_else(|| {
                    ToolError::invalid_params("requested_quantity must be a positive integer")
                })?,
        };
        if numeric == 0 || numeric > MAX_REQUESTED_QUANTITY {
            return Err(ToolError::invalid_params(format!(
                "requested_quantity must be between 1 and {}",
                MAX_REQUESTED_QUANTITY
            )));
        }
        Ok(numeric)
    }

    pub fn ensure_bool(&self, value: Option<&Value>, label: &str, fallback: bool) -> Result<bool, ToolError> {
        match value {
            None | Some(Value::Null) => Ok(fallback),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(Value::String(text)) => match text.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ToolError::invalid_params(format!("{} must be a boolean", label))),
            },
            Some(_) => Err(ToolError::invalid_params(format!("{} must be a boolean", label))),
        }
    }

    /// Comma-delimited string or array, e.g. `LeadFree,RoHSCompliant,InStock`.
    pub fn ensure_search_options(&self, value: Option<&Value>) -> Result<Vec<String>, ToolError> {
        let items: Vec<String> = match value {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::String(text)) => text.split(',').map(|s| s.trim().to_string()).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| self.ensure_string(item, "search_options entry", true))
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(ToolError::invalid_params(
                    "search_options must be a comma-delimited string or an array",
                ))
            }
        };
        Ok(items.into_iter().filter(|s| !s.is_empty()).collect())
    }

    pub fn ensure_sort_order(&self, value: Option<&Value>) -> Result<String, ToolError> {
        let Some(raw) = self.ensure_optional_string(value, "sort_order", true)? else {
            return Ok("Ascending".to_string());
        };
        match raw.to_lowercase().as_str() {
            "ascending" | "asc" => Ok("Ascending".to_string()),
            "descending" | "desc" => Ok("Descending".to_string()),
            _ => Err(ToolError::invalid_params(
                "sort_order must be Ascending or Descending",
            )),
        }
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}
