use crate::error::{ProtocolError, Result};

/// Validate a tool name against the dotted naming rule: exactly two
/// lowercase segments of `[a-z_]+` joined by a single dot
/// (`context.search`, `github.list_prs`).
pub fn validate_tool_name(name: &str) -> Result<()> {
    let mut segments = name.split('.');
    let (Some(category), Some(action), None) = (segments.next(), segments.next(), segments.next())
    else {
        return Err(ProtocolError::InvalidToolName(name.to_string()));
    };
    if category.is_empty() || action.is_empty() {
        return Err(ProtocolError::InvalidToolName(name.to_string()));
    }
    let valid_segment =
        |s: &str| s.bytes().all(|b| b.is_ascii_lowercase() || b == b'_');
    if !valid_segment(category) || !valid_segment(action) {
        return Err(ProtocolError::InvalidToolName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_tool_name;

    #[test]
    fn accepts_core_tool_names() {
        for name in [
            "context.search",
            "context.grep",
            "context.explain",
            "context.get_related_info",
            "context.index_control",
            "context.connector_management",
            "github.list_prs",
        ] {
            assert!(validate_tool_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_undotted_and_malformed_names() {
        for name in [
            "search",
            "context.",
            ".search",
            "context.Search",
            "context.sea rch",
            "context.search.extra",
            "Context.search",
            "context.search2",
            "",
        ] {
            assert!(validate_tool_name(name).is_err(), "{name}");
        }
    }
}
