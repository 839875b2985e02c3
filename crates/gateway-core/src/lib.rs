//! Tool namespace primitives for the integration gateway.
//!
//! Every integration tool is addressed as `"<slug>/<tool>"`. The slug picks the
//! integration, the remainder is the tool name as the integration knows it.
//! Only the **first** `/` separates the two, so tool names may themselves
//! contain `/` (e.g. `github/repos/list`).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between integration slug and tool name
pub const NAMESPACE_SEPARATOR: char = '/';

/// Tool name could not be split into a slug and a tool
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid tool name '{name}': expected '<integration>/<tool>'")]
pub struct InvalidToolName {
    /// The rejected input
    pub name: String,
}

/// A resolved `slug/tool` address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolAddress {
    /// Integration slug (e.g. `github`)
    pub slug: String,
    /// Tool name within the integration (e.g. `list_repos`)
    pub tool: String,
}

impl ToolAddress {
    /// Canonical `slug/tool` form
    #[must_use]
    pub fn qualified(&self) -> String {
        qualify(&self.slug, &self.tool)
    }
}

impl fmt::Display for ToolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{NAMESPACE_SEPARATOR}{}", self.slug, self.tool)
    }
}

/// Split a canonical tool name on its first `/`.
///
/// # Errors
///
/// Returns [`InvalidToolName`] when there is no `/` or either side is empty.
pub fn resolve(name: &str) -> Result<ToolAddress, InvalidToolName> {
    match name.split_once(NAMESPACE_SEPARATOR) {
        Some((slug, tool)) if !slug.is_empty() && !tool.is_empty() => Ok(ToolAddress {
            slug: slug.to_string(),
            tool: tool.to_string(),
        }),
        _ => Err(InvalidToolName {
            name: name.to_string(),
        }),
    }
}

/// Build the canonical name for a tool exposed by `slug`
#[must_use]
pub fn qualify(slug: &str, tool: &str) -> String {
    format!("{slug}{NAMESPACE_SEPARATOR}{tool}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_simple_name() {
        let addr = resolve("github/list_repos").unwrap();
        assert_eq!(addr.slug, "github");
        assert_eq!(addr.tool, "list_repos");
    }

    #[test]
    fn splits_on_first_slash_only() {
        let addr = resolve("github/repos/list").unwrap();
        assert_eq!(addr.slug, "github");
        assert_eq!(addr.tool, "repos/list");
    }

    #[test]
    fn tool_may_start_with_slash() {
        // "a//b" has non-empty parts around the first slash: "a" and "/b"
        let addr = resolve("a//b").unwrap();
        assert_eq!(addr.tool, "/b");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(resolve("github").is_err());
        assert!(resolve("").is_err());
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(resolve("/list_repos").is_err());
        assert!(resolve("github/").is_err());
        assert!(resolve("/").is_err());
    }

    #[test]
    fn resolve_matches_first_slash_law() {
        let samples = [
            "a/b", "/", "//", "a/", "/b", "ab", "", "x/y/z", "x//", "slack/chat/post", "é/ü",
        ];
        for s in samples {
            let expected = s
                .find('/')
                .is_some_and(|i| i > 0 && i + 1 < s.len());
            assert_eq!(resolve(s).is_ok(), expected, "input {s:?}");
        }
    }

    #[test]
    fn qualify_round_trips() {
        let name = qualify("linear", "create_issue");
        assert_eq!(name, "linear/create_issue");
        assert_eq!(resolve(&name).unwrap().qualified(), name);
    }

    #[test]
    fn error_message_names_input() {
        let err = resolve("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn address_serializes() {
        let addr = resolve("slack/post").unwrap();
        let json = serde_json::to_value(&addr).unwrap();
        assert_eq!(json["slug"], "slack");
        assert_eq!(json["tool"], "post");
    }
}
