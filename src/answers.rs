//! Answer history: the append-only mutation log kept per field code.
//!
//! Precedence between request sources (an action effect beats the same
//! request's POST body) falls out of the log: handlers inspect the latest
//! mutation's source before deciding whether to append.

use serde::Serialize;
use serde_json::Value;

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationSource {
    /// Preloaded by an onLoad effect.
    Load,
    /// Written by an onAction effect (`set_answer`).
    Action,
    /// Raw submitted value.
    Post,
    /// Field default on GET.
    Default,
    /// HTML-escaped copy of a posted string.
    Sanitized,
    /// Output of the field's format pipeline.
    Processed,
    /// Cleared because the field's `dependent` predicate failed.
    Dependent,
}

#[derive(Debug, Clone, Serialize)]
pub struct Mutation {
    pub value: Value,
    pub source: MutationSource,
}

/// Append-only log for one field code. `current` is the value after the
/// latest mutation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnswerHistory {
    pub current: Value,
    pub mutations: Vec<Mutation>,
}

impl AnswerHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Value, source: MutationSource) {
        self.current = value.clone();
        self.mutations.push(Mutation { value, source });
    }

    pub fn latest_source(&self) -> Option<MutationSource> {
        self.mutations.last().map(|m| m.source)
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

// =============================================================================
// SANITIZATION
// =============================================================================

/// True when the string still contains a character the host template would
/// escape. Entity-escaped text triggers nothing, which is what makes
/// sanitization idempotent.
pub fn contains_unescaped(s: &str) -> bool {
    let bytes = s.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'<' | b'>' | b'"' | b'\'' => return true,
            b'&' => {
                // `&` is fine only as the start of a known entity.
                let rest = &s[i..];
                let is_entity = ["&amp;", "&lt;", "&gt;", "&quot;", "&#x27;"]
                    .iter()
                    .any(|e| rest.starts_with(e));
                if !is_entity {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Escape the characters the host template treats as markup.
pub fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(ch) = rest.chars().next() {
        if let Some(entity) = ["&amp;", "&lt;", "&gt;", "&quot;", "&#x27;"]
            .iter()
            .find(|e| rest.starts_with(**e))
        {
            out.push_str(entity);
            rest = &rest[entity.len()..];
            continue;
        }
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
        rest = &rest[ch.len_utf8()..];
    }
    out
}

// =============================================================================
// SAFE KEYS
// =============================================================================

/// Field codes and data properties become map keys and, in the host, object
/// properties. Reject anything that could collide with prototype machinery
/// or smuggle path separators.
pub fn is_safe_key(key: &str) -> bool {
    if key.is_empty() || key.len() > 128 {
        return false;
    }
    if matches!(key, "__proto__" | "constructor" | "prototype") {
        return false;
    }
    key.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn history_tracks_current() {
        let mut history = AnswerHistory::new();
        history.push(json!("a"), MutationSource::Post);
        history.push(json!("b"), MutationSource::Processed);
        assert_eq!(history.current, json!("b"));
        assert_eq!(history.mutations.len(), 2);
        assert_eq!(history.latest_source(), Some(MutationSource::Processed));
    }

    #[test]
    fn sanitize_escapes_markup() {
        assert_eq!(
            sanitize(" <b>A@B.com</b> "),
            " &lt;b&gt;A@B.com&lt;/b&gt; "
        );
        assert_eq!(sanitize(r#"a"b'c&d"#), "a&quot;b&#x27;c&amp;d");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize("<script>&'\"");
        let twice = sanitize(&once);
        assert_eq!(once, twice);
        assert!(!contains_unescaped(&once));
    }

    #[test]
    fn safe_key_rejects_prototype_vectors() {
        assert!(is_safe_key("businessType"));
        assert!(is_safe_key("item_1"));
        assert!(!is_safe_key("__proto__"));
        assert!(!is_safe_key("constructor"));
        assert!(!is_safe_key("a.b"));
        assert!(!is_safe_key(""));
    }
}
