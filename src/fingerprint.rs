//! Stable hashes used for change detection and the `room:` key prefix.
//!
//! Every hash here is SHA-256 over a length-prefixed field encoding so that
//! adjacent variable-length fields can never collide with each other
//! (`("ab", "c")` must hash differently from `("a", "bc")`).

use sha2::{Digest, Sha256};

const ABSENT_MARKER: &str = "\u{0}ABSENT\u{0}";

fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// 32-hex digest of `(username, globalName, avatar)`. Unset fields contribute
/// a distinct sentinel so `None` can never collide with an empty string.
pub fn profile_hash(username: &str, global_name: Option<&str>, avatar: Option<&str>) -> String {
    let global_name = global_name.unwrap_or(ABSENT_MARKER);
    let avatar = avatar.unwrap_or(ABSENT_MARKER);
    let full = hash_fields(&[username, global_name, avatar]);
    full[..32].to_string()
}

/// Stable digest of normalized markdown content.
pub fn message_content_hash(markdown: &str) -> String {
    let normalized = markdown.trim();
    hash_fields(&[normalized])
}

/// A category in the Discord sidebar ordering, for `sidebar_hash`.
pub struct SidebarCategory<'a> {
    pub name: &'a str,
    pub children: &'a [String],
}

/// Digest over category order, names, and ordered child ids.
pub fn sidebar_hash(categories: &[SidebarCategory<'_>]) -> String {
    let mut fields = Vec::with_capacity(categories.len() * 2);
    let mut owned = Vec::new();
    for category in categories {
        owned.push(category.name.to_string());
        owned.push(category.children.join(","));
    }
    for field in &owned {
        fields.push(field.as_str());
    }
    hash_fields(&fields)
}

/// Prefixes a Discord channel/thread snowflake so it cannot collide with a
/// message snowflake in the bidirectional id-mapping namespace (Discord
/// reuses a message's snowflake as a thread's id).
pub fn room_key(snowflake: &str) -> String {
    format!("room:{snowflake}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_hash_is_stable_across_calls() {
        let a = profile_hash("alice", Some("Alice"), Some("hash123"));
        let b = profile_hash("alice", Some("Alice"), Some("hash123"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn profile_hash_changes_when_any_field_changes() {
        let base = profile_hash("alice", Some("Alice"), Some("hash123"));
        assert_ne!(base, profile_hash("alice2", Some("Alice"), Some("hash123")));
        assert_ne!(base, profile_hash("alice", Some("Alicia"), Some("hash123")));
        assert_ne!(base, profile_hash("alice", Some("Alice"), Some("hash456")));
        assert_ne!(base, profile_hash("alice", None, Some("hash123")));
    }

    #[test]
    fn profile_hash_distinguishes_none_from_empty_string() {
        let with_none = profile_hash("alice", None, None);
        let with_empty = profile_hash("alice", Some(""), Some(""));
        assert_ne!(with_none, with_empty);
    }

    #[test]
    fn message_content_hash_ignores_surrounding_whitespace() {
        assert_eq!(
            message_content_hash("hello world"),
            message_content_hash("  hello world  ")
        );
    }

    #[test]
    fn message_content_hash_is_sensitive_to_content() {
        assert_ne!(
            message_content_hash("hello world"),
            message_content_hash("hello world!")
        );
    }

    #[test]
    fn sidebar_hash_is_order_sensitive() {
        let general = vec!["a".to_string(), "b".to_string()];
        let swapped = vec!["b".to_string(), "a".to_string()];
        let cat1 = vec![SidebarCategory {
            name: "General",
            children: &general,
        }];
        let cat2 = vec![SidebarCategory {
            name: "General",
            children: &swapped,
        }];
        assert_ne!(sidebar_hash(&cat1), sidebar_hash(&cat2));
    }

    #[test]
    fn room_key_prefixes_and_never_equals_raw_snowflake() {
        let snowflake = "123456789";
        let key = room_key(snowflake);
        assert_eq!(key, "room:123456789");
        assert_ne!(key, snowflake);
        assert_ne!(room_key("1"), room_key("2"));
    }

    #[test]
    fn hash_fields_does_not_collide_on_field_boundary_shift() {
        assert_ne!(hash_fields(&["ab", "c"]), hash_fields(&["a", "bc"]));
    }
}
