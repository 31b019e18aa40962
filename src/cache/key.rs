//! Cache Key Builder
//!
//! Produces stable, colon-separated cache keys from a prefix, an optional
//! user scope and a set of parameters.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Keys longer than this collapse to a hashed form.
pub const HASHED_KEY_THRESHOLD: usize = 200;

// == Cache Key ==
/// Builder for cache keys.
///
/// Parameters are sorted by name so the same inputs always give the same key.
///
/// ```ignore
/// let key = CacheKey::new("projects").user("u1").param("area", "a9").build();
/// assert_eq!(key, "projects:user:u1:area:a9");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CacheKey {
    prefix: String,
    user: Option<String>,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Key for per-user data of one type, matched by
    /// [`CacheStore::invalidate_user`](crate::cache::CacheStore::invalidate_user).
    pub fn user_data(data_type: &str, user_id: impl Into<String>) -> Self {
        Self::new(format!("user_data:{}", data_type)).user(user_id)
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user = Some(user_id.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Renders the key.
    pub fn build(&self) -> String {
        let mut parts = vec![self.prefix.clone()];
        if let Some(user) = &self.user {
            parts.push(format!("user:{}", user));
        }
        for (name, value) in &self.params {
            parts.push(format!("{}:{}", name, value));
        }

        let key = parts.join(":");
        if key.len() > HASHED_KEY_THRESHOLD {
            format!("{}:hash:{:x}", self.prefix, Sha256::digest(key.as_bytes()))
        } else {
            key
        }
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_only() {
        assert_eq!(CacheKey::new("dashboard").build(), "dashboard");
    }

    #[test]
    fn test_params_are_sorted() {
        let a = CacheKey::new("tasks")
            .user("u1")
            .param("status", "open")
            .param("area", 4)
            .build();
        let b = CacheKey::new("tasks")
            .user("u1")
            .param("area", 4)
            .param("status", "open")
            .build();
        assert_eq!(a, b);
        assert_eq!(a, "tasks:user:u1:area:4:status:open");
    }

    #[test]
    fn test_user_data_key() {
        assert_eq!(
            CacheKey::user_data("areas", "u7").build(),
            "user_data:areas:user:u7"
        );
    }

    #[test]
    fn test_long_keys_are_hashed() {
        let key = CacheKey::new("insights")
            .param("range", "x".repeat(300))
            .build();
        assert!(key.starts_with("insights:hash:"));
        // sha256 hex digest
        assert_eq!(key.len(), "insights:hash:".len() + 64);
    }
}
