//! Request DTOs for the diagnostics API

use serde::Deserialize;

/// Query string of `DELETE /cache`
///
/// With `user` set, invalidates that user's entries (optionally one
/// `data_type`); otherwise invalidates keys matching `pattern`, or
/// everything when no pattern is given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateQuery {
    /// Regular expression matched against keys
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
}

impl InvalidateQuery {
    /// Returns an error message if the combination is invalid, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.user.is_some() && self.pattern.is_some() {
            return Some("Use either 'user' or 'pattern', not both".to_string());
        }
        if self.data_type.is_some() && self.user.is_none() {
            return Some("'data_type' requires 'user'".to_string());
        }
        if matches!(self.user.as_deref(), Some("")) {
            return Some("User cannot be empty".to_string());
        }
        None
    }
}
