//! Application configuration threaded through the router state.

use crate::statement::{HideRule, default_hide_rules};

/// Configuration shared by all request handlers.
///
/// Created once at startup and passed by reference through
/// [crate::AppState]; nothing in the app reads configuration from globals.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// The administrative account's username.
    ///
    /// Its blobs live at fixed well-known storage paths and, per the policy
    /// set when the account is created, are not encrypted at rest.
    pub admin_username: String,

    /// The currency assumed when detection over a statement finds nothing.
    pub fallback_currency: String,

    /// The internal-transfer patterns that mark transactions as hidden.
    pub hide_rules: Vec<HideRule>,
}

impl AppConfig {
    /// Create a config with the default hide rules.
    pub fn new(admin_username: &str, fallback_currency: &str) -> Self {
        Self {
            admin_username: admin_username.to_owned(),
            fallback_currency: fallback_currency.to_owned(),
            hide_rules: default_hide_rules(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new("admin", "HUF")
    }
}
