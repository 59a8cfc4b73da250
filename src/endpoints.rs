//! The API endpoint URIs.

/// The route to register a new user.
pub const USERS: &str = "/api/users";
/// The route to verify a user's credentials.
pub const LOG_IN: &str = "/api/log_in";
/// The route to change the current user's password.
pub const PASSWORD: &str = "/api/password";
/// The route to delete the current user's account and data.
pub const USER: &str = "/api/user";
/// The route to upload statement CSV files.
pub const IMPORT: &str = "/api/import";
/// The route to list the current user's transactions.
pub const TRANSACTIONS: &str = "/api/transactions";
/// The route to apply a batch of transaction edits.
pub const TRANSACTION_EDITS: &str = "/api/transactions/edits";
/// The route to list and create categories.
pub const CATEGORIES: &str = "/api/categories";
/// The route for the spending dashboard data.
pub const SPENDING_DASHBOARD: &str = "/api/dashboard/spending";
/// The route for the income dashboard data.
pub const INCOME_DASHBOARD: &str = "/api/dashboard/income";
