//! Category management and batch transaction editing endpoints.
//!
//! Reassigning a transaction's category teaches the categorizer: the row's
//! description is added as a keyword to the chosen category, so future
//! uploads of the same merchant categorize themselves. A whole edit batch
//! causes at most one category-store write and one ledger write.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::Date;

use crate::{AppState, Error, auth::Session, categorize, category::CategoryStore};

/// Handler returning the current user's category store as a JSON object.
pub async fn get_categories(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<CategoryStore>, Error> {
    let username = session.require_user()?;

    let categories = state
        .user_data()
        .load_categories(&session, username)?
        .unwrap_or_default();

    Ok(Json(categories))
}

/// Form data for creating a category.
#[derive(Debug, Deserialize)]
pub struct NewCategoryForm {
    /// The new category's name.
    pub name: String,
}

/// Handler for creating a new, empty category.
pub async fn create_category(
    State(state): State<AppState>,
    session: Session,
    Json(form): Json<NewCategoryForm>,
) -> Result<Json<serde_json::Value>, Error> {
    let username = session.require_user()?;

    if form.name.trim().is_empty() {
        return Err(Error::EmptyCategoryName);
    }

    let mut categories = state
        .user_data()
        .load_categories(&session, username)?
        .unwrap_or_default();

    let changed = categories.add_category(&form.name);

    if changed {
        state
            .user_data()
            .save_categories(&session, username, &categories)?;
    }

    Ok(Json(json!({ "changed": changed })))
}

/// One edit to an existing transaction, addressed by its natural key.
#[derive(Debug, Deserialize)]
pub struct TransactionEdit {
    /// The transaction's date.
    pub date: Date,

    /// The transaction's description, as stored.
    pub description: String,

    /// The transaction's reported balance.
    pub balance: i64,

    /// Reassign the transaction to this category and learn its description
    /// as a keyword for it.
    #[serde(default)]
    pub category: Option<String>,

    /// Set or clear the hide flag.
    #[serde(default)]
    pub hide: Option<bool>,

    /// Correct the amount.
    #[serde(default)]
    pub amount: Option<f64>,
}

/// A batch of transaction edits applied together.
#[derive(Debug, Deserialize)]
pub struct EditBatchForm {
    /// The edits to apply.
    pub edits: Vec<TransactionEdit>,
}

/// The outcome of an edit batch.
#[derive(Debug, Serialize)]
pub struct EditBatchSummary {
    /// How many edits matched a ledger row and were applied.
    pub applied: usize,

    /// How many new keywords the batch taught the categorizer.
    pub keywords_added: usize,

    /// How many edits referred to no existing ledger row.
    pub missing: usize,
}

/// Handler applying a batch of category/hide/amount edits to the ledger.
///
/// Category reassignments add the row's description as a keyword to the
/// target category, then the whole ledger is re-categorized so the keyword
/// rules stay the single source of truth. The category store and the ledger
/// are each written at most once, after all edits are applied.
pub async fn apply_transaction_edits(
    State(state): State<AppState>,
    session: Session,
    Json(form): Json<EditBatchForm>,
) -> Result<Json<EditBatchSummary>, Error> {
    let username = session.require_user()?;

    let Some(mut ledger) = state.user_data().load_ledger(&session, username)? else {
        return Err(Error::NotFound);
    };

    let mut categories = state
        .user_data()
        .load_categories(&session, username)?
        .unwrap_or_default();

    // Validate up front so a bad edit cannot leave the batch half-applied.
    for edit in &form.edits {
        if let Some(category) = &edit.category {
            if !categories.contains(category) {
                return Err(Error::UnknownCategory(category.clone()));
            }
        }
    }

    let mut applied = 0;
    let mut keywords_added = 0;
    let mut missing = 0;

    for edit in &form.edits {
        let Some(row) = ledger.transactions.iter_mut().find(|transaction| {
            transaction.date == edit.date
                && transaction.description == edit.description
                && transaction.balance == edit.balance
        }) else {
            missing += 1;
            continue;
        };

        if let Some(category) = &edit.category {
            if *category != row.category {
                if categories.add_keyword(category, &row.description) {
                    keywords_added += 1;
                }
                row.category = category.clone();
            }
        }

        if let Some(hide) = edit.hide {
            row.hide = hide;
        }

        if let Some(amount) = edit.amount {
            row.amount = amount;
        }

        applied += 1;
    }

    // Re-categorize so the stored keyword rules and the ledger agree.
    ledger.transactions = categorize(ledger.transactions, &categories);

    if keywords_added > 0 {
        state
            .user_data()
            .save_categories(&session, username, &categories)?;
    }

    state.user_data().save_ledger(&session, username, &ledger)?;

    tracing::info!(
        "applied {applied} edits ({keywords_added} new keywords, {missing} unmatched) \
         for \"{username}\""
    );

    Ok(Json(EditBatchSummary {
        applied,
        keywords_added,
        missing,
    }))
}
