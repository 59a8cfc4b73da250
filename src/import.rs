//! Statement upload and transaction listing endpoints.

use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
};
use serde::Serialize;

use crate::{
    AppState, Error,
    auth::Session,
    category::CategoryStore,
    statement::{DroppedRow, parse_statement},
    transaction::{Ledger, Transaction, merge},
};

/// The outcome of a statement upload.
#[derive(Debug, Serialize)]
pub struct ImportSummary {
    /// The currency detected in the uploaded statement.
    pub currency: String,

    /// How many rows were new; zero means the ledger was already up to date.
    pub new_rows: usize,

    /// The merged ledger's size after the upload.
    pub total_rows: usize,

    /// Rows dropped for an unusable balance, for the user-facing warning.
    pub dropped: Vec<DroppedRow>,

    /// Whether the merged ledger was saved. Always false for guests.
    pub persisted: bool,

    /// For guest sessions, the parsed and categorized transactions; their
    /// data is not persisted anywhere, so this is the only way they get it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Transaction>>,
}

/// Handler for uploading one or more statement CSV files.
///
/// Parses and categorizes every uploaded file, merges the result into the
/// stored ledger (first-seen rows win, so re-uploads are safe), saves, and
/// reports how many rows were new along with any dropped-row warnings.
/// Guests get the parsed transactions back instead of a save.
pub async fn import_statement(
    State(state): State<AppState>,
    session: Session,
    mut multipart: Multipart,
) -> Result<Json<ImportSummary>, Error> {
    let categories = match session.username() {
        Some(username) => state
            .user_data()
            .load_categories(&session, username)?
            .unwrap_or_default(),
        None => CategoryStore::new(),
    };

    let mut incoming = Vec::new();
    let mut dropped = Vec::new();
    let mut currency: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| Error::InvalidCsv(error.to_string()))?
    {
        let csv_data = read_csv_field(field).await?;

        let parsed = parse_statement(
            csv_data.as_bytes(),
            &categories,
            &state.config.hide_rules,
            &state.config.fallback_currency,
        )?;

        currency.get_or_insert(parsed.ledger.currency);
        incoming.extend(parsed.ledger.transactions);
        dropped.extend(parsed.dropped);
    }

    // An upload with no CSV file in it is a client mistake, not an empty
    // statement.
    let Some(currency) = currency else {
        return Err(Error::NotCsv);
    };

    match session.username() {
        Some(username) => {
            let mut existing = state
                .user_data()
                .load_ledger(&session, username)?
                .unwrap_or_else(|| Ledger::new(&currency));
            existing.currency = currency;

            let (merged, new_rows) = merge(existing, incoming);

            state.user_data().save_ledger(&session, username, &merged)?;

            tracing::info!(
                "imported {new_rows} new rows for \"{username}\" ({} total)",
                merged.len()
            );

            Ok(Json(ImportSummary {
                currency: merged.currency.clone(),
                new_rows,
                total_rows: merged.len(),
                dropped,
                persisted: true,
                transactions: None,
            }))
        }
        None => {
            let (merged, new_rows) = merge(Ledger::new(&currency), incoming);

            Ok(Json(ImportSummary {
                currency: merged.currency.clone(),
                new_rows,
                total_rows: merged.len(),
                dropped,
                persisted: false,
                transactions: Some(merged.transactions),
            }))
        }
    }
}

/// The current user's ledger.
#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    /// The ledger's display currency.
    pub currency: String,

    /// The transactions in insertion order.
    pub transactions: Vec<Transaction>,
}

/// Handler for listing the current user's transactions.
pub async fn get_transactions(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<TransactionsResponse>, Error> {
    let username = session.require_user()?;

    let ledger = state
        .user_data()
        .load_ledger(&session, username)?
        .unwrap_or_else(|| Ledger::new(&state.config.fallback_currency));

    Ok(Json(TransactionsResponse {
        currency: ledger.currency,
        transactions: ledger.transactions,
    }))
}

/// Read the content of an uploaded field, rejecting anything that is not a
/// CSV file.
async fn read_csv_field(field: Field<'_>) -> Result<String, Error> {
    let named_csv = field
        .file_name()
        .is_some_and(|name| name.to_lowercase().ends_with(".csv"));
    let typed_csv = field
        .content_type()
        .is_some_and(|content_type| content_type.contains("csv"));

    if !named_csv && !typed_csv {
        return Err(Error::NotCsv);
    }

    field
        .text()
        .await
        .map_err(|error| Error::InvalidCsv(error.to_string()))
}
