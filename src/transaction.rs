//! The transaction model, the per-user ledger, and the statement merge.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::Error;

/// One statement line item.
///
/// Amounts are signed: negative is money out, positive is money in. The
/// `balance` field is the account balance reported by the bank at the time of
/// the transaction, which makes `(date, description, balance)` a natural key:
/// two rows that agree on all three are the same real-world event, even
/// across overlapping statement uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction type label from the source statement, e.g.
    /// "CARD_PAYMENT".
    #[serde(rename = "Type")]
    pub kind: String,

    /// The account or product the transaction belongs to, e.g. "Current" or
    /// "Deposit".
    #[serde(rename = "Product")]
    pub product: String,

    /// The calendar date the transaction started on.
    #[serde(rename = "Date")]
    pub date: Date,

    /// The free-text description from the statement.
    #[serde(rename = "Description")]
    pub description: String,

    /// The signed amount, rounded to the currency's decimal places.
    #[serde(rename = "Amount")]
    pub amount: f64,

    /// The running account balance reported alongside the transaction.
    #[serde(rename = "Balance")]
    pub balance: i64,

    /// Whether the transaction is excluded from spending and income
    /// aggregates. Hidden rows stay in the ledger.
    #[serde(rename = "Hide")]
    pub hide: bool,

    /// The assigned category name, `"Uncategorized"` by default.
    #[serde(rename = "Category")]
    pub category: String,
}

impl Transaction {
    /// The deduplication key used by [merge].
    fn dedup_key(&self) -> (Date, String, i64) {
        (self.date, self.description.clone(), self.balance)
    }
}

/// The ordered collection of one user's transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    /// The transactions in insertion order.
    pub transactions: Vec<Transaction>,

    /// The ISO currency code the amounts are denominated in. Detected at
    /// upload time; used for display formatting only.
    pub currency: String,
}

impl Ledger {
    /// Create an empty ledger denominated in `currency`.
    pub fn new(currency: &str) -> Self {
        Self {
            transactions: Vec::new(),
            currency: currency.to_owned(),
        }
    }

    /// The number of transactions in the ledger.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the ledger has no transactions.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Serialize the ledger to CSV with a header row.
    ///
    /// # Errors
    ///
    /// Returns [Error::Serialization] if a row cannot be written.
    pub fn to_csv(&self) -> Result<String, Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        for transaction in &self.transactions {
            writer
                .serialize(transaction)
                .map_err(|error| Error::Serialization(error.to_string()))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|error| Error::Serialization(error.to_string()))?;

        String::from_utf8(bytes).map_err(|error| Error::Serialization(error.to_string()))
    }

    /// Deserialize a ledger previously written by [Ledger::to_csv].
    ///
    /// The currency is not part of the persisted table, so the caller passes
    /// the currency the ledger should be denominated in.
    ///
    /// # Errors
    ///
    /// Returns [Error::Serialization] if the CSV does not match the ledger
    /// schema.
    pub fn from_csv(text: &str, currency: &str) -> Result<Self, Error> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());

        let transactions = reader
            .deserialize()
            .collect::<Result<Vec<Transaction>, _>>()
            .map_err(|error| Error::Serialization(error.to_string()))?;

        Ok(Self {
            transactions,
            currency: currency.to_owned(),
        })
    }
}

/// Merge newly parsed transactions into an existing ledger.
///
/// Returns the merged ledger and the number of rows that were actually new.
/// Duplicates are detected on `(date, description, balance)` and the
/// first-seen row wins, so re-uploading an overlapping statement never
/// overwrites category or hide edits already made to existing rows. Merging
/// the same transactions twice is a no-op the second time.
pub fn merge(existing: Ledger, incoming: Vec<Transaction>) -> (Ledger, usize) {
    let existing_count = existing.len();
    let currency = existing.currency;

    let mut seen = HashSet::new();
    let mut transactions = Vec::with_capacity(existing_count + incoming.len());

    for transaction in existing.transactions.into_iter().chain(incoming) {
        if seen.insert(transaction.dedup_key()) {
            transactions.push(transaction);
        }
    }

    let new_rows = transactions.len() - existing_count;

    (
        Ledger {
            transactions,
            currency,
        },
        new_rows,
    )
}
