//! Parses bank-statement CSV exports into a normalized ledger.
//!
//! The parser understands the account-export format used by Revolut-style
//! statements: a header row with at least the start date, description,
//! amount, running balance, product and type columns, and optionally an
//! explicit currency column. Interest rows are dropped outright, known
//! internal-transfer noise is flagged as hidden, and rows with an unusable
//! balance are dropped individually with a warning rather than failing the
//! whole upload.

use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use time::{Date, PrimitiveDateTime, format_description::BorrowedFormatItem, macros::format_description};

use crate::{
    Error,
    category::{CategoryStore, UNCATEGORIZED, categorize},
    currency::{decimals, detect_currency},
    transaction::{Ledger, Transaction},
};

/// The statement type label for interest payments.
///
/// Interest rows are noise for spending analysis and are removed entirely at
/// parse time, not merely hidden.
const INTEREST_TYPE: &str = "INTEREST";

const DATETIME_FORMAT: &[BorrowedFormatItem] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const DATE_FORMAT: &[BorrowedFormatItem] = format_description!("[year]-[month]-[day]");

/// How a [HideRule] pattern is compared against a description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The description must equal the pattern exactly, case-sensitively.
    Equals,

    /// The description must contain the pattern, ignoring case.
    ContainsIgnoreCase,
}

/// A rule that marks matching transactions as hidden.
///
/// Hidden transactions stay in the ledger but are excluded from spending and
/// income aggregates. The pattern may contain a `{currency}` placeholder
/// which is replaced with the statement's detected currency code before
/// matching.
#[derive(Debug, Clone, PartialEq)]
pub struct HideRule {
    /// When set, the rule only applies to transactions of this product.
    pub product: Option<String>,

    /// The description pattern, with an optional `{currency}` placeholder.
    pub pattern: String,

    /// How the pattern is compared against the description.
    pub match_kind: MatchKind,
}

impl HideRule {
    fn matches(&self, product: &str, description: &str, currency: &str) -> bool {
        if let Some(required_product) = &self.product {
            if required_product != product {
                return false;
            }
        }

        let pattern = self.pattern.replace("{currency}", currency);

        match self.match_kind {
            MatchKind::Equals => description == pattern,
            MatchKind::ContainsIgnoreCase => description
                .to_lowercase()
                .contains(&pattern.to_lowercase()),
        }
    }
}

/// The built-in internal-transfer noise rules.
///
/// These reproduce the transfer wordings of the supported statement format:
/// same-currency transfers to own accounts, transfers between app users, and
/// moves between the current and savings account of the same owner.
pub fn default_hide_rules() -> Vec<HideRule> {
    vec![
        HideRule {
            product: None,
            pattern: "To {currency}".to_owned(),
            match_kind: MatchKind::ContainsIgnoreCase,
        },
        HideRule {
            product: None,
            pattern: "Transfer from Revolut user".to_owned(),
            match_kind: MatchKind::Equals,
        },
        HideRule {
            product: Some("Current".to_owned()),
            pattern: "From Savings Account".to_owned(),
            match_kind: MatchKind::Equals,
        },
        HideRule {
            product: Some("Current".to_owned()),
            pattern: "To Savings Account".to_owned(),
            match_kind: MatchKind::Equals,
        },
    ]
}

/// A row excluded from a parse because its balance was missing or not
/// numeric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedRow {
    /// The row's description, for the user-facing warning.
    pub description: String,

    /// The row's amount, for the user-facing warning.
    pub amount: f64,
}

/// The result of parsing a statement: the categorized ledger plus the rows
/// that were dropped for an unusable balance.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    /// The parsed, categorized transactions and the detected currency.
    pub ledger: Ledger,

    /// Rows excluded because their balance could not be read. Surfaced to
    /// the user as a warning; never fails the upload.
    pub dropped: Vec<DroppedRow>,
}

/// Parse a statement CSV export into a categorized ledger.
///
/// `categories` supplies the keyword rules for categorization, `hide_rules`
/// the internal-transfer noise patterns (see [default_hide_rules]), and
/// `fallback_currency` the currency assumed when detection fails.
///
/// # Errors
///
/// - [Error::InvalidCsv] if the data is not well-formed CSV.
/// - [Error::MissingColumn] if a required column is absent.
/// - [Error::InvalidDate] or [Error::InvalidAmount] if any row has an
///   unparsable date or amount; these fail the whole upload so that a
///   half-read statement is never merged.
pub fn parse_statement(
    bytes: &[u8],
    categories: &CategoryStore,
    hide_rules: &[HideRule],
    fallback_currency: &str,
) -> Result<ParsedStatement, Error> {
    let mut reader = ReaderBuilder::new().from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|error| Error::InvalidCsv(error.to_string()))?
        .clone();

    let records = reader
        .records()
        .collect::<Result<Vec<StringRecord>, _>>()
        .map_err(|error| Error::InvalidCsv(error.to_string()))?;

    // The currency has to be known before the Currency column is discarded:
    // it decides the rounding policy below.
    let currency = detect_currency(&headers, &records, fallback_currency);
    let decimal_places = decimals(&currency);

    let date_column = find_column(&headers, &["Started Date", "Date"])?;
    let description_column = find_column(&headers, &["Description"])?;
    let amount_column = find_column(&headers, &["Amount"])?;
    let balance_column = find_column(&headers, &["Balance"])?;
    let product_column = find_column(&headers, &["Product"])?;
    let type_column = find_column(&headers, &["Type"])?;

    let mut transactions = Vec::with_capacity(records.len());
    let mut dropped = Vec::new();

    for record in &records {
        let kind = record.get(type_column).unwrap_or_default().trim();

        if kind == INTEREST_TYPE {
            continue;
        }

        let date = parse_date(record.get(date_column).unwrap_or_default().trim())?;

        let raw_amount = record.get(amount_column).unwrap_or_default().trim();
        let amount = raw_amount
            .parse::<f64>()
            .map_err(|_| Error::InvalidAmount(raw_amount.to_owned()))?;
        let amount = round_to(amount, decimal_places);

        let description = record.get(description_column).unwrap_or_default().trim();
        let product = record.get(product_column).unwrap_or_default().trim();

        // A row with an unreadable balance cannot be deduplicated, so it is
        // dropped on its own rather than failing the rest of the statement.
        let raw_balance = record.get(balance_column).unwrap_or_default().trim();
        let balance = match raw_balance.parse::<f64>() {
            Ok(balance) => balance.round() as i64,
            Err(_) => {
                tracing::warn!(
                    "dropping statement row with invalid balance \"{raw_balance}\": \
                     {description} {amount}"
                );
                dropped.push(DroppedRow {
                    description: description.to_owned(),
                    amount,
                });
                continue;
            }
        };

        let hide = hide_rules
            .iter()
            .any(|rule| rule.matches(product, description, &currency));

        transactions.push(Transaction {
            kind: kind.to_owned(),
            product: product.to_owned(),
            date,
            description: description.to_owned(),
            amount,
            balance,
            hide,
            category: UNCATEGORIZED.to_owned(),
        });
    }

    let transactions = categorize(transactions, categories);

    Ok(ParsedStatement {
        ledger: Ledger {
            transactions,
            currency,
        },
        dropped,
    })
}

/// Find the index of the first header matching any of `names`.
fn find_column(headers: &StringRecord, names: &[&str]) -> Result<usize, Error> {
    headers
        .iter()
        .position(|header| names.contains(&header.trim()))
        .ok_or_else(|| Error::MissingColumn(names[0].to_owned()))
}

/// Parse a statement start date, accepting a datetime or a bare date. Only
/// the calendar date is kept.
fn parse_date(raw: &str) -> Result<Date, Error> {
    PrimitiveDateTime::parse(raw, &DATETIME_FORMAT)
        .map(|datetime| datetime.date())
        .or_else(|_| Date::parse(raw, &DATE_FORMAT))
        .map_err(|error| Error::InvalidDate(error.to_string(), raw.to_owned()))
}

fn round_to(amount: f64, decimal_places: u32) -> f64 {
    if decimal_places == 0 {
        amount.round()
    } else {
        let scale = 10f64.powi(decimal_places as i32);
        (amount * scale).round() / scale
    }
}

#[cfg(test)]
mod parse_statement_tests {
    use time::macros::date;

    use super::{DroppedRow, default_hide_rules, parse_statement};
    use crate::{Error, category::CategoryStore};

    const HEADER: &str =
        "Type,Product,Started Date,Completed Date,Description,Amount,Fee,Currency,State,Balance";

    fn parse(csv: &str) -> Result<super::ParsedStatement, Error> {
        parse_statement(
            csv.as_bytes(),
            &CategoryStore::new(),
            &default_hide_rules(),
            "HUF",
        )
    }

    #[test]
    fn parses_a_card_payment_and_drops_interest() {
        let csv = format!(
            "{HEADER}\n\
             CARD_PAYMENT,Current,2024-01-05 14:33:20,2024-01-05 14:35:00,Spotify,-1490,0,HUF,COMPLETED,50000\n\
             INTEREST,Savings,2024-01-05 00:00:00,2024-01-05 00:00:00,Interest,12,0,HUF,COMPLETED,50012"
        );

        let parsed = parse(&csv).unwrap();

        assert_eq!(parsed.ledger.len(), 1);
        assert_eq!(parsed.ledger.currency, "HUF");
        assert!(parsed.dropped.is_empty());

        let row = &parsed.ledger.transactions[0];
        assert_eq!(row.date, date!(2024 - 01 - 05));
        assert_eq!(row.description, "Spotify");
        assert_eq!(row.amount, -1490.0);
        assert_eq!(row.balance, 50000);
        assert_eq!(row.category, "Uncategorized");
        assert!(!row.hide);
    }

    #[test]
    fn missing_required_column_fails() {
        let csv = "Type,Product,Started Date,Description,Amount,Fee\n\
                   CARD_PAYMENT,Current,2024-01-05 14:33:20,Spotify,-1490,0";

        let result = parse(csv);

        assert_eq!(result, Err(Error::MissingColumn("Balance".to_owned())));
    }

    #[test]
    fn bad_date_fails_the_whole_upload() {
        let csv = format!(
            "{HEADER}\n\
             CARD_PAYMENT,Current,05/01/2024,,Spotify,-1490,0,HUF,COMPLETED,50000"
        );

        let result = parse(&csv);

        assert!(matches!(result, Err(Error::InvalidDate(_, _))));
    }

    #[test]
    fn bad_amount_fails_the_whole_upload() {
        let csv = format!(
            "{HEADER}\n\
             CARD_PAYMENT,Current,2024-01-05 14:33:20,,Spotify,oops,0,HUF,COMPLETED,50000"
        );

        let result = parse(&csv);

        assert_eq!(result, Err(Error::InvalidAmount("oops".to_owned())));
    }

    #[test]
    fn rows_with_bad_balance_are_dropped_with_a_warning() {
        let mut csv = HEADER.to_owned();
        for day in 1..=10 {
            csv.push_str(&format!(
                "\nCARD_PAYMENT,Current,2024-01-{day:02} 09:00:00,,Groceries,-1000,0,HUF,COMPLETED,{}",
                50000 - day * 1000
            ));
        }
        csv.push_str("\nCARD_PAYMENT,Current,2024-01-11 09:00:00,,Cinema,-3200,0,HUF,COMPLETED,");
        csv.push_str(
            "\nCARD_PAYMENT,Current,2024-01-12 09:00:00,,Petrol,-9000,0,HUF,COMPLETED,n/a",
        );

        let parsed = parse(&csv).unwrap();

        assert_eq!(parsed.ledger.len(), 10);
        assert_eq!(
            parsed.dropped,
            vec![
                DroppedRow {
                    description: "Cinema".to_owned(),
                    amount: -3200.0,
                },
                DroppedRow {
                    description: "Petrol".to_owned(),
                    amount: -9000.0,
                },
            ]
        );
    }

    #[test]
    fn zero_decimal_currency_rounds_amounts_to_whole_numbers() {
        let csv = format!(
            "{HEADER}\n\
             CARD_PAYMENT,Current,2024-01-05 14:33:20,,Spotify,-1489.6,0,HUF,COMPLETED,50000.4"
        );

        let parsed = parse(&csv).unwrap();

        assert_eq!(parsed.ledger.transactions[0].amount, -1490.0);
        assert_eq!(parsed.ledger.transactions[0].balance, 50000);
    }

    #[test]
    fn two_decimal_currency_rounds_to_cents() {
        let csv = format!(
            "{HEADER}\n\
             CARD_PAYMENT,Current,2024-01-05 14:33:20,,Coffee,-3.456,0,EUR,COMPLETED,120.0"
        );

        let parsed = parse(&csv).unwrap();

        assert_eq!(parsed.ledger.currency, "EUR");
        assert_eq!(parsed.ledger.transactions[0].amount, -3.46);
    }

    #[test]
    fn bare_dates_are_accepted() {
        let csv = format!(
            "{HEADER}\n\
             CARD_PAYMENT,Current,2024-01-05,,Spotify,-1490,0,HUF,COMPLETED,50000"
        );

        let parsed = parse(&csv).unwrap();

        assert_eq!(parsed.ledger.transactions[0].date, date!(2024 - 01 - 05));
    }

    #[test]
    fn categorizes_against_the_supplied_store() {
        let mut store = CategoryStore::new();
        store.add_category("Music");
        store.add_keyword("Music", "spotify");

        let csv = format!(
            "{HEADER}\n\
             CARD_PAYMENT,Current,2024-01-05 14:33:20,,Spotify,-1490,0,HUF,COMPLETED,50000"
        );

        let parsed = parse_statement(
            csv.as_bytes(),
            &store,
            &default_hide_rules(),
            "HUF",
        )
        .unwrap();

        assert_eq!(parsed.ledger.transactions[0].category, "Music");
    }
}
