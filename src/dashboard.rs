//! Aggregation of ledger data for the spending and income dashboards.
//!
//! Hidden transactions never count, and rows on the savings product are
//! excluded from spending so moving money into savings does not read as an
//! expense. Savings get their own series on the income dashboard instead.

use std::collections::HashMap;

use axum::{Json, extract::State};
use serde::Serialize;
use time::{Date, Month};

use crate::{
    AppState, Error,
    auth::Session,
    currency::format_currency,
    transaction::{Ledger, Transaction},
};

/// The product label of the savings account.
const SAVINGS_PRODUCT: &str = "Deposit";

/// The product label of the everyday account income arrives on.
const CURRENT_PRODUCT: &str = "Current";

/// A chart-ready series of month labels and values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySeries {
    /// Month labels in chronological order, e.g. "January 2024".
    pub labels: Vec<String>,

    /// The aggregated value for each month.
    pub values: Vec<f64>,
}

/// One category's share of spending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    /// The category name.
    pub category: String,

    /// The total spent in the category, as a positive number.
    pub total: f64,
}

/// The spending dashboard payload.
#[derive(Debug, Serialize)]
pub struct SpendingDashboard {
    /// The ledger's display currency.
    pub currency: String,

    /// Total spending over the whole ledger, as a positive number.
    pub total: f64,

    /// The total formatted for display, e.g. "125,000 Ft".
    pub total_formatted: String,

    /// Spending aggregated per month.
    pub monthly: MonthlySeries,

    /// Spending aggregated per category, largest first.
    pub by_category: Vec<CategoryTotal>,
}

/// The income dashboard payload.
#[derive(Debug, Serialize)]
pub struct IncomeDashboard {
    /// The ledger's display currency.
    pub currency: String,

    /// Total income over the whole ledger.
    pub total: f64,

    /// The total formatted for display.
    pub total_formatted: String,

    /// Income aggregated per month.
    pub monthly: MonthlySeries,

    /// Money moved into savings aggregated per month, as positive numbers.
    pub savings_monthly: MonthlySeries,
}

/// Handler for the spending dashboard.
pub async fn get_spending_dashboard(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<SpendingDashboard>, Error> {
    let username = session.require_user()?;

    let ledger = state
        .user_data()
        .load_ledger(&session, username)?
        .unwrap_or_else(|| Ledger::new(&state.config.fallback_currency));

    let spending: Vec<&Transaction> = ledger
        .transactions
        .iter()
        .filter(|transaction| {
            !transaction.hide && transaction.product != SAVINGS_PRODUCT && transaction.amount < 0.0
        })
        .collect();

    let total: f64 = spending.iter().map(|transaction| transaction.amount.abs()).sum();

    Ok(Json(SpendingDashboard {
        total,
        total_formatted: format_currency(total, &ledger.currency),
        monthly: monthly_series(&spending, true),
        by_category: spending_by_category(&spending),
        currency: ledger.currency,
    }))
}

/// Handler for the income dashboard.
pub async fn get_income_dashboard(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<IncomeDashboard>, Error> {
    let username = session.require_user()?;

    let ledger = state
        .user_data()
        .load_ledger(&session, username)?
        .unwrap_or_else(|| Ledger::new(&state.config.fallback_currency));

    let income: Vec<&Transaction> = ledger
        .transactions
        .iter()
        .filter(|transaction| {
            !transaction.hide && transaction.product == CURRENT_PRODUCT && transaction.amount > 0.0
        })
        .collect();

    let savings: Vec<&Transaction> = ledger
        .transactions
        .iter()
        .filter(|transaction| !transaction.hide && transaction.product == SAVINGS_PRODUCT)
        .collect();

    let total: f64 = income.iter().map(|transaction| transaction.amount).sum();

    Ok(Json(IncomeDashboard {
        total,
        total_formatted: format_currency(total, &ledger.currency),
        monthly: monthly_series(&income, false),
        savings_monthly: monthly_series(&savings, true),
        currency: ledger.currency,
    }))
}

/// Aggregate transaction amounts by calendar month into a chart series.
///
/// With `absolute` set the monthly sums are reported as positive numbers,
/// which is what the spending and savings charts show.
fn monthly_series(transactions: &[&Transaction], absolute: bool) -> MonthlySeries {
    let mut totals: HashMap<Date, f64> = HashMap::new();

    for transaction in transactions {
        let month = transaction.date.replace_day(1).unwrap();
        *totals.entry(month).or_insert(0.0) += transaction.amount;
    }

    let mut months: Vec<Date> = totals.keys().copied().collect();
    months.sort();

    let labels = months.iter().map(|month| month_label(*month)).collect();
    let values = months
        .iter()
        .map(|month| {
            let value = totals[month];
            if absolute { value.abs() } else { value }
        })
        .collect();

    MonthlySeries { labels, values }
}

/// Aggregate spending per category, largest total first.
fn spending_by_category(spending: &[&Transaction]) -> Vec<CategoryTotal> {
    let mut totals: HashMap<&str, f64> = HashMap::new();

    for transaction in spending {
        *totals.entry(transaction.category.as_str()).or_insert(0.0) +=
            transaction.amount.abs();
    }

    let mut by_category: Vec<CategoryTotal> = totals
        .into_iter()
        .map(|(category, total)| CategoryTotal {
            category: category.to_owned(),
            total,
        })
        .collect();

    by_category.sort_by(|a, b| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.category.cmp(&b.category))
    });

    by_category
}

/// Format a month as "January 2024".
fn month_label(month: Date) -> String {
    let name = match month.month() {
        Month::January => "January",
        Month::February => "February",
        Month::March => "March",
        Month::April => "April",
        Month::May => "May",
        Month::June => "June",
        Month::July => "July",
        Month::August => "August",
        Month::September => "September",
        Month::October => "October",
        Month::November => "November",
        Month::December => "December",
    };

    format!("{name} {}", month.year())
}
