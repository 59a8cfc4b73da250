//! Currency detection and formatting for statement data.
//!
//! Statements do not always carry an explicit currency column, so detection
//! falls back from column values, to column names, to currency symbols found
//! in monetary columns, to a configured default.

use std::collections::HashMap;

use csv::StringRecord;

/// Display symbols for the currencies the dashboard knows about.
///
/// Order matters: symbol scans return the first match, so currencies whose
/// symbols are substrings of others (e.g. `$` vs `C$`) resolve to the earlier
/// entry.
const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("USD", "$"),
    ("EUR", "€"),
    ("GBP", "£"),
    ("JPY", "¥"),
    ("CNY", "¥"),
    ("CAD", "C$"),
    ("AUD", "A$"),
    ("CHF", "CHF"),
    ("HUF", "Ft"),
    ("PLN", "zł"),
    ("CZK", "Kč"),
    ("SEK", "kr"),
    ("NOK", "kr"),
    ("DKK", "kr"),
    ("RON", "lei"),
    ("BGN", "лв"),
    ("HRK", "kn"),
    ("RUB", "₽"),
    ("TRY", "₺"),
    ("INR", "₹"),
    ("KRW", "₩"),
    ("SGD", "S$"),
    ("HKD", "HK$"),
    ("MXN", "MX$"),
    ("BRL", "R$"),
    ("ZAR", "R"),
    ("NZD", "NZ$"),
    ("THB", "฿"),
    ("MYR", "RM"),
    ("IDR", "Rp"),
    ("PHP", "₱"),
    ("VND", "₫"),
];

/// Currencies without minor units. Amounts in these are whole numbers.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &["JPY", "KRW", "VND", "IDR", "HUF", "CLP", "ISK"];

/// Currencies whose symbol is written after the amount, e.g. "1,500 Ft".
const SUFFIX_SYMBOL_CURRENCIES: &[&str] = &["HUF", "PLN", "CZK", "SEK", "NOK", "DKK", "RON"];

/// The number of decimal places amounts in `currency` are rounded and
/// displayed with.
pub fn decimals(currency: &str) -> u32 {
    if ZERO_DECIMAL_CURRENCIES.contains(&currency) {
        0
    } else {
        2
    }
}

/// The display symbol for `currency`, or the code itself for unknown ones.
pub fn symbol(currency: &str) -> &str {
    CURRENCY_SYMBOLS
        .iter()
        .find(|(code, _)| *code == currency)
        .map(|(_, symbol)| *symbol)
        .unwrap_or(currency)
}

/// Detects the currency of a parsed statement.
///
/// Tries, in order: the statistical mode of a non-empty `Currency` column,
/// any column whose name mentions "currency", currency symbols appearing in
/// monetary-looking columns, and finally the `fallback` code.
pub fn detect_currency(headers: &StringRecord, records: &[StringRecord], fallback: &str) -> String {
    if let Some(index) = headers.iter().position(|header| header == "Currency") {
        if let Some(code) = column_mode(records, index) {
            return code;
        }
    }

    // No explicit currency column; check columns that mention a currency in
    // their name for a known code.
    for (index, header) in headers.iter().enumerate() {
        if !header.to_lowercase().contains("currency") {
            continue;
        }

        for record in records {
            let value = record.get(index).unwrap_or_default().to_uppercase();

            if let Some((code, _)) = CURRENCY_SYMBOLS
                .iter()
                .find(|(code, _)| value.contains(code))
            {
                return (*code).to_owned();
            }
        }
    }

    // Last resort before the fallback: look for currency symbols in columns
    // that look monetary.
    const MONETARY_HINTS: &[&str] = &["amount", "price", "value", "cost", "total"];

    for (index, header) in headers.iter().enumerate() {
        let header = header.to_lowercase();

        if !MONETARY_HINTS.iter().any(|hint| header.contains(hint)) {
            continue;
        }

        for record in records {
            let value = record.get(index).unwrap_or_default();

            if let Some((code, _)) = CURRENCY_SYMBOLS
                .iter()
                .find(|(_, symbol)| value.contains(symbol))
            {
                return (*code).to_owned();
            }
        }
    }

    fallback.to_owned()
}

/// The most common non-empty value in the column, uppercased.
///
/// Ties resolve to the lexicographically smallest code so repeated detection
/// over the same data is stable.
fn column_mode(records: &[StringRecord], index: usize) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for record in records {
        let value = record.get(index).unwrap_or_default().trim().to_uppercase();

        if !value.is_empty() {
            *counts.entry(value).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(code_a, count_a), (code_b, count_b)| {
            count_a.cmp(count_b).then(code_b.cmp(code_a))
        })
        .map(|(code, _)| code)
}

/// Formats `amount` with the symbol and decimal conventions of `currency`.
pub fn format_currency(amount: f64, currency: &str) -> String {
    format_amount(amount, currency, false)
}

/// Formats `amount` compactly, e.g. "1.5k Ft" instead of "1,500 Ft".
///
/// Amounts under a thousand fall back to the full format.
pub fn format_currency_compact(amount: f64, currency: &str) -> String {
    format_amount(amount, currency, true)
}

fn format_amount(amount: f64, currency: &str, compact: bool) -> String {
    let decimals = decimals(currency);

    let formatted = if compact && amount.abs() >= 1000.0 {
        let (compact_amount, suffix) = if amount.abs() >= 1_000_000.0 {
            (amount / 1_000_000.0, "M")
        } else {
            (amount / 1000.0, "k")
        };

        if decimals == 0 {
            format!("{compact_amount:.0}{suffix}")
        } else {
            format!("{compact_amount:.1}{suffix}")
        }
    } else {
        group_thousands(&format!("{:.*}", decimals as usize, amount))
    };

    let symbol = symbol(currency);

    if SUFFIX_SYMBOL_CURRENCIES.contains(&currency) {
        format!("{formatted} {symbol}")
    } else {
        format!("{symbol}{formatted}")
    }
}

/// Inserts comma separators into the integer part of a formatted number.
fn group_thousands(number: &str) -> String {
    let (number, sign) = match number.strip_prefix('-') {
        Some(rest) => (rest, "-"),
        None => (number, ""),
    };

    let (integer, fraction) = match number.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (number, None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);

    for (count, digit) in integer.chars().enumerate() {
        if count > 0 && (integer.len() - count) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}
