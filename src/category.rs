//! The user-owned category store and the keyword categorizer.
//!
//! A category maps a name to a list of keywords. A transaction is assigned
//! the first category (in store insertion order) with a keyword exactly
//! matching its normalized description, so the store preserves insertion
//! order rather than sorting by name.

use std::fmt;

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

use crate::transaction::Transaction;

/// The reserved default category.
///
/// It always exists in a store and is never matched against: it is what a
/// transaction has when no rule matched.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// One category and its match keywords.
///
/// Keywords are stored trimmed and lowercased, and are unique within the
/// category.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    /// The category name, unique within the store.
    pub name: String,

    /// The keywords that map a transaction description to this category.
    pub keywords: Vec<String>,
}

/// An insertion-ordered collection of categories owned by one user.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryStore {
    categories: Vec<Category>,
}

impl CategoryStore {
    /// Create a store containing only the reserved [UNCATEGORIZED] entry.
    pub fn new() -> Self {
        Self {
            categories: vec![Category {
                name: UNCATEGORIZED.to_owned(),
                keywords: Vec::new(),
            }],
        }
    }

    /// Iterate the categories in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    /// The category names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.categories
            .iter()
            .map(|category| category.name.as_str())
            .collect()
    }

    /// Whether a category with `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.categories.iter().any(|category| category.name == name)
    }

    /// Add a new category with an empty keyword list, appended at the end so
    /// existing categories keep their precedence.
    ///
    /// Returns whether the store changed: adding an existing category or a
    /// name that is empty after trimming is a no-op.
    pub fn add_category(&mut self, name: &str) -> bool {
        let name = name.trim();

        if name.is_empty() || self.contains(name) {
            return false;
        }

        self.categories.push(Category {
            name: name.to_owned(),
            keywords: Vec::new(),
        });

        true
    }

    /// Add a keyword to an existing category.
    ///
    /// The keyword is trimmed and lowercased before storage, and duplicate
    /// detection is case-insensitive. Returns whether the store changed: an
    /// empty keyword, an unknown category, or an already-present keyword is a
    /// no-op.
    pub fn add_keyword(&mut self, category: &str, keyword: &str) -> bool {
        let keyword = keyword.trim().to_lowercase();

        if keyword.is_empty() {
            return false;
        }

        let Some(category) = self
            .categories
            .iter_mut()
            .find(|candidate| candidate.name == category)
        else {
            return false;
        };

        if category.keywords.contains(&keyword) {
            return false;
        }

        category.keywords.push(keyword);

        true
    }
}

impl Default for CategoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// The persisted format is a plain JSON object mapping category name to
// keyword list. Serde maps would lose or re-sort the insertion order that
// the categorizer's tie-break depends on, so (de)serialization is manual.
impl Serialize for CategoryStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.categories.len()))?;

        for category in &self.categories {
            map.serialize_entry(&category.name, &category.keywords)?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for CategoryStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StoreVisitor;

        impl<'de> Visitor<'de> for StoreVisitor {
            type Value = CategoryStore;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of category name to keyword list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut categories = Vec::with_capacity(access.size_hint().unwrap_or(0));

                while let Some((name, keywords)) = access.next_entry::<String, Vec<String>>()? {
                    categories.push(Category { name, keywords });
                }

                // Data written before the reserved entry existed may lack it.
                if !categories
                    .iter()
                    .any(|category| category.name == UNCATEGORIZED)
                {
                    categories.insert(
                        0,
                        Category {
                            name: UNCATEGORIZED.to_owned(),
                            keywords: Vec::new(),
                        },
                    );
                }

                Ok(CategoryStore { categories })
            }
        }

        deserializer.deserialize_map(StoreVisitor)
    }
}

/// Assign a category to every transaction from the keyword rules in `store`.
///
/// Every transaction is reset to [UNCATEGORIZED] and then assigned the first
/// category, in store insertion order, with a keyword exactly equal to the
/// trimmed, lowercased description. Substring matches do not count. The store
/// itself is never mutated.
pub fn categorize(mut transactions: Vec<Transaction>, store: &CategoryStore) -> Vec<Transaction> {
    for transaction in &mut transactions {
        transaction.category = UNCATEGORIZED.to_owned();

        let description = transaction.description.trim().to_lowercase();

        for category in store.iter() {
            if category.name == UNCATEGORIZED || category.keywords.is_empty() {
                continue;
            }

            if category
                .keywords
                .iter()
                .any(|keyword| keyword.trim().to_lowercase() == description)
            {
                transaction.category = category.name.clone();
                break;
            }
        }
    }

    transactions
}


#[cfg(test)]
mod categorize_tests {
    use time::macros::date;

    use super::{CategoryStore, UNCATEGORIZED, categorize};
    use crate::transaction::test_transactions::transaction;

    #[test]
    fn unmatched_transactions_stay_uncategorized() {
        let store = CategoryStore::new();
        let transactions = vec![transaction(date!(2024 - 01 - 05), "Spotify", -1490.0, 50000)];

        let categorized = categorize(transactions, &store);

        assert_eq!(categorized[0].category, UNCATEGORIZED);
    }

    #[test]
    fn matches_are_exact_not_substring() {
        let mut store = CategoryStore::new();
        store.add_category("Music");
        store.add_keyword("Music", "spotify");

        let transactions = vec![
            transaction(date!(2024 - 01 - 05), "Spotify", -1490.0, 50000),
            transaction(date!(2024 - 01 - 06), "Spotify Premium", -1990.0, 48010),
        ];

        let categorized = categorize(transactions, &store);

        assert_eq!(categorized[0].category, "Music");
        assert_eq!(categorized[1].category, UNCATEGORIZED);
    }

    #[test]
    fn description_matching_ignores_case_and_whitespace() {
        let mut store = CategoryStore::new();
        store.add_category("Coffee");
        store.add_keyword("Coffee", "coffee");

        let transactions = vec![transaction(date!(2024 - 01 - 05), "  COFFEE ", -900.0, 49100)];

        let categorized = categorize(transactions, &store);

        assert_eq!(categorized[0].category, "Coffee");
    }

    #[test]
    fn first_category_in_store_order_wins() {
        let mut store = CategoryStore::new();
        store.add_category("A");
        store.add_category("B");
        store.add_keyword("A", "coffee");
        store.add_keyword("B", "coffee");

        let transactions = vec![transaction(date!(2024 - 01 - 05), "Coffee ", -900.0, 49100)];

        let categorized = categorize(transactions, &store);

        assert_eq!(categorized[0].category, "A");
    }

    #[test]
    fn recategorizing_overwrites_stale_assignments() {
        let mut store = CategoryStore::new();
        store.add_category("Music");
        store.add_keyword("Music", "spotify");

        let mut transactions = vec![transaction(date!(2024 - 01 - 05), "Spotify", -1490.0, 50000)];
        transactions[0].category = "Removed".to_owned();

        let categorized = categorize(transactions, &store);

        assert_eq!(categorized[0].category, "Music");
    }
}
