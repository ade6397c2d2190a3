//! Expense record types and creation-time validation

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Store-assigned identifier of a record within one user's ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Fixed set of spending categories
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    #[default]
    Food,
    Rent,
    Travel,
    Others,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Food,
        Category::Rent,
        Category::Travel,
        Category::Others,
    ];

    /// Wire / display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "Food",
            Category::Rent => "Rent",
            Category::Travel => "Travel",
            Category::Others => "Others",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::UnknownCategory(s.to_string()))
    }
}

/// Why a draft was refused before reaching the store
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("amount is not a number: {0:?}")]
    InvalidAmount(String),
    #[error("unknown category: {0:?} (expected one of Food, Rent, Travel, Others)")]
    UnknownCategory(String),
}

/// A validated expense that has not been written yet
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseDraft {
    pub name: String,
    pub amount: f64,
    pub category: Category,
}

impl ExpenseDraft {
    /// Stamp the draft with its creation day, producing the stored field set
    pub fn into_fields(self, date: NaiveDate) -> ExpenseFields {
        ExpenseFields {
            name: self.name,
            amount: self.amount,
            category: self.category,
            date,
        }
    }
}

/// Document body as stored under `users/{uid}/expenses/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseFields {
    pub name: String,
    pub amount: f64,
    pub category: Category,
    /// YYYY-MM-DD
    pub date: NaiveDate,
}

/// One entry of a user's ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: RecordId,
    pub name: String,
    pub amount: f64,
    pub category: Category,
    pub date: NaiveDate,
}

impl ExpenseRecord {
    pub fn from_fields(id: RecordId, fields: ExpenseFields) -> Self {
        Self {
            id,
            name: fields.name,
            amount: fields.amount,
            category: fields.category,
            date: fields.date,
        }
    }

    pub fn fields(&self) -> ExpenseFields {
        ExpenseFields {
            name: self.name.clone(),
            amount: self.amount,
            category: self.category,
            date: self.date,
        }
    }
}

/// Check user input for a new expense.
///
/// Name and amount are required. The amount must parse as a finite number;
/// sign and magnitude are not checked. A missing or blank category means Food.
pub fn validate_for_creation(
    name: &str,
    amount: &str,
    category: Option<&str>,
) -> Result<ExpenseDraft, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingField("name"));
    }

    let amount_text = amount.trim();
    if amount_text.is_empty() {
        return Err(ValidationError::MissingField("amount"));
    }
    let amount = amount_text
        .parse::<f64>()
        .ok()
        .filter(|a| a.is_finite())
        .ok_or_else(|| ValidationError::InvalidAmount(amount_text.to_string()))?;

    let category = match category.map(str::trim) {
        None | Some("") => Category::default(),
        Some(c) => c.parse()?,
    };

    Ok(ExpenseDraft {
        name: name.to_string(),
        amount,
        category,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_draft_defaults_to_food() {
        let draft = validate_for_creation("Groceries", "250", None).unwrap();
        assert_eq!(draft.name, "Groceries");
        assert_eq!(draft.amount, 250.0);
        assert_eq!(draft.category, Category::Food);

        let blank = validate_for_creation("Groceries", "250", Some("  ")).unwrap();
        assert_eq!(blank.category, Category::Food);
    }

    #[test]
    fn test_missing_name_or_amount() {
        assert_eq!(
            validate_for_creation("", "10", None),
            Err(ValidationError::MissingField("name"))
        );
        assert_eq!(
            validate_for_creation("   ", "10", None),
            Err(ValidationError::MissingField("name"))
        );
        assert_eq!(
            validate_for_creation("Taxi", "", Some("Travel")),
            Err(ValidationError::MissingField("amount"))
        );
    }

    #[test]
    fn test_amount_must_be_numeric() {
        assert!(matches!(
            validate_for_creation("Taxi", "twelve", None),
            Err(ValidationError::InvalidAmount(_))
        ));
        assert!(matches!(
            validate_for_creation("Taxi", "NaN", None),
            Err(ValidationError::InvalidAmount(_))
        ));
        assert!(matches!(
            validate_for_creation("Taxi", "inf", None),
            Err(ValidationError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_negative_and_fractional_amounts_are_kept() {
        assert_eq!(validate_for_creation("Refund", "-40", None).unwrap().amount, -40.0);
        assert_eq!(validate_for_creation("Tea", " 12.5 ", None).unwrap().amount, 12.5);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("rent".parse::<Category>().unwrap(), Category::Rent);
        assert_eq!("TRAVEL".parse::<Category>().unwrap(), Category::Travel);
        assert!(matches!(
            validate_for_creation("Gift", "10", Some("Gifts")),
            Err(ValidationError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_fields_wire_shape() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let fields = validate_for_creation("Bus pass", "30", Some("Travel"))
            .unwrap()
            .into_fields(date);
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "Bus pass",
                "amount": 30.0,
                "category": "Travel",
                "date": "2026-10-19"
            })
        );
    }
}
