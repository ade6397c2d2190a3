//! Spend-by-category totals derived from a ledger snapshot

use crate::expense::{Category, ExpenseRecord};

/// Category → summed amount, in order of first appearance.
///
/// Categories without records are absent rather than present with zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryTotals {
    entries: Vec<(Category, f64)>,
}

impl CategoryTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: Category) -> Option<f64> {
        self.entries
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, total)| *total)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Sum over every category
    pub fn grand_total(&self) -> f64 {
        self.entries.iter().map(|(_, total)| total).sum()
    }

    fn add(&mut self, category: Category, amount: f64) {
        match self.entries.iter_mut().find(|(c, _)| *c == category) {
            Some((_, total)) => *total += amount,
            None => self.entries.push((category, amount)),
        }
    }
}

/// Sum amounts per category, accumulating in input order.
pub fn aggregate(records: &[ExpenseRecord]) -> CategoryTotals {
    let mut totals = CategoryTotals::new();
    for r in records {
        totals.add(r.category, r.amount);
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expense::RecordId;
    use chrono::NaiveDate;

    fn rec(id: &str, category: Category, amount: f64) -> ExpenseRecord {
        ExpenseRecord {
            id: RecordId::new(id),
            name: format!("item {id}"),
            amount,
            category,
            date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        }
    }

    #[test]
    fn test_sums_per_category_and_omits_empty() {
        let records = vec![
            rec("a", Category::Food, 100.0),
            rec("b", Category::Food, 50.0),
            rec("c", Category::Travel, 30.0),
        ];
        let totals = aggregate(&records);

        assert_eq!(totals.len(), 2);
        assert_eq!(totals.get(Category::Food), Some(150.0));
        assert_eq!(totals.get(Category::Travel), Some(30.0));
        assert_eq!(totals.get(Category::Rent), None);
        assert_eq!(totals.get(Category::Others), None);
        assert_eq!(totals.grand_total(), 180.0);
    }

    #[test]
    fn test_empty_ledger_has_no_totals() {
        let totals = aggregate(&[]);
        assert!(totals.is_empty());
        assert_eq!(totals.grand_total(), 0.0);
    }

    #[test]
    fn test_order_follows_first_appearance() {
        let records = vec![
            rec("a", Category::Rent, 900.0),
            rec("b", Category::Food, 20.0),
            rec("c", Category::Rent, 100.0),
        ];
        let order: Vec<Category> = aggregate(&records).iter().map(|(c, _)| c).collect();
        assert_eq!(order, vec![Category::Rent, Category::Food]);
    }

    #[test]
    fn test_negative_amounts_reduce_total() {
        let records = vec![rec("a", Category::Others, 40.0), rec("b", Category::Others, -15.0)];
        assert_eq!(aggregate(&records).get(Category::Others), Some(25.0));
    }
}
