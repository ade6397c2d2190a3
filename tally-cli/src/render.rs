//! Plain-text rendering of a ledger view.

use std::fmt::Write;
use tally_core::{CategoryTotals, ExpenseRecord};

const BAR_WIDTH: f64 = 30.0;

pub fn ledger_table(records: &[ExpenseRecord], currency: &str) -> String {
    if records.is_empty() {
        return "No expenses added yet.\n".to_string();
    }
    let name_w = records
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<10}  {:<name_w$}  {:<8}  {:>12}  {}",
        "Date", "Name", "Category", "Amount", "Id"
    );
    for r in records {
        let _ = writeln!(
            out,
            "{:<10}  {:<name_w$}  {:<8}  {:>12}  {}",
            r.date.format("%Y-%m-%d").to_string(),
            r.name,
            r.category.as_str(),
            money(r.amount, currency),
            r.id
        );
    }
    out
}

/// Per-category totals with a share bar, biggest first
pub fn totals_chart(totals: &CategoryTotals, currency: &str) -> String {
    if totals.is_empty() {
        return "Nothing to chart.\n".to_string();
    }
    let grand = totals.grand_total();
    let mut rows: Vec<_> = totals.iter().collect();
    rows.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut out = String::new();
    for (category, amount) in rows {
        let share = if grand > 0.0 { amount / grand } else { 0.0 };
        let bar = "#".repeat((share.clamp(0.0, 1.0) * BAR_WIDTH).round() as usize);
        let _ = writeln!(
            out,
            "{:<8}  {:>12}  {:>5.1}%  {}",
            category.as_str(),
            money(amount, currency),
            share * 100.0,
            bar
        );
    }
    let _ = writeln!(out, "{:<8}  {:>12}", "Total", money(grand, currency));
    out
}

fn money(amount: f64, currency: &str) -> String {
    format!("{currency}{amount:.2}")
}
