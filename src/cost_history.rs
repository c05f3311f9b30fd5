use crate::schema::{CostEntry, Product};
use crate::utils::parse_date_lenient;
use chrono::NaiveDate;

/// The cost of goods that was in effect for `product` on `as_of`.
///
/// `cost_history` is kept sorted descending by date, so the first entry with
/// `date <= as_of` is the most recent one. An order that predates all history
/// gets the earliest known cost; an empty history falls back to
/// `current_cogs`. Never fails — margin math must run on whatever the seller
/// has entered so far.
pub fn cost_at_date(product: &Product, as_of: NaiveDate) -> f64 {
    if product.cost_history.is_empty() {
        return product.current_cogs;
    }

    for entry in &product.cost_history {
        if entry.date <= as_of {
            return entry.cogs;
        }
    }

    // Order predates all history: the earliest entry is the best estimate.
    product
        .cost_history
        .last()
        .map(|e| e.cogs)
        .unwrap_or(product.current_cogs)
}

/// Records a new cost observation and re-establishes the descending-sort
/// invariant. When two entries share a date, the last-inserted one wins:
/// the new entry is front-inserted and the sort is stable, so it stays ahead
/// of older entries for the same date and `cost_at_date` sees it first.
pub fn record_cost(product: &mut Product, date: NaiveDate, cogs: f64) {
    product.cost_history.insert(0, CostEntry { date, cogs });
    product.cost_history.sort_by(|a, b| b.date.cmp(&a.date));
    product.current_cogs = product.cost_history[0].cogs;
}

/// [`record_cost`] for raw adapter/form input: the date string is normalized
/// leniently and malformed dates use `fallback` instead of erroring.
pub fn record_cost_raw(product: &mut Product, raw_date: &str, cogs: f64, fallback: NaiveDate) {
    let date = parse_date_lenient(raw_date, fallback);
    record_cost(product, date, cogs);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_with_history(entries: Vec<(NaiveDate, f64)>) -> Product {
        let mut product = Product {
            id: "p1".to_string(),
            title: "Wireless Earbuds".to_string(),
            sku: Some("WE-01".to_string()),
            variant_fingerprint: Some("wireless-earbuds".to_string()),
            current_cogs: 1500.0,
            cost_history: Vec::new(),
            group_id: None,
            group_name: None,
            aliases: Vec::new(),
            inferred: false,
        };
        for (date, cogs) in entries {
            record_cost(&mut product, date, cogs);
        }
        product
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_cost_at_date_picks_entry_in_effect() {
        // Scenario: cost renegotiated mid-year; a March order must get the
        // January cost, not the June one.
        let product = product_with_history(vec![
            (date(2024, 1, 1), 1000.0),
            (date(2024, 6, 1), 1200.0),
        ]);

        assert_eq!(cost_at_date(&product, date(2024, 3, 15)), 1000.0);
        assert_eq!(cost_at_date(&product, date(2024, 6, 1)), 1200.0);
        assert_eq!(cost_at_date(&product, date(2024, 12, 31)), 1200.0);
    }

    #[test]
    fn test_order_predating_all_history() {
        let product = product_with_history(vec![
            (date(2024, 1, 1), 1000.0),
            (date(2024, 6, 1), 1200.0),
        ]);
        assert_eq!(cost_at_date(&product, date(2023, 5, 1)), 1000.0);
    }

    #[test]
    fn test_empty_history_falls_back_to_current() {
        let product = product_with_history(vec![]);
        assert_eq!(cost_at_date(&product, date(2024, 3, 15)), 1500.0);
    }

    #[test]
    fn test_same_date_last_inserted_wins() {
        let mut product = product_with_history(vec![(date(2024, 1, 1), 1000.0)]);
        record_cost(&mut product, date(2024, 1, 1), 1100.0);

        assert_eq!(cost_at_date(&product, date(2024, 2, 1)), 1100.0);
        assert_eq!(product.cost_history.len(), 2);
    }

    #[test]
    fn test_record_cost_keeps_descending_order_and_current() {
        let mut product = product_with_history(vec![(date(2024, 6, 1), 1200.0)]);
        record_cost(&mut product, date(2024, 1, 1), 1000.0);
        record_cost(&mut product, date(2024, 9, 1), 1300.0);

        let dates: Vec<NaiveDate> = product.cost_history.iter().map(|e| e.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 9, 1), date(2024, 6, 1), date(2024, 1, 1)]
        );
        assert_eq!(product.current_cogs, 1300.0);
    }

    #[test]
    fn test_record_cost_raw_malformed_date_uses_fallback() {
        let mut product = product_with_history(vec![]);
        record_cost_raw(&mut product, "garbage", 900.0, date(2024, 7, 1));
        assert_eq!(product.cost_history[0].date, date(2024, 7, 1));
        assert_eq!(cost_at_date(&product, date(2024, 8, 1)), 900.0);
    }
}
