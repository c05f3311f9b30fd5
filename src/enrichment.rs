use crate::carrier::{matches_carrier, CarrierProfile};
use crate::cost_history::cost_at_date;
use crate::error::Result;
use crate::resolver::{CatalogBuilder, CatalogIndex};
use crate::schema::{
    Order, OrderItem, OrderStatus, PaymentStatus, Product, Settings, StorefrontOrder,
};
use crate::utils::{normalize_reference, slugify, TimeWindow};
use log::{debug, warn};
use std::collections::BTreeMap;

/// How far back storefront orders are considered for courier backfill.
const BACKFILL_WINDOW_DAYS: u64 = 30;

/// One courier adapter's fetch result. Failures arrive as `Err` and are
/// downgraded to warnings; a dead courier must not take the report down.
pub struct CourierFeed {
    pub courier: String,
    pub orders: Result<Vec<Order>>,
}

#[derive(Debug, Clone)]
pub struct TrackingStatus {
    pub status: OrderStatus,
    pub raw_status_text: String,
    pub courier_timestamp: Option<String>,
}

/// Seam for the live-tracking collaborator. Called only on the backfill path
/// to upgrade the default inferred status; errors leave the default standing.
pub trait TrackingProvider {
    fn track(&self, courier: &str, tracking_number: &str) -> Result<TrackingStatus>;
}

#[derive(Debug)]
pub struct EnrichmentOutcome {
    pub orders: Vec<Order>,
    /// Final catalog snapshot, including products inferred in this pass.
    pub catalog: Vec<Product>,
    /// Inferred products still at zero cost, surfaced as a "needs cost
    /// entry" count rather than an error.
    pub needs_cost_entry: usize,
    pub warnings: Vec<String>,
}

pub struct OrderEnrichmentPipeline {
    settings: Settings,
    backfill_profile: CarrierProfile,
    backfill_days: u64,
    window: TimeWindow,
}

impl OrderEnrichmentPipeline {
    pub fn new(settings: Settings, backfill_profile: CarrierProfile, window: TimeWindow) -> Self {
        Self {
            settings,
            backfill_profile,
            backfill_days: BACKFILL_WINDOW_DAYS,
            window,
        }
    }

    pub fn with_backfill_days(mut self, days: u64) -> Self {
        self.backfill_days = days;
        self
    }

    /// Produces the single deduplicated, cost-stamped order list plus the
    /// grown catalog. Source failures and tracking failures never abort;
    /// they surface in `warnings`.
    pub fn run(
        &self,
        catalog_seed: Vec<Product>,
        feeds: Vec<CourierFeed>,
        storefront_orders: &[StorefrontOrder],
        tracker: Option<&dyn TrackingProvider>,
    ) -> EnrichmentOutcome {
        let mut warnings = Vec::new();

        // Courier records are canonical. Keyed by normalized reference;
        // on a cross-feed collision the first feed listed wins.
        let mut by_reference: BTreeMap<String, Order> = BTreeMap::new();
        for feed in feeds {
            match feed.orders {
                Ok(orders) => {
                    debug!("courier '{}' supplied {} orders", feed.courier, orders.len());
                    for order in orders {
                        let key = normalize_reference(&order.reference);
                        by_reference.entry(key).or_insert(order);
                    }
                }
                Err(err) => {
                    let message = format!("courier '{}' fetch failed: {}", feed.courier, err);
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
        }

        let storefront_index: BTreeMap<String, &StorefrontOrder> = storefront_orders
            .iter()
            .map(|o| (normalize_reference(&o.reference), o))
            .collect();

        self.discover_missing_skus(&mut by_reference, &storefront_index);

        let backfilled = self.backfill_orders(&by_reference, storefront_orders, tracker, &mut warnings);

        let mut orders: Vec<Order> = by_reference.into_values().collect();
        orders.extend(backfilled);

        // Grow the catalog against the merged list, then stamp costs against
        // the final snapshot so items on early orders see late inferences.
        let mut builder = CatalogBuilder::new(catalog_seed);
        for order in &orders {
            for item in &order.items {
                builder.resolve_or_infer(item, order.status);
            }
        }
        let catalog = builder.into_snapshot();

        let index = CatalogIndex::new(&catalog);
        for order in &mut orders {
            let as_of = order.created_at.date_naive();
            for item in &mut order.items {
                if let Some(product) = index.resolve(item) {
                    item.cogs_at_time_of_order = cost_at_date(product, as_of);
                }
            }
            self.stamp_financials(order);
        }

        let needs_cost_entry = catalog
            .iter()
            .filter(|p| p.inferred && p.current_cogs == 0.0)
            .count();

        EnrichmentOutcome {
            orders,
            catalog,
            needs_cost_entry,
            warnings,
        }
    }

    /// Storefront line data fills in SKUs and fingerprints that courier
    /// payloads omit. Absent fields only; ingested values are never replaced.
    fn discover_missing_skus(
        &self,
        by_reference: &mut BTreeMap<String, Order>,
        storefront_index: &BTreeMap<String, &StorefrontOrder>,
    ) {
        for (key, order) in by_reference.iter_mut() {
            let Some(storefront) = storefront_index.get(key) else {
                continue;
            };
            let single_item_order = order.items.len() == 1;
            for item in &mut order.items {
                if item.sku.as_deref().is_some_and(|s| !s.is_empty())
                    && item.variant_fingerprint.as_deref().is_some_and(|f| !f.is_empty())
                {
                    continue;
                }
                let title_slug = slugify(&item.product_name);
                let matched = storefront
                    .line_items
                    .iter()
                    .find(|li| slugify(&li.title) == title_slug)
                    .or_else(|| {
                        if storefront.line_items.len() == 1 && single_item_order {
                            storefront.line_items.first()
                        } else {
                            None
                        }
                    });
                let Some(line) = matched else { continue };

                if item.sku.as_deref().map_or(true, str::is_empty) {
                    item.sku = line.sku.clone();
                }
                if item
                    .variant_fingerprint
                    .as_deref()
                    .map_or(true, str::is_empty)
                {
                    item.variant_fingerprint = Some(slugify(&line.title));
                }
            }
        }
    }

    /// Infers orders for the backfill courier from storefront data: recent,
    /// fulfilled, not cancelled, no courier record under the same reference,
    /// and positively classified by the carrier profile.
    fn backfill_orders(
        &self,
        by_reference: &BTreeMap<String, Order>,
        storefront_orders: &[StorefrontOrder],
        tracker: Option<&dyn TrackingProvider>,
        warnings: &mut Vec<String>,
    ) -> Vec<Order> {
        let eligible_window = TimeWindow::trailing_days(self.window.end, self.backfill_days);
        let mut backfilled = Vec::new();

        for storefront in storefront_orders {
            if !eligible_window.contains(storefront.created_at.date_naive()) {
                continue;
            }
            if storefront.is_cancelled() || !storefront.is_fulfilled() {
                continue;
            }
            let key = normalize_reference(&storefront.reference);
            if by_reference.contains_key(&key) {
                // Courier record is canonical; suppress inference.
                continue;
            }
            if !matches_carrier(storefront, &self.backfill_profile) {
                continue;
            }

            let tracking_number = storefront
                .fulfillments
                .iter()
                .find_map(|f| f.tracking_number.clone());

            // Default stands unless a live tracking call returns something
            // more specific. Failures are swallowed; backfill must never
            // abort the pipeline.
            let mut status = OrderStatus::InTransit;
            if let (Some(tracker), Some(tn)) = (tracker, tracking_number.as_deref()) {
                match tracker.track(&self.backfill_profile.courier, tn) {
                    Ok(live) => status = live.status,
                    Err(err) => {
                        let message =
                            format!("tracking '{}' failed, keeping IN_TRANSIT: {}", tn, err);
                        warn!("{}", message);
                        warnings.push(message);
                    }
                }
            }

            let items = storefront
                .line_items
                .iter()
                .map(|li| OrderItem {
                    product_id: li.product_id.clone(),
                    product_name: li.title.clone(),
                    quantity: li.quantity,
                    sale_price: li.price,
                    sku: li.sku.clone(),
                    variant_fingerprint: Some(slugify(&li.title)),
                    cogs_at_time_of_order: 0.0,
                })
                .collect();

            backfilled.push(Order {
                id: format!("{}-{}", self.backfill_profile.courier, key),
                reference: storefront.reference.clone(),
                created_at: storefront.created_at,
                courier: self.backfill_profile.courier.clone(),
                status,
                payment_status: PaymentStatus::Pending,
                cod_amount: storefront.total_price,
                tracking_number,
                items,
                courier_fee: 0.0,
                rto_penalty: 0.0,
                packaging_cost: 0.0,
                overhead_cost: 0.0,
                tax_amount: 0.0,
            });
        }

        debug!("backfilled {} orders from storefront data", backfilled.len());
        backfilled
    }

    /// Uniform per-order financial stamping, regardless of source.
    fn stamp_financials(&self, order: &mut Order) {
        let rate = self.settings.rate_for(&order.courier);
        order.courier_fee = rate.forward;
        order.rto_penalty = if order.status.is_rto() { rate.rto } else { 0.0 };
        order.packaging_cost = self.settings.packaging_cost;
        order.overhead_cost = self.settings.overhead_cost;
        order.tax_amount = if order.status == OrderStatus::Delivered {
            order.cod_amount * self.settings.tax_rate / 100.0
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::schema::{CourierRate, Fulfillment, StorefrontLineItem};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn settings() -> Settings {
        let mut rates = BTreeMap::new();
        rates.insert(
            "tcs".to_string(),
            CourierRate {
                forward: 180.0,
                rto: 120.0,
            },
        );
        rates.insert(
            "postex".to_string(),
            CourierRate {
                forward: 150.0,
                rto: 100.0,
            },
        );
        Settings {
            rates,
            default_courier: "tcs".to_string(),
            packaging_cost: 30.0,
            overhead_cost: 20.0,
            tax_rate: 2.0,
            ads_tax_rate: 0.0,
        }
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        )
    }

    fn pipeline() -> OrderEnrichmentPipeline {
        OrderEnrichmentPipeline::new(settings(), CarrierProfile::tcs(), window())
    }

    fn courier_order(reference: &str, courier: &str, status: OrderStatus) -> Order {
        Order {
            id: format!("c-{}", reference),
            reference: reference.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap(),
            courier: courier.to_string(),
            status,
            payment_status: PaymentStatus::Pending,
            cod_amount: 2000.0,
            tracking_number: None,
            items: vec![OrderItem {
                product_id: None,
                product_name: "Wireless Earbuds".to_string(),
                quantity: 1,
                sale_price: 2000.0,
                sku: None,
                variant_fingerprint: Some("wireless-earbuds".to_string()),
                cogs_at_time_of_order: 0.0,
            }],
            courier_fee: 0.0,
            rto_penalty: 0.0,
            packaging_cost: 0.0,
            overhead_cost: 0.0,
            tax_amount: 0.0,
        }
    }

    fn backfill_candidate(reference: &str) -> StorefrontOrder {
        StorefrontOrder {
            reference: reference.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 20, 9, 0, 0).unwrap(),
            cancel_reason: None,
            fulfillment_status: Some("fulfilled".to_string()),
            tags: "tcs".to_string(),
            total_price: 1500.0,
            line_items: vec![StorefrontLineItem {
                title: "Gel Pen Pack".to_string(),
                sku: Some("GP-12".to_string()),
                product_id: Some("p-gel".to_string()),
                quantity: 3,
                price: 500.0,
            }],
            fulfillments: vec![Fulfillment {
                tracking_company: Some("TCS".to_string()),
                tracking_number: Some("778899001122".to_string()),
            }],
        }
    }

    struct FixedTracker(OrderStatus);
    impl TrackingProvider for FixedTracker {
        fn track(&self, _courier: &str, _tn: &str) -> Result<TrackingStatus> {
            Ok(TrackingStatus {
                status: self.0,
                raw_status_text: "ok".to_string(),
                courier_timestamp: None,
            })
        }
    }

    struct FailingTracker;
    impl TrackingProvider for FailingTracker {
        fn track(&self, _courier: &str, tn: &str) -> Result<TrackingStatus> {
            Err(EngineError::TrackingFailed(tn.to_string()))
        }
    }

    #[test]
    fn test_courier_record_suppresses_backfill() {
        // Storefront "#1050" vs courier "1050": same order after
        // normalization, so no backfill duplicate is created.
        let mut candidate = backfill_candidate("#1050");
        candidate.tags.clear();
        let outcome = pipeline().run(
            vec![],
            vec![CourierFeed {
                courier: "tcs".to_string(),
                orders: Ok(vec![courier_order("1050", "tcs", OrderStatus::Delivered)]),
            }],
            &[candidate],
            None,
        );

        assert_eq!(outcome.orders.len(), 1);
        assert_eq!(outcome.orders[0].id, "c-1050");
    }

    #[test]
    fn test_backfill_defaults_to_in_transit() {
        let outcome = pipeline().run(vec![], vec![], &[backfill_candidate("#2001")], None);

        assert_eq!(outcome.orders.len(), 1);
        let order = &outcome.orders[0];
        assert_eq!(order.status, OrderStatus::InTransit);
        assert_eq!(order.courier, "tcs");
        assert_eq!(order.cod_amount, 1500.0);
        assert_eq!(order.items[0].variant_fingerprint.as_deref(), Some("gel-pen-pack"));
    }

    #[test]
    fn test_live_tracking_upgrades_status() {
        let tracker = FixedTracker(OrderStatus::Delivered);
        let outcome = pipeline().run(vec![], vec![], &[backfill_candidate("#2002")], Some(&tracker));

        assert_eq!(outcome.orders[0].status, OrderStatus::Delivered);
        // Delivered means remittance tax applies.
        assert!(outcome.orders[0].tax_amount > 0.0);
    }

    #[test]
    fn test_tracking_failure_keeps_default_and_warns() {
        let outcome = pipeline().run(vec![], vec![], &[backfill_candidate("#2003")], Some(&FailingTracker));

        assert_eq!(outcome.orders[0].status, OrderStatus::InTransit);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("tracking"));
    }

    #[test]
    fn test_cancelled_and_unfulfilled_excluded_from_backfill() {
        let mut cancelled = backfill_candidate("#2004");
        cancelled.cancel_reason = Some("customer".to_string());
        let mut unfulfilled = backfill_candidate("#2005");
        unfulfilled.fulfillment_status = None;
        let mut stale = backfill_candidate("#2006");
        stale.created_at = Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();

        let outcome = pipeline().run(vec![], vec![], &[cancelled, unfulfilled, stale], None);
        assert!(outcome.orders.is_empty());
    }

    #[test]
    fn test_failed_feed_becomes_warning_not_error() {
        let outcome = pipeline().run(
            vec![],
            vec![
                CourierFeed {
                    courier: "postex".to_string(),
                    orders: Err(EngineError::SourceUnavailable {
                        name: "postex".to_string(),
                        details: "timeout".to_string(),
                    }),
                },
                CourierFeed {
                    courier: "tcs".to_string(),
                    orders: Ok(vec![courier_order("3001", "tcs", OrderStatus::Delivered)]),
                },
            ],
            &[],
            None,
        );

        assert_eq!(outcome.orders.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("postex"));
    }

    #[test]
    fn test_financial_stamping_invariants() {
        let outcome = pipeline().run(
            vec![],
            vec![CourierFeed {
                courier: "tcs".to_string(),
                orders: Ok(vec![
                    courier_order("4001", "tcs", OrderStatus::Delivered),
                    courier_order("4002", "tcs", OrderStatus::Returned),
                    courier_order("4003", "tcs", OrderStatus::InTransit),
                    courier_order("4004", "swift-unknown", OrderStatus::Delivered),
                ]),
            }],
            &[],
            None,
        );

        for order in &outcome.orders {
            assert!(order.rto_penalty == 0.0 || order.status.is_rto());
            assert!(order.tax_amount == 0.0 || order.status == OrderStatus::Delivered);
        }

        let delivered = outcome.orders.iter().find(|o| o.id == "c-4001").unwrap();
        assert_eq!(delivered.courier_fee, 180.0);
        assert_eq!(delivered.tax_amount, 2000.0 * 0.02);
        assert_eq!(delivered.packaging_cost, 30.0);

        let returned = outcome.orders.iter().find(|o| o.id == "c-4002").unwrap();
        assert_eq!(returned.rto_penalty, 120.0);
        assert_eq!(returned.tax_amount, 0.0);

        let in_transit = outcome.orders.iter().find(|o| o.id == "c-4003").unwrap();
        assert_eq!(in_transit.rto_penalty, 0.0);

        // Unknown courier falls back to the default courier's rates.
        let unknown = outcome.orders.iter().find(|o| o.id == "c-4004").unwrap();
        assert_eq!(unknown.courier_fee, 180.0);
    }

    #[test]
    fn test_cogs_stamped_from_history_at_order_date() {
        let mut product = Product {
            id: "p1".to_string(),
            title: "Wireless Earbuds".to_string(),
            sku: None,
            variant_fingerprint: Some("wireless-earbuds".to_string()),
            current_cogs: 1200.0,
            cost_history: Vec::new(),
            group_id: None,
            group_name: None,
            aliases: Vec::new(),
            inferred: false,
        };
        crate::cost_history::record_cost(
            &mut product,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            1000.0,
        );
        crate::cost_history::record_cost(
            &mut product,
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            1200.0,
        );

        // Order placed June 10, before the June 15 renegotiation.
        let outcome = pipeline().run(
            vec![product],
            vec![CourierFeed {
                courier: "tcs".to_string(),
                orders: Ok(vec![courier_order("5001", "tcs", OrderStatus::Delivered)]),
            }],
            &[],
            None,
        );

        assert_eq!(outcome.orders[0].items[0].cogs_at_time_of_order, 1000.0);
    }

    #[test]
    fn test_unmatched_item_infers_product_needing_cost_entry() {
        let outcome = pipeline().run(
            vec![],
            vec![CourierFeed {
                courier: "tcs".to_string(),
                orders: Ok(vec![courier_order("6001", "tcs", OrderStatus::Delivered)]),
            }],
            &[],
            None,
        );

        assert_eq!(outcome.catalog.len(), 1);
        assert!(outcome.catalog[0].inferred);
        assert_eq!(outcome.needs_cost_entry, 1);
        assert_eq!(outcome.orders[0].items[0].cogs_at_time_of_order, 0.0);
    }

    #[test]
    fn test_sku_discovery_from_storefront() {
        let mut order = courier_order("7001", "tcs", OrderStatus::Delivered);
        order.items[0].product_name = "Gel Pen Pack".to_string();
        order.items[0].variant_fingerprint = None;

        let mut storefront = backfill_candidate("#7001");
        storefront.tags.clear();

        let outcome = pipeline().run(
            vec![],
            vec![CourierFeed {
                courier: "tcs".to_string(),
                orders: Ok(vec![order]),
            }],
            &[storefront],
            None,
        );

        let item = &outcome.orders[0].items[0];
        assert_eq!(item.sku.as_deref(), Some("GP-12"));
        assert_eq!(item.variant_fingerprint.as_deref(), Some("gel-pen-pack"));
    }
}
