use crate::resolver::CatalogIndex;
use crate::schema::{AdSpend, Order, OrderStatus, PaymentStatus, Product, Settings};
use crate::utils::{slugify, TimeWindow};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// SKU shown on group rollup rows, which aggregate several variants.
pub const GROUP_SKU_SENTINEL: &str = "-";

/// Per-product (or per-group) profitability for one date window. Ephemeral:
/// recomputed on every report render, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPerformance {
    pub product_id: String,
    pub title: String,
    pub sku: Option<String>,
    pub is_group: bool,
    pub units_sold: u32,
    pub units_returned: u32,
    pub units_in_transit: u32,
    pub gross_revenue: f64,
    pub cogs_total: f64,
    pub shipping_cost_allocation: f64,
    pub overhead_allocation: f64,
    pub tax_allocation: f64,
    pub ad_spend_allocation: f64,
    /// COGS + shipping/overhead value of units dispatched but not yet
    /// resolved. A liquidity figure, not a loss: excluded from gross profit,
    /// subtracted from net profit.
    pub cash_in_stock: f64,
    pub gross_profit: f64,
    pub net_profit: f64,
    /// Percent of closed orders that came back; in-transit units are not in
    /// the denominator since their outcome is undetermined.
    pub rto_rate: f64,
}

/// Window-global sums for the dashboard header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_orders: usize,
    pub delivered_orders: usize,
    pub returned_orders: usize,
    pub in_transit_orders: usize,
    pub gross_revenue: f64,
    pub cogs_total: f64,
    pub courier_fees: f64,
    pub rto_penalties: f64,
    pub packaging_and_overhead: f64,
    pub tax_total: f64,
    pub ad_spend_total: f64,
    pub cash_in_stock: f64,
    /// Delivered COD collected by couriers but not yet remitted.
    pub cash_with_courier: f64,
    pub net_profit: f64,
}

#[derive(Debug, Default, Clone)]
struct Accumulator {
    title: String,
    sku: Option<String>,
    group_id: Option<String>,
    group_name: Option<String>,
    units_sold: u32,
    units_returned: u32,
    units_in_transit: u32,
    gross_revenue: f64,
    cogs_total: f64,
    shipping: f64,
    overhead: f64,
    tax: f64,
    ad_spend: f64,
    cash_in_stock: f64,
}

impl Accumulator {
    fn fold(&mut self, other: &Accumulator) {
        self.units_sold += other.units_sold;
        self.units_returned += other.units_returned;
        self.units_in_transit += other.units_in_transit;
        self.gross_revenue += other.gross_revenue;
        self.cogs_total += other.cogs_total;
        self.shipping += other.shipping;
        self.overhead += other.overhead;
        self.tax += other.tax;
        self.ad_spend += other.ad_spend;
        self.cash_in_stock += other.cash_in_stock;
    }

    fn finish(&self, product_id: String, is_group: bool) -> ProductPerformance {
        let closed = self.units_sold + self.units_returned;
        let rto_rate = if closed == 0 {
            0.0
        } else {
            self.units_returned as f64 / closed as f64 * 100.0
        };
        let gross_profit = self.gross_revenue - self.cogs_total - self.ad_spend;
        let net_profit = self.gross_revenue
            - self.cogs_total
            - self.cash_in_stock
            - self.shipping
            - self.overhead
            - self.tax
            - self.ad_spend;

        ProductPerformance {
            product_id,
            title: self.title.clone(),
            sku: if is_group {
                Some(GROUP_SKU_SENTINEL.to_string())
            } else {
                self.sku.clone()
            },
            is_group,
            units_sold: self.units_sold,
            units_returned: self.units_returned,
            units_in_transit: self.units_in_transit,
            gross_revenue: self.gross_revenue,
            cogs_total: self.cogs_total,
            shipping_cost_allocation: self.shipping,
            overhead_allocation: self.overhead,
            tax_allocation: self.tax,
            ad_spend_allocation: self.ad_spend,
            cash_in_stock: self.cash_in_stock,
            gross_profit,
            net_profit,
            rto_rate,
        }
    }
}

pub struct PerformanceAggregator<'a> {
    settings: &'a Settings,
    window: TimeWindow,
}

impl<'a> PerformanceAggregator<'a> {
    pub fn new(settings: &'a Settings, window: TimeWindow) -> Self {
        Self { settings, window }
    }

    /// Rolls enriched orders, the catalog, and ad spend into per-variant
    /// performance, then folds grouped variants into group rollups. Pure:
    /// same inputs, same output, any number of times.
    pub fn aggregate(
        &self,
        orders: &[Order],
        catalog: &[Product],
        ad_spend: &[AdSpend],
    ) -> Vec<ProductPerformance> {
        let index = CatalogIndex::new(catalog);
        let mut accumulators: BTreeMap<String, Accumulator> = BTreeMap::new();

        for order in orders {
            if !self.window.contains(order.created_at.date_naive()) {
                continue;
            }
            if !order.status.is_dispatched() {
                continue;
            }

            let total_units = order.total_units();
            if total_units == 0 {
                continue;
            }

            for item in &order.items {
                let (key, acc_seed) = match index.resolve(item) {
                    Some(product) => (
                        product.id.clone(),
                        Accumulator {
                            title: product.title.clone(),
                            sku: product.sku.clone(),
                            group_id: product.group_id.clone(),
                            group_name: product.group_name.clone(),
                            ..Accumulator::default()
                        },
                    ),
                    // Items the catalog cannot name still carry money;
                    // accumulate them under their own slug.
                    None => (
                        item.variant_fingerprint
                            .clone()
                            .filter(|f| !f.is_empty())
                            .unwrap_or_else(|| slugify(&item.product_name)),
                        Accumulator {
                            title: item.product_name.clone(),
                            sku: item.sku.clone(),
                            ..Accumulator::default()
                        },
                    ),
                };

                let acc = accumulators.entry(key).or_insert(acc_seed);
                let quantity = item.quantity as f64;
                let share = quantity / total_units as f64;
                let shipping_share = (order.courier_fee + order.rto_penalty) * share;
                let overhead_share = (order.packaging_cost + order.overhead_cost) * share;

                match order.status {
                    OrderStatus::Delivered => {
                        acc.units_sold += item.quantity;
                        acc.gross_revenue += item.sale_price * quantity;
                        acc.cogs_total += item.cogs_at_time_of_order * quantity;
                    }
                    OrderStatus::Returned | OrderStatus::RtoInitiated => {
                        acc.units_returned += item.quantity;
                    }
                    _ => {
                        acc.units_in_transit += item.quantity;
                    }
                }

                if order.status.is_unresolved() {
                    acc.cash_in_stock += item.cogs_at_time_of_order * quantity
                        + shipping_share
                        + overhead_share;
                }

                acc.shipping += shipping_share;
                acc.overhead += overhead_share;
                acc.tax += order.tax_amount * share;
            }
        }

        // Ad spend: group ids and variant ids share a namespace, so group
        // membership decides where an entry lands.
        let group_ids: BTreeSet<&str> = catalog
            .iter()
            .filter_map(|p| p.group_id.as_deref())
            .collect();
        let ads_multiplier = 1.0 + self.settings.ads_tax_rate / 100.0;
        let mut group_spend: BTreeMap<String, f64> = BTreeMap::new();

        for entry in ad_spend {
            if !self.window.contains(entry.date) {
                continue;
            }
            let Some(target) = entry.product_id.as_deref().filter(|t| !t.is_empty()) else {
                continue;
            };
            let amount = entry.amount_spent * ads_multiplier;

            if group_ids.contains(target) {
                *group_spend.entry(target.to_string()).or_insert(0.0) += amount;
            } else if let Some(acc) = accumulators.get_mut(target) {
                acc.ad_spend += amount;
            } else if let Some(product) = catalog.iter().find(|p| p.id == target) {
                // Spend on a variant with no orders in the window still
                // drags profit down.
                accumulators.insert(
                    target.to_string(),
                    Accumulator {
                        title: product.title.clone(),
                        sku: product.sku.clone(),
                        group_id: product.group_id.clone(),
                        group_name: product.group_name.clone(),
                        ad_spend: amount,
                        ..Accumulator::default()
                    },
                );
            } else {
                debug!("ad spend for unknown id '{}' ignored", target);
            }
        }

        // Group rollup: grouped variants fold into a synthetic row; the rest
        // stand alone.
        let mut groups: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut results = Vec::new();

        for (product_id, acc) in &accumulators {
            match acc.group_id.as_deref() {
                Some(group_id) => {
                    let group = groups.entry(group_id.to_string()).or_insert_with(|| {
                        Accumulator {
                            title: acc
                                .group_name
                                .clone()
                                .unwrap_or_else(|| group_id.to_string()),
                            ..Accumulator::default()
                        }
                    });
                    group.fold(acc);
                }
                None => results.push(acc.finish(product_id.clone(), false)),
            }
        }

        for (group_id, mut acc) in groups {
            if let Some(spend) = group_spend.get(&group_id) {
                acc.ad_spend += spend;
            }
            results.push(acc.finish(group_id, true));
        }

        results.sort_by(|a, b| {
            b.net_profit
                .partial_cmp(&a.net_profit)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }

    /// Window-global sums across all orders, for the dashboard header.
    pub fn dashboard(&self, orders: &[Order], ad_spend: &[AdSpend]) -> DashboardMetrics {
        let mut metrics = DashboardMetrics {
            total_orders: 0,
            delivered_orders: 0,
            returned_orders: 0,
            in_transit_orders: 0,
            gross_revenue: 0.0,
            cogs_total: 0.0,
            courier_fees: 0.0,
            rto_penalties: 0.0,
            packaging_and_overhead: 0.0,
            tax_total: 0.0,
            ad_spend_total: 0.0,
            cash_in_stock: 0.0,
            cash_with_courier: 0.0,
            net_profit: 0.0,
        };

        for order in orders {
            if !self.window.contains(order.created_at.date_naive()) {
                continue;
            }
            metrics.total_orders += 1;
            if !order.status.is_dispatched() {
                continue;
            }

            let item_cogs: f64 = order
                .items
                .iter()
                .map(|i| i.cogs_at_time_of_order * i.quantity as f64)
                .sum();

            match order.status {
                OrderStatus::Delivered => {
                    metrics.delivered_orders += 1;
                    metrics.gross_revenue += order.cod_amount;
                    metrics.cogs_total += item_cogs;
                    if order.payment_status != PaymentStatus::Remitted {
                        metrics.cash_with_courier += order.cod_amount;
                    }
                }
                OrderStatus::Returned | OrderStatus::RtoInitiated => {
                    metrics.returned_orders += 1;
                }
                _ => {
                    metrics.in_transit_orders += 1;
                }
            }

            if order.status.is_unresolved() {
                metrics.cash_in_stock +=
                    item_cogs + order.courier_fee + order.packaging_cost + order.overhead_cost;
            }

            metrics.courier_fees += order.courier_fee;
            metrics.rto_penalties += order.rto_penalty;
            metrics.packaging_and_overhead += order.packaging_cost + order.overhead_cost;
            metrics.tax_total += order.tax_amount;
        }

        let ads_multiplier = 1.0 + self.settings.ads_tax_rate / 100.0;
        metrics.ad_spend_total = ad_spend
            .iter()
            .filter(|e| self.window.contains(e.date))
            .map(|e| e.amount_spent * ads_multiplier)
            .sum();

        metrics.net_profit = metrics.gross_revenue
            - metrics.cogs_total
            - metrics.courier_fees
            - metrics.rto_penalties
            - metrics.packaging_and_overhead
            - metrics.tax_total
            - metrics.ad_spend_total;

        metrics
    }
}
