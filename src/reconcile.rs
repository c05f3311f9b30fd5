use crate::schema::{Order, OrderStatus, StorefrontOrder};
use crate::utils::{normalize_reference, slugify, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Active storefront demand with no courier record: an unbooked order or a
/// sync gap, either way leaked revenue until someone follows up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedOrder {
    pub reference: String,
    pub created_at: DateTime<Utc>,
    pub value: f64,
}

/// Demand-vs-dispatch counts for one storefront product. Keyed by the
/// slugified storefront title — deliberately a separate namespace from the
/// catalog's variant fingerprints, which the source data never unifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDispatch {
    pub product_key: String,
    pub title: String,
    pub demand_units: u32,
    pub cancelled_units: u32,
    pub dispatched_units: u32,
    pub delivered_units: u32,
    pub returned_units: u32,
    pub in_transit_units: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub total_demand: usize,
    pub cancelled: usize,
    pub dispatched: usize,
    /// `dispatched / (total_demand - cancelled)`, 0 when there is no valid
    /// demand.
    pub dispatch_rate: f64,
    pub missed_orders: Vec<MissedOrder>,
    pub per_product: Vec<ProductDispatch>,
}

/// Compares storefront demand against courier dispatch inside `window`.
/// Pure function of its inputs.
pub fn reconcile(
    storefront_orders: &[StorefrontOrder],
    enriched_orders: &[Order],
    window: TimeWindow,
) -> DispatchReport {
    let by_reference: HashMap<String, &Order> = enriched_orders
        .iter()
        .map(|o| (normalize_reference(&o.reference), o))
        .collect();

    let mut total_demand = 0;
    let mut cancelled = 0;
    let mut dispatched = 0;
    let mut missed_orders = Vec::new();
    let mut per_product: BTreeMap<String, ProductDispatch> = BTreeMap::new();

    for storefront in storefront_orders {
        if !window.contains(storefront.created_at.date_naive()) {
            continue;
        }
        total_demand += 1;

        let matched = by_reference
            .get(&normalize_reference(&storefront.reference))
            .copied();

        let order_cancelled = storefront.is_cancelled();
        if order_cancelled {
            cancelled += 1;
        } else if matched.is_some() {
            dispatched += 1;
        } else {
            missed_orders.push(MissedOrder {
                reference: storefront.reference.clone(),
                created_at: storefront.created_at,
                value: storefront.total_price,
            });
        }

        for line in &storefront.line_items {
            let key = slugify(&line.title);
            let entry = per_product
                .entry(key.clone())
                .or_insert_with(|| ProductDispatch {
                    product_key: key,
                    title: line.title.clone(),
                    demand_units: 0,
                    cancelled_units: 0,
                    dispatched_units: 0,
                    delivered_units: 0,
                    returned_units: 0,
                    in_transit_units: 0,
                });

            entry.demand_units += line.quantity;
            if order_cancelled {
                entry.cancelled_units += line.quantity;
                continue;
            }
            let Some(courier_order) = matched else {
                continue;
            };
            entry.dispatched_units += line.quantity;
            match courier_order.status {
                OrderStatus::Delivered => entry.delivered_units += line.quantity,
                OrderStatus::Returned | OrderStatus::RtoInitiated => {
                    entry.returned_units += line.quantity
                }
                _ => entry.in_transit_units += line.quantity,
            }
        }
    }

    let valid_demand = total_demand - cancelled;
    let dispatch_rate = if valid_demand == 0 {
        0.0
    } else {
        dispatched as f64 / valid_demand as f64
    };

    DispatchReport {
        total_demand,
        cancelled,
        dispatched,
        dispatch_rate,
        missed_orders,
        per_product: per_product.into_values().collect(),
    }
}
