//! # codprofit
//!
//! Cost attribution and profitability reconciliation for cash-on-delivery
//! e-commerce. Sellers ship through several couriers, COD cash arrives weeks
//! after dispatch, parcels bounce back as RTO, and supplier costs move over
//! time — this crate turns that mess into per-product profit figures.
//!
//! ## Core concepts
//!
//! - **Identity resolution**: order line items carry inconsistent keys across
//!   the storefront and courier feeds; a priority cascade (fingerprint → sku
//!   → id) maps them onto one catalog, inferring placeholder products for
//!   items the catalog has never seen.
//! - **Historical cost**: margins use the cost of goods that was true when
//!   the order was placed, not today's cost.
//! - **Enrichment**: courier feeds and a storefront backfill merge into one
//!   deduplicated order list, stamped with fees, penalties, and taxes.
//! - **Aggregation**: enriched orders plus ad spend roll up into per-variant
//!   and per-group profitability, sorted by net profit.
//! - **Reconciliation**: storefront demand is compared against courier
//!   dispatch to surface orders that were never booked.
//!
//! The engine owns no I/O. Adapters fetch raw records, a persistence layer
//! stores the grown catalog, and this crate computes — pure functions over
//! in-memory snapshots, safe to re-run any number of times.
//!
//! ## Example
//!
//! ```rust,ignore
//! use codprofit::*;
//! use chrono::NaiveDate;
//!
//! let window = TimeWindow::trailing_days(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(), 30);
//! let inputs = ReportInputs {
//!     catalog,
//!     courier_feeds,
//!     storefront_orders,
//!     ad_spend,
//!     settings,
//!     window,
//! };
//! let report = ProfitEngine::build_report(inputs, None)?;
//! for perf in &report.performance {
//!     println!("{}: net {}", perf.title, perf.net_profit);
//! }
//! ```

pub mod aggregate;
pub mod carrier;
pub mod cost_history;
pub mod enrichment;
pub mod error;
pub mod reconcile;
pub mod resolver;
pub mod schema;
pub mod utils;

pub use aggregate::{DashboardMetrics, PerformanceAggregator, ProductPerformance};
pub use carrier::{matches_carrier, CarrierProfile};
pub use cost_history::{cost_at_date, record_cost, record_cost_raw};
pub use enrichment::{
    CourierFeed, EnrichmentOutcome, OrderEnrichmentPipeline, TrackingProvider, TrackingStatus,
};
pub use error::{EngineError, Result};
pub use reconcile::{reconcile, DispatchReport, MissedOrder, ProductDispatch};
pub use resolver::{CatalogBuilder, CatalogIndex};
pub use schema::*;
pub use utils::{normalize_reference, parse_date_lenient, slugify, TimeWindow};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Everything one report render needs, captured as an explicit snapshot.
pub struct ReportInputs {
    pub catalog: Vec<Product>,
    pub courier_feeds: Vec<CourierFeed>,
    pub storefront_orders: Vec<StorefrontOrder>,
    pub ad_spend: Vec<AdSpend>,
    pub settings: Settings,
    pub window: TimeWindow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitReport {
    pub performance: Vec<ProductPerformance>,
    pub dashboard: DashboardMetrics,
    pub reconciliation: DispatchReport,
    /// Final catalog snapshot including inferred products, for persistence.
    pub catalog: Vec<Product>,
    /// Inferred products awaiting a manual cost entry.
    pub needs_cost_entry: usize,
    /// Non-fatal per-source and tracking failures.
    pub warnings: Vec<String>,
}

pub struct ProfitEngine;

impl ProfitEngine {
    /// Runs the full pipeline: enrichment, aggregation, dashboard sums, and
    /// demand/dispatch reconciliation. Individual source failures degrade to
    /// warnings; `Err` means invalid inputs or no data at all.
    pub fn build_report(
        inputs: ReportInputs,
        tracker: Option<&dyn TrackingProvider>,
    ) -> Result<ProfitReport> {
        validate_inputs(&inputs)?;

        info!(
            "building profit report: {} catalog products, {} courier feeds, {} storefront orders",
            inputs.catalog.len(),
            inputs.courier_feeds.len(),
            inputs.storefront_orders.len()
        );

        let pipeline = OrderEnrichmentPipeline::new(
            inputs.settings.clone(),
            CarrierProfile::tcs(),
            inputs.window,
        );
        let outcome = pipeline.run(
            inputs.catalog,
            inputs.courier_feeds,
            &inputs.storefront_orders,
            tracker,
        );

        if outcome.orders.is_empty() && inputs.storefront_orders.is_empty() {
            return Err(EngineError::NoData);
        }

        debug!(
            "enrichment produced {} orders, {} catalog entries ({} needing cost entry)",
            outcome.orders.len(),
            outcome.catalog.len(),
            outcome.needs_cost_entry
        );

        let aggregator = PerformanceAggregator::new(&inputs.settings, inputs.window);
        let performance = aggregator.aggregate(&outcome.orders, &outcome.catalog, &inputs.ad_spend);
        let dashboard = aggregator.dashboard(&outcome.orders, &inputs.ad_spend);
        let reconciliation = reconcile(&inputs.storefront_orders, &outcome.orders, inputs.window);

        Ok(ProfitReport {
            performance,
            dashboard,
            reconciliation,
            catalog: outcome.catalog,
            needs_cost_entry: outcome.needs_cost_entry,
            warnings: outcome.warnings,
        })
    }
}

fn validate_inputs(inputs: &ReportInputs) -> Result<()> {
    let mut fingerprints = HashSet::new();
    for product in &inputs.catalog {
        if let Some(fp) = product.variant_fingerprint.as_deref() {
            if !fp.is_empty() && !fingerprints.insert(fp) {
                return Err(EngineError::DuplicateFingerprint(fp.to_string()));
            }
        }
        for entry in &product.cost_history {
            if entry.cogs < 0.0 {
                return Err(EngineError::Validation {
                    subject: product.title.clone(),
                    details: format!("negative cost {} on {}", entry.cogs, entry.date),
                });
            }
        }
    }

    for (field, value) in [
        ("tax_rate", inputs.settings.tax_rate),
        ("ads_tax_rate", inputs.settings.ads_tax_rate),
    ] {
        if !(0.0..=100.0).contains(&value) {
            return Err(EngineError::InvalidPercentage {
                field: field.to_string(),
                value,
            });
        }
    }

    Ok(())
}
