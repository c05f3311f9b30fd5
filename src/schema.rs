use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single cost-of-goods observation. `cost_history` on [`Product`] holds
/// these sorted descending by date; mutate only through
/// [`crate::cost_history::record_cost`] to keep the invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub date: NaiveDate,
    pub cogs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub sku: Option<String>,
    /// Normalized slug derived from title/sku; the primary cross-source
    /// matching key. Unique across the catalog when present.
    #[serde(default)]
    pub variant_fingerprint: Option<String>,
    pub current_cogs: f64,
    #[serde(default)]
    pub cost_history: Vec<CostEntry>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    /// Alternate display names seen from other data sources, kept for
    /// manual re-mapping.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// True for catalog entries created by the identity resolver rather
    /// than the seller. These start at zero cost and need manual entry.
    #[serde(default)]
    pub inferred: bool,
}

impl Product {
    /// A placeholder entry created when an order item matches nothing in
    /// the catalog.
    pub fn inferred(id: String, title: String, fingerprint: String, sku: Option<String>) -> Self {
        Self {
            id,
            title,
            sku,
            variant_fingerprint: Some(fingerprint),
            current_cogs: 0.0,
            cost_history: Vec::new(),
            group_id: None,
            group_name: None,
            aliases: Vec::new(),
            inferred: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Booked,
    InTransit,
    Delivered,
    RtoInitiated,
    Returned,
    Cancelled,
}

impl OrderStatus {
    /// The parcel has actually left (or finished leaving) the warehouse.
    /// Pending/Booked orders may still be edited or cancelled; Cancelled
    /// ones never shipped.
    pub fn is_dispatched(self) -> bool {
        !matches!(self, Self::Pending | Self::Booked | Self::Cancelled)
    }

    pub fn is_rto(self) -> bool {
        matches!(self, Self::Returned | Self::RtoInitiated)
    }

    /// Dispatched but the outcome is still open: COD may yet be collected
    /// or the parcel may come back.
    pub fn is_unresolved(self) -> bool {
        matches!(self, Self::InTransit | Self::RtoInitiated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// COD not collected yet.
    Pending,
    /// Courier collected from the customer but has not paid the seller out.
    Collected,
    /// Courier remitted the COD amount to the seller.
    Remitted,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    #[serde(default)]
    pub product_id: Option<String>,
    pub product_name: String,
    pub quantity: u32,
    pub sale_price: f64,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub variant_fingerprint: Option<String>,
    /// Historical unit cost stamped by the enrichment pipeline. This is the
    /// only field enrichment is allowed to overwrite after ingestion.
    #[serde(default)]
    pub cogs_at_time_of_order: f64,
}

/// A courier-visible order. The five cost fields at the bottom are derived
/// from [`Settings`] on every enrichment pass; they are a view, not a ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Storefront order number, possibly with a leading `#` as some sources
    /// send it. Compare via [`crate::utils::normalize_reference`].
    pub reference: String,
    pub created_at: DateTime<Utc>,
    pub courier: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub cod_amount: f64,
    #[serde(default)]
    pub tracking_number: Option<String>,
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub courier_fee: f64,
    #[serde(default)]
    pub rto_penalty: f64,
    #[serde(default)]
    pub packaging_cost: f64,
    #[serde(default)]
    pub overhead_cost: f64,
    #[serde(default)]
    pub tax_amount: f64,
}

impl Order {
    pub fn total_units(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}

/// Ad spend for one platform on one day. `product_id` may reference either a
/// product or a group id; the aggregator disambiguates by membership lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdSpend {
    pub date: NaiveDate,
    pub platform: String,
    pub amount_spent: f64,
    #[serde(default)]
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CourierRate {
    pub forward: f64,
    pub rto: f64,
}

impl Default for CourierRate {
    fn default() -> Self {
        Self {
            forward: 0.0,
            rto: 0.0,
        }
    }
}

/// Seller-configured cost settings supplied by the settings collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Per-courier forward/RTO fee schedule, keyed by courier name.
    pub rates: BTreeMap<String, CourierRate>,
    /// Courier whose rates apply when an order's courier is unrecognized.
    pub default_courier: String,
    pub packaging_cost: f64,
    pub overhead_cost: f64,
    /// Courier remittance tax, percent of delivered COD amount.
    pub tax_rate: f64,
    /// Tax charged by ad platforms on top of raw spend, percent.
    pub ads_tax_rate: f64,
}

impl Settings {
    /// Rate lookup with fallback: unknown courier gets the default courier's
    /// rates; a missing default yields zero fees rather than an error.
    pub fn rate_for(&self, courier: &str) -> CourierRate {
        self.rates
            .get(courier)
            .or_else(|| self.rates.get(&self.default_courier))
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fulfillment {
    #[serde(default)]
    pub tracking_company: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorefrontLineItem {
    pub title: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    pub quantity: u32,
    pub price: f64,
}

/// An order as the storefront reports it: demand, not dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorefrontOrder {
    pub reference: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    /// "fulfilled" / "partial" / absent, as the storefront sends it.
    #[serde(default)]
    pub fulfillment_status: Option<String>,
    #[serde(default)]
    pub tags: String,
    pub total_price: f64,
    pub line_items: Vec<StorefrontLineItem>,
    #[serde(default)]
    pub fulfillments: Vec<Fulfillment>,
}

impl StorefrontOrder {
    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason.as_deref().is_some_and(|r| !r.is_empty())
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(
            self.fulfillment_status.as_deref(),
            Some("fulfilled") | Some("partial") | Some("partially_fulfilled")
        )
    }
}
