use crate::schema::{OrderItem, OrderStatus, Product};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Sentinel used by some courier feeds when they have no product id at all.
const UNKNOWN_ID: &str = "unknown";

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Read-only identity lookup over an immutable catalog snapshot. Indices are
/// built once; resolution is a strict priority cascade with no scoring:
/// fingerprint, then sku, then catalog id, first match wins.
pub struct CatalogIndex<'a> {
    catalog: &'a [Product],
    by_fingerprint: HashMap<&'a str, usize>,
    by_sku: HashMap<&'a str, usize>,
    by_id: HashMap<&'a str, usize>,
}

impl<'a> CatalogIndex<'a> {
    pub fn new(catalog: &'a [Product]) -> Self {
        let mut by_fingerprint = HashMap::new();
        let mut by_sku = HashMap::new();
        let mut by_id = HashMap::new();

        for (idx, product) in catalog.iter().enumerate() {
            if let Some(fp) = non_empty(product.variant_fingerprint.as_deref()) {
                by_fingerprint.entry(fp).or_insert(idx);
            }
            if let Some(sku) = non_empty(product.sku.as_deref()) {
                by_sku.entry(sku).or_insert(idx);
            }
            by_id.entry(product.id.as_str()).or_insert(idx);
        }

        Self {
            catalog,
            by_fingerprint,
            by_sku,
            by_id,
        }
    }

    pub fn resolve(&self, item: &OrderItem) -> Option<&'a Product> {
        self.resolve_keys(
            item.variant_fingerprint.as_deref(),
            item.sku.as_deref(),
            item.product_id.as_deref(),
        )
    }

    pub fn resolve_keys(
        &self,
        fingerprint: Option<&str>,
        sku: Option<&str>,
        product_id: Option<&str>,
    ) -> Option<&'a Product> {
        if let Some(fp) = non_empty(fingerprint) {
            if let Some(&idx) = self.by_fingerprint.get(fp) {
                return Some(&self.catalog[idx]);
            }
        }
        if let Some(sku) = non_empty(sku) {
            if let Some(&idx) = self.by_sku.get(sku) {
                return Some(&self.catalog[idx]);
            }
        }
        if let Some(id) = non_empty(product_id) {
            if let Some(&idx) = self.by_id.get(id) {
                return Some(&self.catalog[idx]);
            }
        }
        None
    }
}

/// Working catalog for one enrichment pass. Seeded from persisted products,
/// grown monotonically as unmatched items on dispatched orders are inferred,
/// and emitted as an immutable snapshot at the end of the pass.
pub struct CatalogBuilder {
    products: Vec<Product>,
    by_fingerprint: HashMap<String, usize>,
    by_sku: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    /// Fingerprints inferred in this pass; never re-inferred.
    seen: HashSet<String>,
}

impl CatalogBuilder {
    pub fn new(seed: Vec<Product>) -> Self {
        let mut builder = Self {
            products: Vec::with_capacity(seed.len()),
            by_fingerprint: HashMap::new(),
            by_sku: HashMap::new(),
            by_id: HashMap::new(),
            seen: HashSet::new(),
        };
        for product in seed {
            builder.push(product);
        }
        builder
    }

    fn push(&mut self, product: Product) {
        let idx = self.products.len();
        if let Some(fp) = non_empty(product.variant_fingerprint.as_deref()) {
            self.by_fingerprint.entry(fp.to_string()).or_insert(idx);
        }
        if let Some(sku) = non_empty(product.sku.as_deref()) {
            self.by_sku.entry(sku.to_string()).or_insert(idx);
        }
        self.by_id.entry(product.id.clone()).or_insert(idx);
        self.products.push(product);
    }

    fn resolve_index(&self, item: &OrderItem) -> Option<usize> {
        if let Some(fp) = non_empty(item.variant_fingerprint.as_deref()) {
            if let Some(&idx) = self.by_fingerprint.get(fp) {
                return Some(idx);
            }
        }
        if let Some(sku) = non_empty(item.sku.as_deref()) {
            if let Some(&idx) = self.by_sku.get(sku) {
                return Some(idx);
            }
        }
        if let Some(id) = non_empty(item.product_id.as_deref()) {
            if let Some(&idx) = self.by_id.get(id) {
                return Some(idx);
            }
        }
        None
    }

    pub fn resolve<'a>(&'a self, item: &OrderItem) -> Option<&'a Product> {
        self.resolve_index(item).map(|idx| &self.products[idx])
    }

    /// Resolves an item, inferring a placeholder product when nothing in the
    /// catalog matches and the order has actually been dispatched or resolved
    /// (`order_status.is_dispatched()`). Pending/booked/cancelled items are
    /// left unresolved since their line data is still editable upstream.
    pub fn resolve_or_infer(
        &mut self,
        item: &OrderItem,
        order_status: OrderStatus,
    ) -> Option<&Product> {
        if let Some(idx) = self.resolve_index(item) {
            return Some(&self.products[idx]);
        }
        if !order_status.is_dispatched() {
            return None;
        }

        let fingerprint = non_empty(item.variant_fingerprint.as_deref())
            .or_else(|| non_empty(item.sku.as_deref()))
            .unwrap_or(UNKNOWN_ID)
            .to_string();

        if self.seen.contains(&fingerprint) {
            // Already inferred earlier in this pass under a key the index
            // did not catch (e.g. blank sku on a later duplicate).
            if let Some(&idx) = self.by_fingerprint.get(&fingerprint) {
                return Some(&self.products[idx]);
            }
        }

        // A shared "unknown" id would collapse distinct inferred products
        // onto one history; key the id off the fingerprint instead.
        let id = non_empty(item.product_id.as_deref())
            .filter(|id| *id != UNKNOWN_ID)
            .unwrap_or(&fingerprint)
            .to_string();

        debug!(
            "inferring catalog entry '{}' (id {}) for unmatched item '{}'",
            fingerprint, id, item.product_name
        );

        let product = Product::inferred(
            id,
            item.product_name.clone(),
            fingerprint.clone(),
            item.sku.clone(),
        );
        self.seen.insert(fingerprint);
        self.push(product);
        Some(self.products.last().expect("just pushed"))
    }

    /// Immutable snapshot for the aggregator and for persistence.
    pub fn into_snapshot(self) -> Vec<Product> {
        self.products
    }
}
