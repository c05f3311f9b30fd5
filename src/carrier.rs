use crate::schema::StorefrontOrder;
use regex::Regex;

/// Detection profile for one courier: positive name keywords, exclusion
/// keywords naming the *other* known couriers, and the courier's
/// tracking-number format. All matching is lowercase substring except the
/// tracking pattern.
#[derive(Debug, Clone)]
pub struct CarrierProfile {
    pub courier: String,
    pub name_keywords: Vec<String>,
    pub exclusion_keywords: Vec<String>,
    pub tracking_pattern: Regex,
}

impl CarrierProfile {
    /// TCS, the courier whose API cannot list recent shipments and therefore
    /// needs storefront backfill. Tracking numbers are 12 digits.
    pub fn tcs() -> Self {
        Self {
            courier: "tcs".to_string(),
            name_keywords: vec!["tcs".to_string()],
            exclusion_keywords: [
                "postex",
                "post ex",
                "leopard",
                "trax",
                "m&p",
                "mnp",
                "callcourier",
                "call courier",
                "blueex",
                "blue ex",
                "daewoo",
                "rider",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            tracking_pattern: Regex::new(r"^\d{12}$").expect("static pattern"),
        }
    }
}

fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| haystack.contains(k.as_str()))
}

/// Pure classification: does this storefront order look like it was shipped
/// with `profile`'s courier? Checked in priority order — order tags, then the
/// fulfillment tracking company, then the tracking-number format — and every
/// rule is vetoed when another known courier's keyword appears anywhere in
/// the tag or tracking-company text.
pub fn matches_carrier(order: &StorefrontOrder, profile: &CarrierProfile) -> bool {
    let tags = order.tags.to_lowercase();
    let companies = order
        .fulfillments
        .iter()
        .filter_map(|f| f.tracking_company.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let implicates_other = contains_any(&tags, &profile.exclusion_keywords)
        || contains_any(&companies, &profile.exclusion_keywords);
    if implicates_other {
        return false;
    }

    // 1. Tag text names the courier.
    if contains_any(&tags, &profile.name_keywords) {
        return true;
    }

    // 2. Fulfillment tracking company names the courier.
    if contains_any(&companies, &profile.name_keywords) {
        return true;
    }

    // 3. Tracking-number format match, only reachable when no other courier
    // was implicated above.
    order
        .fulfillments
        .iter()
        .filter_map(|f| f.tracking_number.as_deref())
        .any(|tn| profile.tracking_pattern.is_match(tn.trim()))
}
