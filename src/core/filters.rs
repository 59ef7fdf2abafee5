use crate::models::{Listing, SearchCriteria};

/// Hard gate applied before any scoring
///
/// A criteria set without a transaction type is malformed and fails closed.
#[inline]
pub fn passes_transaction_gate(criteria: &SearchCriteria, listing: &Listing<'_>) -> bool {
    criteria.transaction == Some(listing.transaction)
}

/// Fold a label for comparison: trimmed, lowercase, common French accents removed
pub fn normalize_label(value: &str) -> String {
    value
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

#[inline]
pub fn same_label(a: &str, b: &str) -> bool {
    normalize_label(a) == normalize_label(b)
}

/// Whether `value` matches any label in `set`
pub fn contains_label(set: &[String], value: &str) -> bool {
    let needle = normalize_label(value);
    set.iter().any(|label| normalize_label(label) == needle)
}

/// Fit of `value` against an inclusive `[min, max]` range (either bound optional)
///
/// 1.0 inside the range, decaying linearly to 0.0 at `tolerance` (a fraction
/// of the violated bound) outside it. `None` when the range is unbounded.
pub fn range_fit(value: u64, min: Option<u64>, max: Option<u64>, tolerance: f64) -> Option<f64> {
    if min.is_none() && max.is_none() {
        return None;
    }

    // Inverted ranges are treated as their normalized form
    let (min, max) = match (min, max) {
        (Some(lo), Some(hi)) if lo > hi => (Some(hi), Some(lo)),
        bounds => bounds,
    };

    let value = value as f64;
    let miss = match (min, max) {
        (Some(lo), _) if value < lo as f64 => (lo as f64 - value) / (lo as f64).max(1.0),
        (_, Some(hi)) if value > hi as f64 => (value - hi as f64) / (hi as f64).max(1.0),
        _ => return Some(1.0),
    };

    if tolerance <= 0.0 || miss >= tolerance {
        return Some(0.0);
    }

    // Near-misses earn at most half credit
    Some(0.5 * (1.0 - miss / tolerance))
}

/// Fit of a count (bedrooms) against a range: exact 1.0, off by one 0.5
pub fn count_fit(value: u32, min: Option<u32>, max: Option<u32>) -> Option<f64> {
    if min.is_none() && max.is_none() {
        return None;
    }

    let lo = min.unwrap_or(0);
    let hi = max.unwrap_or(u32::MAX);
    let (lo, hi) = if lo > hi { (hi, lo) } else { (lo, hi) };

    if (lo..=hi).contains(&value) {
        Some(1.0)
    } else if value.saturating_add(1) == lo || value == hi.saturating_add(1) {
        Some(0.5)
    } else {
        Some(0.0)
    }
}
