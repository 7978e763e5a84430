//! Family discount tiers.
//!
//! The first child in a family pays full price, the second gets 5% off and
//! every later child 10%.

/// `family_order` value for a student with no relatives.
pub const SINGLETON_FAMILY_ORDER: i32 = 999;

/// Discount percentage for a zero-based rank inside a family.
#[must_use]
pub const fn discount_for_rank(rank: usize) -> f64 {
    match rank {
        0 => 0.0,
        1 => 5.0,
        _ => 10.0,
    }
}

/// Discount percentage for a stored `family_order`.
///
/// The singleton sentinel and any out-of-range value earn no discount.
#[must_use]
pub fn discount_for_family_order(family_order: i32) -> f64 {
    if family_order == SINGLETON_FAMILY_ORDER {
        return 0.0;
    }
    usize::try_from(family_order).map_or(0.0, discount_for_rank)
}

/// `total * (1 - discount / 100)`
#[must_use]
pub fn discounted_amount(total_amount: f64, discount_percentage: f64) -> f64 {
    total_amount * (1.0 - discount_percentage / 100.0)
}

/// Whether a stored discount needs rewriting to match `expected`.
#[must_use]
pub fn discount_differs(stored: f64, expected: f64) -> bool {
    (stored - expected).abs() > f64::EPSILON
}
