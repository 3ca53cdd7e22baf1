use serde::{Deserialize, Serialize};

/// Tax and fee knobs applied on top of seat prices. Promotional discounts
/// are out of scope; the discount line is carried at zero so the monetary
/// breakdown stays stable for clients.
#[derive(Debug, Clone, Deserialize)]
pub struct PricingPolicy {
    pub tax_rate: f64,
    pub booking_fee_minor: i64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: 0.0,
            booking_fee_minor: 0,
        }
    }
}

/// Monetary breakdown of a booking, in minor currency units.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Totals {
    pub subtotal_minor: i64,
    pub discount_minor: i64,
    pub tax_minor: i64,
    pub fee_minor: i64,
    pub total_minor: i64,
}

impl Totals {
    pub fn compute(unit_prices_minor: &[i64], policy: &PricingPolicy) -> Self {
        let subtotal_minor: i64 = unit_prices_minor.iter().sum();
        let discount_minor = 0;
        let tax_minor = (subtotal_minor as f64 * policy.tax_rate).round() as i64;
        let fee_minor = policy.booking_fee_minor;
        Self {
            subtotal_minor,
            discount_minor,
            tax_minor,
            fee_minor,
            total_minor: subtotal_minor - discount_minor + tax_minor + fee_minor,
        }
    }

    pub fn zero() -> Self {
        Self {
            subtotal_minor: 0,
            discount_minor: 0,
            tax_minor: 0,
            fee_minor: 0,
            total_minor: 0,
        }
    }
}
