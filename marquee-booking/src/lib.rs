pub mod ledger;
pub mod number;
pub mod totals;

pub use ledger::{ReservationLedger, ReservationPolicy};
pub use number::next_booking_number;
pub use totals::{PricingPolicy, Totals};
