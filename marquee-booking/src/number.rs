use chrono::Utc;
use rand::Rng;

/// Human-readable booking number: "BK" + millisecond timestamp + a random
/// suffix. Globally unique in practice; the database carries a unique
/// constraint as the actual guarantee.
pub fn next_booking_number() -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("BK{}{:04}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_number_shape() {
        let n = next_booking_number();
        assert!(n.starts_with("BK"));
        assert!(n.len() > 10);
        assert!(n[2..].chars().all(|c| c.is_ascii_digit()));
    }
}
