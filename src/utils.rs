//! Money unit helpers. All stored monetary fields are integer micro-units
//! (1,000,000 per display unit); display-scale floats exist only at the HTTP
//! boundary and in outbound notifications.

/// Micro-units per display unit of the settlement currency.
pub const MICROS_PER_UNIT: i64 = 1_000_000;

/// Micro-units per display-milli (0.001 of a display unit).
pub const MILLI_MICROS: i64 = 1_000;

/// Convert a display amount to micro-units, quantized to 3 decimal places.
pub fn to_micros(display: f64) -> i64 {
    (display * 1_000.0).round() as i64 * MILLI_MICROS
}

/// Convert micro-units to a display amount rounded to 3 decimal places.
pub fn to_display(micros: i64) -> f64 {
    (micros as f64 / MICROS_PER_UNIT as f64 * 1_000.0).round() / 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizes_to_three_decimals() {
        assert_eq!(to_micros(10.0), 10_000_000);
        assert_eq!(to_micros(10.523), 10_523_000);
        assert_eq!(to_micros(1.23456), 1_235_000);
        assert_eq!(to_micros(0.1), 100_000);
    }

    #[test]
    fn display_round_trip() {
        assert_eq!(to_display(10_523_000), 10.523);
        assert_eq!(to_display(10_000_000), 10.0);
        assert_eq!(to_display(to_micros(47.999)), 47.999);
    }

    #[test]
    fn sub_milli_precision_is_dropped() {
        // Atomic offsets are whole display-millis, so nothing below 0.001
        // survives the boundary conversion.
        assert_eq!(to_micros(5.0004), 5_000_000);
        assert_eq!(to_micros(5.0006), 5_001_000);
    }
}
