// coffer/src/amount.rs
//! Fixed-point constraints on posted magnitudes: strictly positive, at
//! most 8 fractional digits, at most 10^7 per posting. All arithmetic is
//! exact decimal; floats never touch stored values.

use rust_decimal::Decimal;

use crate::error::WalletError;

pub const MAX_FRACTIONAL_DIGITS: u32 = 8;

pub fn max_magnitude() -> Decimal {
    Decimal::new(10_000_000, 0)
}

/// Smallest representable posting, 1e-8.
pub fn min_magnitude() -> Decimal {
    Decimal::new(1, MAX_FRACTIONAL_DIGITS)
}

/// Absolute tolerance used by the audit comparison.
pub fn audit_tolerance() -> Decimal {
    Decimal::new(1, MAX_FRACTIONAL_DIGITS)
}

pub fn validate_magnitude(amount: Decimal) -> Result<(), WalletError> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::validation(
            "amount",
            "must be strictly positive",
        ));
    }
    if amount.normalize().scale() > MAX_FRACTIONAL_DIGITS {
        return Err(WalletError::validation(
            "amount",
            format!("at most {} fractional digits", MAX_FRACTIONAL_DIGITS),
        ));
    }
    if amount > max_magnitude() {
        return Err(WalletError::validation(
            "amount",
            format!("must not exceed {}", max_magnitude()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minimum_positive_amount_is_accepted() {
        assert!(validate_magnitude(dec!(0.00000001)).is_ok());
        assert!(validate_magnitude(min_magnitude()).is_ok());
    }

    #[test]
    fn zero_and_negative_are_rejected() {
        assert!(matches!(
            validate_magnitude(Decimal::ZERO),
            Err(WalletError::Validation { field: "amount", .. })
        ));
        assert!(validate_magnitude(dec!(-1)).is_err());
    }

    #[test]
    fn excess_precision_is_rejected() {
        assert!(validate_magnitude(dec!(0.000000001)).is_err());
        // Trailing zeros beyond 8 digits normalize away and pass.
        assert!(validate_magnitude(dec!(1.000000000)).is_ok());
    }

    #[test]
    fn magnitude_cap_is_inclusive() {
        assert!(validate_magnitude(dec!(10000000)).is_ok());
        assert!(validate_magnitude(dec!(10000000.00000001)).is_err());
    }
}
