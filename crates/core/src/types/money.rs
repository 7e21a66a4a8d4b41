//! Decimal money arithmetic for cart lines.
//!
//! Prices travel as `rust_decimal::Decimal` so that totals never pick up
//! binary floating point drift. Currency is implicit: the cart server only
//! ever speaks one currency.

use rust_decimal::Decimal;

use super::cart::CartLine;

/// Total for `quantity` units at `unit_price`, or `None` if it does not fit
/// in a `Decimal`.
#[must_use]
pub fn checked_line_total(unit_price: Decimal, quantity: u32) -> Option<Decimal> {
    unit_price.checked_mul(Decimal::from(quantity))
}

/// Total for `quantity` units at `unit_price`, saturating at the `Decimal`
/// bounds.
///
/// This is the only place a line total is computed; totals received from the
/// server are never trusted after a local quantity change.
#[must_use]
pub fn line_total(unit_price: Decimal, quantity: u32) -> Decimal {
    checked_line_total(unit_price, quantity).unwrap_or_else(|| saturated(unit_price))
}

/// Sum of all line totals, saturating at the `Decimal` bounds.
#[must_use]
pub fn total_value<'a, I>(lines: I) -> Decimal
where
    I: IntoIterator<Item = &'a CartLine>,
{
    lines.into_iter().fold(Decimal::ZERO, |sum, line| {
        sum.checked_add(line.line_total)
            .unwrap_or_else(|| saturated(line.line_total))
    })
}

const fn saturated(sign_of: Decimal) -> Decimal {
    if sign_of.is_sign_negative() {
        Decimal::MIN
    } else {
        Decimal::MAX
    }
}

/// Unit price recovered from a line total, rounded to cents.
///
/// Used when a payload carries only the total. Returns `None` for a zero
/// quantity, where no unit price can be derived.
#[must_use]
pub fn unit_price_from_total(total: Decimal, quantity: u32) -> Option<Decimal> {
    if quantity == 0 {
        return None;
    }
    Some((total / Decimal::from(quantity)).round_dp(2))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::{CartLine, LineId};

    #[test]
    fn test_line_total_multiplies_exactly() {
        assert_eq!(line_total(Decimal::new(1999, 2), 3), Decimal::new(5997, 2));
        assert_eq!(line_total(Decimal::new(1999, 2), 0), Decimal::ZERO);
    }

    #[test]
    fn test_line_total_overflow() {
        assert_eq!(checked_line_total(Decimal::MAX, 2), None);
        assert_eq!(line_total(Decimal::MAX, 2), Decimal::MAX);
        assert_eq!(line_total(Decimal::MIN, 3), Decimal::MIN);
        assert_eq!(
            checked_line_total(Decimal::new(1999, 2), 3),
            Some(Decimal::new(5997, 2))
        );
    }

    #[test]
    fn test_total_value_saturates() {
        let lines = [
            CartLine::new(LineId::from(1), None, "a", 1, Decimal::MAX),
            CartLine::new(LineId::from(2), None, "b", 1, Decimal::MAX),
        ];
        assert_eq!(total_value(&lines), Decimal::MAX);
    }

    #[test]
    fn test_total_value_sums_lines() {
        let lines = [
            CartLine::new(LineId::from(1), None, "a", 2, Decimal::new(5000, 2)),
            CartLine::new(LineId::from(2), None, "b", 1, Decimal::new(1050, 2)),
        ];
        assert_eq!(total_value(&lines), Decimal::new(11050, 2));
    }

    #[test]
    fn test_unit_price_from_total() {
        assert_eq!(
            unit_price_from_total(Decimal::new(10000, 2), 2),
            Some(Decimal::new(5000, 2))
        );
        assert_eq!(unit_price_from_total(Decimal::ONE, 0), None);
    }
}
