//! Pure position math
//!
//! Side-effect-free functions over Decimal. Percent SL/TP conversion
//! happens once at position creation; stored levels are absolute prices
//! and the trigger predicates compare against them literally.

use rust_decimal::Decimal;

use super::models::Side;

const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Position value in the quote asset
#[inline(always)]
pub fn notional(qty: Decimal, price: Decimal) -> Decimal {
    qty * price
}

/// Fee charged on a notional at the given fractional rate
#[inline(always)]
pub fn fee(notional: Decimal, rate: Decimal) -> Decimal {
    notional * rate
}

/// Price move PnL, before fees and funding
#[inline(always)]
pub fn gross_pnl(side: Side, entry_price: Decimal, price: Decimal, qty: Decimal) -> Decimal {
    match side {
        Side::Long => (price - entry_price) * qty,
        Side::Short => (entry_price - price) * qty,
    }
}

/// Unrealized PnL at the given mark price
#[inline(always)]
pub fn unrealized_pnl(side: Side, entry_price: Decimal, mark_price: Decimal, qty: Decimal) -> Decimal {
    gross_pnl(side, entry_price, mark_price, qty)
}

/// Unrealized PnL as a percentage of the entry notional, zero when the
/// notional is zero
#[inline(always)]
pub fn pnl_percent(pnl: Decimal, qty: Decimal, entry_price: Decimal) -> Decimal {
    let entry_notional = qty * entry_price;
    if entry_notional.is_zero() {
        Decimal::ZERO
    } else {
        pnl / entry_notional * HUNDRED
    }
}

/// Stop-loss level `percent` away from the entry, on the losing side
#[inline(always)]
pub fn sl_price_from_percent(side: Side, entry_price: Decimal, percent: Decimal) -> Decimal {
    let fraction = percent / HUNDRED;
    match side {
        Side::Long => entry_price * (Decimal::ONE - fraction),
        Side::Short => entry_price * (Decimal::ONE + fraction),
    }
}

/// Take-profit level `percent` away from the entry, on the winning side
#[inline(always)]
pub fn tp_price_from_percent(side: Side, entry_price: Decimal, percent: Decimal) -> Decimal {
    let fraction = percent / HUNDRED;
    match side {
        Side::Long => entry_price * (Decimal::ONE + fraction),
        Side::Short => entry_price * (Decimal::ONE - fraction),
    }
}

/// Stop-loss predicate; false when no stop is set
#[inline(always)]
pub fn should_trigger_sl(side: Side, mark_price: Decimal, sl: Option<Decimal>) -> bool {
    match (side, sl) {
        (Side::Long, Some(sl)) => mark_price <= sl,
        (Side::Short, Some(sl)) => mark_price >= sl,
        (_, None) => false,
    }
}

/// Take-profit predicate; false when no target is set
#[inline(always)]
pub fn should_trigger_tp(side: Side, mark_price: Decimal, tp: Option<Decimal>) -> bool {
    match (side, tp) {
        (Side::Long, Some(tp)) => mark_price >= tp,
        (Side::Short, Some(tp)) => mark_price <= tp,
        (_, None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_notional_and_fee() {
        assert_eq!(notional(dec!(10), dec!(100)), dec!(1000));
        assert_eq!(fee(dec!(1000), dec!(0.0004)), dec!(0.4));
        assert_eq!(fee(dec!(1100), dec!(0.0004)), dec!(0.44));
    }

    #[test]
    fn test_gross_pnl_sides() {
        assert_eq!(gross_pnl(Side::Long, dec!(100), dec!(110), dec!(10)), dec!(100));
        assert_eq!(gross_pnl(Side::Long, dec!(100), dec!(95), dec!(10)), dec!(-50));
        assert_eq!(gross_pnl(Side::Short, dec!(50), dec!(52), dec!(2)), dec!(-4));
        assert_eq!(gross_pnl(Side::Short, dec!(50), dec!(45), dec!(2)), dec!(10));
    }

    #[test]
    fn test_pnl_percent() {
        let pnl = unrealized_pnl(Side::Long, dec!(100), dec!(110), dec!(10));
        assert_eq!(pnl_percent(pnl, dec!(10), dec!(100)), dec!(10));
        assert_eq!(pnl_percent(dec!(5), Decimal::ZERO, dec!(100)), Decimal::ZERO);
    }

    #[test]
    fn test_percent_conversion() {
        assert_eq!(sl_price_from_percent(Side::Long, dec!(100), dec!(5)), dec!(95.00));
        assert_eq!(tp_price_from_percent(Side::Long, dec!(100), dec!(10)), dec!(110.00));
        assert_eq!(sl_price_from_percent(Side::Short, dec!(100), dec!(5)), dec!(105.00));
        assert_eq!(tp_price_from_percent(Side::Short, dec!(100), dec!(10)), dec!(90.00));
    }

    #[test]
    fn test_trigger_predicates() {
        // Long stops fire at or below the level, targets at or above.
        assert!(should_trigger_sl(Side::Long, dec!(95), Some(dec!(95))));
        assert!(should_trigger_sl(Side::Long, dec!(94.9), Some(dec!(95))));
        assert!(!should_trigger_sl(Side::Long, dec!(95.1), Some(dec!(95))));
        assert!(should_trigger_tp(Side::Long, dec!(110), Some(dec!(110))));
        assert!(!should_trigger_tp(Side::Long, dec!(109.9), Some(dec!(110))));

        // Short is the mirror image.
        assert!(should_trigger_sl(Side::Short, dec!(52), Some(dec!(52))));
        assert!(!should_trigger_sl(Side::Short, dec!(51.9), Some(dec!(52))));
        assert!(should_trigger_tp(Side::Short, dec!(45), Some(dec!(45))));
        assert!(!should_trigger_tp(Side::Short, dec!(45.1), Some(dec!(45))));

        // No level set, never fires.
        assert!(!should_trigger_sl(Side::Long, dec!(1), None));
        assert!(!should_trigger_tp(Side::Short, dec!(1), None));
    }

    #[test]
    fn test_percent_level_round_trip() {
        // The stored level itself satisfies the trigger, one favorable step
        // past it does not.
        let eps = dec!(0.000001);
        for side in [Side::Long, Side::Short] {
            for pct in [dec!(1), dec!(5), dec!(12.5)] {
                let entry = dec!(250);
                let sl = sl_price_from_percent(side, entry, pct);
                assert!(should_trigger_sl(side, sl, Some(sl)));
                let favorable = match side {
                    Side::Long => sl + eps,
                    Side::Short => sl - eps,
                };
                assert!(!should_trigger_sl(side, favorable, Some(sl)));

                let tp = tp_price_from_percent(side, entry, pct);
                assert!(should_trigger_tp(side, tp, Some(tp)));
                let short_of_target = match side {
                    Side::Long => tp - eps,
                    Side::Short => tp + eps,
                };
                assert!(!should_trigger_tp(side, short_of_target, Some(tp)));
            }
        }
    }
}
