//! Profit, gas and confidence arithmetic
//!
//! Pure functions so the gating rules can be tested without a venue in sight.

use alloy_primitives::{Address, U256};

use crate::tokens::{from_base_units, to_base_units};

/// Slack on the percent floor so an exact-boundary spread survives float rounding
const PCT_TOLERANCE: f64 = 1e-9;

/// A 5% spread maps to full spread confidence
const FULL_CONFIDENCE_SPREAD_PCT: f64 = 5.0;

/// Volatility and congestion never push their factor below this
const FACTOR_FLOOR: f64 = 0.2;

const NATIVE_DECIMALS: u8 = 18;

/// `(sell - buy) / buy * 100`
pub fn spread_pct(buy_price: f64, sell_price: f64) -> f64 {
    if buy_price <= 0.0 || !buy_price.is_finite() || !sell_price.is_finite() {
        return 0.0;
    }
    (sell_price - buy_price) / buy_price * 100.0
}

pub fn meets_min_pct(spread_pct: f64, min_pct: f64) -> bool {
    spread_pct + PCT_TOLERANCE >= min_pct
}

/// `gas_units * (gas_price + priority_fee)` in wei
pub fn gas_cost(gas_units: u64, gas_price: u128, priority_fee: u128) -> U256 {
    U256::from(gas_units) * U256::from(gas_price.saturating_add(priority_fee))
}

/// Cost with a percentage safety margin on top
pub fn with_buffer(cost: U256, buffer_pct: f64) -> U256 {
    let pct = if buffer_pct.is_finite() { buffer_pct.max(0.0) } else { 0.0 };
    let ppm = (1_000_000.0 * (1.0 + pct / 100.0)).round() as u64;
    cost * U256::from(ppm) / U256::from(1_000_000u64)
}

/// Amounts of a one-whole-unit sample trade, all in smallest units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTrade {
    /// Quote spent on the buy leg
    pub quote_in: U256,
    /// Base bought, then sold
    pub base_amount: U256,
    /// Quote received on the sell leg
    pub quote_out: U256,
}

impl SampleTrade {
    /// Buy one whole base at `buy_price`, sell it at `sell_price`
    pub fn new(buy_price: f64, sell_price: f64, base_decimals: u8, quote_decimals: u8) -> Self {
        Self {
            quote_in: to_base_units(buy_price, quote_decimals),
            base_amount: U256::from(10u64).pow(U256::from(base_decimals)),
            quote_out: to_base_units(sell_price, quote_decimals),
        }
    }

    /// Gross profit in quote units; zero if the legs lose
    pub fn profit(&self) -> U256 {
        self.quote_out.saturating_sub(self.quote_in)
    }
}

/// Express a quote-denominated amount in native wei.
///
/// Quote is native: taken as is (rescaled to 18 decimals). Base is native:
/// converted at `sell_price`. Neither: rescaled to 18 decimals as a
/// wei-equivalent.
pub fn to_native_wei(
    amount: U256,
    quote: Address,
    quote_decimals: u8,
    base: Address,
    sell_price: f64,
    native: Option<Address>,
) -> U256 {
    if native == Some(base) && native != Some(quote) {
        if sell_price <= 0.0 || !sell_price.is_finite() {
            return U256::ZERO;
        }
        let whole_native = from_base_units(amount, quote_decimals) / sell_price;
        return to_base_units(whole_native, NATIVE_DECIMALS);
    }
    rescale(amount, quote_decimals, NATIVE_DECIMALS)
}

pub fn rescale(amount: U256, from_decimals: u8, to_decimals: u8) -> U256 {
    let ten = U256::from(10u64);
    if to_decimals >= from_decimals {
        amount.saturating_mul(ten.pow(U256::from(to_decimals - from_decimals)))
    } else {
        amount / ten.pow(U256::from(from_decimals - to_decimals))
    }
}

fn side_liquidity(liquidity_usd: Option<f64>, min_liquidity_usd: f64) -> f64 {
    match liquidity_usd {
        Some(l) if l.is_finite() && min_liquidity_usd > 0.0 => (l.max(0.0) / min_liquidity_usd).min(1.0),
        _ => 1.0,
    }
}

/// Product of spread, volatility, liquidity and congestion factors, in [0, 1]
pub fn confidence(
    spread_pct: f64,
    volatility: f64,
    congestion: f64,
    buy_liquidity_usd: Option<f64>,
    sell_liquidity_usd: Option<f64>,
    min_liquidity_usd: f64,
) -> f64 {
    let spread = if spread_pct.is_finite() {
        (spread_pct / FULL_CONFIDENCE_SPREAD_PCT).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let volatility = if volatility.is_finite() {
        (1.0 - volatility / 100.0).clamp(FACTOR_FLOOR, 1.0)
    } else {
        FACTOR_FLOOR
    };
    let congestion = if congestion.is_finite() {
        (1.0 - congestion / 100.0).clamp(FACTOR_FLOOR, 1.0)
    } else {
        FACTOR_FLOOR
    };
    let liquidity = (side_liquidity(buy_liquidity_usd, min_liquidity_usd)
        + side_liquidity(sell_liquidity_usd, min_liquidity_usd))
        / 2.0;

    let score = spread * volatility * liquidity * congestion;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WETH: Address = Address::repeat_byte(0xee);
    const USDC: Address = Address::repeat_byte(0x06);
    const DAI: Address = Address::repeat_byte(0xda);

    #[test]
    fn test_spread() {
        assert!((spread_pct(2000.0, 2010.0) - 0.5).abs() < 1e-12);
        assert_eq!(spread_pct(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_min_pct_boundary() {
        assert!(meets_min_pct(spread_pct(2000.0, 2001.0), 0.05));
        assert!(!meets_min_pct(spread_pct(2000.0, 2000.8), 0.05));
    }

    #[test]
    fn test_gas_and_buffer() {
        let cost = gas_cost(300_000, 1_000_000_000, 0);
        assert_eq!(cost, U256::from(300_000_000_000_000u64));
        assert_eq!(with_buffer(cost, 50.0), U256::from(450_000_000_000_000u64));
        assert_eq!(with_buffer(cost, -5.0), cost);
    }

    #[test]
    fn test_sample_trade_weth_usdc() {
        let trade = SampleTrade::new(2000.0, 2010.0, 18, 6);
        assert_eq!(trade.quote_in, U256::from(2_000_000_000u64));
        assert_eq!(trade.base_amount, U256::from(10u64).pow(U256::from(18)));
        assert_eq!(trade.profit(), U256::from(10_000_000u64));
        assert_eq!(SampleTrade::new(2010.0, 2000.0, 18, 6).profit(), U256::ZERO);
    }

    #[test]
    fn test_native_valuation() {
        // 10 USDC of profit on WETH priced at 2000 -> 0.005 WETH
        let wei = to_native_wei(U256::from(10_000_000u64), USDC, 6, WETH, 2000.0, Some(WETH));
        assert_eq!(wei, U256::from(5_000_000_000_000_000u64));

        // Quote already native
        let wei = to_native_wei(U256::from(1234u64), WETH, 18, USDC, 0.0005, Some(WETH));
        assert_eq!(wei, U256::from(1234u64));

        // No native side: rescaled wei-equivalent
        let wei = to_native_wei(U256::from(1_000_000u64), USDC, 6, DAI, 1.0, Some(WETH));
        assert_eq!(wei, U256::from(10u64).pow(U256::from(18)));
    }

    #[test]
    fn test_confidence_factors() {
        // 5% spread, calm market, no liquidity data -> full confidence
        assert!((confidence(5.0, 0.0, 0.0, None, None, 100_000.0) - 1.0).abs() < 1e-12);
        // 0.5% spread -> 0.1
        assert!((confidence(0.5, 0.0, 0.0, None, None, 100_000.0) - 0.1).abs() < 1e-12);
        // Extreme volatility is floored at 0.2
        assert!((confidence(5.0, 100.0, 0.0, None, None, 100_000.0) - 0.2).abs() < 1e-12);
        // Half liquidity on one side only -> 0.75
        assert!((confidence(5.0, 0.0, 0.0, Some(50_000.0), None, 100_000.0) - 0.75).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_confidence_in_unit_interval(
            spread in prop::num::f64::ANY,
            vol in prop::num::f64::ANY,
            cong in prop::num::f64::ANY,
            buy in prop::option::of(prop::num::f64::ANY),
            sell in prop::option::of(prop::num::f64::ANY),
            min_liq in prop::num::f64::ANY,
        ) {
            let c = confidence(spread, vol, cong, buy, sell, min_liq);
            prop_assert!((0.0..=1.0).contains(&c));
        }
    }
}
