// =============================================================================
// Fee schedule — brokerage, exchange, SEBI, stamp, STT, GST
// =============================================================================
//
// Intraday schedule per instrument class. Rates are fractions of notional.
//
//   total = brokerage(capped) + exchange txn + SEBI + stamp(buy only)
//         + STT(sell side for intraday/derivatives) + 18% GST on
//           (brokerage + exchange txn)
//
// The tables mirror the NSE/BSE discount-broker schedule; they are
// parameterised per product so a profile can retune them without touching
// the accounting code.
// =============================================================================

use crate::types::{ProductType, Side};

/// Flat brokerage cap per executed order, in rupees.
const BROKERAGE_CAP: f64 = 20.0;
/// Percentage brokerage before the cap.
const BROKERAGE_RATE: f64 = 0.0003;
/// SEBI turnover fee: 10 rupees per crore.
const SEBI_RATE: f64 = 0.000001;
/// GST on brokerage + exchange transaction charges.
const GST_RATE: f64 = 0.18;

/// Per-product rate row.
struct RateRow {
    /// Exchange transaction charges.
    exchange_txn: f64,
    /// Stamp duty, charged on the buy side only.
    stamp_buy: f64,
    /// Securities transaction tax, charged on the sell side.
    stt_sell: f64,
    /// True when brokerage is a flat fee rather than percentage-capped.
    flat_brokerage: bool,
}

fn rates(product: ProductType, exchange: &str) -> RateRow {
    let bse = exchange.starts_with('B');
    match product {
        ProductType::Equity => RateRow {
            exchange_txn: if bse { 0.0000375 } else { 0.0000325 },
            stamp_buy: 0.00003,
            stt_sell: 0.00025,
            flat_brokerage: false,
        },
        ProductType::IndexOption | ProductType::StockOption => RateRow {
            exchange_txn: if bse { 0.000325 } else { 0.00035 },
            stamp_buy: 0.00003,
            stt_sell: 0.000625,
            flat_brokerage: true,
        },
        ProductType::IndexFuture | ProductType::StockFuture => RateRow {
            exchange_txn: 0.0000188,
            stamp_buy: 0.00002,
            stt_sell: 0.000125,
            flat_brokerage: false,
        },
    }
}

/// Itemised fees for one executed order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeBreakdown {
    pub brokerage: f64,
    pub exchange_txn: f64,
    pub sebi: f64,
    pub stamp: f64,
    pub stt: f64,
    pub gst: f64,
}

impl FeeBreakdown {
    pub fn total(&self) -> f64 {
        self.brokerage + self.exchange_txn + self.sebi + self.stamp + self.stt + self.gst
    }
}

/// Full fee breakdown for an order of `notional` rupees.
pub fn fee_breakdown(
    notional: f64,
    side: Side,
    product: ProductType,
    exchange: &str,
) -> FeeBreakdown {
    let notional = notional.max(0.0);
    let row = rates(product, exchange);

    let brokerage = if row.flat_brokerage {
        BROKERAGE_CAP
    } else {
        (notional * BROKERAGE_RATE).min(BROKERAGE_CAP)
    };
    let exchange_txn = notional * row.exchange_txn;
    let sebi = notional * SEBI_RATE;
    let stamp = if side == Side::Buy {
        notional * row.stamp_buy
    } else {
        0.0
    };
    let stt = if side == Side::Sell {
        notional * row.stt_sell
    } else {
        0.0
    };
    let gst = (brokerage + exchange_txn) * GST_RATE;

    FeeBreakdown {
        brokerage,
        exchange_txn,
        sebi,
        stamp,
        stt,
        gst,
    }
}

/// Total fees for one executed order.
pub fn compute_fees(notional: f64, side: Side, product: ProductType, exchange: &str) -> f64 {
    fee_breakdown(notional, side, product, exchange).total()
}
