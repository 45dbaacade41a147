//! Exponential Moving Average of closes.
//!
//! k = 2/(n+1), seeded with the SMA of the first n closes, then
//! EMA[i] = C[i]*k + EMA[i-1]*(1-k). The first (n-1) points are invalid.

use crate::domain::bar::Bar;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType};

pub fn calculate_ema(bars: &[Bar], period: usize) -> IndicatorSeries {
    if period == 0 || bars.is_empty() {
        return IndicatorSeries::empty(IndicatorType::Ema(period));
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut values = Vec::with_capacity(bars.len());
    let mut ema = 0.0;
    let mut seed_sum = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        if i < period - 1 {
            seed_sum += bar.close;
            values.push(IndicatorPoint::invalid(bar.timestamp));
            continue;
        }
        ema = if i == period - 1 {
            (seed_sum + bar.close) / period as f64
        } else {
            bar.close * k + ema * (1.0 - k)
        };
        values.push(IndicatorPoint::valid(bar.timestamp, ema));
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values,
    }
}
