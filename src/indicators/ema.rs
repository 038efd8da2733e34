/// Exponential moving average
use super::{Indicator, SeriesAccess};
use crate::error::{MarketDataError, Result};

/// EMA with smoothing factor `smoothing / (period + 1)`.
///
/// The first `period` values are the running mean of the targets seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ema {
    smoothing: u32,
    period: usize,
}

impl Ema {
    pub fn new(smoothing: u32, period: usize) -> Result<Self> {
        if period == 0 {
            return Err(MarketDataError::InvalidParameter(
                "EMA period must be at least 1".to_string(),
            ));
        }
        Ok(Ema { smoothing, period })
    }

    pub fn smoothing_factor(&self) -> f64 {
        self.smoothing as f64 / (self.period + 1) as f64
    }
}

impl Indicator for Ema {
    fn name(&self) -> String {
        format!("EMA {} {}", self.smoothing, self.period)
    }

    fn apply(&self, series: &mut dyn SeriesAccess) {
        let name = self.name();
        let sf = self.smoothing_factor();
        let mut sum = 0.0;

        for i in 0..series.len() {
            let value = if i < self.period {
                sum += series.target(i);
                sum / (i + 1) as f64
            } else {
                series.target(i) * sf + series.indicator(i - 1, &name) * (1.0 - sf)
            };
            series.set(i, &name, value);
        }
    }
}
