/// Simple moving average
use super::{Indicator, SeriesAccess};
use crate::error::{MarketDataError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(MarketDataError::InvalidParameter(
                "SMA period must be at least 1".to_string(),
            ));
        }
        Ok(Sma { period })
    }
}

impl Indicator for Sma {
    fn name(&self) -> String {
        format!("SMA {}", self.period)
    }

    // Running mean until `period` targets are seen, rolling window after
    fn apply(&self, series: &mut dyn SeriesAccess) {
        let name = self.name();
        let mut sum = 0.0;

        for i in 0..series.len() {
            sum += series.target(i);
            let count = if i < self.period {
                i + 1
            } else {
                sum -= series.target(i - self.period);
                self.period
            };
            series.set(i, &name, sum / count as f64);
        }
    }
}
