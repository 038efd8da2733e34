/// Moving average convergence/divergence
use super::{Ema, Indicator, SeriesAccess};
use crate::error::{MarketDataError, Result};

/// Short EMA(2, short) minus long EMA(2, long).
///
/// Values are only written from offset `long_period` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Macd {
    short: Ema,
    long: Ema,
    short_period: usize,
    long_period: usize,
}

impl Macd {
    pub fn new(short_period: usize, long_period: usize) -> Result<Self> {
        if short_period >= long_period {
            return Err(MarketDataError::InvalidParameter(format!(
                "MACD short period ({}) must be less than long period ({})",
                short_period, long_period
            )));
        }

        Ok(Macd {
            short: Ema::new(2, short_period)?,
            long: Ema::new(2, long_period)?,
            short_period,
            long_period,
        })
    }
}

impl Indicator for Macd {
    fn name(&self) -> String {
        format!("MACD {} {}", self.short_period, self.long_period)
    }

    fn apply(&self, series: &mut dyn SeriesAccess) {
        let short = scratch_values(&self.short, series);
        let long = scratch_values(&self.long, series);
        let name = self.name();

        for i in self.long_period..series.len() {
            series.set(i, &name, short[i] - long[i]);
        }
    }
}

/// Runs an EMA into a private buffer so it never lands in the store
fn scratch_values(ema: &Ema, series: &dyn SeriesAccess) -> Vec<f64> {
    let mut scratch = Scratch {
        source: series,
        values: vec![0.0; series.len()],
    };
    ema.apply(&mut scratch);
    scratch.values
}

struct Scratch<'a> {
    source: &'a dyn SeriesAccess,
    values: Vec<f64>,
}

impl SeriesAccess for Scratch<'_> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn target(&self, offset: usize) -> f64 {
        self.source.target(offset)
    }

    fn indicator(&self, offset: usize, _name: &str) -> f64 {
        self.values[offset]
    }

    fn set(&mut self, offset: usize, _name: &str, value: f64) {
        self.values[offset] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::tests::VecSeries;
    use approx::assert_relative_eq;

    #[test]
    fn test_short_must_be_less_than_long() {
        assert!(Macd::new(26, 12).is_err());
        assert!(Macd::new(12, 12).is_err());
        assert!(Macd::new(0, 12).is_err());
        assert!(Macd::new(12, 26).is_ok());
    }

    #[test]
    fn test_values_start_at_long_period() {
        let macd = Macd::new(2, 3).unwrap();
        let targets = [10.0, 20.0, 30.0, 40.0, 50.0];
        let mut series = VecSeries::new(&targets);
        macd.apply(&mut series);

        let values = series.values("MACD 2 3");
        assert_eq!(&values[..3], &[None, None, None]);

        // short EMA(2,2): 10, 15, 30*2/3 + 15/3 = 25, 40*2/3 + 25/3 = 35
        // long EMA(2,3):  10, 15, 20, 30
        assert_relative_eq!(values[3].unwrap(), 35.0 - 30.0, epsilon = 1e-9);
        assert!(values[4].is_some());
    }

    #[test]
    fn test_does_not_store_component_emas() {
        let macd = Macd::new(2, 3).unwrap();
        let mut series = VecSeries::new(&[1.0, 2.0, 3.0, 4.0]);
        macd.apply(&mut series);

        assert_eq!(series.values.len(), 1);
        assert!(series.values.contains_key("MACD 2 3"));
    }
}
