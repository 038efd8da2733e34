/// Derived per-bar series computed over each ticker's history
pub mod ema;
pub mod engine;
pub mod macd;
pub mod sma;

pub use ema::Ema;
pub use engine::IndicatorEngine;
pub use macd::Macd;
pub use sma::Sma;

use crate::error::Result;
use crate::types::IndicatorSpec;

/// Value read for an offset whose row has no bar for the ticker
pub const MISSING_BAR: f64 = -1.0;

/// View over one ticker's row window, offsets relative to its first row.
///
/// Reads at offsets without a bar yield [`MISSING_BAR`]; writes there are
/// dropped.
pub trait SeriesAccess {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw value the indicators are computed from (adjusted close)
    fn target(&self, offset: usize) -> f64;

    /// Previously computed indicator value; 0.0 if not computed yet
    fn indicator(&self, offset: usize, name: &str) -> f64;

    fn set(&mut self, offset: usize, name: &str, value: f64);
}

pub trait Indicator: Send + Sync {
    /// Key the values are stored under; unique per parameterization
    fn name(&self) -> String;

    fn apply(&self, series: &mut dyn SeriesAccess);
}

/// Build indicators from config, failing on invalid parameters
pub fn build_indicators(specs: &[IndicatorSpec]) -> Result<Vec<Box<dyn Indicator>>> {
    specs
        .iter()
        .map(|spec| -> Result<Box<dyn Indicator>> {
            let indicator: Box<dyn Indicator> = match *spec {
                IndicatorSpec::Ema { smoothing, period } => Box::new(Ema::new(smoothing, period)?),
                IndicatorSpec::Macd {
                    short_period,
                    long_period,
                } => Box::new(Macd::new(short_period, long_period)?),
                IndicatorSpec::Sma { period } => Box::new(Sma::new(period)?),
            };
            Ok(indicator)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory series; `None` targets model rows without a bar
    pub(crate) struct VecSeries {
        pub targets: Vec<Option<f64>>,
        pub values: HashMap<String, Vec<Option<f64>>>,
    }

    impl VecSeries {
        pub fn new(targets: &[f64]) -> Self {
            Self::sparse(targets.iter().map(|&t| Some(t)).collect())
        }

        pub fn sparse(targets: Vec<Option<f64>>) -> Self {
            VecSeries {
                targets,
                values: HashMap::new(),
            }
        }

        pub fn values(&self, name: &str) -> Vec<Option<f64>> {
            self.values
                .get(name)
                .cloned()
                .unwrap_or_else(|| vec![None; self.targets.len()])
        }
    }

    impl SeriesAccess for VecSeries {
        fn len(&self) -> usize {
            self.targets.len()
        }

        fn target(&self, offset: usize) -> f64 {
            self.targets[offset].unwrap_or(MISSING_BAR)
        }

        fn indicator(&self, offset: usize, name: &str) -> f64 {
            if self.targets[offset].is_none() {
                return MISSING_BAR;
            }
            self.values
                .get(name)
                .and_then(|values| values[offset])
                .unwrap_or(0.0)
        }

        fn set(&mut self, offset: usize, name: &str, value: f64) {
            if self.targets[offset].is_none() {
                return;
            }
            let len = self.targets.len();
            self.values
                .entry(name.to_string())
                .or_insert_with(|| vec![None; len])[offset] = Some(value);
        }
    }

    #[test]
    fn test_build_indicators_from_specs() {
        let specs = vec![
            IndicatorSpec::Ema {
                smoothing: 2,
                period: 10,
            },
            IndicatorSpec::Macd {
                short_period: 12,
                long_period: 26,
            },
            IndicatorSpec::Sma { period: 20 },
        ];

        let names: Vec<String> = build_indicators(&specs)
            .unwrap()
            .iter()
            .map(|indicator| indicator.name())
            .collect();
        assert_eq!(names, vec!["EMA 2 10", "MACD 12 26", "SMA 20"]);
    }

    #[test]
    fn test_build_indicators_rejects_bad_macd() {
        let specs = vec![IndicatorSpec::Macd {
            short_period: 26,
            long_period: 12,
        }];

        let err = build_indicators(&specs).err().unwrap();
        assert!(err.is_fatal());
    }
}
