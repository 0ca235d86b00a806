//! Development mode utilities for working without a sample archive
//!
//! When no historical data is at hand, use this module to generate
//! reproducible synthetic samples and candidate sites for demos and tests.
//! Values carry a smooth spatial pattern plus a seasonal term, so a trained
//! surrogate has real structure to find.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;

use crate::model::{CandidateSite, WaterSample};
use crate::surrogate::parameter_seed;

/// Bounding box the synthetic sites are drawn from, roughly mainland India.
pub const LATITUDE_RANGE: (f64, f64) = (8.0, 35.0);
pub const LONGITUDE_RANGE: (f64, f64) = (68.0, 97.0);

/// Configuration for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevMode {
    pub seed: u64,
    /// Year stamped on generated collection dates
    pub year: i32,
}

impl Default for DevMode {
    fn default() -> Self {
        Self::new(42)
    }
}

impl DevMode {
    pub fn new(seed: u64) -> Self {
        Self { seed, year: 2024 }
    }

    /// Synthetic samples for one parameter.
    ///
    /// `ph_value` and `tds_ppm` follow a spatial plus seasonal pattern with
    /// Gaussian noise; any other parameter is uniform on [0, 100).
    pub fn generate_samples(&self, parameter: &str, n_samples: usize) -> Vec<WaterSample> {
        let mut rng = ChaCha20Rng::seed_from_u64(parameter_seed(self.seed, parameter));

        (0..n_samples)
            .map(|i| {
                let lat = rng.gen_range(LATITUDE_RANGE.0..LATITUDE_RANGE.1);
                let lon = rng.gen_range(LONGITUDE_RANGE.0..LONGITUDE_RANGE.1);
                let month: u32 = rng.gen_range(1..=12);
                let season = (f64::from(month) / 12.0 * 2.0 * PI).sin();
                let noise: f64 = rng.sample(StandardNormal);

                let value = match parameter {
                    "ph_value" => {
                        let spatial = (lat / 10.0).sin() * 0.5 + (lon / 10.0).cos() * 0.3;
                        7.2 + spatial + season * 0.4 + noise * 0.2
                    }
                    "tds_ppm" => {
                        let spatial = (lat / 5.0).sin() * 100.0 + (lon / 5.0).cos() * 80.0;
                        300.0 + spatial + season * 50.0 + noise * 30.0
                    }
                    _ => rng.gen_range(0.0..100.0),
                };

                let mut sample = WaterSample::new(lat, lon)
                    .with_date(&format!("{}-{:02}-15", self.year, month))
                    .with_environment(rng.gen_range(0.0..50.0), rng.gen_range(0.0..2000.0))
                    .with_value(parameter, value);
                sample.values.insert(
                    "sample_id".to_string(),
                    serde_json::Value::from(format!("MOCK{:06}", i)),
                );
                sample
            })
            .collect()
    }

    /// One generated sample set per parameter, keyed by parameter name.
    pub fn generate_training_data(
        &self,
        parameters: &[String],
        n_samples: usize,
    ) -> BTreeMap<String, Vec<WaterSample>> {
        parameters
            .iter()
            .map(|p| (p.clone(), self.generate_samples(p, n_samples)))
            .collect()
    }

    /// Named candidate sites, `Amrit_Sarovar_00001` onwards.
    pub fn generate_candidate_sites(&self, n_sites: usize) -> Vec<CandidateSite> {
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        // A separate stream keeps candidates independent of any sample set.
        rng.set_stream(u64::MAX);
        (0..n_sites)
            .map(|i| {
                CandidateSite::named(
                    rng.gen_range(LATITUDE_RANGE.0..LATITUDE_RANGE.1),
                    rng.gen_range(LONGITUDE_RANGE.0..LONGITUDE_RANGE.1),
                    &format!("Amrit_Sarovar_{:05}", i + 1),
                )
            })
            .collect()
    }
}
