//! Monthly water-quality test-site selection.
//!
//! Per-parameter Gaussian-process surrogates predict water quality and its
//! uncertainty at untested sites; the selector turns those predictions into
//! a ranked, budget-limited testing plan that can later be scored against
//! ground truth.

pub mod acquisition;
pub mod config;
pub mod dev_mode;
pub mod evaluation;
pub mod features;
pub mod logging;
pub mod model;
pub mod parameters;
pub mod plan;
pub mod selector;
pub mod surrogate;
