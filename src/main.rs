use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use serde::de::DeserializeOwned;

use wflow_service::config::Config;
use wflow_service::dev_mode::DevMode;
use wflow_service::evaluation::evaluate_plan_performance;
use wflow_service::logging::{self, Component, LogLevel};
use wflow_service::model::{CandidateSite, GroundTruthOutcome, TestingPlan, WaterSample};
use wflow_service::parameters::find_parameter;
use wflow_service::selector::SiteSelector;

/// Pick which water-monitoring sites to test this month.
///
/// Trains one Gaussian-process surrogate per water-quality parameter and
/// ranks candidate sites by predicted contamination risk under a budget.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// TOML config file (defaults to $WFLOW_CONFIG, then built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train surrogate models and write one artifact per parameter
    Train {
        /// JSON array of historical samples
        #[arg(short, long)]
        samples: PathBuf,

        /// Directory the model artifacts are written to
        #[arg(short, long, default_value = "models")]
        models_dir: PathBuf,
    },

    /// Build a monthly testing plan from saved models
    Plan {
        /// Directory holding `wflow_ml_<parameter>.json` artifacts
        #[arg(short, long, default_value = "models")]
        models_dir: PathBuf,

        /// JSON array of candidate sites
        #[arg(long)]
        candidates: PathBuf,

        /// Number of sites that can be tested this month
        #[arg(short, long)]
        budget: usize,

        /// Month of year (1-12); defaults to the current month
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,

        /// Output file (writes to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Score a saved plan against observed contamination
    Evaluate {
        /// Plan JSON written by `plan`
        #[arg(short, long)]
        plan: PathBuf,

        /// JSON array of `{location_name, is_contaminated}`
        #[arg(short, long)]
        ground_truth: PathBuf,
    },

    /// Run the whole pipeline on synthetic data
    Demo {
        #[arg(long, default_value_t = 300)]
        samples_per_parameter: usize,

        #[arg(long, default_value_t = 2000)]
        sites: usize,

        #[arg(short, long, default_value_t = 300)]
        budget: usize,

        #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: u32,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(Config::env_path);
    let config = match &config_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::from_env().context("failed to load configuration")?,
    };

    let level = if cli.verbose > 0 {
        LogLevel::Debug
    } else {
        config.logging.log_level()?
    };
    logging::init_logger(
        level,
        config.logging.file.as_deref(),
        config.logging.console_timestamps,
    );
    match &config_path {
        Some(path) => logging::info(
            Component::Config,
            None,
            &format!("Loaded config from {}", path.display()),
        ),
        None => logging::info(Component::Config, None, "Using built-in configuration defaults"),
    }
    config.log_warnings();

    match cli.command {
        Commands::Train {
            samples,
            models_dir,
        } => train(&config, &samples, &models_dir),
        Commands::Plan {
            models_dir,
            candidates,
            budget,
            month,
            output,
        } => plan(&config, &models_dir, &candidates, budget, month, output.as_deref()),
        Commands::Evaluate { plan, ground_truth } => evaluate(&plan, &ground_truth),
        Commands::Demo {
            samples_per_parameter,
            sites,
            budget,
            month,
            seed,
        } => demo(&config, samples_per_parameter, sites, budget, month, seed),
    }
}

/// Display name and unit for registered parameters, else the raw key.
fn parameter_label(key: &str) -> String {
    match find_parameter(key) {
        Some(p) => format!("{} ({})", p.name, p.unit),
        None => key.to_string(),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

fn train(config: &Config, samples_path: &Path, models_dir: &Path) -> Result<()> {
    let samples: Vec<WaterSample> = read_json(samples_path)?;
    let training_data: BTreeMap<String, Vec<WaterSample>> = config
        .selector
        .parameters
        .iter()
        .map(|p| (p.clone(), samples.clone()))
        .collect();

    let mut selector = SiteSelector::from_config(config)?;
    let report = selector.train_models(&training_data);
    if report.trained.is_empty() {
        bail!("no parameter could be trained from {}", samples_path.display());
    }
    let written = selector.save_models(models_dir)?;
    println!("{}", serde_json::to_string_pretty(&report.trained)?);
    logging::info(
        Component::System,
        None,
        &format!("Wrote {} model artifacts to {}", written.len(), models_dir.display()),
    );
    Ok(())
}

fn plan(
    config: &Config,
    models_dir: &Path,
    candidates_path: &Path,
    budget: usize,
    month: Option<u32>,
    output: Option<&Path>,
) -> Result<()> {
    let candidates: Vec<CandidateSite> = read_json(candidates_path)?;
    let mut selector = SiteSelector::from_config(config)?;
    selector
        .load_models(models_dir)
        .with_context(|| format!("failed to load models from {}", models_dir.display()))?;

    let plan = selector.generate_monthly_testing_plan(&candidates, budget, month)?;
    match output {
        Some(path) => plan.save_json(path)?,
        None => println!("{}", serde_json::to_string_pretty(&plan)?),
    }
    Ok(())
}

fn evaluate(plan_path: &Path, ground_truth_path: &Path) -> Result<()> {
    let plan = TestingPlan::load_json(plan_path)?;
    let outcomes: Vec<GroundTruthOutcome> = read_json(ground_truth_path)?;
    let result = evaluate_plan_performance(&plan, &outcomes);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn demo(
    config: &Config,
    samples_per_parameter: usize,
    sites: usize,
    budget: usize,
    month: u32,
    seed: u64,
) -> Result<()> {
    let dev = DevMode::new(seed);
    let training_data = dev.generate_training_data(&config.selector.parameters, samples_per_parameter);
    let candidates = dev.generate_candidate_sites(sites);

    let mut selector = SiteSelector::from_config(config)?;
    let report = selector.train_models(&training_data);
    for stats in &report.trained {
        println!(
            "{:<24} n_train={:<5} MAE={:<10.4} RMSE={:<10.4} R²={:.4}",
            parameter_label(&stats.parameter),
            stats.n_train,
            stats.mae,
            stats.rmse,
            stats.r2_score
        );
    }

    let plan = selector.generate_monthly_testing_plan(&candidates, budget, Some(month))?;
    println!(
        "\nMonthly plan for month {}: test {} of {} sites ({:.1}% reduction)",
        plan.month, plan.tested_sites, plan.total_sites, plan.reduction_percent
    );
    println!(
        "Estimated detection rate (planning heuristic): {:.1}%",
        plan.estimated_detection_rate
    );
    println!(
        "Risk tiers: {} high, {} medium, {} low (avg {:.2})",
        plan.statistics.high_risk_sites,
        plan.statistics.medium_risk_sites,
        plan.statistics.low_risk_sites,
        plan.statistics.avg_risk_score
    );
    println!("\nTop sites:");
    for site in plan.selected_sites.iter().take(10) {
        println!(
            "{:>3}. {:<22} ({:.4}, {:.4}) risk {:.1}",
            site.rank, site.location_name, site.latitude, site.longitude, site.risk_score
        );
        for (parameter, prediction) in &site.parameter_predictions {
            println!(
                "       {:<24} {:.2} ± {:.2} (risk {:.1})",
                parameter_label(parameter),
                prediction.predicted,
                prediction.uncertainty,
                prediction.risk
            );
        }
    }
    Ok(())
}
