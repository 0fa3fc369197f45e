//! CLI interface for visitgate.
//!
//! Each subcommand is non-interactive: arguments in, structured output out.
//! JSON goes to stdout and a human-readable summary to stderr.

mod format;
mod replay;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use jiff::Timestamp;

use visitgate::config::Config;
use visitgate::model::{Coordinates, GeoPoint, TaskKind, VisitKind};
use visitgate::{geo, proximity};

use format::{format_commission, format_completion, format_verification};

/// visitgate: proximity-gated field visits.
#[derive(Debug, Parser)]
#[command(name = "visitgate", version, after_long_help = EXAMPLES_HELP)]
pub struct Cli {
    /// Config file. Defaults to `~/.visitgate/config.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

const EXAMPLES_HELP: &str = r#"Examples:
  visitgate distance 51.5007 -0.1246 51.5014 -0.1419
  visitgate verify --current=51.50075,-0.12455 --accuracy 6 --target=51.5007,-0.1246
  visitgate verify --kind van-sales --current=-26.2041,28.0473 --target=-26.2045,28.0470
  visitgate commission --survey 1 --product-distribution 24
  visitgate replay visit.json"#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Great-circle distance between two points, in meters.
    #[command(allow_negative_numbers = true)]
    Distance {
        lat1: f64,
        lon1: f64,
        lat2: f64,
        lon2: f64,
    },

    /// Check a fix against a target location.
    ///
    /// Prints the verification result as JSON.
    Verify {
        /// Current position as `LAT,LON`.
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        current: GeoPoint,

        /// Reported accuracy radius of the current position, in meters.
        #[arg(long)]
        accuracy: Option<f64>,

        /// Registered customer location as `LAT,LON`.
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        target: GeoPoint,

        /// Visit kind; selects the configured threshold.
        #[arg(long, value_enum, default_value = "field-marketing")]
        kind: KindArg,

        /// Override the configured threshold, in meters.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Preview the commission for a set of completed task units.
    Commission {
        #[arg(long, default_value_t = 0)]
        survey: u32,

        #[arg(long, default_value_t = 0)]
        board_placement: u32,

        /// Items distributed.
        #[arg(long, default_value_t = 0)]
        product_distribution: u32,

        #[arg(long, default_value_t = 0)]
        merchandising: u32,

        #[arg(long, default_value_t = 0)]
        photo_capture: u32,

        #[arg(long, default_value_t = 0)]
        customer_registration: u32,
    },

    /// Drive a full visit from a JSON scenario with scripted fixes and an
    /// in-memory backend. Prints the completion record as JSON.
    Replay {
        /// Scenario file.
        scenario: PathBuf,
    },
}

/// CLI-facing visit kind, mapped to the domain `VisitKind`.
#[derive(Debug, Clone, ValueEnum)]
pub enum KindArg {
    /// On-foot field-marketing visit.
    FieldMarketing,
    /// Van-sales stop.
    VanSales,
}

impl KindArg {
    fn to_domain(&self) -> VisitKind {
        match self {
            Self::FieldMarketing => VisitKind::FieldMarketing,
            Self::VanSales => VisitKind::VanSales,
        }
    }
}

/// Run the CLI, returning an error message on failure.
pub fn run(cli: Cli, config: &Config) -> Result<(), String> {
    match cli.command {
        Command::Distance {
            lat1,
            lon1,
            lat2,
            lon2,
        } => cmd_distance(lat1, lon1, lat2, lon2),
        Command::Verify {
            current,
            accuracy,
            target,
            kind,
            threshold,
        } => cmd_verify(config, current, accuracy, target, &kind, threshold),
        Command::Commission {
            survey,
            board_placement,
            product_distribution,
            merchandising,
            photo_capture,
            customer_registration,
        } => {
            let counts = BTreeMap::from([
                (TaskKind::Survey, survey),
                (TaskKind::BoardPlacement, board_placement),
                (TaskKind::ProductDistribution, product_distribution),
                (TaskKind::Merchandising, merchandising),
                (TaskKind::PhotoCapture, photo_capture),
                (TaskKind::CustomerRegistration, customer_registration),
            ]);
            cmd_commission(config, &counts)
        }
        Command::Replay { scenario } => cmd_replay(config, &scenario),
    }
}

fn cmd_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Result<(), String> {
    let a = GeoPoint::new(lat1, lon1).map_err(|e| format!("first point: {e}"))?;
    let b = GeoPoint::new(lat2, lon2).map_err(|e| format!("second point: {e}"))?;
    println!("{:.1}", geo::distance_meters(&a, &b));
    Ok(())
}

fn cmd_verify(
    config: &Config,
    current: GeoPoint,
    accuracy: Option<f64>,
    target: GeoPoint,
    kind: &KindArg,
    threshold: Option<f64>,
) -> Result<(), String> {
    let fix = Coordinates::new(current.latitude, current.longitude, accuracy, Timestamp::now())
        .map_err(|e| format!("invalid current position: {e}"))?;
    let threshold = threshold.unwrap_or_else(|| config.threshold_meters(kind.to_domain()));
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(format!("invalid threshold: {threshold}"));
    }

    let result = proximity::verify(&fix, &target, threshold);
    let json = serde_json::to_string_pretty(&result)
        .map_err(|e| format!("failed to serialize result: {e}"))?;
    println!("{json}");
    eprintln!("{}", format_verification(&result));
    Ok(())
}

fn cmd_commission(config: &Config, counts: &BTreeMap<TaskKind, u32>) -> Result<(), String> {
    let commission = config.commission.breakdown(counts);
    let json = serde_json::to_string_pretty(&commission)
        .map_err(|e| format!("failed to serialize commission: {e}"))?;
    println!("{json}");
    eprintln!("{}", format_commission(&commission));
    Ok(())
}

fn cmd_replay(config: &Config, scenario: &Path) -> Result<(), String> {
    let record = replay::run(scenario, config)?;
    let json = serde_json::to_string_pretty(&record)
        .map_err(|e| format!("failed to serialize completion record: {e}"))?;
    println!("{json}");
    eprintln!("{}", format_completion(&record));
    Ok(())
}

/// Parse `LAT,LON` into a validated point.
fn parse_point(s: &str) -> Result<GeoPoint, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got '{s}'"))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("invalid latitude '{lat}': {e}"))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|e| format!("invalid longitude '{lon}': {e}"))?;
    GeoPoint::new(lat, lon).map_err(|e| e.to_string())
}
