//! Command-line front end: resolves the config file plus flag overrides
//! into one immutable run, launches the browser session, and drives the
//! purchase flow to its outcome.

use std::io;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use farebot_core::{
    BotConfig, BrowserSession, CdpSurface, ConfigError, DiagnosticSink, FlowController, FlowError,
    Market, Passenger, PurchaseDriver, RunConfig, RunOutcome, SessionOptions, Stage, SurfaceError,
    TripType,
};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod roster;
mod sink;

pub use sink::FsDiagnosticSink;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] SurfaceError),
    #[error("flow error: {0}")]
    Flow(#[from] FlowError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("run interrupted by the operator")]
    Interrupted,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Unattended flight purchase robot", long_about = None)]
pub struct Cli {
    /// Path to the main farebot.toml
    #[arg(long, default_value = "configs/farebot.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the purchase flow end to end
    Run(RunArgs),
    /// Lists the configured markets with their gateways and cards
    Markets,
    /// Lists the flow stages in execution order
    Stages,
    /// Generates shell completions
    Completions(CompletionsArgs),
}

/// Flag overrides layered on top of the config file. Anything not given
/// here keeps its configured value.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Home market (CL/PE/AR/BR); picks URL, gateway and card data
    #[arg(long)]
    pub market: Option<Market>,
    /// Storefront URL, normally derived from the market
    #[arg(long)]
    pub url: Option<String>,
    /// Origin city
    #[arg(long)]
    pub origin: Option<String>,
    /// Destination city
    #[arg(long)]
    pub destination: Option<String>,
    /// Days ahead for the outbound date
    #[arg(long, value_name = "N")]
    pub days_ahead: Option<u32>,
    /// ONE_WAY or ROUND_TRIP
    #[arg(long)]
    pub trip_type: Option<TripType>,
    /// Days between outbound and return (round trip only)
    #[arg(long, value_name = "N")]
    pub return_offset: Option<u32>,
    /// Adult seats
    #[arg(long, value_name = "N")]
    pub adults: Option<u32>,
    /// Child seats
    #[arg(long, value_name = "N")]
    pub children: Option<u32>,
    /// Infant seats, each on an adult's lap
    #[arg(long, value_name = "N")]
    pub infants: Option<u32>,
    /// Stage to pause at for manual inspection
    #[arg(long)]
    pub checkpoint: Option<Stage>,
    /// Run the browser without a window
    #[arg(long)]
    pub headless: bool,
    /// Record visible controls and screenshots at every step
    #[arg(long)]
    pub exploration: bool,
    /// Stop after the search stage; implies --exploration
    #[arg(long)]
    pub exploration_only: bool,
    /// Settling pause before typing card data (ms)
    #[arg(long, value_name = "MS")]
    pub safety_pause_ms: Option<u64>,
    /// Extra delay after every browser action, for watching a run (ms)
    #[arg(long, value_name = "MS")]
    pub action_delay_ms: Option<u64>,
    /// Contact first name
    #[arg(long)]
    pub first_name: Option<String>,
    /// Contact last name
    #[arg(long)]
    pub last_name: Option<String>,
    /// Contact email
    #[arg(long)]
    pub email: Option<String>,
    /// Document type (DNI, Pasaporte, ...)
    #[arg(long)]
    pub document_type: Option<String>,
    /// Document number
    #[arg(long)]
    pub document_number: Option<String>,
    /// Phone number
    #[arg(long)]
    pub phone: Option<String>,
    /// Phone country prefix
    #[arg(long)]
    pub phone_prefix: Option<String>,
    /// Gender exactly as the passenger form spells it
    #[arg(long, value_parser = ["Masculino", "Femenino"])]
    pub gender: Option<String>,
    /// Document issue country
    #[arg(long)]
    pub issue_country: Option<String>,
    /// Contact birth date
    #[arg(long, value_name = "DD/MM/YYYY", value_parser = parse_birth_date)]
    pub birth_date: Option<NaiveDate>,
    /// Card number override
    #[arg(long)]
    pub card_number: Option<String>,
    /// Card expiry override
    #[arg(long, value_name = "MM/YY")]
    pub card_expiry: Option<String>,
    /// Card CVV override
    #[arg(long)]
    pub card_cvv: Option<String>,
    /// Chromium executable override
    #[arg(long, value_name = "PATH")]
    pub chrome: Option<PathBuf>,
    /// Persistent browser profile directory
    #[arg(long, value_name = "DIR")]
    pub user_data_dir: Option<PathBuf>,
    /// Where screenshots and exploration reports are written
    #[arg(long, value_name = "DIR", default_value = "screenshots")]
    pub screenshots_dir: PathBuf,
    /// Skip all evidence capture
    #[arg(long)]
    pub no_capture: bool,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing();

    match &cli.command {
        Commands::Run(args) => {
            let config = apply_overrides(BotConfig::from_file(&cli.config)?, args);
            let run_config = config.run_config(config.run.market)?;
            let passengers = roster::build_roster(&config.contact, &run_config.seats);
            let report = launch_and_run(&run_config, &passengers, args, config.run.headless)?;
            render(&report, cli.format)
        }
        Commands::Markets => {
            let config = BotConfig::from_file(&cli.config)?;
            render(&market_list(&config), cli.format)
        }
        Commands::Stages => render(&stage_list(), cli.format),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::generate(args.shell, &mut command, name, &mut io::stdout());
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}

fn parse_birth_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y")
        .map_err(|_| format!("expected DD/MM/YYYY, got {raw}"))
}

fn override_string(target: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

/// Layers the run flags over the loaded config. The URL and card
/// overrides apply to whichever market ends up selected.
fn apply_overrides(mut config: BotConfig, args: &RunArgs) -> BotConfig {
    let run = &mut config.run;
    run.market = args.market.unwrap_or(run.market);
    run.headless = run.headless || args.headless;
    run.exploration = run.exploration || args.exploration;
    run.exploration_only = run.exploration_only || args.exploration_only;
    run.checkpoint = args.checkpoint.or(run.checkpoint);
    run.safety_pause_ms = args.safety_pause_ms.unwrap_or(run.safety_pause_ms);
    run.action_delay_ms = args.action_delay_ms.unwrap_or(run.action_delay_ms);

    let flight = &mut config.flight;
    override_string(&mut flight.origin, &args.origin);
    override_string(&mut flight.destination, &args.destination);
    flight.days_ahead = args.days_ahead.unwrap_or(flight.days_ahead);
    flight.trip_type = args.trip_type.unwrap_or(flight.trip_type);
    flight.return_offset = args.return_offset.unwrap_or(flight.return_offset);
    flight.seats.adults = args.adults.unwrap_or(flight.seats.adults);
    flight.seats.children = args.children.unwrap_or(flight.seats.children);
    flight.seats.infants = args.infants.unwrap_or(flight.seats.infants);

    let contact = &mut config.contact;
    override_string(&mut contact.first_name, &args.first_name);
    override_string(&mut contact.last_name, &args.last_name);
    override_string(&mut contact.email, &args.email);
    override_string(&mut contact.document_type, &args.document_type);
    override_string(&mut contact.document_number, &args.document_number);
    override_string(&mut contact.phone, &args.phone);
    override_string(&mut contact.phone_prefix, &args.phone_prefix);
    override_string(&mut contact.gender, &args.gender);
    override_string(&mut contact.issue_country, &args.issue_country);
    contact.birth_date = args.birth_date.unwrap_or(contact.birth_date);

    let market = config.run.market;
    if let Some(section) = config.markets.get_mut(&market) {
        override_string(&mut section.url, &args.url);
        override_string(&mut section.card.number, &args.card_number);
        override_string(&mut section.card.expiry, &args.card_expiry);
        override_string(&mut section.card.cvv, &args.card_cvv);
    }

    config
}

/// The flow futures are not `Send` (they hold the CDP page across awaits),
/// so the whole run executes on the runtime's entry thread.
fn launch_and_run(
    run_config: &RunConfig,
    passengers: &[Passenger],
    args: &RunArgs,
    headless: bool,
) -> Result<RunReport> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execute(run_config, passengers, args, headless))
}

async fn execute(
    run_config: &RunConfig,
    passengers: &[Passenger],
    args: &RunArgs,
    headless: bool,
) -> Result<RunReport> {
    let options = SessionOptions {
        executable_path: args.chrome.clone(),
        user_data_dir: args.user_data_dir.clone(),
        headless,
        lang: Some(run_config.market.locale().to_string()),
        ..SessionOptions::default()
    };
    let session = BrowserSession::launch(&options).await?;
    let surface = CdpSurface::new(session.page().clone(), session.headless());

    let sink = (!args.no_capture).then(|| FsDiagnosticSink::new(&args.screenshots_dir));
    let sink_ref = sink.as_ref().map(|s| s as &dyn DiagnosticSink);

    let mut driver = PurchaseDriver::new(&surface, run_config, passengers, sink_ref);
    let mut controller = FlowController::new(&mut driver, run_config);

    let outcome = tokio::select! {
        outcome = controller.run() => Some(outcome),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, shutting the browser down");
            None
        }
    };

    // The session comes down on every exit path; a failed close is logged
    // and never turned into the run's result.
    if let Err(err) = session.shutdown().await {
        warn!(error = %err, "browser shutdown reported an error");
    }

    match outcome {
        Some(outcome) => Ok(RunReport::new(run_config, passengers.len(), outcome?)),
        None => Err(AppError::Interrupted),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub market: Market,
    pub gateway: &'static str,
    pub url: String,
    pub passengers: usize,
    pub card: String,
    pub outcome: String,
}

impl RunReport {
    fn new(config: &RunConfig, passengers: usize, outcome: RunOutcome) -> Self {
        RunReport {
            market: config.market,
            gateway: config.payment_method(),
            url: config.url.clone(),
            passengers,
            card: config.card.masked_number(),
            outcome: describe_outcome(&outcome),
        }
    }
}

fn describe_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed => "purchase submitted".to_string(),
        RunOutcome::CheckpointReached(stage) => format!("stopped at the {stage} checkpoint"),
        RunOutcome::ExplorationOnly => "exploration finished after the search stage".to_string(),
        RunOutcome::ManualHandoff { stage, reason } => {
            format!("manual handoff at {stage}: {reason}")
        }
        RunOutcome::BrowserClosed => "browser window closed, run ended".to_string(),
    }
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        [
            format!("market: {} ({})", self.market, self.market.country()),
            format!("gateway: {}", self.gateway),
            format!("url: {}", self.url),
            format!("passengers: {}", self.passengers),
            format!("card: {}", self.card),
            format!("outcome: {}", self.outcome),
        ]
        .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct MarketList {
    pub rows: Vec<MarketEntry>,
}

#[derive(Debug, Serialize)]
pub struct MarketEntry {
    pub market: Market,
    pub country: &'static str,
    pub gateway: &'static str,
    pub url: String,
    pub card: String,
}

fn market_list(config: &BotConfig) -> MarketList {
    let rows = config
        .markets
        .iter()
        .map(|(market, section)| MarketEntry {
            market: *market,
            country: market.country(),
            gateway: market.gateway_label(),
            url: section.url.clone(),
            card: section.card.clone().into_card(*market).masked_number(),
        })
        .collect();
    MarketList { rows }
}

impl DisplayFallback for MarketList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No markets configured".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            lines.push(format!(
                "{} {} via {} | {} | card {}",
                entry.market, entry.country, entry.gateway, entry.url, entry.card
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StageList {
    pub stages: Vec<StageEntry>,
}

#[derive(Debug, Serialize)]
pub struct StageEntry {
    pub position: usize,
    pub stage: Stage,
}

fn stage_list() -> StageList {
    StageList {
        stages: Stage::ALL
            .iter()
            .enumerate()
            .map(|(index, stage)| StageEntry {
                position: index + 1,
                stage: *stage,
            })
            .collect(),
    }
}

impl DisplayFallback for StageList {
    fn display(&self) -> String {
        self.stages
            .iter()
            .map(|entry| format!("{}. {}", entry.position, entry.stage))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config() -> &'static str {
        r#"
[flight]
origin = "Santiago"
destination = "Buenos Aires"
days_ahead = 20

[contact]
first_name = "Juan"
last_name = "Prueba"
email = "juan.prueba@example.com"
document_type = "DNI"
document_number = "12345678"
gender = "Masculino"
issue_country = "Chile"
phone_prefix = "+56"
phone = "987654321"
birth_date = "1990-05-14"

[run]
market = "PE"

[markets.PE]
url = "https://example.test/peru"

[markets.PE.card]
number = "4111111111111111"
expiry = "12/30"
cvv = "123"

[markets.CL]
url = "https://example.test/chile"

[markets.CL.card]
number = "4051885600446623"
expiry = "12/30"
cvv = "123"
"#
    }

    fn load_config(contents: &str) -> BotConfig {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        BotConfig::from_file(file.path()).unwrap()
    }

    fn parse_run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["farebotctl", "run"];
        argv.extend_from_slice(extra);
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            other => panic!("expected run command, got {other:?}"),
        }
    }

    #[test]
    fn run_flags_override_config_values() {
        let config = load_config(sample_config());
        let args = parse_run_args(&[
            "--market",
            "CL",
            "--origin",
            "Lima",
            "--adults",
            "2",
            "--checkpoint",
            "payment",
            "--card-number",
            "5555444433331111",
            "--headless",
        ]);

        let resolved = apply_overrides(config, &args);
        assert_eq!(resolved.run.market, Market::Cl);
        assert!(resolved.run.headless);
        assert_eq!(resolved.flight.origin, "Lima");
        assert_eq!(resolved.flight.seats.adults, 2);
        assert_eq!(resolved.run.checkpoint, Some(Stage::Payment));

        let run = resolved.run_config(resolved.run.market).unwrap();
        assert_eq!(run.card.number, "5555444433331111");
        assert_eq!(run.payment_method(), "Webpay");
    }

    #[test]
    fn unset_flags_keep_configured_values() {
        let config = load_config(sample_config());
        let resolved = apply_overrides(config, &RunArgs::default());

        assert_eq!(resolved.run.market, Market::Pe);
        assert!(!resolved.run.headless);
        assert_eq!(resolved.flight.destination, "Buenos Aires");
        assert_eq!(resolved.contact.first_name, "Juan");
    }

    #[test]
    fn exploration_only_flag_implies_exploration() {
        let config = load_config(sample_config());
        let args = parse_run_args(&["--exploration-only"]);
        let resolved = apply_overrides(config, &args);

        let run = resolved.run_config(Market::Pe).unwrap();
        assert!(run.exploration);
        assert!(run.exploration_only);
    }

    #[test]
    fn birth_date_flag_parses_day_first() {
        let args = parse_run_args(&["--birth-date", "29/02/2000"]);
        assert_eq!(
            args.birth_date,
            Some(NaiveDate::from_ymd_opt(2000, 2, 29).unwrap())
        );
        assert!(parse_birth_date("2000-02-29").is_err());
    }

    #[test]
    fn roster_follows_overridden_seats() {
        let config = load_config(sample_config());
        let args = parse_run_args(&["--adults", "2", "--children", "1"]);
        let resolved = apply_overrides(config, &args);
        let run = resolved.run_config(Market::Pe).unwrap();

        let passengers = roster::build_roster(&resolved.contact, &run.seats);
        assert_eq!(passengers.len(), 3);
        assert_eq!(passengers[0].first_name, "Juan");
        assert_eq!(passengers[2].first_name, "Nino A");
    }

    #[test]
    fn stages_listed_in_flow_order() {
        let list = stage_list();
        assert_eq!(list.stages.len(), 5);
        assert_eq!(list.stages[0].position, 1);
        assert_eq!(list.stages[0].stage, Stage::Search);
        assert_eq!(list.stages[4].stage, Stage::Payment);
        assert!(list.display().starts_with("1. search"));
    }

    #[test]
    fn market_rows_show_gateway_and_masked_card() {
        let config = load_config(sample_config());
        let list = market_list(&config);

        let peru = list
            .rows
            .iter()
            .find(|row| row.market == Market::Pe)
            .unwrap();
        assert_eq!(peru.gateway, "Niubiz");
        assert_eq!(peru.card, "**** 1111");
        assert!(list.display().contains("PE Perú via Niubiz"));
    }

    #[test]
    fn outcome_descriptions_name_the_stage() {
        assert_eq!(
            describe_outcome(&RunOutcome::Completed),
            "purchase submitted"
        );
        assert_eq!(
            describe_outcome(&RunOutcome::CheckpointReached(Stage::Payment)),
            "stopped at the payment checkpoint"
        );
        let handoff = describe_outcome(&RunOutcome::ManualHandoff {
            stage: Stage::Checkout,
            reason: "the storefront would not advance to checkout".to_string(),
        });
        assert!(handoff.contains("checkout"));
        assert!(handoff.contains("would not advance"));
    }
}
