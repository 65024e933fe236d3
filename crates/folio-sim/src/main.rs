use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use folio_sim::{run_simulator, SimulatorConfig};
use folio_sync::SyncConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("folio-sim")
        .version(folio_sim::VERSION)
        .about("Folio workspace engine simulator")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a seeded session against the fake workspace API")
                .arg(
                    Arg::new("documents")
                        .long("documents")
                        .default_value("50")
                        .value_parser(value_parser!(usize))
                        .help("Number of documents seeded on the server"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("5")
                        .value_parser(value_parser!(u64))
                        .help("Simulated latency of every API call"),
                )
                .arg(
                    Arg::new("operations")
                        .long("operations")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Number of session steps to simulate"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.05")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a mutation request is rejected"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML file overriding engine settings"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective engine configuration")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML file overriding engine settings"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn sync_config(args: &ArgMatches, fallback: SyncConfig) -> anyhow::Result<SyncConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::load(path).with_context(|| format!("reading {}", path.display())),
        None => Ok(fallback),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let defaults = SimulatorConfig::default();
            let config = SimulatorConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(defaults.seed),
                documents: args.get_one::<usize>("documents").copied().unwrap_or(defaults.documents),
                latency_ms: args.get_one::<u64>("latency-ms").copied().unwrap_or(defaults.latency_ms),
                operations: args.get_one::<u64>("operations").copied().unwrap_or(defaults.operations),
                failure_rate: args.get_one::<f64>("failure-rate").copied().unwrap_or(defaults.failure_rate),
                sync: sync_config(args, defaults.sync)?,
            };
            let json = args.get_flag("json");
            if !json {
                println!("Running Folio Simulator...");
                println!("Documents: {}", config.documents);
                println!("Latency: {}ms", config.latency_ms);
                println!("Seed: {}", config.seed);
                println!();
            }

            let report = run_simulator(config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = sync_config(args, SyncConfig::default())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        _ => Ok(()),
    }
}
