use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing::{error, info};

use action_ledger::config::AppConfig;
use action_ledger::retention::PruneRequest;
use action_ledger::stats::DEFAULT_STATS_WINDOW;
use action_ledger::Ledger;

const CLI_ACTOR: &str = "ledger-admin";

fn cli() -> Command {
    Command::new("ledger-admin")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Maintenance tasks for the action ledger")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Configuration file (defaults to ledger.toml / LEDGER_CONFIG)")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress output except errors")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("verify")
                .about("Re-walk the hash chain and report the first break")
                .arg(
                    Arg::new("from-id")
                        .long("from-id")
                        .value_name("ID")
                        .help("Verify from this entry, anchored on its stored prev_hash")
                        .value_parser(value_parser!(i64)),
                )
                .arg(
                    Arg::new("to-id")
                        .long("to-id")
                        .value_name("ID")
                        .requires("from-id")
                        .value_parser(value_parser!(i64)),
                ),
        )
        .subcommand(
            Command::new("prune")
                .about("Delete entries older than a number of days")
                .arg(
                    Arg::new("older-than-days")
                        .long("older-than-days")
                        .value_name("DAYS")
                        .required(true)
                        .value_parser(value_parser!(i64)),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .help("Count matching entries without deleting")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("max-days")
                        .long("max-days")
                        .value_name("DAYS")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("min-remaining")
                        .long("min-remaining")
                        .value_name("COUNT")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("stats")
                .about("Activity counts over a recent window")
                .arg(
                    Arg::new("window")
                        .long("window")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(i64)),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    // Set log level based on flags
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match matches.get_one::<String>("config") {
        Some(path) => AppConfig::from_file(std::path::Path::new(path))?,
        None => AppConfig::load()?,
    };
    let ledger = Ledger::from_config(&config).await?;

    let outcome = match matches.subcommand() {
        Some(("verify", args)) => verify(&ledger, args, quiet).await,
        Some(("prune", args)) => prune(&ledger, args, quiet).await,
        Some(("stats", args)) => stats(&ledger, args).await,
        _ => Err(anyhow!("Unknown command")),
    };

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn verify(ledger: &Ledger, args: &ArgMatches, quiet: bool) -> Result<()> {
    let report = match args.get_one::<i64>("from-id") {
        Some(from_id) => {
            let to_id = args.get_one::<i64>("to-id").copied();
            info!("Verifying chain from entry {}", from_id);
            ledger.verify_range(*from_id, to_id).await?
        }
        None => ledger.verify(CLI_ACTOR).await?,
    };

    if !report.valid {
        return Err(anyhow!(report.summary()));
    }
    if !quiet {
        println!("✓ {}", report.summary());
    }
    Ok(())
}

async fn prune(ledger: &Ledger, args: &ArgMatches, quiet: bool) -> Result<()> {
    let days = args
        .get_one::<i64>("older-than-days")
        .copied()
        .ok_or_else(|| anyhow!("--older-than-days is required"))?;

    let mut request = PruneRequest::older_than_days(days, chrono::Utc::now().timestamp())?
        .dry_run(args.get_flag("dry-run"));
    if let Some(max_days) = args.get_one::<u32>("max-days") {
        request = request.max_days(*max_days);
    }
    if let Some(min_remaining) = args.get_one::<u64>("min-remaining") {
        request = request.min_remaining(*min_remaining);
    }

    let result = ledger.prune(request, CLI_ACTOR).await?;
    if !quiet {
        if result.dry_run {
            println!("{} entries would be deleted (dry run)", result.matched);
        } else {
            println!("✓ Deleted {} of {} matching entries", result.deleted, result.matched);
        }
    }
    Ok(())
}

async fn stats(ledger: &Ledger, args: &ArgMatches) -> Result<()> {
    let window = args
        .get_one::<i64>("window")
        .copied()
        .unwrap_or(DEFAULT_STATS_WINDOW);
    let stats = ledger.stats(window).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
