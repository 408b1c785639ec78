use finsyncd::daemon::{DaemonConfig, DaemonRuntime, LiveEngine};
use finsyncd::sync::engine::SyncOutcome;
use finsyncd::testdata::{seed_test_data, simulate_sync_failure};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "finsyncd=info,finsync_core=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    SyncOnce,
    Status,
    RetryFailed,
    Reset,
    SeedTestData(usize),
    SimulateFailure,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--sync-once" => mode = CliMode::SyncOnce,
            "--status" => mode = CliMode::Status,
            "--retry-failed" => mode = CliMode::RetryFailed,
            "--reset" => mode = CliMode::Reset,
            "--simulate-failure" => mode = CliMode::SimulateFailure,
            "--seed-test-data" => {
                let Some(count) = args.next() else {
                    anyhow::bail!("--seed-test-data needs a record count");
                };
                let count = count
                    .parse::<usize>()
                    .map_err(|_| anyhow::anyhow!("invalid record count: {count}"))?;
                mode = CliMode::SeedTestData(count);
            }
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

const HELP: &str = "\
Usage: finsyncd [MODE]
  (no mode)             Run the auto-sync loop until Ctrl-C
  --sync-once           Run one sync pass and exit
  --status              Print sync status and cached totals as JSON
  --retry-failed        Reset failed items, then run one sync pass
  --reset               Clear all offline data and sync status
  --seed-test-data N    Queue N random records
  --simulate-failure    Record a simulated sync failure

Only one finsyncd process may use a database at a time. The sync-pass guard
is held in memory, so stop the running loop before using --sync-once,
--retry-failed or --reset against the same FINSYNC_DB_PATH.";

fn print_help() {
    println!("{HELP}");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        print_help();
        return Ok(());
    }
    init_tracing();

    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    let engine: &LiveEngine = daemon.engine();
    match mode {
        CliMode::Run => return daemon.run().await,
        CliMode::Help => {}
        CliMode::SyncOnce => print_outcome(engine.perform_full_sync().await?),
        CliMode::RetryFailed => {
            let reset = engine.reset_failed_sync_items().await?;
            info!(reset, "retrying failed items");
            print_outcome(engine.perform_full_sync().await?);
        }
        CliMode::Status => {
            let report = daemon.status_report().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        CliMode::Reset => {
            engine.clear_all_offline_data().await?;
            println!("offline data cleared");
        }
        CliMode::SeedTestData(count) => {
            let mut rng = StdRng::from_entropy();
            let report = seed_test_data(engine, count, &mut rng).await?;
            println!(
                "queued {} records ({} budgets, {} expenses, {} savings goals, {} transactions)",
                report.total(),
                report.budgets,
                report.expenses,
                report.savings,
                report.transactions
            );
        }
        CliMode::SimulateFailure => {
            let status = simulate_sync_failure(engine, "Simulated sync failure").await?;
            println!("failed count is now {}", status.failed_count);
        }
    }
    Ok(())
}

fn print_outcome(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(report) => println!(
            "applied {}, failed {} ({} rejected), remaining {}{}",
            report.applied,
            report.failed,
            report.rejected,
            report.remaining,
            if report.auth_rejected {
                " (credentials refused, pass stopped)"
            } else if report.refreshed {
                ""
            } else {
                " (cache refresh failed)"
            }
        ),
        SyncOutcome::AlreadyRunning => println!("a sync pass is already running"),
    }
}
