use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use finsync_core::{
    Budget, Expense, FinanceSummary, FinsyncClient, SavingsGoal, Transaction,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::sync::backoff::{Backoff, PassSchedule};
use crate::sync::engine::{EngineError, SyncEngine, SyncOutcome};
use crate::sync::network::{ConnectivityProbe, HttpProbe};
use crate::sync::remote::RemoteDataService;
use crate::sync::status::SyncStatus;
use crate::sync::store::LocalStore;

const DEFAULT_API_URL: &str = "http://127.0.0.1:54321";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_SECS: u64 = 300;

pub type LiveEngine = SyncEngine<FinsyncClient, HttpProbe>;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub api_url: String,
    pub api_key: String,
    pub access_token: Option<String>,
    pub db_path: PathBuf,
    pub sync_interval: Duration,
    pub probe_timeout: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = match lookup("FINSYNC_DB_PATH").filter(|value| !value.trim().is_empty()) {
            Some(value) if value.starts_with('~') => {
                let home = dirs::home_dir().context("home directory is unavailable")?;
                expand_with_home(&value, &home)
            }
            Some(value) => PathBuf::from(value),
            None => default_db_path()?,
        };
        let api_url = lookup("FINSYNC_API_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let access_token = lookup("FINSYNC_ACCESS_TOKEN").filter(|value| !value.is_empty());

        Ok(Self {
            api_url,
            api_key: lookup("FINSYNC_API_KEY").unwrap_or_default(),
            access_token,
            db_path,
            sync_interval: Duration::from_secs(parse_u64(
                lookup("FINSYNC_SYNC_INTERVAL_SECS"),
                DEFAULT_SYNC_INTERVAL_SECS,
            )),
            probe_timeout: Duration::from_millis(parse_u64(
                lookup("FINSYNC_PROBE_TIMEOUT_MS"),
                DEFAULT_PROBE_TIMEOUT_MS,
            )),
            retry_base: Duration::from_millis(parse_u64(
                lookup("FINSYNC_RETRY_BASE_MS"),
                DEFAULT_RETRY_BASE_MS,
            )),
            retry_max: Duration::from_secs(parse_u64(
                lookup("FINSYNC_RETRY_MAX_SECS"),
                DEFAULT_RETRY_MAX_SECS,
            )),
        })
    }

    pub fn schedule(&self) -> PassSchedule {
        PassSchedule::new(
            self.sync_interval,
            Backoff::new(self.retry_base, self.retry_max, true),
        )
    }
}

/// What `--status` prints.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub online: bool,
    pub last_sync: Option<i64>,
    pub status: SyncStatus,
    pub summary: FinanceSummary,
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<LiveEngine>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let client = build_client(&config)?;
        let probe = HttpProbe::new(
            client
                .clone()
                .with_timeout(config.probe_timeout)
                .context("failed to build connectivity probe")?,
        );
        let store = LocalStore::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open offline store at {:?}", config.db_path))?;
        let engine = SyncEngine::open(store, client, probe)
            .await
            .context("failed to restore sync status")?;

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &Arc<LiveEngine> {
        &self.engine
    }

    pub async fn status_report(&self) -> anyhow::Result<StatusReport> {
        status_report(self.engine.as_ref()).await
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            api_url = %self.config.api_url,
            db_path = %self.config.db_path.display(),
            interval_secs = self.config.sync_interval.as_secs(),
            "finsyncd started"
        );

        let subscription = self.engine.status().add_sync_status_listener(log_status);
        let engine = Arc::clone(&self.engine);
        let mut schedule = self.config.schedule();
        let sync_handle = tokio::spawn(async move {
            loop {
                let result = engine.perform_full_sync().await;
                let delay = next_delay(&mut schedule, &result);
                debug!(delay_ms = delay.as_millis() as u64, "next sync pass scheduled");
                tokio::time::sleep(delay).await;
            }
        });

        let shutdown = tokio::signal::ctrl_c().await;
        sync_handle.abort();
        subscription.unsubscribe();
        shutdown.context("failed waiting for shutdown signal")?;
        info!("finsyncd stopped");
        Ok(())
    }
}

pub async fn status_report<R, P>(engine: &SyncEngine<R, P>) -> anyhow::Result<StatusReport>
where
    R: RemoteDataService,
    P: ConnectivityProbe,
{
    let store = engine.store();
    let summary = FinanceSummary::compute(
        &store.load::<Budget>().await?,
        &store.load::<Expense>().await?,
        &store.load::<SavingsGoal>().await?,
        &store.load::<Transaction>().await?,
    );
    Ok(StatusReport {
        online: store.is_online().await?,
        last_sync: store.get_last_sync().await?,
        status: engine.status().snapshot(),
        summary,
    })
}

/// Interval after a clean pass; backoff after failures or while offline.
/// Failures the remote will only refuse again wait for the regular interval.
fn next_delay(schedule: &mut PassSchedule, result: &Result<SyncOutcome, EngineError>) -> Duration {
    match result {
        Ok(SyncOutcome::Completed(report)) if report.is_success() => schedule.on_success(),
        Ok(SyncOutcome::Completed(report)) if report.auth_rejected => {
            warn!(
                remaining = report.remaining,
                attempt = schedule.consecutive_failures() + 1,
                "remote refused credentials, check FINSYNC_ACCESS_TOKEN"
            );
            schedule.on_failure()
        }
        Ok(SyncOutcome::Completed(report))
            if report.refreshed && report.failed == report.rejected =>
        {
            warn!(
                rejected = report.rejected,
                "queued operations rejected by remote, not retrying early"
            );
            schedule.on_success()
        }
        Ok(SyncOutcome::Completed(report)) => {
            warn!(
                failed = report.failed,
                remaining = report.remaining,
                attempt = schedule.consecutive_failures() + 1,
                "sync pass incomplete, backing off"
            );
            schedule.on_failure()
        }
        Ok(SyncOutcome::AlreadyRunning) => schedule.on_success(),
        Err(EngineError::Offline) => {
            debug!("offline, backing off");
            schedule.on_failure()
        }
        Err(err) => {
            warn!(error = %err, "sync pass failed");
            schedule.on_failure()
        }
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
