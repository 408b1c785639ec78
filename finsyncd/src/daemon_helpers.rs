fn build_client(config: &DaemonConfig) -> anyhow::Result<FinsyncClient> {
    if config.api_key.is_empty() {
        warn!("FINSYNC_API_KEY is not set, remote requests will be anonymous");
    }
    let client = FinsyncClient::new(&config.api_url, config.api_key.clone())
        .with_context(|| format!("invalid FINSYNC_API_URL: {}", config.api_url))?;
    Ok(match &config.access_token {
        Some(token) => client.with_access_token(token.clone()),
        None => client,
    })
}

fn log_status(status: &SyncStatus) {
    if status.is_syncing {
        debug!(
            progress = status.sync_progress,
            pending = status.pending_count,
            failed = status.failed_count,
            "sync status: {}",
            status_label(status)
        );
        return;
    }
    info!(
        pending = status.pending_count,
        failed = status.failed_count,
        last_successful_sync = status.last_successful_sync,
        error = status.error.as_deref(),
        "sync status: {}",
        status_label(status)
    );
}

fn status_label(status: &SyncStatus) -> &'static str {
    if status.is_syncing {
        "syncing"
    } else if status.error.is_some() || status.failed_count > 0 {
        "error"
    } else if status.pending_count > 0 {
        "pending"
    } else {
        "idle"
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    crate::sync::store::default_db_path().context("no default location for the offline store")
}

fn parse_u64(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
