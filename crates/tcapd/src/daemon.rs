//! Daemon lifecycle: startup, periodic sweeps, metrics, shutdown

use anyhow::{Context, Result};
use prometheus_client::registry::Registry;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcap_core::{config::expand_tilde, GeoPoint, TcapConfig};
use tcap_vault::{
    CapsuleRepository, CapsuleService, ConditionSources, JsonFileRepository, SystemClock,
};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, error, info, warn};

use crate::metrics::{HealthState, SweepMetrics};

pub type SharedService = Arc<TokioMutex<CapsuleService<JsonFileRepository, SystemClock>>>;

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub events_file: Option<PathBuf>,
    pub position: Option<GeoPoint>,
    pub once: bool,
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub purged: usize,
    pub delivered: usize,
}

pub async fn run(config: TcapConfig, opts: Options) -> Result<()> {
    let store_path = expand_tilde(&config.store.path);
    info!(store = %store_path.display(), "daemon starting");

    let service: SharedService = Arc::new(TokioMutex::new(
        CapsuleService::new(JsonFileRepository::open(&store_path), SystemClock)
            .with_kdf_params(config.crypto.kdf_params()),
    ));

    let mut registry = Registry::default();
    let metrics = SweepMetrics::new(&mut registry);
    let ready = Arc::new(AtomicBool::new(false));

    if opts.once {
        let report = sweep_once(&service, &opts, &metrics).await?;
        info!(purged = report.purged, delivered = report.delivered, "single sweep done");
        return Ok(());
    }

    // Start Prometheus metrics endpoint
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            ready: ready.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let period = Duration::from_secs(config.daemon.sweep_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = period.as_secs(), "sweep loop started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match sweep_once(&service, &opts, &metrics).await {
                    Ok(report) => {
                        ready.store(true, Ordering::SeqCst);
                        if report != SweepReport::default() {
                            info!(purged = report.purged, delivered = report.delivered, "sweep");
                        }
                    }
                    Err(e) => {
                        ready.store(false, Ordering::SeqCst);
                        metrics.sweep_failures.inc();
                        warn!("sweep failed: {e:#}");
                    }
                }
            }
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for ctrl-c")?;
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

/// Purge expired capsules, then deliver eligible ones.
pub async fn sweep_once(
    service: &SharedService,
    opts: &Options,
    metrics: &SweepMetrics,
) -> Result<SweepReport> {
    let sources = condition_sources(opts)?;
    let mut svc = service.lock().await;

    let purged = svc.purge_expired().context("purging expired capsules")?;
    let delivered = svc
        .sweep_eligible_deliveries(&sources)
        .context("delivery sweep")?;

    for capsule in &delivered {
        info!(capsule_id = %capsule.id, "delivered");
    }

    metrics.sweeps.inc();
    metrics.purged.inc_by(purged.len() as u64);
    metrics.delivered.inc_by(delivered.len() as u64);
    match svc.repository().load_all_capsules() {
        Ok(all) => metrics.observe_store(&all),
        Err(e) => debug!("store snapshot for metrics failed: {e}"),
    }

    Ok(SweepReport {
        purged: purged.len(),
        delivered: delivered.len(),
    })
}

fn condition_sources(opts: &Options) -> Result<ConditionSources> {
    let mut sources = ConditionSources::none();
    if let Some(path) = &opts.events_file {
        sources = sources.with_events(Arc::new(load_events(path)?));
    }
    if let Some(position) = opts.position {
        sources = sources.with_position(Arc::new(position));
    }
    Ok(sources)
}

/// Event ids, one per line. Blank lines and `#` comments are ignored; a
/// missing file means no events yet.
pub fn load_events(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading events file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcap_core::{CapsuleStatus, TimeCapsule};

    fn shared(path: &Path) -> SharedService {
        Arc::new(TokioMutex::new(CapsuleService::new(
            JsonFileRepository::open(path),
            SystemClock,
        )))
    }

    #[test]
    fn test_load_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.txt");
        std::fs::write(&path, "# confirmed\ngraduation\n\n  wedding  \n").unwrap();

        let events = load_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.contains("wedding"));
        assert!(load_events(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_delivers_on_event() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("capsules.json");
        let events = dir.path().join("events.txt");

        let mut capsule = TimeCapsule::new_draft("c1", "alice", "age1alice", "t", 0);
        capsule.delivery_conditions = vec![tcap_core::DeliveryCondition::Event {
            event_id: "graduation".into(),
        }];
        capsule.status = CapsuleStatus::Scheduled;
        JsonFileRepository::open(&store)
            .save_all_capsules(&[capsule])
            .unwrap();

        let service = shared(&store);
        let opts = Options {
            events_file: Some(events.clone()),
            ..Default::default()
        };
        let metrics = SweepMetrics::new(&mut Registry::default());

        let report = sweep_once(&service, &opts, &metrics).await.unwrap();
        assert_eq!(report, SweepReport::default());

        std::fs::write(&events, "graduation\n").unwrap();
        let report = sweep_once(&service, &opts, &metrics).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(metrics.delivered.get(), 1);
        assert_eq!(metrics.sweeps.get(), 2);

        let stored = JsonFileRepository::open(&store).load_all_capsules().unwrap();
        assert_eq!(stored[0].status, CapsuleStatus::Delivered);
    }
}
