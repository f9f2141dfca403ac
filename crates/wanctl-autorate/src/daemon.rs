//! The autorate control loop.
//!
//! Fixed-period cycles: probe, read queue deltas, classify, learn the
//! baseline when idle, compute new rates, apply them subject to the
//! rate limiter and the pending-rate policy, record metrics, persist
//! state, feed the watchdog. A cycle that cannot reach the router still
//! "happens" — measurements are recorded and state persisted — but the
//! watchdog goes hungry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wanctl_common::config::bps_to_mbps;
use wanctl_common::probe::{self, RttProbe};
use wanctl_common::sample::{CycleSample, RttSource};
use wanctl_common::shutdown::Shutdown;
use wanctl_common::state::{atomic_write_json, read_json_or_default, WanState};
use wanctl_common::systemd;
use wanctl_metrics::snapshot::{record_config_snapshot, SnapshotTrigger};
use wanctl_metrics::{maintenance, names, MetricRow, MetricsWriter};
use wanctl_router::error::RouterError;
use wanctl_router::stats::QueueStatsReader;
use wanctl_router::{timeouts, RouterClient, RouterConnectivity};

use crate::baseline::BaselineEstimator;
use crate::config::AutorateConfig;
use crate::controller::{CycleDecision, QueueController, WanController};
use crate::health::{
    DirectionHealth, HealthSnapshot, HealthState, WanHealth, MAX_CONSECUTIVE_FAILURES,
};
use crate::pending::PendingRateChange;
use crate::ratelimit::RateLimiter;

/// One WAN's autorate daemon.
pub struct AutorateDaemon {
    config: AutorateConfig,
    router: RouterClient,
    stats: QueueStatsReader,
    probe: RttProbe,
    wan: WanController,
    pending: PendingRateChange,
    limiter: RateLimiter,
    connectivity: RouterConnectivity,
    metrics: Option<Arc<MetricsWriter>>,
    health: Arc<HealthState>,
    consecutive_cycle_failures: u32,
    /// Last good RTT with its monotonic age, for the fallback window.
    last_rtt: Option<(f64, Instant)>,
}

impl AutorateDaemon {
    /// Build the daemon: restore persisted state, open the metrics
    /// store (best effort), run startup maintenance.
    pub async fn new(config: AutorateConfig, health: Arc<HealthState>) -> AutorateDaemon {
        let router = RouterClient::new(
            &config.router.host,
            &config.router.user,
            config.router.ssh_key.clone(),
            timeouts::AUTORATE_COMMAND,
        );
        let probe = RttProbe::new(
            config.measurement.ping_hosts.clone(),
            Duration::from_secs_f64(config.measurement.ping_timeout_s),
            config.measurement.rtt_aggregation,
        );

        let persisted: WanState = read_json_or_default(&config.state_file);

        let download_rate = if persisted.download_rate_bps > 0 {
            persisted.download_rate_bps
        } else {
            read_initial_rate(&router, &config.queue_download, config.download.ceiling_bps).await
        };
        let upload_rate = if persisted.upload_rate_bps > 0 {
            persisted.upload_rate_bps
        } else {
            read_initial_rate(&router, &config.queue_upload, config.upload.ceiling_bps).await
        };

        let mut baseline = BaselineEstimator::new(
            config.baseline.initial_ms,
            config.baseline.min_ms,
            config.baseline.max_ms,
            config.baseline.alpha,
            config.baseline.update_threshold_ms,
            config.baseline.idle_queue_packets_max,
        );
        baseline.restore(persisted.baseline_rtt);

        let mut wan = WanController::new(
            config.wan_name.clone(),
            baseline,
            config.thresholds,
            QueueController::new(config.download, download_rate),
            QueueController::new(config.upload, upload_rate),
            config.load_rtt_beta,
        );
        wan.restore_load_rtt(persisted.load_rtt);

        let metrics = match MetricsWriter::open(&config.metrics_db).await {
            Ok(writer) => Some(Arc::new(writer)),
            Err(e) => {
                tracing::warn!(
                    db = %config.metrics_db.display(),
                    error = %e,
                    "metrics store unavailable, continuing without metrics"
                );
                None
            }
        };
        if let Some(writer) = &metrics {
            maintenance::run_startup_maintenance(writer, config.retention_days).await;
            if let Err(e) = record_config_snapshot(
                writer,
                &config.wan_name,
                config.snapshot_labels(),
                SnapshotTrigger::Startup,
            )
            .await
            {
                tracing::warn!(error = %e, "failed to record config snapshot");
            }
        }

        tracing::info!(
            wan = %config.wan_name,
            download_mbps = bps_to_mbps(download_rate),
            upload_mbps = bps_to_mbps(upload_rate),
            baseline_ms = wan.baseline.baseline(),
            "autorate initialized"
        );

        let limiter = RateLimiter::new(config.rate_limit.max_changes, config.rate_limit.window);
        AutorateDaemon {
            config,
            router,
            stats: QueueStatsReader::new(),
            probe,
            wan,
            pending: PendingRateChange::new(),
            limiter,
            connectivity: RouterConnectivity::new(),
            metrics,
            health,
            consecutive_cycle_failures: 0,
            last_rtt: None,
        }
    }

    /// Run the fixed-period loop until shutdown.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        systemd::notify_ready();
        let interval = self.config.cycle_interval();

        while !shutdown.is_shutdown() {
            let started = Instant::now();
            let success = self.run_cycle().await;

            if success {
                self.consecutive_cycle_failures = 0;
                systemd::notify_watchdog();
            } else {
                self.consecutive_cycle_failures += 1;
                systemd::notify_degraded(&format!(
                    "{} consecutive failures",
                    self.consecutive_cycle_failures
                ));
                if self.consecutive_cycle_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(
                        failures = self.consecutive_cycle_failures,
                        "daemon degraded, loop continues"
                    );
                }
            }
            self.publish_health();

            let sleep_for = interval.saturating_sub(started.elapsed());
            if shutdown.sleep(sleep_for).await {
                break;
            }
        }

        systemd::notify_stopping();
        tracing::info!(wan = %self.config.wan_name, "autorate stopped");
    }

    /// One cycle. Returns whether it fully succeeded (measurement and
    /// every needed router interaction).
    pub async fn run_cycle(&mut self) -> bool {
        let cycle_ts = chrono::Utc::now().timestamp();

        // 1. RTT, with TCP and cache fallbacks.
        let (rtt_ms, rtt_source) = self.measure_rtt().await;

        // 2. Queue deltas; failures here mark the router unreachable.
        let mut router_ok = true;
        let download = match self
            .stats
            .read_delta(&self.router, &self.config.queue_download)
            .await
        {
            Ok(delta) => {
                self.connectivity.record_success();
                Some(delta)
            }
            Err(e) => {
                let kind = self.connectivity.record_failure(&e);
                tracing::warn!(kind = %kind, error = %e, "download stats read failed");
                router_ok = false;
                None
            }
        };
        let upload = if router_ok {
            match self
                .stats
                .read_delta(&self.router, &self.config.queue_upload)
                .await
            {
                Ok(delta) => Some(delta),
                Err(e) => {
                    let kind = self.connectivity.record_failure(&e);
                    tracing::warn!(kind = %kind, error = %e, "upload stats read failed");
                    router_ok = false;
                    None
                }
            }
        } else {
            None
        };

        let sample = CycleSample {
            ts: cycle_ts,
            rtt_ms,
            rtt_source,
            download,
            upload,
        };

        let Some(rtt) = sample.rtt_ms else {
            tracing::warn!("cycle invalid: no RTT sample from ICMP, TCP or cache");
            return false;
        };

        // 3-5. Classify, learn baseline on idle, compute targets.
        let decision = self
            .wan
            .observe(rtt, sample.total_drops(), sample.max_queued_packets());

        tracing::debug!(
            zone = %decision.zone,
            delta_ms = decision.delta_ms,
            rtt_ms = rtt,
            drops = sample.total_drops(),
            queued = sample.max_queued_packets(),
            "cycle classified"
        );

        // 6. Apply, honoring pending-rate and rate-limit policies.
        let apply_ok = self.apply_rates(&decision, router_ok).await;

        // 7. Metrics and state survive router trouble.
        self.record_metrics(cycle_ts, rtt, &decision).await;
        self.persist_state(cycle_ts);

        router_ok && apply_ok
    }

    /// ICMP first; TCP connect times if ICMP is silent; the cached RTT
    /// inside the fallback window as the last resort.
    async fn measure_rtt(&mut self) -> (Option<f64>, Option<RttSource>) {
        if let Some(rtt) = self.probe.measure().await {
            self.last_rtt = Some((rtt, Instant::now()));
            return (Some(rtt), Some(RttSource::Icmp));
        }

        let anchors = self.tcp_anchors();
        let timeout = Duration::from_secs_f64(self.config.measurement.ping_timeout_s);
        if let Some(rtt) = probe::tcp_connect_rtt(&anchors, timeout).await {
            tracing::warn!(rtt_ms = rtt, "ICMP probes all failed, using TCP connect time");
            self.last_rtt = Some((rtt, Instant::now()));
            return (Some(rtt), Some(RttSource::Tcp));
        }

        if let Some((rtt, at)) = self.last_rtt {
            let age = at.elapsed().as_secs_f64();
            if age <= self.config.measurement.fallback_max_age_s() {
                tracing::warn!(age_s = age, "no fresh measurement, replaying last known RTT");
                return (Some(rtt), Some(RttSource::Cache));
            }
        }
        (None, None)
    }

    fn tcp_anchors(&self) -> Vec<String> {
        if !self.config.measurement.tcp_fallback_hosts.is_empty() {
            return self.config.measurement.tcp_fallback_hosts.clone();
        }
        self.config
            .measurement
            .ping_hosts
            .iter()
            .map(|h| format!("{h}:443"))
            .collect()
    }

    /// The apply phase. Pending pairs go first; a fresh decision either
    /// writes, queues, or holds. Shaper limits are never relaxed on
    /// error — a failed write leaves the pair parked in the buffer.
    async fn apply_rates(&mut self, decision: &CycleDecision, router_ok: bool) -> bool {
        if self.pending.has_pending() {
            if self.pending.is_stale(self.config.pending_max_age) {
                let age = self.pending.age().unwrap_or_default();
                tracing::warn!(
                    age_s = age.as_secs_f64(),
                    max_age_s = self.config.pending_max_age.as_secs_f64(),
                    "dropping stale pending rates, recomputing from current measurement"
                );
                self.pending.clear();
            } else if let (true, Some((dl, ul))) = (router_ok, self.pending.pending()) {
                if !self.limiter.can_change() {
                    tracing::warn!("pending rates held back by rate limiter");
                    return true;
                }
                return match self.write_pair(dl, ul).await {
                    Ok(()) => {
                        self.limiter.record_change();
                        self.pending.clear();
                        tracing::info!(
                            download_mbps = bps_to_mbps(dl),
                            upload_mbps = bps_to_mbps(ul),
                            "applied pending rates after reconnect"
                        );
                        true
                    }
                    Err(e) => {
                        let kind = self.connectivity.record_failure(&e);
                        tracing::warn!(kind = %kind, error = %e, "pending rate apply failed");
                        false
                    }
                };
            }
        }

        let dl_target = decision.download_target_bps;
        let ul_target = decision.upload_target_bps;
        let changed = dl_target != self.wan.download.current_rate_bps()
            || ul_target != self.wan.upload.current_rate_bps();
        if !changed {
            return router_ok;
        }

        if !router_ok {
            self.pending.queue(dl_target, ul_target);
            tracing::warn!(
                download_mbps = bps_to_mbps(dl_target),
                upload_mbps = bps_to_mbps(ul_target),
                "router unreachable, rates queued"
            );
            return false;
        }

        if !self.limiter.can_change() {
            let wait = self.limiter.time_until_available();
            self.pending.queue(dl_target, ul_target);
            tracing::warn!(
                wait_s = wait.as_secs_f64(),
                "rate change suppressed by limiter, queued"
            );
            return true;
        }

        match self.write_pair(dl_target, ul_target).await {
            Ok(()) => {
                self.limiter.record_change();
                self.pending.clear();
                tracing::info!(
                    zone = %decision.zone,
                    download_mbps = bps_to_mbps(dl_target),
                    upload_mbps = bps_to_mbps(ul_target),
                    "rates applied"
                );
                true
            }
            Err(e) => {
                let kind = self.connectivity.record_failure(&e);
                self.pending.queue(dl_target, ul_target);
                tracing::warn!(kind = %kind, error = %e, "rate write failed, queued");
                false
            }
        }
    }

    /// Write both directions, committing each only after its write
    /// lands. Unchanged directions are skipped.
    async fn write_pair(&mut self, dl_bps: u64, ul_bps: u64) -> Result<(), RouterError> {
        if dl_bps != self.wan.download.current_rate_bps() {
            self.router
                .set_max_limit(&self.config.queue_download, dl_bps)
                .await?;
            self.wan.download.commit(dl_bps);
        }
        if ul_bps != self.wan.upload.current_rate_bps() {
            self.router
                .set_max_limit(&self.config.queue_upload, ul_bps)
                .await?;
            self.wan.upload.commit(ul_bps);
        }
        Ok(())
    }

    /// The per-cycle batch; every row shares the cycle timestamp.
    async fn record_metrics(&self, cycle_ts: i64, rtt_ms: f64, decision: &CycleDecision) {
        let Some(writer) = &self.metrics else { return };
        let wan = &self.config.wan_name;
        let batch = [
            MetricRow::raw(cycle_ts, wan, names::RTT_MS, rtt_ms),
            MetricRow::raw(cycle_ts, wan, names::RTT_BASELINE_MS, self.wan.baseline.baseline()),
            MetricRow::raw(cycle_ts, wan, names::RTT_DELTA_MS, decision.delta_ms),
            MetricRow::raw(
                cycle_ts,
                wan,
                names::RATE_DOWNLOAD_MBPS,
                bps_to_mbps(self.wan.download.current_rate_bps()),
            ),
            MetricRow::raw(
                cycle_ts,
                wan,
                names::RATE_UPLOAD_MBPS,
                bps_to_mbps(self.wan.upload.current_rate_bps()),
            ),
            MetricRow::raw(cycle_ts, wan, names::STATE, decision.zone.metric_value()),
        ];
        if let Err(e) = writer.write_batch(&batch).await {
            tracing::warn!(error = %e, "metrics batch write failed");
        }
    }

    fn persist_state(&self, cycle_ts: i64) {
        let state = WanState {
            baseline_rtt: self.wan.baseline.baseline(),
            load_rtt: self.wan.load_rtt(),
            download_rate_bps: self.wan.download.current_rate_bps(),
            upload_rate_bps: self.wan.upload.current_rate_bps(),
            zone: self.wan.zone(),
            last_cycle_ts: cycle_ts,
        };
        if let Err(e) = atomic_write_json(&self.config.state_file, &state) {
            tracing::warn!(
                path = %self.config.state_file.display(),
                error = %e,
                "state file write failed"
            );
        }
    }

    fn publish_health(&self) {
        self.health.publish(HealthSnapshot {
            consecutive_failures: self.consecutive_cycle_failures,
            wans: vec![WanHealth {
                name: self.config.wan_name.clone(),
                baseline_rtt_ms: round2(self.wan.baseline.baseline()),
                load_rtt_ms: round2(self.wan.load_rtt()),
                download: DirectionHealth {
                    current_rate_mbps: round1(bps_to_mbps(self.wan.download.current_rate_bps())),
                    state: self.wan.download.state_str().to_string(),
                },
                upload: DirectionHealth {
                    current_rate_mbps: round1(bps_to_mbps(self.wan.upload.current_rate_bps())),
                    state: self.wan.upload.state_str().to_string(),
                },
            }],
        });
    }
}

async fn read_initial_rate(router: &RouterClient, queue: &str, ceiling_bps: u64) -> u64 {
    match router.get_max_limit(queue).await {
        Ok(rate) if rate > 0 => rate,
        Ok(_) => {
            tracing::info!(queue, "queue unlimited on router, starting from ceiling");
            ceiling_bps
        }
        Err(e) => {
            tracing::warn!(queue, error = %e, "initial rate read failed, starting from ceiling");
            ceiling_bps
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
