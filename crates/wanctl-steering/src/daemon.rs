//! The steering control loop.
//!
//! Same cadence discipline as autorate, different actuator: instead of
//! rate writes, the loop reconciles one mangle rule with the FSM's
//! desired state. In dry-run mode every transition is observed, logged
//! and recorded in metrics, but the rule is never touched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wanctl_common::ewma::ewma_update;
use wanctl_common::probe::{self, RttProbe};
use wanctl_common::sample::RttSource;
use wanctl_common::shutdown::Shutdown;
use wanctl_common::state::{atomic_write_json, read_json_or_default, SteeringStateFile};
use wanctl_common::systemd;
use wanctl_common::zone::Zone;
use wanctl_metrics::snapshot::{record_config_snapshot, SnapshotTrigger};
use wanctl_metrics::{maintenance, names, Granularity, MetricRow, MetricsWriter};
use wanctl_router::stats::QueueStatsReader;
use wanctl_router::{timeouts, RouterClient, RouterConnectivity};

use crate::classify::{assess, CongestionSignals, ZoneHysteresis};
use crate::confidence::{ConfidenceScore, ConfidenceScorer, ConfidenceWeights};
use crate::config::SteeringConfig;
use crate::fsm::{FsmState, SteeringAction, SteeringFsm, Transition};
use crate::health::{HealthState, SteeringHealthSnapshot, MAX_CONSECUTIVE_FAILURES};
use crate::timers::TimerManager;

/// The steering daemon for one primary/secondary pair.
pub struct SteeringDaemon {
    config: SteeringConfig,
    router: RouterClient,
    stats: QueueStatsReader,
    probe: RttProbe,
    hysteresis: ZoneHysteresis,
    scorer: ConfidenceScorer,
    fsm: SteeringFsm,
    baseline_rtt: f64,
    delta_ewma: f64,
    /// Desired steering state per the FSM; drives metrics and health.
    steering_enabled: bool,
    /// Rule state as last confirmed on the router (None = unknown).
    rule_applied: Option<bool>,
    connectivity: RouterConnectivity,
    metrics: Option<Arc<MetricsWriter>>,
    health: Arc<HealthState>,
    consecutive_cycle_failures: u32,
    last_score: ConfidenceScore,
    last_rtt: Option<(f64, Instant)>,
}

impl SteeringDaemon {
    pub async fn new(config: SteeringConfig, health: Arc<HealthState>) -> SteeringDaemon {
        let router = RouterClient::new(
            &config.router.host,
            &config.router.user,
            config.router.ssh_key.clone(),
            timeouts::STEERING_COMMAND,
        );
        let probe = RttProbe::new(
            config.measurement.ping_hosts.clone(),
            Duration::from_secs_f64(config.measurement.ping_timeout_s),
            config.measurement.rtt_aggregation,
        );

        let mut fsm = SteeringFsm::new(
            TimerManager::new(config.timers, config.measurement.cycle_interval_s),
            config.flap,
            config.steer_threshold,
            config.recovery_threshold,
        );

        let persisted: SteeringStateFile = read_json_or_default(&config.state_file);
        if let Some(state) = FsmState::parse(&persisted.fsm_state) {
            fsm.resume(state);
        }
        let steering_enabled = fsm.state() == FsmState::PrimaryDegraded;

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
            primary = %config.wan_name,
            secondary = %config.secondary_wan,
            dry_run = config.dry_run,
            fsm = fsm.state().as_str(),
            "steering initialized"
        );

        SteeringDaemon {
            hysteresis: ZoneHysteresis::new(
                config.red_samples_required,
                config.green_samples_required,
            ),
            scorer: ConfidenceScorer::new(
                ConfidenceWeights::default(),
                config.sustained_yellow_cycles,
            ),
            baseline_rtt: config.baseline.initial_ms,
            delta_ewma: 0.0,
            steering_enabled,
            rule_applied: None,
            router,
            stats: QueueStatsReader::new(),
            probe,
            fsm,
            config,
            connectivity: RouterConnectivity::new(),
            metrics,
            health,
            consecutive_cycle_failures: 0,
            last_score: ConfidenceScore::default(),
            last_rtt: None,
        }
    }

    /// Run the loop until shutdown.
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
        tracing::info!(primary = %self.config.wan_name, "steering stopped");
    }

    /// One cycle. Returns whether measurement and every needed router
    /// interaction succeeded.
    pub async fn run_cycle(&mut self) -> bool {
        let cycle_ts = chrono::Utc::now().timestamp();

        let (rtt_ms, _source) = self.measure_rtt().await;

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

        let Some(rtt) = rtt_ms else {
            tracing::warn!("cycle invalid: no RTT sample from ICMP, TCP or cache");
            return false;
        };

        let drops = download.map_or(0, |d| d.dropped) + upload.map_or(0, |d| d.dropped);
        let queued = download
            .map_or(0, |d| d.queued_packets)
            .max(upload.map_or(0, |d| d.queued_packets));

        let delta = rtt - self.baseline_rtt;
        self.delta_ewma = ewma_update(self.delta_ewma, delta, self.config.delta_ewma_alpha);

        let signals = CongestionSignals {
            rtt_delta_ms: delta,
            rtt_delta_ewma_ms: self.delta_ewma,
            drops,
            queued_packets: queued,
        };

        let raw_zone = assess(&signals, &self.config.thresholds);
        let zone = self.hysteresis.update(raw_zone);

        // The baseline only learns from a quiet line.
        if zone == Zone::Green && drops == 0 {
            self.learn_baseline(rtt);
        }

        let score = self.scorer.score(zone, &signals, &self.config.thresholds);
        tracing::debug!(
            zone = %zone,
            score = score.score,
            contributors = ?score.contributors,
            delta_ms = delta,
            ewma_ms = self.delta_ewma,
            drops,
            queued,
            "cycle assessed"
        );

        let transition = self.fsm.evaluate(crate::fsm::FsmInputs {
            score: score.score,
            zone,
            drops,
        });
        self.last_score = score;

        if let Some(t) = transition {
            self.steering_enabled = t.to == FsmState::PrimaryDegraded;
        }

        let rule_ok = self.reconcile_rule(transition, router_ok).await;

        self.record_metrics(cycle_ts, rtt, delta, zone, transition).await;
        self.persist_state(cycle_ts);

        router_ok && rule_ok
    }

    /// ICMP, then TCP connect time, then the cached RTT within the
    /// fallback window.
    async fn measure_rtt(&mut self) -> (Option<f64>, Option<RttSource>) {
        if let Some(rtt) = self.probe.measure().await {
            self.last_rtt = Some((rtt, Instant::now()));
            return (Some(rtt), Some(RttSource::Icmp));
        }

        let anchors: Vec<String> = if self.config.measurement.tcp_fallback_hosts.is_empty() {
            self.config
                .measurement
                .ping_hosts
                .iter()
                .map(|h| format!("{h}:443"))
                .collect()
        } else {
            self.config.measurement.tcp_fallback_hosts.clone()
        };
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

    fn learn_baseline(&mut self, rtt_ms: f64) {
        let candidate = ewma_update(self.baseline_rtt, rtt_ms, self.config.baseline.alpha);
        if candidate < self.config.baseline.min_ms || candidate > self.config.baseline.max_ms {
            tracing::warn!(
                baseline = self.baseline_rtt,
                candidate,
                min = self.config.baseline.min_ms,
                max = self.config.baseline.max_ms,
                "baseline update rejected: candidate outside bounds"
            );
            return;
        }
        self.baseline_rtt = candidate;
    }

    /// Bring the mangle rule in line with the FSM's desired state.
    ///
    /// Dry-run observes and logs but never issues a rule command. A
    /// failed toggle leaves `rule_applied` stale so the next cycle
    /// retries.
    async fn reconcile_rule(&mut self, transition: Option<Transition>, router_ok: bool) -> bool {
        if let Some(t) = transition {
            if self.config.dry_run {
                let verb = match t.action {
                    SteeringAction::EnableSteering => "enable",
                    SteeringAction::DisableSteering => "disable",
                };
                tracing::warn!(
                    from = t.from.as_str(),
                    to = t.to.as_str(),
                    rule = %self.config.rule_comment,
                    "dry-run: would {verb} mangle rule"
                );
            }
        }
        if self.config.dry_run || !router_ok {
            return router_ok;
        }
        if self.rule_applied == Some(self.steering_enabled) {
            return true;
        }

        let result = if self.steering_enabled {
            self.router.enable_rule(&self.config.rule_comment).await
        } else {
            self.router.disable_rule(&self.config.rule_comment).await
        };
        match result {
            Ok(()) => {
                self.rule_applied = Some(self.steering_enabled);
                true
            }
            Err(e) => {
                let kind = self.connectivity.record_failure(&e);
                tracing::warn!(
                    kind = %kind,
                    error = %e,
                    enabled = self.steering_enabled,
                    "mangle rule toggle failed, will retry next cycle"
                );
                false
            }
        }
    }

    async fn record_metrics(
        &self,
        cycle_ts: i64,
        rtt_ms: f64,
        delta_ms: f64,
        zone: Zone,
        transition: Option<Transition>,
    ) {
        let Some(writer) = &self.metrics else { return };
        let wan = &self.config.wan_name;

        let mut batch = vec![
            MetricRow::raw(cycle_ts, wan, names::RTT_MS, rtt_ms),
            MetricRow::raw(cycle_ts, wan, names::RTT_BASELINE_MS, self.baseline_rtt),
            MetricRow::raw(cycle_ts, wan, names::RTT_DELTA_MS, delta_ms),
            MetricRow::raw(cycle_ts, wan, names::STATE, zone.metric_value()),
            MetricRow::raw(
                cycle_ts,
                wan,
                names::STEERING_ENABLED,
                if self.steering_enabled { 1.0 } else { 0.0 },
            ),
        ];
        if let Some(t) = transition {
            batch.push(MetricRow {
                timestamp: cycle_ts,
                wan_name: wan.clone(),
                metric_name: names::STEERING_TRANSITION.to_string(),
                value: 1.0,
                labels: Some(serde_json::json!({
                    "from": t.from.as_str(),
                    "to": t.to.as_str(),
                    "dry_run": self.config.dry_run,
                })),
                granularity: Granularity::Raw,
            });
        }

        if let Err(e) = writer.write_batch(&batch).await {
            tracing::warn!(error = %e, "metrics batch write failed");
        }
    }

    fn persist_state(&self, cycle_ts: i64) {
        let state = SteeringStateFile {
            steering_enabled: self.steering_enabled,
            fsm_state: self.fsm.state().as_str().to_string(),
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

    fn publish_health(&mut self) {
        let flap_penalized = self.fsm.is_flap_penalized();
        self.health.publish(SteeringHealthSnapshot {
            consecutive_failures: self.consecutive_cycle_failures,
            primary_wan: self.config.wan_name.clone(),
            secondary_wan: self.config.secondary_wan.clone(),
            fsm_state: self.fsm.state().as_str().to_string(),
            steering_enabled: self.steering_enabled,
            score: self.last_score.score,
            contributors: self
                .last_score
                .contributors
                .iter()
                .map(|c| c.to_string())
                .collect(),
            dry_run: self.config.dry_run,
            flap_penalized,
            baseline_rtt_ms: (self.baseline_rtt * 100.0).round() / 100.0,
            rtt_delta_ewma_ms: (self.delta_ewma * 100.0).round() / 100.0,
        });
    }
}
