use arc_swap::ArcSwap;
use parking_lot::{Mutex, ReentrantMutex};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::info::{ConnectionSignals, NetworkInfo, QualityTier, RecommendedConfig};
use super::probe::LatencyProbe;
use crate::clock::{self, SharedClock};
use crate::observer::{Publisher, Subscription};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkMonitorConfig {
    #[serde(rename = "probe_interval_ms", with = "crate::config::duration_ms")]
    pub probe_interval: Duration,
    #[serde(rename = "probe_timeout_ms", with = "crate::config::duration_ms")]
    pub probe_timeout: Duration,
    /// Weight given to a new probe sample in the moving averages.
    pub smoothing: f64,
    /// Endpoint for the background latency probe; no probe loop without it.
    pub probe_url: Option<String>,
}

impl Default for NetworkMonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
            smoothing: 0.3,
            probe_url: None,
        }
    }
}

impl NetworkMonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = Some(url.into());
        self
    }
}

struct State {
    signals: ConnectionSignals,
    packet_loss: f64,
}

/// Best-effort view of the current network condition.
///
/// Reads never block: the latest [`NetworkInfo`] lives in an `ArcSwap` and is
/// replaced wholesale on every update. Updates are serialized from the signal
/// change through delivery, so subscribers see snapshots in store order. The
/// delivery lock is reentrant; a handler may itself report an update.
pub struct NetworkMonitor {
    config: NetworkMonitorConfig,
    current: ArcSwap<NetworkInfo>,
    state: Mutex<State>,
    delivery: ReentrantMutex<()>,
    publisher: Publisher<NetworkInfo>,
    clock: SharedClock,
}

impl NetworkMonitor {
    pub fn new(config: NetworkMonitorConfig) -> Self {
        Self::with_clock(config, clock::system())
    }

    pub fn with_clock(config: NetworkMonitorConfig, clock: SharedClock) -> Self {
        let signals = ConnectionSignals::default();
        let info = NetworkInfo::derive(&signals, 0.0, clock.now_ms());
        Self {
            config,
            current: ArcSwap::from_pointee(info),
            state: Mutex::new(State {
                signals,
                packet_loss: 0.0,
            }),
            delivery: ReentrantMutex::new(()),
            publisher: Publisher::new(),
            clock,
        }
    }

    pub fn config(&self) -> &NetworkMonitorConfig {
        &self.config
    }

    pub fn current_info(&self) -> NetworkInfo {
        (**self.current.load()).clone()
    }

    pub fn quality(&self) -> QualityTier {
        self.current.load().quality
    }

    pub fn is_online(&self) -> bool {
        self.current.load().online
    }

    pub fn is_stable(&self, min_reliability: f64) -> bool {
        let info = self.current.load();
        info.online && info.reliability >= min_reliability
    }

    pub fn recommended_config(&self) -> RecommendedConfig {
        RecommendedConfig::for_tier(self.quality())
    }

    /// Subscribe to updates. The handler is called once immediately with the
    /// current snapshot, then on every update until the subscription drops.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NetworkInfo) + Send + Sync + 'static,
    {
        let handler: Arc<dyn Fn(&NetworkInfo) + Send + Sync> = Arc::new(handler);
        let _delivery = self.delivery.lock();
        handler(&self.current_info());
        self.publisher.subscribe_arc(handler)
    }

    /// Suspend until the monitor reports online or `timeout` elapses.
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Mutex::new(Some(tx));
        let _subscription = self.subscribe(move |info| {
            if info.online {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }
        });
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
    }

    /// Connectivity event from the platform layer.
    pub fn update(&self, signals: ConnectionSignals) {
        self.apply(|st| st.signals = signals);
    }

    pub fn set_online(&self, online: bool) {
        self.apply(|st| st.signals.online = online);
    }

    /// Fold one probe outcome into the smoothed RTT / packet-loss estimates.
    pub fn record_probe(&self, outcome: Result<Duration>) {
        let w = self.config.smoothing.clamp(0.0, 1.0);
        self.apply(|st| match &outcome {
            Ok(rtt) => {
                let sample = rtt.as_secs_f64() * 1000.0;
                st.signals.rtt_ms = w * sample + (1.0 - w) * st.signals.rtt_ms;
                st.packet_loss *= 1.0 - w;
            }
            Err(err) => {
                st.packet_loss = w + (1.0 - w) * st.packet_loss;
                debug!(error = %err, packet_loss = st.packet_loss, "latency probe failed");
            }
        });
    }

    pub async fn probe_once(&self, probe: &dyn LatencyProbe) {
        if !self.is_online() {
            return;
        }
        let timeout = self.config.probe_timeout;
        let outcome = match tokio::time::timeout(timeout, probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(timeout)),
        };
        self.record_probe(outcome);
    }

    /// Run the latency probe on a fixed interval. The task ends once the
    /// monitor is dropped.
    pub fn spawn_probe_loop(self: &Arc<Self>, probe: Arc<dyn LatencyProbe>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.probe_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                monitor.probe_once(probe.as_ref()).await;
            }
        })
    }

    /// Mutate the raw signals, then store and deliver the derived snapshot.
    fn apply<F>(&self, mutate: F)
    where
        F: FnOnce(&mut State),
    {
        let _delivery = self.delivery.lock();
        let (previous, next) = {
            let mut st = self.state.lock();
            mutate(&mut st);
            let next = NetworkInfo::derive(&st.signals, st.packet_loss, self.clock.now_ms());
            (self.current.swap(Arc::new(next.clone())), next)
        };
        if previous.quality != next.quality || previous.online != next.online {
            info!(
                online = next.online,
                quality = ?next.quality,
                reliability = next.reliability,
                rtt_ms = next.rtt_ms,
                "network condition changed"
            );
        }
        self.publisher.publish(&next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::EffectiveType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn excellent() -> ConnectionSignals {
        ConnectionSignals {
            online: true,
            effective_type: EffectiveType::FourG,
            downlink_mbps: 12.0,
            rtt_ms: 80.0,
            save_data: false,
        }
    }

    #[test]
    fn subscribe_replays_current_value() {
        let monitor = NetworkMonitor::new(NetworkMonitorConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let _sub = monitor.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        monitor.set_online(false);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscribers_end_on_the_stored_snapshot() {
        let monitor = Arc::new(NetworkMonitor::new(NetworkMonitorConfig::default()));
        let last = Arc::new(Mutex::new(None::<f64>));
        let sink = last.clone();
        let _sub = monitor.subscribe(move |info| {
            *sink.lock() = Some(info.rtt_ms);
        });

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let monitor = monitor.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let mut signals = excellent();
                        signals.rtt_ms = (t * 1000 + i) as f64;
                        monitor.update(signals);
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(*last.lock(), Some(monitor.current_info().rtt_ms));
    }

    #[test]
    fn handler_may_report_an_update() {
        let monitor = Arc::new(NetworkMonitor::new(NetworkMonitorConfig::default()));
        let weak = Arc::downgrade(&monitor);
        let _sub = monitor.subscribe(move |info| {
            if !info.online {
                if let Some(m) = weak.upgrade() {
                    m.set_online(true);
                }
            }
        });
        monitor.set_online(false);
        assert!(monitor.is_online());
    }

    #[test]
    fn offline_is_unstable_and_disconnected() {
        let monitor = NetworkMonitor::new(NetworkMonitorConfig::default());
        monitor.update(excellent());
        assert_eq!(monitor.quality(), QualityTier::Excellent);
        assert!(monitor.is_stable(0.7));
        monitor.set_online(false);
        assert_eq!(monitor.quality(), QualityTier::Disconnected);
        assert!(!monitor.is_stable(0.7));
        assert!(!monitor.is_online());
    }

    #[test]
    fn probe_failures_raise_packet_loss() {
        let monitor = NetworkMonitor::new(NetworkMonitorConfig::default());
        monitor.update(excellent());
        monitor.record_probe(Err(Error::network("unreachable")));
        let info = monitor.current_info();
        assert!((info.packet_loss - 0.3).abs() < 1e-9);
        assert!(info.reliability < 1.0);
        monitor.record_probe(Ok(Duration::from_millis(80)));
        assert!(monitor.current_info().packet_loss < 0.3);
    }

    #[test]
    fn probe_samples_are_smoothed() {
        let monitor = NetworkMonitor::new(NetworkMonitorConfig::default());
        monitor.update(excellent());
        monitor.record_probe(Ok(Duration::from_millis(380)));
        // 0.3 * 380 + 0.7 * 80
        assert!((monitor.current_info().rtt_ms - 170.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn wait_for_connection_resolves_when_online() {
        let monitor = Arc::new(NetworkMonitor::new(NetworkMonitorConfig::default()));
        monitor.set_online(false);
        let m = monitor.clone();
        let waiter = tokio::spawn(async move { m.wait_for_connection(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.set_online(true);
        assert!(waiter.await.unwrap());
        assert_eq!(monitor.publisher.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_connection_times_out() {
        let monitor = NetworkMonitor::new(NetworkMonitorConfig::default());
        monitor.set_online(false);
        assert!(!monitor.wait_for_connection(Duration::from_millis(100)).await);
        assert_eq!(monitor.publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_connection_returns_immediately_when_online() {
        let monitor = NetworkMonitor::new(NetworkMonitorConfig::default());
        assert!(monitor.wait_for_connection(Duration::from_millis(1)).await);
    }

    struct CountingProbe(AtomicUsize);

    #[async_trait]
    impl LatencyProbe for CountingProbe {
        async fn probe(&self) -> Result<Duration> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Duration::from_millis(50))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_loop_runs_on_interval() {
        let monitor = Arc::new(NetworkMonitor::new(
            NetworkMonitorConfig::default().with_probe_interval(Duration::from_secs(5)),
        ));
        let probe = Arc::new(CountingProbe(AtomicUsize::new(0)));
        let handle = monitor.spawn_probe_loop(probe.clone());
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        // ticks at 0s, 5s, 10s
        assert_eq!(probe.0.load(Ordering::SeqCst), 3);
        handle.abort();
    }
}
