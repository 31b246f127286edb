//! Performance tracker composition
//!
//! Wires the notifier bus, the scene classifier and the dynamic TWT manager
//! together and exposes the entry points a device driver calls.

use crate::client::{ClientRegistry, TwtOps};
use crate::config::TrackerConfig;
use crate::dytwt::DynamicTwt;
use crate::error::PtrackerResult;
use crate::notifier::{Notifier, NotifierBus, NotifyOutcome, ObserverHandler};
use crate::scenes::SceneFsm;
use crate::types::{Reason, SceneEvent, ThroughputSource};
use log::{info, warn};
use std::sync::Arc;

/// Bus priority of the TWT manager
pub const TWT_NOTIFIER_PRIORITY: i32 = 0;

pub struct PerformanceTracker {
    config: TrackerConfig,
    bus: Arc<NotifierBus<SceneEvent>>,
    clients: Arc<ClientRegistry>,
    fsm: SceneFsm,
    twt: Arc<DynamicTwt>,
    twt_handler: Option<Arc<dyn Notifier<SceneEvent>>>,
}

impl PerformanceTracker {
    /// Build and start all components. Partially built components are torn
    /// down again if a later step fails.
    pub fn new(config: TrackerConfig, source: Arc<dyn ThroughputSource>) -> PtrackerResult<Self> {
        config.validate()?;

        let bus = Arc::new(NotifierBus::new());
        let clients = Arc::new(ClientRegistry::new());
        let mut fsm = SceneFsm::start(&config.fsm, Arc::clone(&bus), source)?;

        let twt = match DynamicTwt::new(&config.twt, Arc::clone(&clients)) {
            Ok(twt) => Arc::new(twt),
            Err(e) => {
                let _ = fsm.stop();
                return Err(e);
            }
        };
        let twt_handler: Arc<dyn Notifier<SceneEvent>> =
            Arc::new(ObserverHandler(Arc::clone(&twt)));
        if let Err(e) = bus.register(Arc::clone(&twt_handler), TWT_NOTIFIER_PRIORITY) {
            let _ = fsm.stop();
            return Err(e);
        }

        info!(
            "[Tracker] started ({} conditions, twt {})",
            fsm.conditions().len(),
            if twt.is_enabled() { "on" } else { "off" }
        );
        Ok(Self {
            config,
            bus,
            clients,
            fsm,
            twt,
            twt_handler: Some(twt_handler),
        })
    }

    /// Install the device client. Returns false if one is already registered.
    pub fn register_client(&self, client: Arc<dyn TwtOps>) -> bool {
        let installed = self.clients.register(client);
        if !installed {
            warn!("[Tracker] client already registered");
        }
        installed
    }

    pub fn unregister_client(&self, client: &Arc<dyn TwtOps>) -> bool {
        self.clients.unregister(client)
    }

    /// Deliver a driver event to every bus subscriber.
    pub fn client_event(&self, reason: Reason) -> NotifyOutcome {
        let msg = self.fsm.message();
        self.bus.dispatch(reason, &msg)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<NotifierBus<SceneEvent>> {
        &self.bus
    }

    pub fn fsm(&self) -> &SceneFsm {
        &self.fsm
    }

    pub fn twt(&self) -> &Arc<DynamicTwt> {
        &self.twt
    }

    pub fn is_running(&self) -> bool {
        self.fsm.is_running()
    }

    /// Stop consumers first, then the classifier. Idempotent.
    pub fn shutdown(&mut self) -> PtrackerResult<()> {
        if let Some(handler) = self.twt_handler.take() {
            self.bus.unregister(&handler);
        }
        let result = self.fsm.stop();
        if !self.bus.is_empty() {
            warn!("[Tracker] {} subscribers left on the bus", self.bus.len());
        }
        info!("[Tracker] stopped");
        result
    }
}

impl Drop for PerformanceTracker {
    fn drop(&mut self) {
        if self.twt_handler.is_some() || self.fsm.is_running() {
            let _ = self.shutdown();
        }
    }
}

impl std::fmt::Debug for PerformanceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceTracker")
            .field("fsm", &self.fsm)
            .field("twt", &self.twt)
            .field("subscribers", &self.bus.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Scene, ThroughputSnapshot};

    struct Quiet;

    impl ThroughputSource for Quiet {
        fn snapshot(&self) -> ThroughputSnapshot {
            ThroughputSnapshot::default()
        }
    }

    #[test]
    fn test_new_registers_both_subscribers() {
        let tracker = PerformanceTracker::new(TrackerConfig::default(), Arc::new(Quiet)).unwrap();
        assert_eq!(tracker.bus().names(), vec!["scene_fsm", "dynamic_twt"]);
        assert!(tracker.is_running());
        assert_eq!(tracker.fsm().committed_scene(), Scene::Idle);
    }

    #[test]
    fn test_invalid_config_fails_without_threads() {
        let mut config = TrackerConfig::default();
        config.twt.record_count = 0;
        assert!(PerformanceTracker::new(config, Arc::new(Quiet)).is_err());
    }

    #[test]
    fn test_shutdown_empties_bus() {
        let mut tracker =
            PerformanceTracker::new(TrackerConfig::default(), Arc::new(Quiet)).unwrap();
        tracker.shutdown().unwrap();
        assert!(tracker.bus().is_empty());
        assert!(!tracker.is_running());
        tracker.shutdown().unwrap();
        assert_eq!(tracker.client_event(Reason::ThroughputSample), NotifyOutcome::Continue);
    }
}
