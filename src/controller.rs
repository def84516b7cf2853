//! System controller: ordered module lifecycle.
//!
//! `initialize` and `start` walk the registration order; `stop` and
//! `cleanup` walk it in reverse. A failed initialize aborts startup and
//! cleans up the modules that already initialized. On stop, the bus shuts
//! down first so queued events drop, then unfinished traces are marked
//! aborted.

use crate::adapters::Module;
use crate::bus::{Event, EventBus, EventKind};
use crate::error::Result;
use crate::tracker::MessageTracker;
use std::sync::Arc;
use tracing::{error, info};

pub const NAME: &str = "controller";

pub struct Controller {
    bus: Arc<EventBus>,
    tracker: Arc<MessageTracker>,
    modules: Vec<Box<dyn Module>>,
    initialized: usize,
    running: bool,
}

impl Controller {
    pub fn new(bus: Arc<EventBus>, tracker: Arc<MessageTracker>) -> Self {
        Self {
            bus,
            tracker,
            modules: Vec::new(),
            initialized: 0,
            running: false,
        }
    }

    /// Register a module; order here is lifecycle order.
    pub fn register(&mut self, module: Box<dyn Module>) {
        info!(module = module.name(), "module registered");
        self.modules.push(module);
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Statistics of one module by name.
    pub fn get_module(&self, name: &str) -> Option<&dyn Module> {
        self.modules
            .iter()
            .find(|m| m.name() == name)
            .map(AsRef::as_ref)
    }

    /// Publish on behalf of a caller without bus access.
    pub fn publish_event(&self, event: Event) {
        self.bus.publish(event);
    }

    /// Initialize all modules in registration order. On failure, modules
    /// that already initialized are cleaned up and the error is returned.
    pub async fn initialize(&mut self) -> Result<()> {
        for index in 0..self.modules.len() {
            let name = self.modules[index].name().to_owned();
            if let Err(e) = self.modules[index].initialize().await {
                error!(module = %name, "initialize failed: {e}");
                for module in self.modules[..index].iter_mut().rev() {
                    module.cleanup().await;
                }
                self.initialized = 0;
                return Err(e);
            }
            info!(module = %name, "initialized");
            self.initialized = index + 1;
        }
        Ok(())
    }

    /// Start all modules in registration order. Any failure stops what
    /// already started and runs full cleanup.
    pub async fn start(&mut self) -> Result<()> {
        for index in 0..self.modules.len() {
            let name = self.modules[index].name().to_owned();
            if let Err(e) = self.modules[index].start().await {
                error!(module = %name, "start failed: {e}");
                for module in self.modules[..index].iter_mut().rev() {
                    module.stop().await;
                }
                for module in self.modules.iter_mut().rev() {
                    module.cleanup().await;
                }
                return Err(e);
            }
        }
        self.running = true;
        self.bus.publish(Event::control(EventKind::SystemStart, NAME));
        info!("system started ({} modules)", self.modules.len());
        Ok(())
    }

    /// Stop and clean up everything, reverse order.
    pub async fn stop(&mut self) {
        if self.running {
            self.bus.publish(Event::control(EventKind::SystemStop, NAME));
        }
        self.running = false;
        // Stop accepting publications before tearing the workers down.
        self.bus.shutdown();
        for module in self.modules.iter_mut().rev() {
            info!(module = module.name(), "stopping");
            module.stop().await;
        }
        for module in self.modules.iter_mut().rev() {
            module.cleanup().await;
        }
        self.tracker.abort_unfinished();
        info!("system stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Per-module statistics map.
    pub fn statistics(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for module in &self.modules {
            map.insert(module.name().to_owned(), module.statistics());
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Module;
    use crate::error::AssistantError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Probe {
        name: String,
        log: Log,
        fail_initialize: bool,
    }

    impl Probe {
        fn new(name: &str, log: &Log, fail_initialize: bool) -> Box<Self> {
            Box::new(Self {
                name: name.to_owned(),
                log: Arc::clone(log),
                fail_initialize,
            })
        }

        fn record(&self, action: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{action}", self.name));
        }
    }

    #[async_trait]
    impl Module for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn initialize(&mut self) -> crate::error::Result<()> {
            self.record("init");
            if self.fail_initialize {
                return Err(AssistantError::Module("probe failure".to_owned()));
            }
            Ok(())
        }

        async fn start(&mut self) -> crate::error::Result<()> {
            self.record("start");
            Ok(())
        }

        async fn stop(&mut self) {
            self.record("stop");
        }

        async fn cleanup(&mut self) {
            self.record("cleanup");
        }

        fn statistics(&self) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    fn controller() -> Controller {
        Controller::new(
            Arc::new(EventBus::new()),
            Arc::new(MessageTracker::new()),
        )
    }

    #[tokio::test]
    async fn lifecycle_order_forward_then_reverse() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut controller = controller();
        controller.register(Probe::new("a", &log, false));
        controller.register(Probe::new("b", &log, false));

        controller.initialize().await.expect("init");
        controller.start().await.expect("start");
        controller.stop().await;

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                "a:init", "b:init", "a:start", "b:start", "b:stop", "a:stop", "b:cleanup",
                "a:cleanup"
            ]
        );
    }

    #[tokio::test]
    async fn initialize_failure_cleans_up_prefix() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut controller = controller();
        controller.register(Probe::new("a", &log, false));
        controller.register(Probe::new("b", &log, true));
        controller.register(Probe::new("c", &log, false));

        assert!(controller.initialize().await.is_err());
        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["a:init", "b:init", "a:cleanup"]);
    }

    #[tokio::test]
    async fn get_module_by_name() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut controller = controller();
        controller.register(Probe::new("a", &log, false));
        assert!(controller.get_module("a").is_some());
        assert!(controller.get_module("zz").is_none());
    }
}
