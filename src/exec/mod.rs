//! Tool/execution layer: registry, vehicle state store, MCP surface.

pub mod console;
pub mod mcp;
pub mod registry;
pub mod vehicle;

pub use mcp::{McpRequest, McpResponse, McpServer};
pub use registry::{
    ExecuteError, ParamType, Tool, ToolCategory, ToolOutput, ToolParameter, ToolRegistry,
};
pub use vehicle::{VehicleState, VehicleStore};

use crate::error::{AssistantError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Facade owning the registry and the vehicle store.
///
/// The store is created here and never handed out by ownership; handlers
/// receive a reference for the duration of a call, callers get value-copy
/// snapshots.
pub struct ToolManager {
    registry: ToolRegistry,
    store: VehicleStore,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolManager {
    /// Manager with the stock catalog.
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::with_builtin_tools(),
            store: VehicleStore::new(),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Manager with a caller-supplied registry (tests, trimmed catalogs).
    pub fn with_registry(registry: ToolRegistry) -> Self {
        Self {
            registry,
            store: VehicleStore::new(),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Snapshot of the vehicle state.
    pub fn vehicle_snapshot(&self) -> VehicleState {
        self.store.snapshot()
    }

    /// The store itself, for tests that reach around the tool layer.
    pub fn store(&self) -> &VehicleStore {
        &self.store
    }

    /// Execute with the raw error taxonomy (used by the MCP surface).
    pub fn execute_raw(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> std::result::Result<ToolOutput, ExecuteError> {
        let outcome = self.registry.execute(&self.store, name, arguments);
        match &outcome {
            Ok(_) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    /// Execute for agent callers; failures collapse into the crate error.
    ///
    /// # Errors
    ///
    /// Returns `AssistantError::Tool` on validation or execution failure.
    pub fn execute(&self, name: &str, arguments: &serde_json::Value) -> Result<ToolOutput> {
        self.execute_raw(name, arguments)
            .map_err(|e| AssistantError::Tool(e.to_string()))
    }

    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "tools": self.registry.len(),
            "executed": self.executed.load(Ordering::Relaxed),
            "failed": self.failed.load(Ordering::Relaxed),
        })
    }
}
