use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

pub const VIDEO_UPDATED: &str = "action:api.video.updated";

pub type HookHandler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// In-process registry of extension hooks keyed by action name.
#[derive(Default)]
pub struct HookRegistry {
    handlers: RwLock<HashMap<String, Vec<HookHandler>>>,
}

impl HookRegistry {
    pub fn register(&self, action: &str, handler: HookHandler) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(action.to_string()).or_default().push(handler);
    }

    /// Runs every handler of `action`. A failing handler is logged and the
    /// remaining ones still run. Returns how many handlers succeeded.
    pub fn run_action(&self, action: &str, payload: &Value) -> usize {
        let handlers = {
            let registry = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            registry.get(action).cloned().unwrap_or_default()
        };

        let mut succeeded = 0;
        for handler in handlers {
            match handler(payload) {
                Ok(()) => succeeded += 1,
                Err(e) => log::error!("Hook {} failed: {:#}", action, e),
            }
        }
        succeeded
    }
}
