use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Access to a process-wide environment.
pub trait Environment: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    fn remove(&self, key: &str) {
        std::env::remove_var(key);
    }
}

/// In-memory environment, for callers that must not touch the real one.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    vars: RwLock<HashMap<String, String>>,
}

impl MemoryEnvironment {
    pub fn with(key: &str, value: &str) -> Self {
        let env = Self::default();
        env.set(key, value);
        env
    }
}

impl Environment for MemoryEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        let vars = self.vars.read().expect("MemoryEnvironment lock poisoned");
        vars.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut vars = self.vars.write().expect("MemoryEnvironment lock poisoned");
        vars.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        let mut vars = self.vars.write().expect("MemoryEnvironment lock poisoned");
        vars.remove(key);
    }
}

/// Scoped override of one environment variable.
///
/// `apply` remembers what was there before; `restore` (or drop) puts it back,
/// removing the variable if it was unset.
pub struct EnvironmentGuard {
    env: Arc<dyn Environment>,
    key: String,
    /// `None` until applied; `Some(None)` means the variable was unset
    prior: Option<Option<String>>,
}

impl EnvironmentGuard {
    pub fn new(env: Arc<dyn Environment>, key: impl Into<String>) -> Self {
        Self {
            env,
            key: key.into(),
            prior: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_applied(&self) -> bool {
        self.prior.is_some()
    }

    pub fn apply(&mut self, value: &str) {
        if self.prior.is_none() {
            self.prior = Some(self.env.get(&self.key));
        }
        debug!("Setting {}={}", self.key, value);
        self.env.set(&self.key, value);
    }

    /// Put the captured value back. Safe to call more than once.
    pub fn restore(&mut self) {
        let Some(prior) = self.prior.take() else {
            return;
        };
        match prior {
            Some(value) => {
                debug!("Restoring {}={}", self.key, value);
                self.env.set(&self.key, &value);
            }
            None => {
                debug!("Removing {}", self.key);
                self.env.remove(&self.key);
            }
        }
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
