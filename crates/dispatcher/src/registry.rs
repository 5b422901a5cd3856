use engine_core::{CancelToken, EngineError, EngineResult, RuntimeContext};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::params::{ParamSpec, ParamValues};

pub type HandlerFuture = Pin<Box<dyn Future<Output = EngineResult<Value>> + Send>>;

/// Capability implementation: async closure over the runtime context,
/// coerced parameters and a cancellation token.
pub type Handler =
    Arc<dyn Fn(Arc<RuntimeContext>, ParamValues, CancelToken) -> HandlerFuture + Send + Sync>;

/// One registered capability: its parameter schema, optional timeout
/// override, and the handler.
#[derive(Clone)]
pub struct CapabilitySpec {
    pub capability_id: String,
    pub params: Vec<ParamSpec>,
    pub timeout_seconds: Option<u64>,
    pub handler: Handler,
}

impl std::fmt::Debug for CapabilitySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySpec")
            .field("capability_id", &self.capability_id)
            .field("params", &self.params)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish_non_exhaustive()
    }
}

impl CapabilitySpec {
    pub fn new<F>(capability_id: &str, handler: F) -> Self
    where
        F: Fn(Arc<RuntimeContext>, ParamValues, CancelToken) -> HandlerFuture
            + Send
            + Sync
            + 'static,
    {
        Self {
            capability_id: capability_id.to_string(),
            params: Vec::new(),
            timeout_seconds: None,
            handler: Arc::new(handler),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// module_id -> capability_id -> spec. Registration is write-once and
/// happens at process start; lookups afterwards are read-only and O(1).
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, HashMap<String, CapabilitySpec>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one capability. Double registration of the same
    /// (module, capability) pair is a startup bug and errors out.
    pub fn register(&mut self, module_id: &str, spec: CapabilitySpec) -> EngineResult<()> {
        let caps = self.modules.entry(module_id.to_string()).or_default();
        if caps.contains_key(&spec.capability_id) {
            return Err(EngineError::Internal(format!(
                "duplicate registration of {module_id}.{}",
                spec.capability_id
            )));
        }
        caps.insert(spec.capability_id.clone(), spec);
        Ok(())
    }

    pub fn lookup(&self, module_id: &str, capability_id: &str) -> EngineResult<&CapabilitySpec> {
        let caps = self
            .modules
            .get(module_id)
            .ok_or_else(|| EngineError::NotFound(format!("unknown module {module_id}")))?;
        caps.get(capability_id).ok_or_else(|| {
            EngineError::NotFound(format!("module {module_id} has no capability {capability_id}"))
        })
    }

    /// (module, capabilities) listing for the surfaces' help output.
    pub fn list(&self) -> Vec<(String, Vec<String>)> {
        let mut out: Vec<(String, Vec<String>)> = self
            .modules
            .iter()
            .map(|(module, caps)| {
                let mut names: Vec<String> = caps.keys().cloned().collect();
                names.sort();
                (module.clone(), names)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_spec(name: &str) -> CapabilitySpec {
        CapabilitySpec::new(name, |_, _, _| {
            Box::pin(async { Ok(serde_json::Value::Null) })
        })
    }

    #[test]
    fn double_registration_is_an_error() {
        let mut registry = ModuleRegistry::new();
        registry.register("m", noop_spec("run")).unwrap();
        let err = registry.register("m", noop_spec("run")).unwrap_err();
        assert_eq!(err.kind(), "Internal");
    }

    #[test]
    fn lookup_reports_the_missing_identifier() {
        let mut registry = ModuleRegistry::new();
        registry.register("m", noop_spec("run")).unwrap();
        let err = registry.lookup("nope", "run").unwrap_err();
        assert!(err.to_string().contains("nope"));
        let err = registry.lookup("m", "fly").unwrap_err();
        assert!(err.to_string().contains("fly"));
    }
}
