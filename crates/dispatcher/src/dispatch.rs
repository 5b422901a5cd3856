use chrono::Utc;
use engine_core::{CancelToken, EngineError, RuntimeContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::params::coerce;
use crate::registry::ModuleRegistry;

/// Metadata attached to every successful invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationMeta {
    pub fetched_at: String,
    pub cached: bool,
    pub duration_ms: u64,
}

/// Normalized failure: stable kind, human message, and the invocation
/// coordinates for context. No stack traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: String,
    pub message: String,
    pub context: Value,
}

/// Uniform result envelope shared by the CLI, HTTP and tool surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<InvocationMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

/// Routes (module, capability, params) onto registered handlers. Runs each
/// invocation on a bounded worker pool under the ambient timeout and folds
/// every outcome into the `Invocation` envelope.
pub struct Dispatcher {
    registry: Arc<ModuleRegistry>,
    ctx: Arc<RuntimeContext>,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(registry: ModuleRegistry, ctx: RuntimeContext) -> Self {
        let pool = ctx.config.dispatcher_worker_pool_size.max(1);
        Self {
            registry: Arc::new(registry),
            ctx: Arc::new(ctx),
            workers: Arc::new(Semaphore::new(pool)),
        }
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Invoke a capability. Failures never escape as Err; they are folded
    /// into the envelope so surfaces can report them verbatim.
    pub async fn invoke(
        &self,
        module_id: &str,
        capability_id: &str,
        raw_params: &serde_json::Map<String, Value>,
    ) -> Invocation {
        let started = std::time::Instant::now();
        match self.try_invoke(module_id, capability_id, raw_params).await {
            Ok((data, cached)) => Invocation {
                ok: true,
                data: Some(data),
                meta: Some(InvocationMeta {
                    fetched_at: Utc::now().to_rfc3339(),
                    cached,
                    duration_ms: started.elapsed().as_millis() as u64,
                }),
                error: None,
            },
            Err(err) => {
                tracing::warn!(module = module_id, capability = capability_id, "invocation failed: {err}");
                Invocation {
                    ok: false,
                    data: None,
                    meta: None,
                    error: Some(ErrorEnvelope {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                        context: serde_json::json!({
                            "module": module_id,
                            "capability": capability_id,
                        }),
                    }),
                }
            }
        }
    }

    async fn try_invoke(
        &self,
        module_id: &str,
        capability_id: &str,
        raw_params: &serde_json::Map<String, Value>,
    ) -> Result<(Value, bool), EngineError> {
        let spec = self.registry.lookup(module_id, capability_id)?;
        let params = coerce(&spec.params, raw_params)?;

        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Internal("worker pool closed".to_string()))?;

        let timeout_secs = spec
            .timeout_seconds
            .unwrap_or(self.ctx.config.dispatcher_timeout_seconds)
            .max(1);
        let cancel = CancelToken::new();
        let future = (spec.handler)(self.ctx.clone(), params, cancel.clone());

        let (hits_before, misses_before) = self.ctx.fetcher.cache_stats();
        let result = match tokio::time::timeout(Duration::from_secs(timeout_secs), future).await {
            Ok(inner) => inner,
            Err(_) => {
                // Flag the token so the handler unwinds without persisting
                // partial state, then report the timeout.
                cancel.cancel();
                return Err(EngineError::Timeout(timeout_secs));
            }
        };
        let (hits_after, misses_after) = self.ctx.fetcher.cache_stats();
        let cached = misses_after == misses_before && hits_after > hits_before;

        result.map(|data| (data, cached))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamSpec, ParamType};
    use crate::registry::CapabilitySpec;
    use engine_core::RuntimeConfig;
    use market_data::StubProvider;
    use serde_json::json;

    fn dispatcher_with(registry: ModuleRegistry) -> Dispatcher {
        let ctx = RuntimeContext::new(
            std::sync::Arc::new(StubProvider::new()),
            RuntimeConfig::default(),
        );
        Dispatcher::new(registry, ctx)
    }

    fn args(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn unknown_module_yields_not_found_envelope() {
        let dispatcher = dispatcher_with(ModuleRegistry::new());
        let result = dispatcher.invoke("ghost", "run", &args(json!({}))).await;
        assert!(!result.ok);
        let error = result.error.unwrap();
        assert_eq!(error.kind, "NotFound");
        assert!(error.message.contains("ghost"));
    }

    #[tokio::test]
    async fn unknown_parameter_yields_invalid_argument() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(
                "echo",
                CapabilitySpec::new("run", |_, params, _| {
                    Box::pin(async move {
                        Ok(json!({ "ticker": params.str("ticker")? }))
                    })
                })
                .param(ParamSpec::required("ticker", ParamType::Str)),
            )
            .unwrap();
        let dispatcher = dispatcher_with(registry);

        let bad = dispatcher
            .invoke("echo", "run", &args(json!({"ticker": "SPY", "x": 1})))
            .await;
        assert_eq!(bad.error.unwrap().kind, "InvalidArgument");

        let good = dispatcher
            .invoke("echo", "run", &args(json!({"ticker": "SPY"})))
            .await;
        assert!(good.ok);
        assert_eq!(good.data.unwrap()["ticker"], "SPY");
        assert!(good.meta.unwrap().duration_ms < 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out_with_envelope() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(
                "slow",
                CapabilitySpec::new("run", |_, _, _| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(Value::Null)
                    })
                })
                .timeout(1),
            )
            .unwrap();
        let dispatcher = dispatcher_with(registry);

        let result = dispatcher.invoke("slow", "run", &args(json!({}))).await;
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().kind, "Timeout");
    }

    #[tokio::test]
    async fn handler_errors_fold_into_the_envelope() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(
                "fail",
                CapabilitySpec::new("run", |_, _, _| {
                    Box::pin(async {
                        Err(EngineError::Degenerate("zero variance input".to_string()))
                    })
                }),
            )
            .unwrap();
        let dispatcher = dispatcher_with(registry);

        let result = dispatcher.invoke("fail", "run", &args(json!({}))).await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, "Degenerate");
        assert!(error.message.contains("zero variance"));
        assert_eq!(error.context["module"], "fail");
    }
}
