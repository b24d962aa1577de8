//! Tool broker: executes a sanitised plan against the tool transport.
//!
//! Ordering contract: write calls run strictly sequentially in plan order;
//! runs of consecutive read calls between writes fan out concurrently, and
//! plan order is restored in the returned observations. Every planned call,
//! including ones policy denied, yields exactly one observation.
//!
//! Writes run inside spawned tasks: if the caller is cancelled mid-request,
//! an in-flight write still completes and its observation lands in the
//! idempotency cache, so a retry of the same message cannot double-book.

pub mod breaker;
pub mod transport;

use crate::broker::breaker::{Admission, CircuitBreakerTable};
use crate::broker::transport::{ToolCallError, ToolTransport};
use crate::config::PipelineSettings;
use crate::policy::{SanitizedPlan, Verdict, VettedCall};
use decisor::manifest::ToolManifestEntry;
use decisor::{ExecutedCall, ToolErrorKind, ToolObservation};
use futures::future::join_all;
use moka::future::Cache;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Exponential backoff base for transient retries.
const BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Upper bound on backoff jitter.
const MAX_JITTER_MS: u64 = 50;
/// How long a completed write observation shields against re-execution.
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(600);

/// Wrapper so failed writes are returned but never cached.
struct FailedWrite(ToolObservation);

/// The broker. One instance per process, shared by both pipelines.
pub struct ToolBroker {
    transport: Arc<dyn ToolTransport>,
    breakers: CircuitBreakerTable,
    idempotency: Cache<String, ToolObservation>,
    default_timeout: Duration,
    max_retries: u32,
}

impl ToolBroker {
    pub fn new(transport: Arc<dyn ToolTransport>, settings: &PipelineSettings) -> Self {
        Self {
            transport,
            breakers: CircuitBreakerTable::new(settings.circuit_open_cooldown),
            idempotency: Cache::builder()
                .time_to_live(IDEMPOTENCY_TTL)
                .max_capacity(100_000)
                .build(),
            default_timeout: settings.broker_default_timeout,
            max_retries: settings.broker_max_retries.max(1),
        }
    }

    /// The breaker table, exposed for health reporting and tests.
    pub fn breakers(&self) -> &CircuitBreakerTable {
        &self.breakers
    }

    /// Execute a sanitised plan. `deadline` bounds the start of new work;
    /// one observation is returned per planned call, in plan order.
    pub async fn execute(
        self: &Arc<Self>,
        workspace_id: &str,
        plan: &SanitizedPlan,
        deadline: Instant,
    ) -> Vec<ExecutedCall> {
        let mut results: Vec<Option<ExecutedCall>> = vec![None; plan.calls.len()];
        let mut read_group: Vec<(usize, VettedCall)> = Vec::new();

        for (index, call) in plan.calls.iter().enumerate() {
            match &call.verdict {
                Verdict::Denied { .. } => {
                    results[index] = Some(ExecutedCall {
                        tool: call.tool.clone(),
                        args: call.args.clone(),
                        observation: ToolObservation::failure(
                            &call.tool,
                            ToolErrorKind::PolicyDenied,
                            0,
                            0,
                        ),
                    });
                }
                Verdict::Approved { entry, .. } => {
                    if entry.policy.write {
                        // Reads queued so far must land before the write.
                        self.flush_reads(workspace_id, &mut read_group, &mut results, deadline)
                            .await;
                        results[index] =
                            Some(self.execute_write(workspace_id, call, deadline).await);
                    } else {
                        read_group.push((index, call.clone()));
                    }
                }
            }
        }
        self.flush_reads(workspace_id, &mut read_group, &mut results, deadline)
            .await;

        results.into_iter().flatten().collect()
    }

    /// Run the queued read group concurrently, writing results back by index.
    async fn flush_reads(
        self: &Arc<Self>,
        workspace_id: &str,
        group: &mut Vec<(usize, VettedCall)>,
        results: &mut [Option<ExecutedCall>],
        deadline: Instant,
    ) {
        if group.is_empty() {
            return;
        }
        let futures = group.drain(..).map(|(index, call)| {
            let broker = Arc::clone(self);
            let workspace = workspace_id.to_string();
            async move { (index, broker.execute_read(&workspace, call, deadline).await) }
        });
        for (index, executed) in join_all(futures).await {
            results[index] = Some(executed);
        }
    }

    async fn execute_read(
        &self,
        workspace_id: &str,
        call: VettedCall,
        deadline: Instant,
    ) -> ExecutedCall {
        let Verdict::Approved { entry, .. } = call.verdict.clone() else {
            return denied_fallback(call);
        };
        let started = Instant::now();
        let per_call = entry.timeout(self.default_timeout);
        let mut attempts: u32 = 0;

        let observation = loop {
            let now = Instant::now();
            if now >= deadline {
                // Budget exhausted: stop starting new work.
                break ToolObservation::failure(
                    &call.tool,
                    ToolErrorKind::Timeout,
                    elapsed_ms(started),
                    attempts,
                );
            }
            if self.breakers.admit(workspace_id, &call.tool) == Admission::Deny {
                break ToolObservation::failure(
                    &call.tool,
                    ToolErrorKind::CircuitOpen,
                    elapsed_ms(started),
                    attempts,
                );
            }
            attempts += 1;
            let budget = per_call.min(deadline.saturating_duration_since(now));
            match timeout(budget, self.transport.call(&call.tool, &call.args, budget, None)).await
            {
                Ok(Ok(result)) => {
                    self.breakers.record_success(workspace_id, &call.tool);
                    break ToolObservation::success(
                        &call.tool,
                        result,
                        elapsed_ms(started),
                        attempts,
                    );
                }
                Ok(Err(ToolCallError::Permanent(reason))) => {
                    self.breakers.record_failure(workspace_id, &call.tool);
                    debug!(tool = %call.tool, %reason, "permanent tool failure");
                    break ToolObservation::failure(
                        &call.tool,
                        ToolErrorKind::Permanent,
                        elapsed_ms(started),
                        attempts,
                    );
                }
                Ok(Err(ToolCallError::Transient(reason))) => {
                    self.breakers.record_failure(workspace_id, &call.tool);
                    debug!(tool = %call.tool, %reason, attempt = attempts, "transient tool failure");
                    if attempts >= self.max_retries {
                        break ToolObservation::failure(
                            &call.tool,
                            ToolErrorKind::Transient,
                            elapsed_ms(started),
                            attempts,
                        );
                    }
                }
                Err(_) => {
                    self.breakers.record_failure(workspace_id, &call.tool);
                    debug!(tool = %call.tool, attempt = attempts, "tool call timed out");
                    if attempts >= self.max_retries {
                        break ToolObservation::failure(
                            &call.tool,
                            ToolErrorKind::Timeout,
                            elapsed_ms(started),
                            attempts,
                        );
                    }
                }
            }
            self.backoff(attempts, deadline).await;
        };

        ExecutedCall {
            tool: call.tool,
            args: call.args,
            observation,
        }
    }

    /// Execute a write inside a spawned task so caller cancellation cannot
    /// abort it. Keyed writes deduplicate through the idempotency cache
    /// with single-flight semantics: concurrent writes with the same key
    /// resolve to one invocation, and only successes are cached.
    async fn execute_write(
        self: &Arc<Self>,
        workspace_id: &str,
        call: &VettedCall,
        deadline: Instant,
    ) -> ExecutedCall {
        let Verdict::Approved {
            entry,
            idempotency_key,
        } = call.verdict.clone()
        else {
            return denied_fallback(call.clone());
        };

        let broker = Arc::clone(self);
        let workspace = workspace_id.to_string();
        let task_call = call.clone();
        let handle = tokio::spawn(async move {
            match idempotency_key {
                Some(key) => {
                    let outcome = broker
                        .idempotency
                        .try_get_with(key.clone(), async {
                            let obs = broker
                                .write_once(&workspace, &task_call, &entry, Some(&key), deadline)
                                .await;
                            if obs.ok { Ok(obs) } else { Err(FailedWrite(obs)) }
                        })
                        .await;
                    match outcome {
                        Ok(observation) => observation,
                        Err(failed) => failed.0.clone(),
                    }
                }
                None => {
                    broker
                        .write_once(&workspace, &task_call, &entry, None, deadline)
                        .await
                }
            }
        });

        let observation = match handle.await {
            Ok(observation) => observation,
            Err(join_error) => {
                warn!(tool = %call.tool, %join_error, "write task aborted");
                ToolObservation::failure(&call.tool, ToolErrorKind::Permanent, 0, 0)
            }
        };
        ExecutedCall {
            tool: call.tool.clone(),
            args: call.args.clone(),
            observation,
        }
    }

    /// One write, with at most one extra attempt and only after a timeout:
    /// a transient error is a definite response, retrying it could execute
    /// the side effect twice.
    async fn write_once(
        &self,
        workspace_id: &str,
        call: &VettedCall,
        entry: &ToolManifestEntry,
        idempotency_key: Option<&str>,
        deadline: Instant,
    ) -> ToolObservation {
        let started = Instant::now();
        let per_call = entry.timeout(self.default_timeout);
        let mut attempts: u32 = 0;

        loop {
            if attempts == 0 && Instant::now() >= deadline {
                return ToolObservation::failure(&call.tool, ToolErrorKind::Timeout, 0, 0);
            }
            if self.breakers.admit(workspace_id, &call.tool) == Admission::Deny {
                return ToolObservation::failure(
                    &call.tool,
                    ToolErrorKind::CircuitOpen,
                    elapsed_ms(started),
                    attempts,
                );
            }
            attempts += 1;
            // The per-call budget is not clipped by the request deadline: a
            // started write is allowed to complete.
            match timeout(
                per_call,
                self.transport
                    .call(&call.tool, &call.args, per_call, idempotency_key),
            )
            .await
            {
                Ok(Ok(result)) => {
                    self.breakers.record_success(workspace_id, &call.tool);
                    return ToolObservation::success(
                        &call.tool,
                        result,
                        elapsed_ms(started),
                        attempts,
                    );
                }
                Ok(Err(ToolCallError::Permanent(reason))) => {
                    self.breakers.record_failure(workspace_id, &call.tool);
                    debug!(tool = %call.tool, %reason, "write refused");
                    return ToolObservation::failure(
                        &call.tool,
                        ToolErrorKind::Permanent,
                        elapsed_ms(started),
                        attempts,
                    );
                }
                Ok(Err(ToolCallError::Transient(reason))) => {
                    self.breakers.record_failure(workspace_id, &call.tool);
                    debug!(tool = %call.tool, %reason, "write failed with a definite response");
                    return ToolObservation::failure(
                        &call.tool,
                        ToolErrorKind::Transient,
                        elapsed_ms(started),
                        attempts,
                    );
                }
                Err(_) => {
                    self.breakers.record_failure(workspace_id, &call.tool);
                    if attempts >= 2 {
                        return ToolObservation::failure(
                            &call.tool,
                            ToolErrorKind::Timeout,
                            elapsed_ms(started),
                            attempts,
                        );
                    }
                    debug!(tool = %call.tool, "write timed out with no response, one more attempt");
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32, deadline: Instant) {
        let exponential = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS));
        let wait = (exponential + jitter).min(deadline.saturating_duration_since(Instant::now()));
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn denied_fallback(call: VettedCall) -> ExecutedCall {
    let observation = ToolObservation::failure(&call.tool, ToolErrorKind::PolicyDenied, 0, 0);
    ExecutedCall {
        tool: call.tool,
        args: call.args,
        observation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use decisor::manifest::{ToolManifestEntry, ToolPolicy};
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    /// Per-tool behaviour, keyed by tool name prefix.
    struct ScriptedTransport {
        invocations: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                invocations: Mutex::new(HashMap::new()),
            }
        }

        fn invocations(&self, tool: &str) -> u32 {
            self.invocations.lock().get(tool).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ToolTransport for ScriptedTransport {
        async fn call(
            &self,
            tool: &str,
            _args: &Value,
            _timeout: Duration,
            _idempotency_key: Option<&str>,
        ) -> Result<Value, ToolCallError> {
            let attempt = {
                let mut map = self.invocations.lock();
                let n = map.entry(tool.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            if tool.starts_with("flaky") {
                // fails twice, then succeeds
                if attempt <= 2 {
                    return Err(ToolCallError::Transient("connection reset".into()));
                }
                return Ok(json!({"ok": true}));
            }
            if tool.starts_with("transient") {
                return Err(ToolCallError::Transient("503".into()));
            }
            if tool.starts_with("permanent") {
                return Err(ToolCallError::Permanent("400".into()));
            }
            if tool.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(200)).await;
                return Ok(json!({"ok": true}));
            }
            Ok(json!({"ok": true, "tool": tool}))
        }
    }

    fn entry(name: &str, write: bool, timeout_ms: u64) -> ToolManifestEntry {
        ToolManifestEntry {
            name: name.into(),
            args: vec![],
            policy: ToolPolicy {
                max_rps_per_workspace: 0,
                requires_workspace: true,
                idempotent: !write,
                write,
            },
            timeout_ms: Some(timeout_ms),
        }
    }

    fn approved(name: &str, write: bool, key: Option<&str>) -> VettedCall {
        VettedCall {
            tool: name.to_string(),
            args: json!({"workspace_id": "ws-1"}),
            verdict: Verdict::Approved {
                entry: entry(name, write, 150),
                idempotency_key: key.map(str::to_string),
            },
        }
    }

    fn denied(name: &str) -> VettedCall {
        VettedCall {
            tool: name.to_string(),
            args: json!({}),
            verdict: Verdict::Denied {
                denial: crate::policy::PolicyDenial::MissingArgs,
            },
        }
    }

    fn broker_with(transport: Arc<ScriptedTransport>) -> Arc<ToolBroker> {
        let settings = PipelineSettings {
            broker_default_timeout: Duration::from_millis(150),
            broker_max_retries: 3,
            circuit_open_cooldown: Duration::from_secs(30),
            ..PipelineSettings::default()
        };
        Arc::new(ToolBroker::new(transport, &settings))
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[tokio::test]
    async fn plan_order_is_preserved_with_mixed_calls() {
        let transport = Arc::new(ScriptedTransport::new());
        let broker = broker_with(transport);
        let plan = SanitizedPlan {
            calls: vec![
                approved("read_a", false, None),
                denied("book_appointment"),
                approved("write_b", true, Some("key-b")),
                approved("read_c", false, None),
            ],
            advisories: vec![],
        };
        let executed = broker.execute("ws-1", &plan, far_deadline()).await;
        let tools: Vec<&str> = executed.iter().map(|c| c.tool.as_str()).collect();
        assert_eq!(tools, ["read_a", "book_appointment", "write_b", "read_c"]);
        assert!(executed[0].observation.ok);
        assert_eq!(
            executed[1].observation.error_kind,
            Some(ToolErrorKind::PolicyDenied)
        );
        assert!(executed[2].observation.ok);
        assert!(executed[3].observation.ok);
    }

    #[tokio::test]
    async fn transient_reads_retry_until_success() {
        let transport = Arc::new(ScriptedTransport::new());
        let broker = broker_with(transport.clone());
        let plan = SanitizedPlan {
            calls: vec![approved("flaky_read", false, None)],
            advisories: vec![],
        };
        let executed = broker.execute("ws-1", &plan, far_deadline()).await;
        assert!(executed[0].observation.ok);
        assert_eq!(executed[0].observation.attempts, 3);
        assert_eq!(transport.invocations("flaky_read"), 3);
    }

    #[tokio::test]
    async fn permanent_failures_do_not_retry() {
        let transport = Arc::new(ScriptedTransport::new());
        let broker = broker_with(transport.clone());
        let plan = SanitizedPlan {
            calls: vec![approved("permanent_read", false, None)],
            advisories: vec![],
        };
        let executed = broker.execute("ws-1", &plan, far_deadline()).await;
        assert_eq!(
            executed[0].observation.error_kind,
            Some(ToolErrorKind::Permanent)
        );
        assert_eq!(transport.invocations("permanent_read"), 1);
    }

    #[tokio::test]
    async fn write_timeouts_get_exactly_one_extra_attempt() {
        let transport = Arc::new(ScriptedTransport::new());
        let broker = broker_with(transport.clone());
        let mut call = approved("slow_write", true, Some("key-slow"));
        // 50 ms budget against a 200 ms tool: both attempts time out
        if let Verdict::Approved { entry, .. } = &mut call.verdict {
            entry.timeout_ms = Some(50);
        }
        let plan = SanitizedPlan {
            calls: vec![call],
            advisories: vec![],
        };
        let executed = broker.execute("ws-1", &plan, far_deadline()).await;
        assert_eq!(
            executed[0].observation.error_kind,
            Some(ToolErrorKind::Timeout)
        );
        assert_eq!(executed[0].observation.attempts, 2);
        assert_eq!(transport.invocations("slow_write"), 2);
    }

    #[tokio::test]
    async fn write_transient_errors_are_definite_and_never_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        let broker = broker_with(transport.clone());
        let plan = SanitizedPlan {
            calls: vec![approved("transient_write", true, Some("key-t"))],
            advisories: vec![],
        };
        let executed = broker.execute("ws-1", &plan, far_deadline()).await;
        assert_eq!(
            executed[0].observation.error_kind,
            Some(ToolErrorKind::Transient)
        );
        assert_eq!(transport.invocations("transient_write"), 1);
    }

    #[tokio::test]
    async fn idempotent_writes_invoke_the_tool_once() {
        let transport = Arc::new(ScriptedTransport::new());
        let broker = broker_with(transport.clone());
        let plan = SanitizedPlan {
            calls: vec![approved("write_book", true, Some("same-key"))],
            advisories: vec![],
        };
        let first = broker.execute("ws-1", &plan, far_deadline()).await;
        let second = broker.execute("ws-1", &plan, far_deadline()).await;
        assert!(first[0].observation.ok);
        assert_eq!(first[0].observation.result, second[0].observation.result);
        assert_eq!(transport.invocations("write_book"), 1);
    }

    #[tokio::test]
    async fn failed_writes_are_not_cached() {
        let transport = Arc::new(ScriptedTransport::new());
        let broker = broker_with(transport.clone());
        let plan = SanitizedPlan {
            calls: vec![approved("permanent_write", true, Some("retry-key"))],
            advisories: vec![],
        };
        let first = broker.execute("ws-1", &plan, far_deadline()).await;
        let second = broker.execute("ws-1", &plan, far_deadline()).await;
        assert!(!first[0].observation.ok);
        assert!(!second[0].observation.ok);
        // a failure must not shield later attempts from reaching the tool
        assert_eq!(transport.invocations("permanent_write"), 2);
    }

    #[tokio::test]
    async fn circuit_opens_and_then_fails_fast() {
        let transport = Arc::new(ScriptedTransport::new());
        let broker = broker_with(transport.clone());
        let plan = SanitizedPlan {
            calls: vec![approved("transient_read", false, None)],
            advisories: vec![],
        };
        // 3 attempts per execute; after two executes the 5-failure threshold
        // has tripped (5th failure opens during the second run).
        broker.execute("ws-1", &plan, far_deadline()).await;
        broker.execute("ws-1", &plan, far_deadline()).await;
        let before = transport.invocations("transient_read");
        let executed = broker.execute("ws-1", &plan, far_deadline()).await;
        assert_eq!(
            executed[0].observation.error_kind,
            Some(ToolErrorKind::CircuitOpen)
        );
        assert_eq!(transport.invocations("transient_read"), before);
    }

    #[tokio::test]
    async fn exhausted_deadline_skips_new_work() {
        let transport = Arc::new(ScriptedTransport::new());
        let broker = broker_with(transport.clone());
        let plan = SanitizedPlan {
            calls: vec![approved("read_late", false, None)],
            advisories: vec![],
        };
        let executed = broker
            .execute("ws-1", &plan, Instant::now() - Duration::from_millis(1))
            .await;
        assert_eq!(
            executed[0].observation.error_kind,
            Some(ToolErrorKind::Timeout)
        );
        assert_eq!(executed[0].observation.attempts, 0);
        assert_eq!(transport.invocations("read_late"), 0);
    }
}
