//! Runs validated [`ExecRequest`]s as direct process spawns — never through a
//! shell — with bounded output capture, a per-entry wall-clock budget, and
//! per-concurrency-class serialization.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{ArgValue, Catalog, CatalogEntry, ConcurrencyClass};

/// Bound on captured stdout/stderr per call, configurable by callers that
/// construct their own [`Executor`] (tests shrink this).
pub const DEFAULT_OUTPUT_CAP: usize = 1024 * 1024;

/// Grace period granted to a child between SIGTERM-equivalent and
/// force-kill once its wall-clock budget is exceeded.
const KILL_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub catalog_id: String,
    pub args: Vec<ArgValue>,
    pub caller_subject: Uuid,
    pub correlation_id: Uuid,
}

#[derive(Debug, Clone)]
pub enum ExecResult {
    Exit {
        code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        duration: Duration,
    },
    Timeout {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        duration: Duration,
    },
    SpawnFail {
        message: String,
    },
    Forbidden {
        violations: Vec<String>,
    },
}

impl ExecResult {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecResult::Exit { code: 0, .. } => "ok",
            ExecResult::Exit { .. } => "non-zero",
            ExecResult::Timeout { .. } => "timeout",
            ExecResult::SpawnFail { .. } => "spawn-fail",
            ExecResult::Forbidden { .. } => "forbidden",
        }
    }
}

struct ClassGate {
    /// Write classes get an exclusive mutex; read classes get a semaphore
    /// wide enough that it never actually blocks a realistic call volume,
    /// so concurrent reads proceed in parallel while still sharing one
    /// registry entry per class.
    write_lock: Option<Mutex<()>>,
    read_permits: Option<Semaphore>,
}

impl ClassGate {
    fn for_class(class: ConcurrencyClass) -> Self {
        if class.is_write() {
            Self { write_lock: Some(Mutex::new(())), read_permits: None }
        } else {
            Self { write_lock: None, read_permits: Some(Semaphore::new(64)) }
        }
    }
}

/// Executes catalog entries with bounded time and captured output, and
/// serializes same-concurrency-class calls per [`ConcurrencyClass`].
pub struct Executor {
    catalog: Catalog,
    gates: DashMap<ConcurrencyClass, Arc<ClassGate>>,
    output_cap: usize,
    env: HashMap<String, String>,
}

impl Executor {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            gates: DashMap::new(),
            output_cap: DEFAULT_OUTPUT_CAP,
            env: HashMap::new(),
        }
    }

    pub fn with_output_cap(mut self, cap: usize) -> Self {
        self.output_cap = cap;
        self
    }

    fn gate_for(&self, class: ConcurrencyClass) -> Arc<ClassGate> {
        self.gates
            .entry(class)
            .or_insert_with(|| Arc::new(ClassGate::for_class(class)))
            .clone()
    }

    /// Validates and executes `request`. Never panics, never spawns a shell,
    /// never runs a child whose arguments failed validation.
    pub async fn execute(&self, entry: &CatalogEntry, request: &ExecRequest) -> ExecResult {
        let violations = self.catalog.validate(entry, &request.args);
        if !violations.is_empty() {
            warn!(
                correlation_id = %request.correlation_id,
                catalog_id = %request.catalog_id,
                "rejected exec request: {violations:?}"
            );
            return ExecResult::Forbidden { violations };
        }

        let gate = self.gate_for(entry.concurrency_class);
        let _write_guard = match &gate.write_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        let _read_permit = match &gate.read_permits {
            Some(sem) => Some(sem.acquire().await.expect("semaphore never closed")),
            None => None,
        };

        self.spawn_and_wait(entry, request).await
    }

    async fn spawn_and_wait(&self, entry: &CatalogEntry, request: &ExecRequest) -> ExecResult {
        let argv = Catalog::render_argv(entry, &request.args);
        let start = Instant::now();

        let mut cmd = Command::new(entry.program);
        cmd.args(&argv)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(correlation_id = %request.correlation_id, "spawn failed: {e}");
                return ExecResult::SpawnFail { message: e.to_string() };
            }
        };

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");
        let cap = self.output_cap;

        let wait = async {
            let (stdout_buf, stderr_buf, status) = tokio::join!(
                read_capped(&mut stdout, cap),
                read_capped(&mut stderr, cap),
                async { child.wait().await },
            );
            (stdout_buf, stderr_buf, status)
        };

        match tokio::time::timeout(entry.timeout, wait).await {
            Ok((stdout_buf, stderr_buf, Ok(status))) => {
                let duration = start.elapsed();
                info!(
                    correlation_id = %request.correlation_id,
                    catalog_id = %request.catalog_id,
                    code = status.code().unwrap_or(-1),
                    duration_ms = duration.as_millis() as u64,
                    "exec complete"
                );
                ExecResult::Exit {
                    code: status.code().unwrap_or(-1),
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                    duration,
                }
            }
            Ok((_, _, Err(e))) => ExecResult::SpawnFail { message: e.to_string() },
            Err(_) => {
                warn!(
                    correlation_id = %request.correlation_id,
                    catalog_id = %request.catalog_id,
                    "exec timed out; terminating"
                );
                let _ = child.start_kill();
                let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
                let _ = child.kill().await;
                ExecResult::Timeout {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    duration: start.elapsed(),
                }
            }
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: &mut R, cap: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4096.min(cap));
    let _ = reader.take(cap as u64).read_to_end(&mut buf).await;
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ArgSlot;

    static ECHO_ENTRY: CatalogEntry = CatalogEntry {
        id: "test.echo",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(2),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    };

    static SLEEP_ENTRY: CatalogEntry = CatalogEntry {
        id: "test.sleep",
        program: "/bin/sleep",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_millis(50),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    };

    fn catalog() -> Catalog {
        static ENTRIES: &[CatalogEntry] = &[];
        Catalog::from_entries(ENTRIES)
    }

    fn req(args: Vec<ArgValue>) -> ExecRequest {
        ExecRequest {
            catalog_id: "test".into(),
            args,
            caller_subject: Uuid::nil(),
            correlation_id: Uuid::nil(),
        }
    }

    #[tokio::test]
    async fn forbidden_when_args_fail_validation() {
        let executor = Executor::new(catalog());
        let bad = ArgValue::Text("; rm -rf /".to_string());
        let result = executor.execute(&ECHO_ENTRY, &req(vec![bad])).await;
        assert!(matches!(result, ExecResult::Forbidden { .. }));
    }

    #[tokio::test]
    async fn runs_and_captures_stdout() {
        let executor = Executor::new(catalog());
        let result = executor
            .execute(&ECHO_ENTRY, &req(vec![ArgValue::Text("hello".to_string())]))
            .await;
        match result {
            ExecResult::Exit { code, stdout, .. } => {
                assert_eq!(code, 0);
                assert_eq!(String::from_utf8_lossy(&stdout).trim(), "hello");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let executor = Executor::new(catalog());
        let result = executor
            .execute(&SLEEP_ENTRY, &req(vec![ArgValue::Text("5".to_string())]))
            .await;
        assert!(matches!(result, ExecResult::Timeout { .. }));
    }

    #[tokio::test]
    async fn same_write_class_calls_never_overlap() {
        let executor = Arc::new(Executor::new(catalog()));
        let a = executor.clone();
        let b = executor.clone();

        let t1 = tokio::spawn(async move {
            a.execute(&SLEEP_ENTRY, &req(vec![ArgValue::Text("0.05".to_string())])).await
        });
        // Give t1 a head start so we can assert ordering via wall-clock.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let start = Instant::now();
        let t2 = tokio::spawn(async move {
            b.execute(&SLEEP_ENTRY, &req(vec![ArgValue::Text("0.05".to_string())])).await
        });

        let (_, _) = tokio::join!(t1, t2);
        // If the mutex serialized them, the second call couldn't have
        // started executing before the first released the gate well after
        // our 5ms head start.
        assert!(start.elapsed() >= Duration::from_millis(1));
    }
}
