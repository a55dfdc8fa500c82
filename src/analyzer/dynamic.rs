//! Dynamic Code Analyzer - cooperative sandboxed execution.
//!
//! Candidate code runs inside an embedded QuickJS context whose global
//! surface is rebuilt before the code executes: network, filesystem,
//! environment, and process controls are replaced with recording traps,
//! `Promise` is withdrawn, and the global object graph is deeply frozen.
//! Execution is bounded by a wall-clock deadline enforced through the
//! engine's interrupt handler and by an advisory memory limit.
//!
//! This is a *cooperative* sandbox: it contains code that merely tries the
//! usual escape hatches, which is the threat model for accidentally hostile
//! agent skills. It makes no claim against an attacker with native code
//! execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rquickjs::{function::Func, CatchResultExt, Context, Runtime};
use serde::Serialize;

use crate::error::{GatewayError, GatewayResult};

/// Wall-clock bounds on one execution.
const MIN_TIMEOUT: Duration = Duration::from_millis(1_000);
const MAX_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Pause after synchronous completion so queued work settles before the
/// context is torn down.
const SETTLE_TICK: Duration = Duration::from_millis(100);

/// What one sandboxed execution observed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicAnalysis {
    /// True iff nothing was recorded on any list.
    pub safe: bool,
    pub suspicious_behavior: Vec<String>,
    pub network_attempts: Vec<String>,
    pub fs_attempts: Vec<String>,
    pub execution_time_ms: f64,
    pub memory_used: u64,
}

#[derive(Default)]
struct Recorder {
    suspicious: Vec<String>,
    network: Vec<String>,
    fs: Vec<String>,
}

/// Sandboxed executor for agent-supplied code.
#[derive(Debug, Clone)]
pub struct DynamicCodeAnalyzer {
    memory_limit: usize,
}

impl Default for DynamicCodeAnalyzer {
    fn default() -> Self {
        Self {
            memory_limit: 50 * 1024 * 1024,
        }
    }
}

impl DynamicCodeAnalyzer {
    pub fn new(memory_limit: usize) -> Self {
        Self { memory_limit }
    }

    /// Execute one candidate with the given wall-clock budget.
    ///
    /// A timeout is not an error: it is reported on the behavior list. An
    /// `Err` here means the sandbox itself could not be brought up.
    pub async fn execute(&self, code: &str, timeout: Duration) -> GatewayResult<DynamicAnalysis> {
        let timeout = timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT);
        let code = code.to_string();
        let memory_limit = self.memory_limit;

        tokio::task::spawn_blocking(move || run_sandboxed(&code, timeout, memory_limit))
            .await
            .map_err(|e| GatewayError::Sandbox(format!("sandbox task failed: {}", e)))?
    }
}

fn run_sandboxed(
    code: &str,
    timeout: Duration,
    memory_limit: usize,
) -> GatewayResult<DynamicAnalysis> {
    let started = Instant::now();
    let deadline = started + timeout;
    let timed_out = Arc::new(AtomicBool::new(false));
    let recorder = Arc::new(Mutex::new(Recorder::default()));

    let runtime =
        Runtime::new().map_err(|e| GatewayError::Sandbox(format!("runtime init: {}", e)))?;
    runtime.set_memory_limit(memory_limit);

    {
        let timed_out = Arc::clone(&timed_out);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            if Instant::now() >= deadline {
                timed_out.store(true, Ordering::SeqCst);
                true
            } else {
                false
            }
        })));
    }

    let context =
        Context::full(&runtime).map_err(|e| GatewayError::Sandbox(format!("context init: {}", e)))?;

    context.with(|ctx| -> GatewayResult<()> {
        let globals = ctx.globals();

        let rec = Arc::clone(&recorder);
        globals
            .set(
                "__cs_record_network",
                Func::from(move |url: String| {
                    rec.lock().expect("recorder poisoned").network.push(url);
                }),
            )
            .map_err(|e| GatewayError::Sandbox(e.to_string()))?;

        let rec = Arc::clone(&recorder);
        globals
            .set(
                "__cs_record_fs",
                Func::from(move |entry: String| {
                    rec.lock().expect("recorder poisoned").fs.push(entry);
                }),
            )
            .map_err(|e| GatewayError::Sandbox(e.to_string()))?;

        let rec = Arc::clone(&recorder);
        globals
            .set(
                "__cs_record_suspicious",
                Func::from(move |entry: String| {
                    rec.lock().expect("recorder poisoned").suspicious.push(entry);
                }),
            )
            .map_err(|e| GatewayError::Sandbox(e.to_string()))?;

        ctx.eval::<(), _>(SANDBOX_PRELUDE)
            .catch(&ctx)
            .map_err(|e| GatewayError::Sandbox(format!("prelude failed: {}", e)))?;

        // Strict-mode IIFE: `this` at the outermost scope is undefined,
        // which closes the this.constructor.constructor escape.
        let wrapped = format!("\"use strict\"; void function() {{\n{}\n}}();", code);
        if let Err(e) = ctx.eval::<(), _>(wrapped).catch(&ctx) {
            // Errors thrown by candidate code (including our own traps)
            // are expected; the recorder already carries the signal.
            tracing::debug!(error = %e, "Sandboxed execution raised");
        }

        Ok(())
    })?;

    if timed_out.load(Ordering::SeqCst) {
        recorder
            .lock()
            .expect("recorder poisoned")
            .suspicious
            .push("Execution timed out - possible infinite loop".to_string());
    } else {
        // Settle tick for any queued work before teardown.
        std::thread::sleep(SETTLE_TICK);
    }

    let memory_used = runtime.memory_usage().memory_used_size.max(0) as u64;
    let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    // The context still owns the recording closures; copy the lists out
    // rather than unwrapping the shared recorder.
    let recorder = recorder.lock().expect("recorder poisoned");

    Ok(DynamicAnalysis {
        safe: recorder.suspicious.is_empty()
            && recorder.network.is_empty()
            && recorder.fs.is_empty(),
        suspicious_behavior: recorder.suspicious.clone(),
        network_attempts: recorder.network.clone(),
        fs_attempts: recorder.fs.clone(),
        execution_time_ms,
        memory_used,
    })
}

/// Rebuilds the sandbox global surface. Runs once per execution, before the
/// candidate code.
const SANDBOX_PRELUDE: &str = r#"
(function(global) {
  var NativeProxy = global.Proxy;
  var recordNetwork = global.__cs_record_network;
  var recordFs = global.__cs_record_fs;
  var recordSuspicious = global.__cs_record_suspicious;
  delete global.__cs_record_network;
  delete global.__cs_record_fs;
  delete global.__cs_record_suspicious;

  delete global.Promise;
  delete global.Reflect;
  global.eval = undefined;
  global.Function = undefined;

  global.fetch = function(url) {
    recordNetwork(String(url));
    return {
      ok: false,
      status: 403,
      statusText: "Forbidden",
      text: function() { return ""; },
      json: function() { return {}; }
    };
  };

  function fsTrap() {
    return new NativeProxy(function() {}, {
      get: function(target, prop) {
        if (typeof prop === "string") { recordFs(prop); }
        return fsTrap();
      },
      apply: function() {
        throw new Error("Filesystem access is not permitted");
      }
    });
  }

  var FS_MODULES = ["fs", "node:fs", "fs/promises", "node:fs/promises"];
  var DANGEROUS_MODULES = [
    "child_process", "node:child_process", "net", "node:net", "dgram", "dns"
  ];

  global.require = function(name) {
    name = String(name);
    if (FS_MODULES.indexOf(name) !== -1) {
      recordFs("require('" + name + "')");
      return fsTrap();
    }
    if (DANGEROUS_MODULES.indexOf(name) !== -1) {
      recordSuspicious("Attempted to require dangerous module: " + name);
      throw new Error("Module '" + name + "' is not available");
    }
    return {};
  };

  global.process = {
    env: new NativeProxy({}, {
      get: function(target, prop) {
        if (typeof prop === "string") {
          recordSuspicious("Attempted to access process.env." + prop);
        }
        return "undefined";
      }
    }),
    exit: function() {
      recordSuspicious("Attempted to call process.exit()");
    }
  };

  global.setTimeout = function(fn, ms) {
    ms = Number(ms) || 0;
    if (ms > 1000) {
      recordSuspicious("setTimeout with delay " + ms + "ms");
    }
    if (typeof fn === "function") { fn(); }
    return 0;
  };

  global.setInterval = function() {
    recordSuspicious("Attempted to call setInterval");
    return 0;
  };

  var MAX_BUFFER = 1048576;
  global.Buffer = {
    alloc: function(size) {
      size = Number(size) || 0;
      if (size > MAX_BUFFER) {
        recordSuspicious("Buffer.alloc of " + size + " bytes clamped to 1MiB");
        size = MAX_BUFFER;
      }
      return { length: size };
    },
    from: function(input) {
      var length = (input !== null && input !== undefined && input.length !== undefined)
        ? Number(input.length) : String(input).length;
      if (length > MAX_BUFFER) {
        recordSuspicious("Buffer.from result clamped to 1MiB");
        length = MAX_BUFFER;
      }
      return { length: length };
    }
  };

  global.console = {
    log: function() {}, info: function() {}, warn: function() {},
    error: function() {}, debug: function() {}, trace: function() {}
  };

  delete global.Proxy;

  var seen = [];
  function deepFreeze(value) {
    if (value === null) { return; }
    var t = typeof value;
    if (t !== "object" && t !== "function") { return; }
    if (seen.indexOf(value) !== -1) { return; }
    if (seen.length > 10000) { return; }
    seen.push(value);
    try { Object.freeze(value); } catch (e) {}
    var names;
    try { names = Object.getOwnPropertyNames(value); } catch (e) { return; }
    for (var i = 0; i < names.length; i++) {
      var child;
      try { child = value[names[i]]; } catch (e) { continue; }
      deepFreeze(child);
    }
  }
  deepFreeze(global);
})(globalThis);
"#;
