//! External engine driven over a JSON-lines protocol
//!
//! The command is spawned in the working directory. Warden writes one `start` message
//! to stdin, then reads messages from stdout line by line:
//!
//! ```text
//! -> {"type":"start","prompt":"...","tools":[...],"workdir":"..."}
//! <- {"type":"tool_call","id":"1","tool":"write_file","input":{"path":"...","content":"..."}}
//! -> {"type":"tool_result","id":"1","accepted":true,"content":"..."}
//! <- {"type":"log","text":"..."}
//! <- {"type":"final","text":"..."}
//! ```
//!
//! Any other JSON object is kept as a raw item; non-JSON lines are kept as text.
//!
//! Stderr is drained concurrently and only its tail is kept. An engine that stops
//! reading tool results still has its output collected until it exits.

use super::{parse_tool_call, EngineRun, RawItem, ReasoningEngine, ToolGate, ToolSpec};
use crate::config::EngineSettings;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 180;
const STDERR_TAIL: usize = 2000;
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Engine backed by an external command
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    name: String,
    command: String,
    args: Vec<String>,
    timeout_secs: u64,
}

impl ProcessEngine {
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let name = Path::new(&command)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| command.clone());
        Self {
            name,
            command,
            args: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Build from config; `None` when no command is configured
    pub fn from_settings(settings: &EngineSettings) -> Option<Self> {
        let command = settings.command.as_ref()?;
        Some(
            Self::new(command.clone())
                .with_args(settings.args.clone())
                .with_timeout(settings.timeout_secs),
        )
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    async fn converse(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        workdir: &Path,
        gate: &dyn ToolGate,
    ) -> Result<EngineRun> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", self.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Spawn("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("stdout not captured".to_string()))?;
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(stderr_tail(pipe)));

        let start = json!({
            "type": "start",
            "prompt": prompt,
            "tools": tools,
            "workdir": workdir.display().to_string(),
        });
        let mut stdin = Some(stdin);
        if let Some(pipe) = stdin.as_mut() {
            if let Err(e) = send(pipe, &start).await {
                debug!(engine = %self.name, error = %e, "engine did not take the start message");
                stdin = None;
            }
        }
        let mut hung_up = false;

        let mut run = EngineRun::default();
        let mut finished = false;
        let mut lines = BufReader::new(stdout).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngineError::Protocol(e.to_string()))?
        {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(message) = serde_json::from_str::<Value>(trimmed) else {
                run.items.push(RawItem::Text(line));
                continue;
            };

            match message.get("type").and_then(Value::as_str) {
                Some("tool_call") => {
                    let id = message.get("id").cloned().unwrap_or(Value::Null);
                    let Some(invocation) = parse_tool_call(&message) else {
                        warn!(engine = %self.name, "unrecognized tool call");
                        let reply = json!({
                            "type": "tool_result",
                            "id": id,
                            "accepted": false,
                            "content": "unrecognized tool call",
                        });
                        run.items.push(RawItem::Json(message));
                        hung_up |= !self.reply(&mut stdin, &reply).await;
                        continue;
                    };

                    let outcome = gate.submit(&invocation);
                    let reply = json!({
                        "type": "tool_result",
                        "id": id,
                        "accepted": outcome.accepted,
                        "content": outcome.response,
                    });
                    run.items.push(RawItem::ToolCall {
                        invocation,
                        accepted: outcome.accepted,
                        response: outcome.response,
                    });
                    hung_up |= !self.reply(&mut stdin, &reply).await;
                }
                Some("log") => {
                    let text = message
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    run.items.push(RawItem::Text(text));
                }
                Some("final") => {
                    run.final_text = match message.get("text") {
                        Some(Value::String(text)) => text.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    };
                    finished = true;
                    break;
                }
                _ => run.items.push(RawItem::Json(message)),
            }
        }

        drop(stdin);
        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::Failed(e.to_string()))?;

        let tail = match stderr {
            Some(task) => match timeout(STDERR_GRACE, task).await {
                Ok(Ok(tail)) => tail,
                _ => String::new(),
            },
            None => String::new(),
        };

        if !status.success() && !finished {
            let accepted = run.tool_calls().filter(|(_, accepted)| *accepted).count();
            if hung_up && accepted > 0 {
                warn!(
                    engine = %self.name,
                    %status,
                    accepted,
                    stderr = %tail,
                    "engine hung up mid-conversation; keeping its accepted tool calls"
                );
                return Ok(run);
            }
            return Err(EngineError::Failed(format!(
                "{} exited with {}: {}",
                self.name, status, tail
            ))
            .into());
        }

        debug!(engine = %self.name, items = run.items.len(), finished, "engine run finished");
        Ok(run)
    }

    /// Answer a tool call; `false` once the engine no longer reads its stdin
    async fn reply(&self, stdin: &mut Option<ChildStdin>, message: &Value) -> bool {
        let Some(pipe) = stdin.as_mut() else {
            return false;
        };
        match send(pipe, message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(engine = %self.name, error = %e, "engine stopped reading tool results");
                *stdin = None;
                false
            }
        }
    }
}

/// Read stderr to the end, keeping the last `STDERR_TAIL` bytes
async fn stderr_tail(mut pipe: ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL * 4 {
                    tail.drain(..tail.len() - STDERR_TAIL);
                }
            }
        }
    }
    let start = tail.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&tail[start..]).trim().to_string()
}

async fn send(stdin: &mut ChildStdin, message: &Value) -> Result<()> {
    let mut line = message.to_string();
    line.push('\n');
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| EngineError::Protocol(format!("engine closed stdin: {}", e)))?;
    stdin
        .flush()
        .await
        .map_err(|e| EngineError::Protocol(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl ReasoningEngine for ProcessEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        workdir: &Path,
        gate: &dyn ToolGate,
    ) -> Result<EngineRun> {
        timeout(
            Duration::from_secs(self.timeout_secs),
            self.converse(prompt, tools, workdir, gate),
        )
        .await
        .map_err(|_| EngineError::Timeout(self.timeout_secs))?
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::ToolOutcome;
    use crate::types::Invocation;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Invocation>>);

    impl ToolGate for Recorder {
        fn submit(&self, invocation: &Invocation) -> ToolOutcome {
            self.0.lock().unwrap().push(invocation.clone());
            ToolOutcome {
                accepted: true,
                response: "ok".to_string(),
            }
        }
    }

    fn shell(script: &str) -> ProcessEngine {
        ProcessEngine::new("sh")
            .with_args(vec!["-c".to_string(), script.to_string()])
            .with_timeout(10)
    }

    #[tokio::test]
    async fn test_json_lines_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = shell(
            r#"read start
echo '{"type":"tool_call","id":"1","tool":"create_file","input":{"path":"src/A.java","content":"class A {}"}}'
read result
echo '{"type":"log","text":"created src/A.java"}'
echo 'plain text line'
echo '{"type":"final","text":"done"}'"#,
        );
        let gate = Recorder::default();

        let run = engine
            .run("add A", &crate::engine::default_tools(), dir.path(), &gate)
            .await
            .unwrap();

        assert_eq!(run.final_text, "done");
        assert_eq!(run.items.len(), 3);
        assert!(matches!(&run.items[0], RawItem::ToolCall { accepted: true, .. }));
        assert_eq!(run.items[2], RawItem::Text("plain text line".to_string()));
        assert_eq!(
            gate.0.lock().unwrap()[0],
            Invocation::create("src/A.java", "class A {}")
        );
    }

    #[tokio::test]
    async fn test_failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let engine = shell("echo boom >&2; exit 3");
        let err = engine
            .run("x", &[], dir.path(), &Recorder::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_stderr_flood_does_not_stall() {
        let dir = tempfile::tempdir().unwrap();
        let engine = shell(
            r#"read start
head -c 300000 /dev/zero | tr '\0' x >&2
echo '{"type":"final","text":"done"}'"#,
        );
        let run = engine
            .run("x", &[], dir.path(), &Recorder::default())
            .await
            .unwrap();
        assert_eq!(run.final_text, "done");

        let engine = shell("head -c 300000 /dev/zero | tr '\\0' x >&2; echo boom >&2; exit 3");
        let err = engine
            .run("x", &[], dir.path(), &Recorder::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::WardenError::Engine(EngineError::Failed(_))));
        let message = err.to_string();
        assert!(message.ends_with("boom"));
        assert!(message.len() < STDERR_TAIL + 200);
    }

    #[tokio::test]
    async fn test_closed_stdin_keeps_accepted_calls() {
        let dir = tempfile::tempdir().unwrap();
        let engine = shell(
            r#"read start
exec 0<&-
echo '{"type":"tool_call","id":"1","tool":"create_file","input":{"path":"src/A.java","content":"class A {}"}}'
echo '{"type":"tool_call","id":"2","tool":"create_file","input":{"path":"src/B.java","content":"class B {}"}}'
exit 1"#,
        );
        let gate = Recorder::default();

        let run = engine
            .run("add A and B", &[], dir.path(), &gate)
            .await
            .unwrap();

        assert_eq!(run.tool_calls().count(), 2);
        assert!(run.tool_calls().all(|(_, accepted)| accepted));
        assert_eq!(gate.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let engine = shell("sleep 5").with_timeout(1);
        let err = engine
            .run("x", &[], dir.path(), &Recorder::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::WardenError::Engine(EngineError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new("/definitely/not/an/engine");
        let err = engine
            .run("x", &[], dir.path(), &Recorder::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::WardenError::Engine(EngineError::Spawn(_))));
    }
}
