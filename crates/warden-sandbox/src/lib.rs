//! Warden Sandbox - mirrored execution for synthesized patches
//!
//! Patches are first applied to a throwaway copy of the working tree. An optional
//! verification command runs inside that copy, and only a passing (non dry-run)
//! execution is promoted to the real tree.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use warden_core::config::ExecutionSettings;
use warden_core::orchestrator::{apply_all, PatchExecutor};
use warden_core::types::{AppliedChange, ChangeOutcome, ExecutionReport, VerificationResult};
use warden_core::{Patch, ScopeGuardrail, WardenError};

/// Directories never copied into the sandbox
const SKIPPED_DIRS: &[&str] = &["target", ".git", "node_modules", ".warden"];

/// Bytes of command output kept in a verification result
const OUTPUT_TAIL: usize = 4096;

/// Isolated copy of a working tree
pub struct Sandbox {
    /// Removed on drop
    #[allow(dead_code)]
    temp_dir: TempDir,
    pub root_path: PathBuf,
}

/// Output of a command run in the sandbox
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl Sandbox {
    /// Create an empty sandbox
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix("warden-sandbox-").tempdir()?;

        Ok(Self {
            root_path: temp_dir.path().to_path_buf(),
            temp_dir,
        })
    }

    /// Copy a project into the sandbox, skipping build output and VCS metadata
    ///
    /// Empty directories are kept: the structure phase may have just created them.
    pub fn mirror_project(&self, source_root: &Path) -> Result<usize> {
        let mut copied = 0;
        for entry in WalkDir::new(source_root).into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0 || !SKIPPED_DIRS.contains(&name.as_ref())
        }) {
            let entry = entry?;
            let relative_path = entry.path().strip_prefix(source_root)?;
            let dest_path = self.root_path.join(relative_path);

            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&dest_path)?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = dest_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), dest_path)?;
                copied += 1;
            }
        }
        debug!(files = copied, root = %self.root_path.display(), "project mirrored");
        Ok(copied)
    }

    /// Run a command with the sandbox root as working directory
    pub async fn run(&self, cmd: &str, args: &[String]) -> Result<ExecutionResult> {
        let output = Command::new(cmd)
            .args(args)
            .current_dir(&self.root_path)
            .output()
            .await?;

        Ok(ExecutionResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run `command` (program followed by its arguments) as a verification step
    pub async fn verify(&self, command: &[String]) -> Result<VerificationResult> {
        let Some((program, args)) = command.split_first() else {
            anyhow::bail!("empty verification command");
        };
        let result = self.run(program, args).await?;
        Ok(VerificationResult {
            command: command.join(" "),
            success: result.success,
            exit_code: result.exit_code,
            stdout_tail: tail(&result.stdout),
            stderr_tail: tail(&result.stderr),
        })
    }
}

fn tail(output: &str) -> String {
    if output.len() <= OUTPUT_TAIL {
        return output.to_string();
    }
    let mut start = output.len() - OUTPUT_TAIL;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    output[start..].to_string()
}

fn sandbox_error(err: anyhow::Error) -> WardenError {
    WardenError::Io(std::io::Error::other(err.to_string())).context("sandbox")
}

/// Executor that rehearses patches in a [`Sandbox`] before promoting them
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    verify_command: Option<Vec<String>>,
}

impl SandboxExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verify_command(mut self, command: Vec<String>) -> Self {
        self.verify_command = Some(command).filter(|c| !c.is_empty());
        self
    }

    pub fn from_settings(settings: &ExecutionSettings) -> Self {
        match &settings.verify_command {
            Some(command) => Self::new().with_verify_command(command.clone()),
            None => Self::new(),
        }
    }

    /// Patch paths re-rooted under the sandbox
    fn shadow_patches(&self, patches: &[Patch], real_root: &Path, shadow_root: &Path) -> Vec<Patch> {
        patches
            .iter()
            .map(|patch| {
                let path = match patch.path.strip_prefix(real_root) {
                    Ok(relative) => shadow_root.join(relative),
                    // Left as is: the rebased guardrail rejects it
                    Err(_) => patch.path.clone(),
                };
                Patch {
                    path,
                    ..patch.clone()
                }
            })
            .collect()
    }
}

#[async_trait]
impl PatchExecutor for SandboxExecutor {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn execute(
        &self,
        patches: &[Patch],
        guardrail: &ScopeGuardrail,
        dry_run: bool,
    ) -> warden_core::Result<ExecutionReport> {
        let sandbox = Sandbox::new().map_err(sandbox_error)?;
        sandbox
            .mirror_project(guardrail.workdir())
            .map_err(sandbox_error)?;

        let shadow = guardrail.rebase(&sandbox.root_path)?;
        let rehearsal = apply_all(
            &self.shadow_patches(patches, guardrail.workdir(), shadow.workdir()),
            &shadow,
            false,
        );

        let verification = match &self.verify_command {
            Some(command) => {
                let result = sandbox.verify(command).await.map_err(sandbox_error)?;
                info!(command = %result.command, success = result.success, "sandbox verification");
                Some(result)
            }
            None => None,
        };
        let verified = verification.as_ref().map_or(true, |v| v.success);

        if verified && !dry_run {
            return Ok(ExecutionReport {
                changes: apply_all(patches, guardrail, false),
                verification,
            });
        }

        if !verified {
            warn!("verification failed, real tree left untouched");
        }
        let changes = patches
            .iter()
            .zip(rehearsal)
            .map(|(patch, rehearsed)| {
                let outcome = match rehearsed.outcome {
                    ChangeOutcome::Applied if !verified => ChangeOutcome::Skipped {
                        reason: "sandbox verification failed".to_string(),
                    },
                    ChangeOutcome::Applied => ChangeOutcome::DryRun,
                    other => other,
                };
                AppliedChange {
                    path: patch.path.clone(),
                    operation: patch.operation,
                    outcome,
                    bytes: rehearsed.bytes,
                }
            })
            .collect();

        Ok(ExecutionReport {
            changes,
            verification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sandbox_lifecycle() -> Result<()> {
        let source = tempfile::tempdir()?;
        std::fs::write(source.path().join("hello.sh"), "echo 'Hello Warden'")?;

        let sandbox = Sandbox::new()?;
        let root = sandbox.root_path.clone();
        sandbox.mirror_project(source.path())?;

        let res = sandbox.run("sh", &["hello.sh".to_string()]).await?;
        assert!(res.success);
        assert_eq!(res.stdout.trim(), "Hello Warden");

        drop(sandbox);
        assert!(!root.exists());
        assert!(source.path().join("hello.sh").is_file());
        Ok(())
    }

    #[test]
    fn test_mirror_skips_build_output() -> Result<()> {
        let source = tempfile::tempdir()?;
        std::fs::create_dir_all(source.path().join("src/empty"))?;
        std::fs::create_dir_all(source.path().join("target/debug"))?;
        std::fs::write(source.path().join("src/lib.rs"), "pub fn a() {}")?;
        std::fs::write(source.path().join("target/debug/out"), "bin")?;

        let sandbox = Sandbox::new()?;
        assert_eq!(sandbox.mirror_project(source.path())?, 1);
        assert!(sandbox.root_path.join("src/lib.rs").is_file());
        assert!(sandbox.root_path.join("src/empty").is_dir());
        assert!(!sandbox.root_path.join("target").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_verify_command_is_an_error() -> Result<()> {
        let sandbox = Sandbox::new()?;
        assert!(sandbox.verify(&[]).await.is_err());
        Ok(())
    }

    #[test]
    fn test_tail_keeps_the_end() {
        let long = format!("{}END", "x".repeat(OUTPUT_TAIL));
        let kept = tail(&long);
        assert_eq!(kept.len(), OUTPUT_TAIL);
        assert!(kept.ends_with("END"));
    }
}
