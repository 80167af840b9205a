//! Warden CLI
//!
//! # Usage
//! ```bash
//! warden run --request "Add Order entity with CRUD" --target ./shop --confirm
//! warden resume --approve
//! warden validate --target ./shop --template java-layered
//! warden templates
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use warden_core::config::DEFAULT_CONFIG_FILE;
use warden_core::engine::{ProcessEngine, ReasoningEngine, ScriptedEngine};
use warden_core::orchestrator::{DirectExecutor, PatchExecutor};
use warden_core::types::ChangeOutcome;
use warden_core::{
    Confirmation, EnforcementMode, Orchestrator, Phase, RunOutcome, RunSummary,
    StructureValidator, TemplateCatalog, WardenConfig,
};
use warden_sandbox::SandboxExecutor;

const DEFAULT_STATE_FILE: &str = ".warden/suspended.json";

/// Warden - scope-guarded, engine-driven code changes
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of the human summary
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one change request
    Run(RunArgs),

    /// Approve or cancel a suspended run
    Resume {
        /// Suspension blob written by `run --confirm`
        #[arg(long, value_name = "FILE", default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,

        #[arg(long, conflicts_with = "cancel", required_unless_present = "cancel")]
        approve: bool,

        #[arg(long)]
        cancel: bool,

        /// Configuration file (default: warden.toml next to the target)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Score a tree against an architecture template
    Validate {
        #[arg(short, long, default_value = ".")]
        target: PathBuf,

        /// Catalog name or template file
        #[arg(long)]
        template: Option<String>,

        /// Create missing layer directories
        #[arg(long)]
        fix: bool,
    },

    /// List the built-in architecture templates
    Templates,
}

#[derive(Args)]
struct RunArgs {
    /// Free-form change request
    #[arg(short, long)]
    request: String,

    /// Working directory to change
    #[arg(short, long, default_value = ".")]
    target: PathBuf,

    /// Report patches without writing them
    #[arg(long)]
    dry_run: bool,

    /// Suspend before execution until `resume`
    #[arg(long)]
    confirm: bool,

    /// Configuration file (default: warden.toml in the target)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Catalog name or template file
    #[arg(long)]
    template: Option<String>,

    /// Replay a recorded engine script instead of running the configured engine
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Log out-of-scope mutations instead of denying them
    #[arg(long)]
    soft: bool,

    /// Rehearse patches in a mirrored tree first
    #[arg(long)]
    sandbox: bool,

    /// Where to write the suspension blob
    #[arg(long, value_name = "FILE", default_value = DEFAULT_STATE_FILE)]
    state: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let json = cli.json;
    match cli.command {
        Commands::Run(args) => run(args, json).await,
        Commands::Resume {
            state,
            approve,
            cancel: _,
            config,
        } => {
            let decision = if approve {
                Confirmation::Approve
            } else {
                Confirmation::Cancel
            };
            resume(&state, decision, config, json).await
        }
        Commands::Validate {
            target,
            template,
            fix,
        } => validate(&target, template, fix, json),
        Commands::Templates => {
            templates(json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(explicit: Option<&Path>, target: &Path) -> Result<WardenConfig> {
    match explicit {
        Some(path) => WardenConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            let path = target.join(DEFAULT_CONFIG_FILE);
            WardenConfig::load_or_default(&path)
                .with_context(|| format!("loading {}", path.display()))
        }
    }
}

fn executor(config: &WardenConfig) -> Arc<dyn PatchExecutor> {
    if config.execution.sandbox {
        Arc::new(SandboxExecutor::from_settings(&config.execution))
    } else {
        Arc::new(DirectExecutor)
    }
}

async fn run(args: RunArgs, json: bool) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref(), &args.target)?;
    if args.dry_run {
        config = config.with_dry_run(true);
    }
    if args.confirm {
        config = config.with_confirmation(true);
    }
    if let Some(template) = args.template {
        config = config.with_template(template);
    }
    if args.soft {
        config = config.with_guardrail_mode(EnforcementMode::Soft);
    }
    config.execution.sandbox |= args.sandbox;

    let engine: Arc<dyn ReasoningEngine> = match &args.script {
        Some(path) => Arc::new(
            ScriptedEngine::from_file(path)
                .with_context(|| format!("loading script {}", path.display()))?,
        ),
        None => match ProcessEngine::from_settings(&config.engine) {
            Some(engine) => Arc::new(engine),
            None => bail!("no engine configured: set [engine] command in {} or pass --script", DEFAULT_CONFIG_FILE),
        },
    };

    let orchestrator = Orchestrator::builder(config.clone())
        .engine(engine)
        .executor(executor(&config))
        .build()
        .context("building pipeline")?;

    let outcome = orchestrator.start(args.request, &args.target).await?;
    if let RunOutcome::Suspended { blob, .. } = &outcome {
        if let Some(parent) = args.state.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&args.state, blob)
            .with_context(|| format!("writing {}", args.state.display()))?;
    }

    report(&outcome, json, Some(&args.state))
}

async fn resume(
    state_file: &Path,
    decision: Confirmation,
    config: Option<PathBuf>,
    json: bool,
) -> Result<ExitCode> {
    let blob = std::fs::read_to_string(state_file)
        .with_context(|| format!("reading {}", state_file.display()))?;
    let workdir = warden_core::SuspendedRun::open(&blob)?.workdir;
    let config = load_config(config.as_deref(), &workdir)?;

    // Execution never consults the engine
    let orchestrator = Orchestrator::builder(config.clone())
        .engine(Arc::new(ScriptedEngine::new("resume")))
        .executor(executor(&config))
        .build()
        .context("building pipeline")?;

    let outcome = orchestrator.resume(&blob, decision).await?;
    std::fs::remove_file(state_file)
        .with_context(|| format!("removing {}", state_file.display()))?;
    report(&outcome, json, None)
}

fn report(outcome: &RunOutcome, json: bool, state_file: Option<&Path>) -> Result<ExitCode> {
    let summary = outcome.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(outcome, &summary);
        if let (true, Some(path)) = (outcome.is_suspended(), state_file) {
            println!();
            println!(
                "Suspended for confirmation. Resume with: warden resume --state {} --approve",
                path.display()
            );
        }
    }

    Ok(match summary.phase {
        Phase::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn print_summary(outcome: &RunOutcome, summary: &RunSummary) {
    let state = outcome.state();
    let phase = match summary.phase {
        Phase::Executed => summary.phase.to_string().green().bold(),
        Phase::Failed => summary.phase.to_string().red().bold(),
        other => other.to_string().yellow().bold(),
    };

    println!("{} {}", "Run".bold(), summary.run_id.dimmed());
    println!("  Phase:       {}", phase);
    println!(
        "  Compliance:  {:.1}{}",
        summary.compliance_score,
        if summary.production_ready {
            " (production ready)".green()
        } else {
            " (not production ready)".yellow()
        }
    );
    println!("  Scope:       {} path(s)", summary.allow_list);
    println!(
        "  Patches:     {} ({} applied, {} dry run, {} denied call(s))",
        summary.patches, summary.applied, summary.dry_run, summary.denied_invocations
    );

    if !state.patches.is_empty() {
        println!();
        for patch in &state.patches {
            println!(
                "  {} {}",
                format!("{:>6}", patch.operation.to_string()).cyan(),
                patch.display_path(&state.workdir)
            );
        }
    }

    let failed: Vec<_> = state
        .applied
        .iter()
        .filter_map(|c| match &c.outcome {
            ChangeOutcome::Failed { reason } | ChangeOutcome::Skipped { reason } => {
                Some((c, reason))
            }
            _ => None,
        })
        .collect();
    if !failed.is_empty() {
        println!();
        for (change, reason) in failed {
            println!("  {} {}: {}", "✗".red(), change.path.display(), reason);
        }
    }

    if let Some(verification) = &state.verification {
        let mark = if verification.success {
            "✓".green()
        } else {
            "✗".red()
        };
        println!();
        println!("  {} verification `{}`", mark, verification.command);
    }

    if !summary.feedback.is_empty() {
        println!();
        println!("{}", "Structure notes".bold());
        for item in &summary.feedback {
            println!("  - {}", item);
        }
    }

    if !summary.errors.is_empty() {
        println!();
        println!("{}", "Errors".bold());
        for error in &summary.errors {
            let tag = if error.is_fatal() {
                "fatal".red()
            } else {
                "recoverable".yellow()
            };
            println!("  [{}] {}: {}", tag, error.stage, error.message);
        }
    }
}

fn validate(target: &Path, template: Option<String>, fix: bool, json: bool) -> Result<ExitCode> {
    let config = load_config(None, target)?;
    let reference = template.unwrap_or(config.structure.template.clone());
    let compiled = TemplateCatalog::new()
        .resolve(&reference)?
        .compile()?;
    let validator = StructureValidator::from_settings(compiled, &config.structure).with_auto_fix(fix);

    let report = validator.validate(target, &Default::default())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let verdict = if report.production_ready {
            "production ready".green().bold()
        } else {
            "not production ready".red().bold()
        };
        println!(
            "{} {:.1} ({}, {} round(s))",
            "Compliance".bold(),
            report.compliance_score,
            verdict,
            report.rounds.len()
        );
        for violation in &report.violations {
            println!(
                "  [{}] {:?} {}",
                violation.severity, violation.kind, violation.path
            );
        }
        for dir in &report.created_dirs {
            println!("  {} {}", "created".green(), dir.display());
        }
    }

    Ok(if report.production_ready {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn templates(json: bool) -> Result<()> {
    let catalog = TemplateCatalog::new();
    if json {
        let all: Vec<_> = catalog
            .names()
            .into_iter()
            .filter_map(|name| catalog.get(name))
            .collect();
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    for name in catalog.names() {
        let Some(template) = catalog.get(name) else {
            continue;
        };
        println!("{} - {}", name.bold(), template.description);
        for layer in &template.layers {
            let aux = if layer.required { "" } else { " (auxiliary)" };
            println!(
                "  {:<12} {:<32} {}{}",
                layer.name, layer.path_prefix, layer.filename_pattern, aux
            );
        }
    }
    Ok(())
}
