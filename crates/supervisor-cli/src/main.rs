//! `runr`: thin CLI wrapper over `supervisor-engine`.
//!
//! This is deliberately not a product surface — it exists so a human
//! can drive and inspect runs manually; automation is expected to talk
//! to the run store directly.

mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{eyre, Context, Result};

use supervisor_core::config::Config;
use supervisor_core::events::{Event, EventPayload, EventType, SubmitEventPayload};
use supervisor_core::state_machine::create_initial_state;
use supervisor_core::types::{RunId, ScopeLock};

use supervisor_engine::git::Git;
use supervisor_engine::run_store::RunStore;
use supervisor_engine::submit::{self, SubmitError, SubmitPlanOrOutcome, SubmitRequirements};
use supervisor_engine::supervisor::{Supervisor, TickResult};
use supervisor_engine::watcher::{watch_loop, WatcherConfig};
use supervisor_engine::worker::{self, WorkerConfig};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "runr", version, about = "Agent run supervisor")]
struct Cli {
    #[arg(long, env = "RUNR_CONFIG", default_value = ".runr/config")]
    config: PathBuf,

    #[arg(long, env = "RUNR_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run for the given task prompt and drive it to completion.
    Run { task_prompt: String },
    /// Resume a stopped run whose stop reason is safe to retry.
    Resume { run_id: String },
    /// Poll stopped runs and auto-resume the resumable ones, forever.
    Watch,
    /// Print the current state of a run.
    Status { run_id: String },
    /// List all known runs.
    Report,
    /// Render a submit bundle's markdown without integrating it.
    Bundle { run_id: String },
    /// Cherry-pick a finished run's checkpoint commit onto the target branch.
    Submit {
        run_id: String,
        target_branch: String,
        /// Validate and print the plan without touching git or writing events.
        #[arg(long)]
        dry_run: bool,
    },
    /// Ping all configured worker commands to confirm they're invocable.
    Doctor,
    /// Remove run directories for finalized or stopped runs.
    Gc,
}

fn load_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        Config::from_file(path).wrap_err_with(|| format!("loading config from {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config);

    let store = RunStore::new(config.runs_dir.clone());
    let git = Git::new(cli.workspace.clone());

    match cli.command {
        Commands::Run { task_prompt } => cmd_run(config, store, git, &task_prompt).await,
        Commands::Resume { run_id } => cmd_resume(config, store, git, run_id).await,
        Commands::Watch => cmd_watch(config, store).await,
        Commands::Status { run_id } => cmd_status(&store, run_id),
        Commands::Report => cmd_report(&store),
        Commands::Bundle { run_id } => cmd_bundle(&store, &git, run_id),
        Commands::Submit { run_id, target_branch, dry_run } => {
            cmd_submit(&store, &git, run_id, target_branch, dry_run)
        }
        Commands::Doctor => cmd_doctor(&config).await,
        Commands::Gc => cmd_gc(&store),
    }
}

async fn cmd_run(config: Config, store: RunStore, git: Git, task_prompt: &str) -> Result<()> {
    let run_id = RunId::from_timestamp(chrono::Utc::now());
    store.create_run_dir(&run_id)?;

    let scope_lock = ScopeLock {
        allowlist: config.allowlist.clone(),
        denylist: config.denylist.clone(),
        lockfiles: config.lockfiles.clone(),
        allow_deps: config.allow_deps,
        env_allowlist: config.env_allowlist.clone(),
    };
    let mut state = create_initial_state(run_id, vec![], scope_lock, vec![], chrono::Utc::now());
    store.save_state(&state)?;

    let supervisor = Supervisor::new(config, store, git);
    loop {
        match supervisor.tick(state, task_prompt).await? {
            TickResult::Continued(next) => state = next,
            TickResult::Finalized(next) => {
                println!("{}", render::render_status(&next));
                return Ok(());
            }
            TickResult::Stopped(next, diagnosis) => {
                println!("{}", render::render_diagnosis(&diagnosis));
                let _ = next;
                return Ok(());
            }
        }
    }
}

async fn cmd_resume(config: Config, store: RunStore, git: Git, run_id: String) -> Result<()> {
    let run_id = RunId::from_string(run_id);
    let state = store.load_state(&run_id)?;
    if !supervisor_core::state_machine::is_resumable_stop_reason(
        state.stop_reason.as_deref().unwrap_or(""),
    ) {
        return Err(eyre!("run {run_id} has a non-resumable stop reason"));
    }
    let mut state = supervisor_core::state_machine::prepare_for_resume(state, chrono::Utc::now());
    store.save_state(&state)?;

    let supervisor = Supervisor::new(config, store, git);
    loop {
        match supervisor.tick(state, "").await? {
            TickResult::Continued(next) => state = next,
            TickResult::Finalized(next) => {
                println!("{}", render::render_status(&next));
                return Ok(());
            }
            TickResult::Stopped(_, diagnosis) => {
                println!("{}", render::render_diagnosis(&diagnosis));
                return Ok(());
            }
        }
    }
}

async fn cmd_watch(config: Config, store: RunStore) -> Result<()> {
    let watcher_config = WatcherConfig {
        poll_interval_sec: config.auto_resume_poll_interval_sec,
        cooldown_sec: config.auto_resume_cooldown_sec as i64,
        max_attempts: config.auto_resume_max_attempts,
    };
    watch_loop(&store, &watcher_config, || false).await?;
    Ok(())
}

fn cmd_status(store: &RunStore, run_id: String) -> Result<()> {
    let state = store.load_state(&RunId::from_string(run_id))?;
    println!("{}", render::render_status(&state));
    Ok(())
}

fn cmd_report(store: &RunStore) -> Result<()> {
    let mut states = Vec::new();
    for run_id in store.list_run_ids()? {
        states.push(store.load_state(&run_id)?);
    }
    println!("{}", render::render_run_list(&states));
    Ok(())
}

fn cmd_bundle(store: &RunStore, git: &Git, run_id: String) -> Result<()> {
    let run_id = RunId::from_string(run_id);
    let state = store.load_state(&run_id)?;
    let Some(checkpoint_sha) = &state.checkpoint_commit_sha else {
        return Err(eyre!("run {run_id} has no checkpoint commit yet"));
    };
    let commits = git.commits_between("HEAD", checkpoint_sha).unwrap_or_default();
    let subjects: Vec<(String, String)> = commits.into_iter().map(|sha| (sha, "".to_string())).collect();
    println!("{}", submit::render_bundle_markdown(run_id.as_ref(), "main", &subjects));
    Ok(())
}

fn cmd_submit(
    store: &RunStore,
    git: &Git,
    run_id: String,
    target_branch: String,
    dry_run: bool,
) -> Result<()> {
    let run_id = RunId::from_string(run_id);
    let state = store.load_state(&run_id)?;
    let requirements = SubmitRequirements::default();

    match submit::submit(&state, git, &target_branch, &requirements, dry_run) {
        Ok(SubmitPlanOrOutcome::Planned(plan)) => {
            println!(
                "dry run: would cherry-pick {} onto {} (starting from {})",
                plan.checkpoint_sha, plan.target_branch, plan.starting_branch
            );
            Ok(())
        }
        Ok(SubmitPlanOrOutcome::Submitted(outcome)) => {
            append_submit_event(
                store,
                &run_id,
                EventType::RunSubmitted,
                SubmitEventPayload {
                    target_branch: outcome.target_branch.clone(),
                    reason: None,
                    conflicted_files: Vec::new(),
                    checkpoint_sha: Some(outcome.checkpoint_sha.clone()),
                },
            )?;
            println!(
                "submitted checkpoint {} from run {} onto {}",
                outcome.checkpoint_sha, run_id, outcome.target_branch
            );
            Ok(())
        }
        Err(SubmitError::ValidationFailed { reason }) => {
            append_submit_event(
                store,
                &run_id,
                EventType::SubmitValidationFailed,
                SubmitEventPayload {
                    target_branch: target_branch.clone(),
                    reason: Some(reason.clone()),
                    conflicted_files: Vec::new(),
                    checkpoint_sha: state.checkpoint_commit_sha.clone(),
                },
            )?;
            Err(eyre!("submit validation failed: {reason}"))
        }
        Err(SubmitError::Conflict { checkpoint_sha, target_branch, conflicted_files }) => {
            append_submit_event(
                store,
                &run_id,
                EventType::SubmitConflict,
                SubmitEventPayload {
                    target_branch: target_branch.clone(),
                    reason: None,
                    conflicted_files: conflicted_files.clone(),
                    checkpoint_sha: Some(checkpoint_sha.clone()),
                },
            )?;
            println!("recovery: git checkout {target_branch} && git cherry-pick {checkpoint_sha}");
            Err(eyre!("cherry-pick conflicted on {conflicted_files:?}"))
        }
        Err(SubmitError::Git(source)) => Err(source.into()),
    }
}

fn append_submit_event(
    store: &RunStore,
    run_id: &RunId,
    event_type: EventType,
    payload: SubmitEventPayload,
) -> Result<()> {
    let event = Event {
        seq: 0,
        run_id: run_id.clone(),
        event_type,
        at: chrono::Utc::now(),
        phase: None,
        payload: EventPayload::Submit(payload),
    };
    store.append_event(event)?;
    Ok(())
}

async fn cmd_doctor(config: &Config) -> Result<()> {
    for (role, command) in [
        ("planner", &config.planner_cmd),
        ("implementer", &config.implementer_cmd),
        ("reviewer", &config.reviewer_cmd),
    ] {
        if command.is_empty() {
            println!("{role}: not configured");
            continue;
        }
        let worker_config = WorkerConfig {
            role: role.to_string(),
            command: command.clone(),
            protocol: supervisor_core::worker_protocol::OutputProtocol::RawText,
            timeout_sec: 10,
            retries: 0,
            retry_backoff_sec: 0,
        };
        match worker::ping(&worker_config).await {
            Ok(()) => println!("{role}: ok"),
            Err(e) => println!("{role}: failed ({e})"),
        }
    }
    Ok(())
}

fn cmd_gc(store: &RunStore) -> Result<()> {
    let mut removed = 0;
    for run_id in store.list_run_ids()? {
        let state = store.load_state(&run_id)?;
        if matches!(
            state.phase,
            supervisor_core::types::Phase::Finalize | supervisor_core::types::Phase::Stopped
        ) {
            std::fs::remove_dir_all(store.run_path(&run_id))
                .wrap_err_with(|| format!("removing run directory for {run_id}"))?;
            removed += 1;
        }
    }
    println!("removed {removed} run directories");
    Ok(())
}
