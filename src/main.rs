//! Stackform CLI entrypoint.
//!
//! This is the main entrypoint for the stackform command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use stackform::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use stackform::config::{
    ConfigHasher, ConfigParser, ConfigValidator, DEFAULT_STATE_DIR, Manifest, find_manifest_file,
};
use stackform::error::{Result, StackformError};
use stackform::planner::{DiffEngine, Plan, PlanExecutor};
use stackform::resources::ResourceRegistry;
use stackform::state::{LocalStateStore, StackState, StateLock, StateStore, holder_id};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the default level unless `--verbose` is given.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let manifest = cli.manifest.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(manifest, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(manifest, detailed, &formatter).await,
        Commands::Apply {
            yes,
            continue_on_error,
        } => cmd_apply(manifest, yes, continue_on_error, &formatter).await,
        Commands::Refresh => cmd_refresh(manifest, &formatter).await,
        Commands::Destroy {
            yes,
            continue_on_error,
        } => cmd_destroy(manifest, yes, continue_on_error, &formatter).await,
        Commands::State { command } => cmd_state(manifest, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new stackform project in: {}", path.display());

    let manifest_path = path.join("stackform.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && manifest_path.exists() {
        eprintln!("Manifest already exists: {}", manifest_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&manifest_path, include_str!("../templates/stackform.yaml"))?;
    eprintln!("Created: {}", manifest_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{DEFAULT_STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.contains(DEFAULT_STATE_DIR);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# stackform")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your API credentials");
    eprintln!("  2. Declare your resources in stackform.yaml");
    eprintln!("  3. Run 'stackform validate' to check the manifest");
    eprintln!("  4. Run 'stackform plan' to see what will change");
    eprintln!("  5. Run 'stackform apply' to apply it");

    Ok(())
}

/// Validate the manifest.
fn cmd_validate(
    manifest_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let manifest_file = resolve_manifest_path(manifest_path)?;
    info!("Validating manifest: {}", manifest_file.display());

    let manifest = ConfigParser::new()
        .with_base_path(base_dir(&manifest_file))
        .load_with_env(&manifest_file)?;
    let result = ConfigValidator::new().check(&manifest);

    emit(&formatter.format_validation(&result, show_warnings))?;

    if result.is_valid() {
        Ok(())
    } else {
        Err(StackformError::internal(format!(
            "manifest has {} errors",
            result.error_count()
        )))
    }
}

/// Show the plan. Only persisted state is consulted, never the backend.
async fn cmd_plan(
    manifest_path: Option<&Path>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let project = Project::load(manifest_path)?;
    let state = project.store.load_or_default().await?;

    let plan = project.plan(&state)?;
    emit(&formatter.format_plan(&plan, detailed))
}

/// Apply the plan.
async fn cmd_apply(
    manifest_path: Option<&Path>,
    auto_approve: bool,
    continue_on_error: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let project = Project::load(manifest_path)?;
    let lock = StateLock::acquire(&project.store, "apply").await?;
    let outcome = apply_locked(&project, auto_approve, continue_on_error, formatter).await;
    lock.release(&project.store).await?;
    outcome
}

async fn apply_locked(
    project: &Project,
    auto_approve: bool,
    continue_on_error: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let mut state = project.store.load_or_default().await?;
    let plan = project.plan(&state)?;

    if plan.is_empty() {
        emit(&formatter.format_plan(&plan, false))?;
        return Ok(());
    }

    emit(&formatter.format_plan(&plan, true))?;

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let ctx = project.manifest.provider.build_context()?;
    let executor = PlanExecutor::new(&project.registry, &ctx, &project.store)
        .with_continue_on_error(continue_on_error);
    let result = executor.execute(&plan, &project.manifest, &mut state).await?;

    emit(&formatter.format_execution(&result))?;

    if result.all_successful() {
        Ok(())
    } else {
        Err(StackformError::internal(format!(
            "{} of {} actions failed",
            result.failed,
            plan.action_count()
        )))
    }
}

/// Refresh state from the backend.
async fn cmd_refresh(manifest_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let project = Project::load(manifest_path)?;
    let lock = StateLock::acquire(&project.store, "refresh").await?;

    let outcome: Result<()> = async {
        let Some(mut state) = project.store.load().await? else {
            eprintln!("No state found, nothing to refresh.");
            return Ok(());
        };
        let ctx = project.manifest.provider.build_context()?;
        let result = PlanExecutor::new(&project.registry, &ctx, &project.store)
            .refresh(&mut state)
            .await?;
        emit(&formatter.format_refresh(&result))?;

        if result.errors.is_empty() {
            Ok(())
        } else {
            Err(StackformError::internal(format!(
                "{} resources could not be read",
                result.errors.len()
            )))
        }
    }
    .await;

    lock.release(&project.store).await?;
    outcome
}

/// Destroy everything in state.
async fn cmd_destroy(
    manifest_path: Option<&Path>,
    auto_approve: bool,
    continue_on_error: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let project = Project::load(manifest_path)?;
    let lock = StateLock::acquire(&project.store, "destroy").await?;

    let outcome: Result<()> = async {
        let mut state = project.store.load_or_default().await?;
        let plan = Plan::destroy(&state);
        if plan.is_empty() {
            eprintln!("No resources to destroy.");
            return Ok(());
        }

        emit(&formatter.format_plan(&plan, false))?;

        if !auto_approve
            && !confirm(
                "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
                "destroy",
            )?
        {
            eprintln!("Destruction cancelled.");
            return Ok(());
        }

        let ctx = project.manifest.provider.build_context()?;
        let result = PlanExecutor::new(&project.registry, &ctx, &project.store)
            .with_continue_on_error(continue_on_error)
            .destroy(&mut state)
            .await?;
        emit(&formatter.format_execution(&result))?;

        if result.all_successful() {
            Ok(())
        } else {
            Err(StackformError::internal(format!(
                "{} deletions failed",
                result.failed
            )))
        }
    }
    .await;

    lock.release(&project.store).await?;
    outcome
}

/// State management commands.
async fn cmd_state(
    manifest_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let project = Project::load(manifest_path)?;
    let store = &project.store;

    match command {
        StateCommands::Show => match store.load().await? {
            Some(state) => emit(&formatter.format_state(&state))?,
            None => eprintln!("No state found."),
        },
        StateCommands::List => {
            let state = store.load_or_default().await?;
            emit(&formatter.format_resources(&state))?;
        }
        StateCommands::Get { address } => {
            let state = store.load_or_default().await?;
            match state.get(&address) {
                Some(record) => emit(&formatter.format_record(record))?,
                None => {
                    return Err(StackformError::internal(format!("{address} is not in state")));
                }
            }
        }
        StateCommands::Rm { address } => {
            let lock = StateLock::acquire(store, "state rm").await?;
            let outcome: Result<()> = async {
                let mut state = store.load_or_default().await?;
                if state.remove(&address).is_none() {
                    return Err(StackformError::internal(format!("{address} is not in state")));
                }
                store.save(&state).await?;
                warn!("{address} removed from state; the backend object was left untouched");
                Ok(())
            }
            .await;
            lock.release(store).await?;
            outcome?;
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(holder_id);
            let lock = store.acquire_lock(&holder, "manual").await?;
            eprintln!("State locked: {lock}");
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match store.force_unlock().await? {
                    Some(lock) => eprintln!("Removed lock {lock}"),
                    None => eprintln!("State is not locked."),
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else if let Some(lock) = store.lock_info().await? {
                eprintln!("State is locked: {lock}\nPass --lock-id or use --force to remove it.");
            } else {
                eprintln!("State is not locked.");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A loaded manifest with its state store and resource registry.
struct Project {
    manifest: Manifest,
    store: LocalStateStore,
    registry: ResourceRegistry,
}

impl Project {
    /// Loads and validates the manifest and opens the state store next to it.
    fn load(manifest_path: Option<&Path>) -> Result<Self> {
        let manifest_file = resolve_manifest_path(manifest_path)?;
        debug!("Loading manifest from: {}", manifest_file.display());

        let base = base_dir(&manifest_file);
        let manifest = ConfigParser::new()
            .with_base_path(&base)
            .load_with_env(&manifest_file)?;

        let registry = ResourceRegistry::builtin();
        let result = ConfigValidator::with_registry(registry.clone()).validate(&manifest)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }

        let store = LocalStateStore::with_base_dir(base.join(&manifest.state.path));

        Ok(Self {
            manifest,
            store,
            registry,
        })
    }

    /// Computes the plan from the manifest and `state`.
    fn plan(&self, state: &StackState) -> Result<Plan> {
        let diff = DiffEngine::new(&self.registry).compute_diff(&self.manifest, state)?;
        let hash = ConfigHasher::new().hash_manifest(&self.manifest);
        Ok(Plan::from_diff(&diff, &hash))
    }
}

/// Resolves the manifest file path.
fn resolve_manifest_path(manifest_path: Option<&Path>) -> Result<PathBuf> {
    manifest_path.map_or_else(|| find_manifest_file("."), |path| Ok(path.to_path_buf()))
}

/// Returns the directory holding the manifest.
fn base_dir(manifest_file: &Path) -> PathBuf {
    manifest_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Asks for confirmation on stderr; true if the answer matches `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}
