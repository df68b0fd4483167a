//! tunnelkeeper core - tunnel process registry and reconciliation
//!
//! The main entry point for tk-core, handling:
//! - Starting tunnels under a detached supervisor
//! - Stopping one tunnel (tree kill) or all of them (bulk reap)
//! - Listing registered tunnels reconciled against live processes

use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tk_common::{Error, OutputFormat};
use tk_config::{load_settings, resolve_registry_path, LoadedSettings, CONFIG_SCHEMA_VERSION};
use tk_core::action::{BulkReaper, KillPolicy, OsSignaller};
use tk_core::collect::PsProcessTable;
use tk_core::exit_codes::ExitCode;
use tk_core::launch::{BinaryLauncher, SupervisorLauncher};
use tk_core::logging::{generate_run_id, init_logging, LogConfig, LogLevel};
use tk_core::output::{self, emit, emit_error, SCHEMA_VERSION};
use tk_core::registry::TunnelRegistry;
use tk_core::supervise::Supervisor;
use tk_core::tunnels::{StartOutcome, StopStatus, TunnelManager};
use tracing::{debug, info_span};

/// Registry poll interval for `start --wait-secs`.
const WAIT_POLL: Duration = Duration::from_millis(250);

/// tunnelkeeper core - start, stop and track tunnel processes
#[derive(Parser)]
#[command(name = "tk-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Settings file (config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry file shared by all invocations
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a tunnel for a local address
    Start(StartArgs),

    /// Stop one tunnel by name, or every local tunnel
    Stop(StopArgs),

    /// List registered tunnels with their live status
    List,

    /// Terminate every quick tunnel process without touching the registry
    Reap,

    /// Configuration management
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },

    /// Print version information
    Version,

    /// Own one tunnel binary (started by `start`)
    #[command(hide = true)]
    Supervise(SuperviseArgs),
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Local address to expose (e.g. localhost:3000)
    local_address: String,

    /// Tunnel name (default: tunnel-<port>)
    #[arg(long)]
    name: Option<String>,

    /// Wait up to this many seconds for the public address
    #[arg(long, default_value_t = 0)]
    wait_secs: u64,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["name", "all"])))]
struct StopArgs {
    /// Tunnel to stop
    name: Option<String>,

    /// Stop every local tunnel and reap untracked ones
    #[arg(long)]
    all: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the effective settings and where they came from
    Show,
}

#[derive(Args, Debug)]
struct SuperviseArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    local_address: String,
}

/// Per-invocation state shared by the command handlers.
struct Context<'a> {
    global: &'a GlobalOpts,
    run_id: String,
}

impl Context<'_> {
    fn settings(&self) -> Result<LoadedSettings, Error> {
        Ok(load_settings(self.global.config.as_deref())?)
    }

    fn registry_path(&self, loaded: &LoadedSettings) -> PathBuf {
        let resolved = resolve_registry_path(
            self.global.registry.as_deref(),
            loaded.settings.registry_path.as_deref(),
        );
        debug!(source = %resolved.source, "registry path resolved");
        resolved.path.unwrap_or_else(|| PathBuf::from("tunnels.json"))
    }

    fn fail(&self, err: Error) -> ExitCode {
        emit_error(self.global.format, &self.run_id, &err);
        ExitCode::from(&err)
    }
}

fn main() {
    let cli = Cli::parse();

    let cli_level = if cli.global.quiet {
        Some(LogLevel::Error)
    } else if cli.global.verbose > 0 {
        Some(LogLevel::Warn.louder(cli.global.verbose))
    } else {
        None
    };
    init_logging(&LogConfig::from_env(cli_level, None));

    let ctx = Context {
        global: &cli.global,
        run_id: generate_run_id(),
    };
    let span = info_span!("tk", run_id = %ctx.run_id);
    let _guard = span.enter();

    let code = match &cli.command {
        Commands::Start(args) => run_start(&ctx, args).as_i32(),
        Commands::Stop(args) => run_stop(&ctx, args).as_i32(),
        Commands::List => run_list(&ctx).as_i32(),
        Commands::Reap => run_reap(&ctx).as_i32(),
        Commands::Config(args) => match args.command {
            ConfigCommands::Show => run_config_show(&ctx).as_i32(),
        },
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "tk-core", &mut std::io::stdout());
            ExitCode::Ok.as_i32()
        }
        Commands::Version => {
            print_version(&ctx);
            ExitCode::Ok.as_i32()
        }
        Commands::Supervise(args) => run_supervise(&ctx, args),
    };

    std::process::exit(code);
}

#[derive(Serialize)]
struct StartPayload<'a> {
    #[serde(flatten)]
    outcome: &'a StartOutcome,
    #[serde(rename = "publicAddress")]
    public_address: Option<String>,
}

fn run_start(ctx: &Context, args: &StartArgs) -> ExitCode {
    let loaded = match ctx.settings() {
        Ok(loaded) => loaded,
        Err(e) => return ctx.fail(e),
    };
    let registry_path = ctx.registry_path(&loaded);
    let launcher = match SupervisorLauncher::current_exe(registry_path.clone(), loaded.path.clone())
    {
        Ok(launcher) => launcher,
        Err(e) => return ctx.fail(e.into()),
    };

    let table = PsProcessTable::new();
    let mut registry = TunnelRegistry::for_current_host(&registry_path);
    let outcome = {
        let mut manager = match TunnelManager::new(
            &mut registry,
            &table,
            &OsSignaller,
            &launcher,
            &loaded.settings,
        ) {
            Ok(manager) => manager,
            Err(e) => return ctx.fail(e),
        };
        manager
            .start_tunnel(args.name.as_deref(), &args.local_address)
            .outcome
    };

    let public_address = if outcome.accepted && args.wait_secs > 0 {
        wait_for_public_address(
            &mut registry,
            &outcome.name,
            Duration::from_secs(args.wait_secs),
        )
    } else {
        None
    };

    let payload = StartPayload {
        outcome: &outcome,
        public_address,
    };
    emit(ctx.global.format, "start", &ctx.run_id, &payload, |p| {
        output::render_start(p.outcome, p.public_address.as_deref())
    });

    if outcome.accepted {
        ExitCode::Ok
    } else {
        ExitCode::Refused
    }
}

/// Poll the registry until the supervisor records a public address.
///
/// Gives up early if the record disappears (failed launch).
fn wait_for_public_address(
    registry: &mut TunnelRegistry,
    name: &str,
    timeout: Duration,
) -> Option<String> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        registry.load();
        match registry.get(name) {
            Some(record) => {
                if let Some(url) = &record.public_address {
                    return Some(url.clone());
                }
            }
            None => return None,
        }
        std::thread::sleep(WAIT_POLL);
    }
    None
}

fn run_stop(ctx: &Context, args: &StopArgs) -> ExitCode {
    let loaded = match ctx.settings() {
        Ok(loaded) => loaded,
        Err(e) => return ctx.fail(e),
    };
    let table = PsProcessTable::new();
    let launcher = BinaryLauncher::new(loaded.settings.clone());
    let mut registry = TunnelRegistry::for_current_host(ctx.registry_path(&loaded));
    let mut manager = match TunnelManager::new(
        &mut registry,
        &table,
        &OsSignaller,
        &launcher,
        &loaded.settings,
    ) {
        Ok(manager) => manager,
        Err(e) => return ctx.fail(e),
    };

    let name = if args.all { None } else { args.name.as_deref() };
    let outcome = manager.stop_tunnel(name);
    emit(ctx.global.format, "stop", &ctx.run_id, &outcome, output::render_stop);

    match outcome.status {
        StopStatus::Stopped => ExitCode::Ok,
        StopStatus::NotFound => ExitCode::NotFound,
        StopStatus::Refused => ExitCode::Refused,
        StopStatus::Partial => ExitCode::PartialKill,
    }
}

fn run_list(ctx: &Context) -> ExitCode {
    let loaded = match ctx.settings() {
        Ok(loaded) => loaded,
        Err(e) => return ctx.fail(e),
    };
    let table = PsProcessTable::new();
    let launcher = BinaryLauncher::new(loaded.settings.clone());
    let mut registry = TunnelRegistry::for_current_host(ctx.registry_path(&loaded));
    let mut manager = match TunnelManager::new(
        &mut registry,
        &table,
        &OsSignaller,
        &launcher,
        &loaded.settings,
    ) {
        Ok(manager) => manager,
        Err(e) => return ctx.fail(e),
    };

    let outcome = manager.list_tunnels();
    emit(ctx.global.format, "list", &ctx.run_id, &outcome, output::render_list);
    ExitCode::Ok
}

fn run_reap(ctx: &Context) -> ExitCode {
    let loaded = match ctx.settings() {
        Ok(loaded) => loaded,
        Err(e) => return ctx.fail(e),
    };
    let table = PsProcessTable::new();
    let policy = KillPolicy::from_settings(&loaded.settings);
    let report = BulkReaper::new(&table, &OsSignaller, &policy).reap_all();
    emit(ctx.global.format, "reap", &ctx.run_id, &report, output::render_reap);

    if report.is_complete() {
        ExitCode::Ok
    } else {
        ExitCode::PartialKill
    }
}

fn run_config_show(ctx: &Context) -> ExitCode {
    let loaded = match ctx.settings() {
        Ok(loaded) => loaded,
        Err(e) => return ctx.fail(e),
    };
    let registry_path = ctx.registry_path(&loaded);
    let response = serde_json::json!({
        "config_schema_version": CONFIG_SCHEMA_VERSION,
        "source": {
            "path": loaded.path.as_ref().map(|p| p.display().to_string()),
            "kind": loaded.source.to_string(),
            "using_defaults": loaded.path.is_none(),
        },
        "registry_path": registry_path.display().to_string(),
        "settings": &loaded.settings,
    });

    emit(ctx.global.format, "config show", &ctx.run_id, &response, |_| {
        let mut out = match &loaded.path {
            Some(path) => format!("settings: {} ({})\n", path.display(), loaded.source),
            None => "settings: built-in defaults\n".to_string(),
        };
        out.push_str(&format!("registry: {}\n", registry_path.display()));
        let s = &loaded.settings;
        out.push_str(&format!(
            "tunnel: {} {}\n",
            s.tunnel_binary,
            s.tunnel_args.join(" ")
        ));
        out.push_str(&format!("tunnel signature: {}\n", s.tunnel_signature));
        out.push_str(&format!("launcher signature: {}\n", s.launcher_signature));
        out.push_str(&format!("token marker: {}\n", s.token_marker));
        out.push_str(&format!("public url pattern: {}\n", s.public_url_pattern));
        out.push_str(&format!("grace period: {}ms\n", s.grace_period_ms));
        out
    });
    ExitCode::Ok
}

fn print_version(ctx: &Context) {
    let version_info = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "config_schema_version": CONFIG_SCHEMA_VERSION,
        "tk_core_version": env!("CARGO_PKG_VERSION"),
        "rust_version": env!("CARGO_PKG_RUST_VERSION"),
    });

    match ctx.global.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&version_info) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!(error = %e, "failed to serialize version"),
        },
        OutputFormat::Human => {
            println!("tk-core {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}

/// Runs until the tunnel binary exits and returns its exit code.
fn run_supervise(ctx: &Context, args: &SuperviseArgs) -> i32 {
    let loaded = match ctx.settings() {
        Ok(loaded) => loaded,
        Err(e) => return ctx.fail(e).as_i32(),
    };
    let table = PsProcessTable::new();
    let launcher = BinaryLauncher::new(loaded.settings.clone());
    let mut registry = TunnelRegistry::for_current_host(ctx.registry_path(&loaded));
    let supervisor = Supervisor {
        table: &table,
        signaller: &OsSignaller,
        launcher: &launcher,
        settings: &loaded.settings,
    };

    match supervisor.run(&mut registry, &args.name, &args.local_address) {
        Ok(report) => report.exit_code.unwrap_or(ExitCode::Ok.as_i32()),
        Err(e) => ctx.fail(e).as_i32(),
    }
}
