#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{ArgAction, CommandFactory as _, Parser, Subcommand};

use crate::config::{self, Config};
use crate::error::ToolhubError;
use crate::output::table::Table;
use crate::scan::api::ApiClient;
use crate::scan::model::{ScanRequest, Task};
use crate::scan::poller::{PollEvent, PollPolicy, Poller};
use crate::scan::{self, render, validate};
use crate::tools::json_fmt::{self, FormatOptions};
use crate::tools::password::{self, CharPools, PasswordOptions};
use crate::tools::theme::Theme;
use crate::tools::yaml_lint::{self, LintReport, LintStatus};
use crate::tui;
use crate::tui::dashboard::DashboardOptions;

#[derive(Debug, Parser)]
#[command(
    name = "toolhub",
    version,
    about = "Terminal client for the toolhub scan server, plus small developer tools"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Submit and track code-quality scans
    Scan(ScanArgs),
    /// Check that the server answers
    Ping,
    /// Pretty-print or minify JSON
    Json(JsonArgs),
    /// Lint YAML, or rewrite it with --fix
    Yaml(YamlArgs),
    /// Generate random passwords
    Password(PasswordArgs),
    /// Show or change the colour theme
    Theme(ThemeArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Parser)]
pub struct ScanArgs {
    #[command(subcommand)]
    pub cmd: ScanCmd,
}

#[derive(Debug, Subcommand)]
pub enum ScanCmd {
    Submit(SubmitArgs),
    #[command(alias = "ls")]
    List(ScanListArgs),
    Show(ScanShowArgs),
    Watch(ScanWatchArgs),
    Dashboard,
    Log(ScanLogArgs),
    Screenshot(ScanScreenshotArgs),
    #[command(alias = "rm")]
    Remove(ScanTaskArg),
    Clear,
}

#[derive(Debug, Parser)]
pub struct SubmitArgs {
    /// GitHub repository URL
    #[arg(long = "repo")]
    pub repo: String,
    /// Branch to scan
    #[arg(short = 'b', long = "branch", default_value = "main")]
    pub branch: String,
    /// Project key (defaults to the repository name)
    #[arg(short = 'k', long = "project-key")]
    pub project_key: Option<String>,
    /// Comma separated exclusion globs
    #[arg(long = "exclusions", default_value = "")]
    pub exclusions: String,
    /// Comma separated inclusion globs
    #[arg(long = "inclusions", default_value = "")]
    pub inclusions: String,
    /// Keep polling until the scan finishes
    #[arg(short = 'w', long = "watch")]
    pub watch: bool,
}

#[derive(Debug, Parser)]
pub struct ScanListArgs {
    /// Output in JSON format
    #[arg(long = "json")]
    pub json: bool,
    /// Output as CSV
    #[arg(long = "csv")]
    pub csv: bool,
    /// Only show scans with this status (queued, running, completed, failed, ...)
    #[arg(short = 's', long = "status")]
    pub status: Option<String>,
}

#[derive(Debug, Parser)]
pub struct ScanShowArgs {
    /// Task id, id prefix or repository fragment
    pub task: String,
    /// Output in JSON format
    #[arg(long = "json")]
    pub json: bool,
    /// Skip asking the server for fresh status
    #[arg(long = "cached")]
    pub cached: bool,
}

#[derive(Debug, Parser)]
pub struct ScanWatchArgs {
    /// Tasks to watch (default: every unfinished scan)
    pub tasks: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct ScanLogArgs {
    pub task: String,
    /// Print to stdout instead of opening the viewer
    #[arg(long = "raw")]
    pub raw: bool,
}

#[derive(Debug, Parser)]
pub struct ScanScreenshotArgs {
    pub task: String,
    /// Output file (default: the server's file name in the current directory)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct ScanTaskArg {
    pub task: String,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Input file (default: stdin)
    pub file: Option<PathBuf>,
    /// Spaces per level (default from config)
    #[arg(short = 'i', long = "indent")]
    pub indent: Option<usize>,
    /// Compact output
    #[arg(short = 'm', long = "minify", conflicts_with = "indent")]
    pub minify: bool,
    /// Sort object keys
    #[arg(short = 's', long = "sort-keys")]
    pub sort_keys: bool,
}

#[derive(Debug, Parser)]
pub struct YamlArgs {
    /// Input file (default: stdin)
    pub file: Option<PathBuf>,
    /// Print the fixed document instead of lint results
    #[arg(long = "fix")]
    pub fix: bool,
    /// Print the lint report as JSON
    #[arg(long = "json", conflicts_with = "fix")]
    pub json: bool,
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Parser)]
pub struct PasswordArgs {
    /// Password length (default from config)
    #[arg(short = 'l', long = "length")]
    pub length: Option<usize>,
    /// Leave out lowercase letters
    #[arg(long = "no-lower")]
    pub no_lower: bool,
    /// Include uppercase letters
    #[arg(long = "upper")]
    pub upper: bool,
    /// Include digits
    #[arg(long = "digits")]
    pub digits: bool,
    /// Include symbols
    #[arg(long = "symbols")]
    pub symbols: bool,
    /// Number of passwords to print
    #[arg(short = 'n', long = "count", default_value_t = 1)]
    pub count: usize,
}

#[derive(Debug, Parser)]
pub struct ThemeArgs {
    #[command(subcommand)]
    pub cmd: Option<ThemeCmd>,
}

#[derive(Debug, Subcommand)]
pub enum ThemeCmd {
    Get,
    Set { theme: Theme },
    Toggle,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    List,
    Set(ConfigSetArgs),
    Get(ConfigGetArgs),
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let interactive = match &cli.cmd {
        None => tui::is_tty(),
        Some(Commands::Scan(args)) => matches!(args.cmd, ScanCmd::Dashboard),
        Some(_) => false,
    };
    if interactive {
        let log_file = default_log_file()?;
        crate::logging::init_file(cli.verbose, &log_file)?;
    } else {
        crate::logging::init(cli.verbose);
    }

    match cli.cmd {
        None if interactive => cmd_dashboard().await,
        None => {
            cmd_scan_list(ScanListArgs {
                json: false,
                csv: false,
                status: None,
            })
            .await
        }
        Some(Commands::Scan(args)) => cmd_scan(args).await,
        Some(Commands::Ping) => cmd_ping().await,
        Some(Commands::Json(args)) => cmd_json(args).await,
        Some(Commands::Yaml(args)) => cmd_yaml(args).await,
        Some(Commands::Password(args)) => cmd_password(args).await,
        Some(Commands::Theme(args)) => cmd_theme(args).await,
        Some(Commands::Completion(args)) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "toolhub", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Config(args)) => match args.cmd {
            ConfigCmd::List => {
                print!("{}", config::list_resolved_toml()?);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Set(set) => {
                config::set_value_string(&set.key, &set.value)?;
                println!("Set {} = {}", set.key, set.value);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Get(get) => match config::get_value_string(&get.key)? {
                Some(v) => {
                    println!("{v}");
                    Ok(ExitCode::SUCCESS)
                }
                None => anyhow::bail!(
                    "configuration key '{}' not found - use 'toolhub config list' to see available keys",
                    get.key
                ),
            },
        },
        Some(Commands::Version) => Ok(cmd_version()),
    }
}

async fn load_cfg() -> anyhow::Result<Config> {
    let cfg = tokio::task::spawn_blocking(|| -> anyhow::Result<Config> {
        let (cfg, _paths) = config::load()?;
        Ok(cfg)
    })
    .await??;
    Ok(cfg)
}

fn default_log_file() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "toolhub", "toolhub")
        .context("failed to determine platform data directory")?;
    Ok(dirs.data_dir().join("toolhub.log"))
}

async fn cmd_scan(args: ScanArgs) -> anyhow::Result<ExitCode> {
    match args.cmd {
        ScanCmd::Submit(a) => cmd_scan_submit(a).await,
        ScanCmd::List(a) => cmd_scan_list(a).await,
        ScanCmd::Show(a) => cmd_scan_show(a).await,
        ScanCmd::Watch(a) => cmd_scan_watch(a).await,
        ScanCmd::Dashboard => cmd_dashboard().await,
        ScanCmd::Log(a) => cmd_scan_log(a).await,
        ScanCmd::Screenshot(a) => cmd_scan_screenshot(a).await,
        ScanCmd::Remove(a) => cmd_scan_remove(a).await,
        ScanCmd::Clear => cmd_scan_clear().await,
    }
}

async fn cmd_dashboard() -> anyhow::Result<ExitCode> {
    if !tui::is_tty() {
        anyhow::bail!("the dashboard requires a TTY; try 'toolhub scan list' or 'toolhub scan watch'");
    }
    let cfg = load_cfg().await?;
    let download_dir = std::env::current_dir().context("failed to get current directory")?;
    tui::dashboard::run(DashboardOptions { cfg, download_dir }).await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_scan_submit(args: SubmitArgs) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let project_key = args
        .project_key
        .or_else(|| validate::default_project_key(&args.repo))
        .unwrap_or_default();
    let req = validate::normalize(ScanRequest {
        repo_url: args.repo,
        branch_name: args.branch,
        project_key,
        sonar_exclusions: args.exclusions,
        sonar_inclusions: args.inclusions,
    })?;

    let api = Arc::new(ApiClient::from_config(&cfg)?);
    let resp = api.submit(&req).await?;
    let task = Task::queued(&resp, &req);
    println!(
        "{} ({})",
        resp.message.as_deref().unwrap_or("Scan queued"),
        task.id
    );

    if args.watch {
        return watch(&cfg, api, vec![task.id.clone()], Some(task)).await;
    }

    let store = scan::open_store(&cfg)?;
    let mut envelope = store.load();
    envelope.upsert(task);
    store.save(&envelope.tasks);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_scan_list(args: ScanListArgs) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let store = scan::open_store(&cfg)?;
    let mut tasks = store.load().tasks;

    if let Some(filter) = args.status.as_deref() {
        let filter = filter.trim().to_lowercase();
        tasks.retain(|t| t.status.kind() == filter);
    }

    if args.json {
        let mut out = serde_json::to_string_pretty(&tasks)?;
        out.push('\n');
        print!("{out}");
        return Ok(ExitCode::SUCCESS);
    }

    if tasks.is_empty() && !args.csv {
        println!("No scans found");
        return Ok(ExitCode::SUCCESS);
    }

    let now = time::OffsetDateTime::now_utc();
    let mut table = Table::new(["ID", "STATUS", "REPOSITORY", "BRANCH", "PROJECT", "AGE"])
        .with_max_width(48);
    for t in &tasks {
        let status = if cfg.ui.icons {
            format!("{} {}", render::status_icon(&t.status), t.status)
        } else {
            t.status.to_string()
        };
        let age = parse_rfc3339(&t.created_at)
            .map_or_else(|| "-".to_owned(), |at| format_duration(now - at));
        table.row([
            if args.csv { t.id.clone() } else { t.short_id() },
            if args.csv { t.status.to_string() } else { status },
            t.repo_url.clone(),
            t.branch_name.clone(),
            t.project_key.clone(),
            age,
        ]);
    }

    if args.csv {
        table.write_csv()?;
    } else {
        table.print()?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_scan_show(args: ScanShowArgs) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let store = scan::open_store(&cfg)?;
    let mut envelope = store.load();
    let mut task = find_task(&envelope.tasks, &args.task)?.clone();

    if !args.cached && !task.status.is_terminal() {
        let api = ApiClient::from_config(&cfg)?;
        match api.get_status(&task.id, false).await {
            Ok(update) => {
                if let Some(updated) = envelope.merge(&task.id, update) {
                    task = updated.clone();
                }
                store.save(&envelope.tasks);
            }
            Err(e) if e.is_not_found() => {
                if let Some(updated) =
                    envelope.merge(&task.id, crate::scan::model::StatusUpdate::not_found())
                {
                    task = updated.clone();
                }
                store.save(&envelope.tasks);
            }
            Err(e) => tracing::warn!(error = %e, "showing cached status"),
        }
    }

    if args.json {
        let mut out = serde_json::to_string_pretty(&task)?;
        out.push('\n');
        print!("{out}");
        return Ok(ExitCode::SUCCESS);
    }

    print_task_details(&cfg, &task);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_scan_watch(args: ScanWatchArgs) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let store = scan::open_store(&cfg)?;
    let envelope = store.load();

    let ids = if args.tasks.is_empty() {
        envelope.active_ids()
    } else {
        args.tasks
            .iter()
            .map(|p| find_task(&envelope.tasks, p).map(|t| t.id.clone()))
            .collect::<Result<Vec<_>, _>>()?
    };
    if ids.is_empty() {
        println!("No unfinished scans to watch");
        return Ok(ExitCode::SUCCESS);
    }

    let api = Arc::new(ApiClient::from_config(&cfg)?);
    watch(&cfg, api, ids, None).await
}

/// Polls until every watched task is terminal, printing status transitions.
async fn watch(
    cfg: &Config,
    api: Arc<ApiClient>,
    ids: Vec<String>,
    submitted: Option<Task>,
) -> anyhow::Result<ExitCode> {
    let store = scan::open_store(cfg)?;
    let envelope = store.load();

    let mut last: BTreeMap<String, Task> = BTreeMap::new();
    for id in &ids {
        if let Some(t) = submitted.as_ref().filter(|t| &t.id == id) {
            last.insert(id.clone(), t.clone());
        } else if let Some(t) = envelope.get(id) {
            last.insert(id.clone(), t.clone());
        }
    }
    for t in last.values() {
        print_transition(cfg, t);
    }
    let mut pending: BTreeSet<String> = last
        .values()
        .filter(|t| !t.status.is_terminal())
        .map(|t| t.id.clone())
        .collect();
    if pending.is_empty() {
        return Ok(exit_code_for(last.values()));
    }

    let (handle, mut events, join) = Poller::spawn(
        api,
        store,
        PollPolicy::from_config(&cfg.poll),
        Duration::from_millis(cfg.store.debounce_ms),
    );
    if let Some(task) = submitted {
        handle.track(task);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelled = false;

    while !pending.is_empty() {
        tokio::select! {
            ev = events.recv() => match ev {
                Some(PollEvent::Updated(task)) if pending.contains(&task.id) => {
                    let changed = last.get(&task.id).is_none_or(|prev| prev.status != task.status);
                    if changed {
                        print_transition(cfg, &task);
                    }
                    if task.status.is_terminal() {
                        pending.remove(&task.id);
                    }
                    last.insert(task.id.clone(), task);
                }
                Some(PollEvent::Backoff { id, interval }) if pending.contains(&id) => {
                    tracing::warn!(task = %id, retry_in = ?interval, "status request failed; backing off");
                }
                Some(_) => {}
                None => break,
            },
            _ = &mut ctrl_c => {
                cancelled = true;
                break;
            }
        }
    }

    handle.shutdown();
    if let Err(e) = join.await {
        tracing::warn!(error = %e, "poller task ended abnormally");
    }

    if cancelled {
        return Err(ToolhubError::Cancelled.into());
    }
    Ok(exit_code_for(last.values()))
}

fn exit_code_for<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> ExitCode {
    let ok = tasks.into_iter().all(|t| {
        matches!(
            render::badge(&t.status),
            render::Badge::Success | render::Badge::Info | render::Badge::Progress
        )
    });
    if ok { ExitCode::SUCCESS } else { ExitCode::from(2) }
}

fn print_transition(cfg: &Config, task: &Task) {
    let ts = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    let icon = if cfg.ui.icons {
        render::status_icon(&task.status)
    } else {
        "-"
    };
    println!(
        "{ts} {} {icon} {} ({}@{})",
        task.short_id(),
        task.status,
        task.project_key,
        task.branch_name
    );
    if task.status.is_terminal()
        && let Some(url) = task.report_url.as_deref()
    {
        println!("    report: {url}");
    }
}

async fn cmd_scan_log(args: ScanLogArgs) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let store = scan::open_store(&cfg)?;
    let task = find_task(&store.load().tasks, &args.task)?.clone();

    let api = ApiClient::from_config(&cfg)?;
    let update = api.get_status(&task.id, true).await?;
    let Some(log) = update.log.flatten() else {
        anyhow::bail!("no log available for scan {}", task.short_id());
    };

    if args.raw || !tui::is_tty() {
        print!("{log}");
        if !log.ends_with('\n') {
            println!();
        }
        return Ok(ExitCode::SUCCESS);
    }

    let title = format!("Log {} • {}", task.short_id(), task.project_key);
    let theme = cfg.ui.theme;
    match tokio::task::spawn_blocking(move || tui::log_viewer::run(&title, &log, theme)).await? {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(ToolhubError::Cancelled) => Ok(ExitCode::from(130)),
        Err(e) => Err(e.into()),
    }
}

async fn cmd_scan_screenshot(args: ScanScreenshotArgs) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let store = scan::open_store(&cfg)?;
    let task = find_task(&store.load().tasks, &args.task)?.clone();
    let Some(shot) = task.screenshot.as_ref().filter(|s| !s.filename.is_empty()) else {
        anyhow::bail!("scan {} has no screenshot", task.short_id());
    };

    let api = ApiClient::from_config(&cfg)?;
    let bytes = api.download_screenshot(&shot.filename).await?;
    let target = args
        .output
        .unwrap_or_else(|| PathBuf::from(&shot.filename));
    tokio::fs::write(&target, &bytes)
        .await
        .map_err(|source| ToolhubError::IoPath {
            path: target.clone(),
            source,
        })?;
    println!("Saved {} ({})", target.display(), render::format_size(bytes.len() as u64));
    Ok(ExitCode::SUCCESS)
}

async fn cmd_scan_remove(args: ScanTaskArg) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let store = scan::open_store(&cfg)?;
    let mut envelope = store.load();
    let id = find_task(&envelope.tasks, &args.task)?.id.clone();
    envelope.remove(&id);
    store.save(&envelope.tasks);
    println!("Removed scan {id}");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_scan_clear() -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let store = scan::open_store(&cfg)?;
    let count = store.load().tasks.len();
    store.save(&[]);
    println!("Removed {count} scan(s)");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_ping() -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let api = ApiClient::from_config(&cfg)?;
    let started = std::time::Instant::now();
    api.ping_server().await?;
    println!(
        "{} is up ({} ms)",
        api.base_url(),
        started.elapsed().as_millis()
    );
    Ok(ExitCode::SUCCESS)
}

async fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        None => tokio::task::spawn_blocking(|| std::io::read_to_string(std::io::stdin()))
            .await?
            .context("failed to read stdin"),
    }
}

async fn cmd_json(args: JsonArgs) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let input = read_input(args.file.as_deref()).await?;

    let opts = FormatOptions {
        indent: if args.minify {
            0
        } else {
            args.indent.unwrap_or(cfg.json.indent)
        },
        sort_keys: args.sort_keys,
    };
    let out = json_fmt::format(&input, opts)?;
    println!("{out}");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_yaml(args: YamlArgs) -> anyhow::Result<ExitCode> {
    let input = read_input(args.file.as_deref()).await?;

    if args.fix {
        print!("{}", yaml_lint::auto_fix(&input));
        return Ok(ExitCode::SUCCESS);
    }

    let report = yaml_lint::lint(&input);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_lint_report(&report);
    }
    Ok(match report.status {
        LintStatus::InvalidSyntax => ExitCode::from(1),
        LintStatus::Perfect | LintStatus::ValidWithIssues => ExitCode::SUCCESS,
    })
}

fn print_lint_report(report: &LintReport) {
    match report.status {
        LintStatus::Perfect => println!("YAML is valid and clean."),
        LintStatus::ValidWithIssues => {
            println!("YAML is valid with {} issue(s):", report.problems.len());
            for p in &report.problems {
                let level = match p.level {
                    yaml_lint::Level::Warning => "warning",
                    yaml_lint::Level::Error => "error",
                };
                println!(
                    "  {}:{}  {level:<7}  {}  ({})",
                    p.line, p.column, p.message, p.rule
                );
            }
        }
        LintStatus::InvalidSyntax => {
            let Some(err) = &report.error else { return };
            match (err.line, err.column) {
                (Some(line), Some(col)) => println!("Invalid YAML at {line}:{col}: {}", err.message),
                _ => println!("Invalid YAML: {}", err.message),
            }
        }
    }
}

async fn cmd_password(args: PasswordArgs) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let opts = password_options(&args, &cfg.password);
    for _ in 0..args.count.max(1) {
        println!("{}", password::generate_password(&opts)?);
    }
    Ok(ExitCode::SUCCESS)
}

/// Explicit pool flags replace the configured pools entirely.
fn password_options(args: &PasswordArgs, cfg: &config::PasswordConfig) -> PasswordOptions {
    let explicit = args.no_lower || args.upper || args.digits || args.symbols;
    let pools = if explicit {
        CharPools {
            lowercase: !args.no_lower,
            uppercase: args.upper,
            digits: args.digits,
            symbols: args.symbols,
        }
    } else {
        CharPools {
            lowercase: true,
            uppercase: cfg.uppercase,
            digits: cfg.digits,
            symbols: cfg.symbols,
        }
    };
    PasswordOptions {
        length: args.length.unwrap_or(cfg.length),
        pools,
        require_each: true,
    }
}

async fn cmd_theme(args: ThemeArgs) -> anyhow::Result<ExitCode> {
    match args.cmd.unwrap_or(ThemeCmd::Get) {
        ThemeCmd::Get => {
            let cfg = load_cfg().await?;
            println!("{}", cfg.ui.theme);
        }
        ThemeCmd::Set { theme } => {
            tokio::task::spawn_blocking(move || {
                config::set_value_string("ui.theme", theme.as_str())
            })
            .await??;
            println!("{theme}");
        }
        ThemeCmd::Toggle => {
            let next =
                tokio::task::spawn_blocking(crate::tools::theme::toggle_persisted).await??;
            println!("{next}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Exact id, then id prefix, then project key, then repository fragment.
/// The first stage with any match must be unambiguous.
fn find_task<'a>(tasks: &'a [Task], pattern: &str) -> Result<&'a Task, ToolhubError> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err(ToolhubError::TaskNotFound(String::new()));
    }
    if let Some(t) = tasks.iter().find(|t| t.id == pattern) {
        return Ok(t);
    }

    let p = pattern.to_lowercase();
    let stages: [&dyn Fn(&Task) -> bool; 3] = [
        &|t| t.id.starts_with(pattern),
        &|t| t.project_key.to_lowercase() == p,
        &|t| t.repo_url.to_lowercase().contains(&p),
    ];
    let matches: Vec<&Task> = stages
        .iter()
        .map(|keep| tasks.iter().filter(|t| keep(t)).collect::<Vec<_>>())
        .find(|m| !m.is_empty())
        .unwrap_or_default();

    match matches.as_slice() {
        [] => Err(ToolhubError::TaskNotFound(pattern.to_owned())),
        [one] => Ok(one),
        many => Err(ToolhubError::AmbiguousTask(format!(
            "'{pattern}' ({} matches)",
            many.len()
        ))),
    }
}

fn print_task_details(cfg: &Config, task: &Task) {
    let icon = if cfg.ui.icons {
        format!("{} ", render::status_icon(&task.status))
    } else {
        String::new()
    };
    println!("Scan: {}", task.id);
    println!("Status: {icon}{}", task.status);
    println!("Repository: {}", task.repo_url);
    println!("Branch: {}", task.branch_name);
    println!("Project key: {}", task.project_key);
    if !task.created_at.is_empty() {
        println!("Submitted: {}", task.created_at);
    }

    for action in render::actions(task, &cfg.server.base_url) {
        match action {
            render::TaskAction::OpenReport(url) => println!("Report: {url}"),
            render::TaskAction::ViewScreenshot(url) => println!("Screenshot: {url}"),
            render::TaskAction::DownloadScreenshot(name) => {
                println!("  download: toolhub scan screenshot {} -o {name}", task.short_id());
            }
            render::TaskAction::ViewLog => println!(
                "Log: {} (toolhub scan log {})",
                render::format_size(task.log_size),
                task.short_id()
            ),
        }
    }
}

fn parse_rfc3339(s: &str) -> Option<time::OffsetDateTime> {
    time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok()
}

fn format_duration(d: time::Duration) -> String {
    if d < time::Duration::minutes(1) {
        return format!("{}s", d.whole_seconds().max(0));
    }
    if d < time::Duration::hours(1) {
        return format!("{}m", d.whole_minutes());
    }
    if d < time::Duration::days(1) {
        let hours = d.whole_hours();
        let minutes = (d - time::Duration::hours(hours)).whole_minutes();
        return format!("{hours}h {minutes}m");
    }
    format!("{}d", d.whole_days())
}

fn cmd_version() -> ExitCode {
    println!("toolhub version {}", env!("CARGO_PKG_VERSION"));
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::model::TaskStatus;

    fn task(id: &str, repo: &str, key: &str) -> Task {
        Task {
            id: id.to_owned(),
            repo_url: repo.to_owned(),
            branch_name: "main".to_owned(),
            project_key: key.to_owned(),
            status: TaskStatus::Running,
            report_url: None,
            screenshot: None,
            has_log: false,
            log_size: 0,
            log: None,
            created_at: String::new(),
        }
    }

    fn sample() -> Vec<Task> {
        vec![
            task("a1b2c3d4-0000", "https://github.com/acme/widgets", "widgets"),
            task("a1b2ffff-0000", "https://github.com/acme/gadgets", "gadgets"),
            task("99990000-0000", "https://github.com/other/widgets-ui", "widgets-ui"),
        ]
    }

    #[test]
    fn find_task_by_exact_id_and_unique_prefix() {
        let tasks = sample();
        assert_eq!(find_task(&tasks, "a1b2ffff-0000").unwrap().project_key, "gadgets");
        assert_eq!(find_task(&tasks, "a1b2c").unwrap().project_key, "widgets");
        assert_eq!(find_task(&tasks, "9999").unwrap().project_key, "widgets-ui");
    }

    #[test]
    fn find_task_reports_ambiguity_and_misses() {
        let tasks = sample();
        assert!(matches!(
            find_task(&tasks, "a1b2"),
            Err(ToolhubError::AmbiguousTask(_))
        ));
        assert!(matches!(
            find_task(&tasks, "nope"),
            Err(ToolhubError::TaskNotFound(_))
        ));
    }

    #[test]
    fn find_task_falls_back_to_project_and_repo() {
        let tasks = sample();
        assert_eq!(find_task(&tasks, "widgets").unwrap().id, "a1b2c3d4-0000");
        assert_eq!(find_task(&tasks, "GADGETS").unwrap().id, "a1b2ffff-0000");
        assert!(matches!(
            find_task(&tasks, "acme"),
            Err(ToolhubError::AmbiguousTask(_))
        ));
    }

    #[test]
    fn password_flags_override_config_pools() {
        let cfg = config::PasswordConfig::default();
        let args = PasswordArgs {
            length: Some(10),
            no_lower: false,
            upper: false,
            digits: true,
            symbols: false,
            count: 1,
        };
        let opts = password_options(&args, &cfg);
        assert_eq!(opts.length, 10);
        assert_eq!(
            opts.pools,
            CharPools {
                lowercase: true,
                uppercase: false,
                digits: true,
                symbols: false,
            }
        );

        let defaults = PasswordArgs {
            length: None,
            no_lower: false,
            upper: false,
            digits: false,
            symbols: false,
            count: 1,
        };
        let opts = password_options(&defaults, &cfg);
        assert_eq!(opts.length, cfg.length);
        assert!(opts.pools.uppercase);
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(time::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(time::Duration::minutes(5)), "5m");
        assert_eq!(format_duration(time::Duration::minutes(125)), "2h 5m");
        assert_eq!(format_duration(time::Duration::days(3)), "3d");
    }

    #[test]
    fn cli_parses_scan_submit() {
        let cli = Cli::try_parse_from([
            "toolhub",
            "-vv",
            "scan",
            "submit",
            "--repo",
            "https://github.com/acme/widgets",
            "--watch",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.cmd {
            Some(Commands::Scan(ScanArgs {
                cmd: ScanCmd::Submit(a),
            })) => {
                assert_eq!(a.branch, "main");
                assert!(a.watch);
                assert!(a.project_key.is_none());
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_yaml_fix_and_rejects_fix_with_json() {
        let cli = Cli::try_parse_from(["toolhub", "yaml", "ci.yml", "--fix"]).unwrap();
        match cli.cmd {
            Some(Commands::Yaml(a)) => {
                assert!(a.fix);
                assert_eq!(a.file.as_deref(), Some(Path::new("ci.yml")));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
        assert!(Cli::try_parse_from(["toolhub", "yaml", "--fix", "--json"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
