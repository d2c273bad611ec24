//! dev-browser: development-loop diagnostic agent for web applications.
//!
//! Drives a daemon-owned browser over CDP, captures a time-correlated
//! picture of a page's runtime, and evaluates it against declarative rules
//! so an automated loop can deterministically decide whether the page is
//! healthy. Exit codes: 0 success, 1 error, 2 assert-fail, 3 timeout.

mod commands;
mod output;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use devbrowser_assert::parse_assert_rules;
use devbrowser_types::env::{env_truthy, getenv_default, getenv_int};
use devbrowser_types::{ArtifactMode, WindowSize};

use commands::diagnose_cmd::DiagnoseArgs;
use commands::loop_cmd::LoopArgs;
use commands::{exit_code_for, Globals};

/// dev-browser -- diagnose and gate web pages from your dev loop.
#[derive(Parser, Debug)]
#[command(name = "dev-browser", version, about)]
struct Cli {
    /// Browser profile (isolated daemon, user-data dir, artifacts)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Force headless
    #[arg(long, global = true)]
    headless: bool,

    /// Disable headless
    #[arg(long, global = true)]
    headed: bool,

    /// Output format (summary|json|path|html)
    #[arg(long, global = true, default_value = "summary")]
    output: String,

    /// Output path when --output=path
    #[arg(long, global = true, default_value = "")]
    out: String,

    /// Viewport WxH (e.g. 2500x1920)
    #[arg(long, global = true, default_value = "")]
    window_size: String,

    /// Viewport scale (1, 0.75, 0.5)
    #[arg(long, global = true, default_value_t = 1.0)]
    window_scale: f64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show whether the profile's daemon is running
    Status,

    /// Start the profile's daemon
    Start,

    /// Stop the profile's daemon
    Stop,

    /// List open pages
    ListPages,

    /// Close a named page
    ClosePage { name: String },

    /// Navigate a page to a URL
    Goto {
        url: String,
        #[arg(long, default_value = "main")]
        page: String,
        #[arg(long, default_value = "domcontentloaded")]
        wait_until: String,
        #[arg(long, default_value_t = 45_000)]
        timeout_ms: u64,
    },

    /// Invoke a page tool by name with JSON arguments
    Call {
        tool: String,
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long, default_value = "main")]
        page: String,
    },

    /// Capture a ref-keyed snapshot of the page's interactive tree
    Snapshot {
        #[arg(long, default_value = "main")]
        page: String,
        #[arg(long, default_value = "simple")]
        engine: String,
        #[arg(long, default_value = "list")]
        format: String,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        interactive_only: bool,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        include_headings: bool,
        #[arg(long, default_value_t = 80)]
        max_items: u64,
        #[arg(long, default_value_t = 8000)]
        max_chars: u64,
    },

    /// Take a screenshot
    Screenshot {
        #[arg(long, default_value = "main")]
        page: String,
        #[arg(long, default_value = "")]
        path: String,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        full_page: bool,
        #[arg(long)]
        annotate_refs: bool,
        /// Clip x,y,width,height
        #[arg(long, default_value = "")]
        crop: String,
    },

    /// Wait for a page readiness state
    Wait {
        #[arg(long, default_value = "main")]
        page: String,
        #[arg(long, default_value = "native")]
        strategy: String,
        #[arg(long, default_value = "load")]
        state: String,
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
        #[arg(long, default_value_t = 0)]
        min_wait_ms: u64,
    },

    /// One-call diagnostic report for agent loops (report-only)
    Diagnose {
        #[command(flatten)]
        diagnose: DiagnoseFlags,
    },

    /// Deterministic gating (exit 0 pass, 2 fail)
    Assert {
        #[command(flatten)]
        diagnose: DiagnoseFlags,
        /// Rules JSON string, or @path/to/rules.json
        #[arg(long)]
        rules: String,
    },

    /// Run diagnose+assert once (or watch) for agent/dev loops
    Loop {
        #[command(flatten)]
        diagnose: DiagnoseFlags,
        /// Rules JSON string, or @path/to/rules.json
        #[arg(long)]
        rules: String,
        /// Watch for changes and re-run
        #[arg(long)]
        watch: bool,
        /// Watch poll interval in ms
        #[arg(long, default_value_t = 750)]
        watch_interval_ms: u64,
        /// Comma-separated paths to watch (files or dirs)
        #[arg(long, default_value = ".")]
        watch_paths: String,
    },

    /// Run the daemon in the foreground (internal)
    #[command(hide = true)]
    Daemon {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        cdp_port: Option<u16>,
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct DiagnoseFlags {
    /// Optional URL to navigate to
    #[arg(long, default_value = "")]
    url: String,
    /// Page name
    #[arg(long, default_value = "main")]
    page: String,
    /// Wait state (load|domcontentloaded|networkidle|commit)
    #[arg(long, default_value = "networkidle")]
    wait: String,
    /// Timeout in ms
    #[arg(long, default_value_t = 45_000)]
    timeout_ms: u64,
    /// Minimum wait time in ms
    #[arg(long, default_value_t = 250)]
    min_wait_ms: u64,
    /// Snapshot engine (simple|aria)
    #[arg(long, default_value = "simple")]
    snapshot_engine: String,
    /// Include network bodies
    #[arg(long)]
    net_bodies: bool,
    /// Max network body bytes (when --net-bodies)
    #[arg(long, default_value_t = 32 * 1024)]
    net_max_body_bytes: usize,
    /// Perf metrics sample ms
    #[arg(long, default_value_t = 1200)]
    perf_sample_ms: u64,
    /// Perf metrics top-N resources
    #[arg(long, default_value_t = 20)]
    perf_top_n: usize,
    /// Artifacts: none|minimal|full
    #[arg(long, default_value = "minimal")]
    artifact_mode: String,
    /// Artifact directory (relative to artifact root unless absolute)
    #[arg(long, default_value = "")]
    artifact_dir: String,
}

impl DiagnoseFlags {
    fn into_args(&self) -> anyhow::Result<DiagnoseArgs> {
        let Some(artifact_mode) = ArtifactMode::parse(&self.artifact_mode) else {
            bail!("--artifact-mode must be none|minimal|full");
        };
        Ok(DiagnoseArgs {
            url: self.url.clone(),
            page: self.page.clone(),
            wait: self.wait.clone(),
            timeout_ms: self.timeout_ms,
            min_wait_ms: self.min_wait_ms,
            snapshot_engine: self.snapshot_engine.clone(),
            net_bodies: self.net_bodies,
            net_max_body_bytes: self.net_max_body_bytes,
            perf_sample_ms: self.perf_sample_ms,
            perf_top_n: self.perf_top_n,
            artifact_mode,
            artifact_dir: self.artifact_dir.clone(),
        })
    }
}

fn default_headless() -> bool {
    if std::env::var("HEADLESS").unwrap_or_default().trim().is_empty() {
        return true;
    }
    env_truthy("HEADLESS")
}

fn resolve_globals(cli: &Cli) -> anyhow::Result<Globals> {
    if cli.headless && cli.headed {
        bail!("use either --headless or --headed");
    }
    let headless = if cli.headed {
        false
    } else if cli.headless {
        true
    } else {
        default_headless()
    };

    if !matches!(cli.output.as_str(), "summary" | "json" | "path" | "html") {
        bail!("--output must be summary|json|path|html");
    }

    let window = WindowSize::resolve(&cli.window_size, cli.window_scale)
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(Globals {
        profile: cli
            .profile
            .clone()
            .unwrap_or_else(|| getenv_default("DEV_BROWSER_PROFILE", "default")),
        headless,
        output: cli.output.clone(),
        out_path: cli.out.clone(),
        window,
    })
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    // The daemon subcommand reuses the global --profile/--headless flags and
    // resolves the rest from the environment.
    if let Commands::Daemon {
        host,
        port,
        cdp_port,
        state_file,
    } = &cli.command
    {
        let headless = if cli.headed {
            false
        } else {
            cli.headless || env_truthy("HEADLESS")
        };
        let opts = devbrowser_daemon::DaemonOptions {
            profile: cli
                .profile
                .clone()
                .unwrap_or_else(|| getenv_default("DEV_BROWSER_PROFILE", "default")),
            host: host
                .clone()
                .unwrap_or_else(|| getenv_default("DEV_BROWSER_HOST", "127.0.0.1")),
            port: (*port).unwrap_or_else(|| getenv_int("DEV_BROWSER_PORT", 0)),
            cdp_port: (*cdp_port).unwrap_or_else(|| getenv_int("DEV_BROWSER_CDP_PORT", 0)),
            headless,
            state_file: state_file.clone().or_else(|| {
                let v = getenv_default("DEV_BROWSER_STATE_FILE", "");
                if v.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(v))
                }
            }),
            window: WindowSize::resolve(&cli.window_size, cli.window_scale)
                .map_err(|e| anyhow::anyhow!(e))?,
        };
        devbrowser_daemon::serve(opts).await?;
        return Ok(commands::EXIT_OK);
    }

    let globals = resolve_globals(&cli)?;

    match cli.command {
        Commands::Status => commands::lifecycle::status(&globals).await,
        Commands::Start => commands::lifecycle::start(&globals).await,
        Commands::Stop => commands::lifecycle::stop(&globals).await,
        Commands::ListPages => commands::lifecycle::list_pages(&globals).await,
        Commands::ClosePage { name } => commands::lifecycle::close_page(&globals, &name).await,

        Commands::Goto {
            url,
            page,
            wait_until,
            timeout_ms,
        } => {
            let args = serde_json::json!({
                "url": url,
                "wait_until": wait_until,
                "timeout_ms": timeout_ms,
            });
            commands::page::run_with_page(&globals, &page, "goto", &args).await
        }

        Commands::Call { tool, args, page } => {
            let args: serde_json::Value = serde_json::from_str(&args)
                .map_err(|_| anyhow::anyhow!("invalid JSON for --args"))?;
            if !args.is_object() {
                bail!("--args must be a JSON object");
            }
            commands::page::run_with_page(&globals, &page, &tool, &args).await
        }

        Commands::Snapshot {
            page,
            engine,
            format,
            interactive_only,
            include_headings,
            max_items,
            max_chars,
        } => {
            let args = serde_json::json!({
                "engine": engine,
                "format": format,
                "interactive_only": interactive_only,
                "include_headings": include_headings,
                "max_items": max_items,
                "max_chars": max_chars,
            });
            commands::page::run_with_page(&globals, &page, "snapshot", &args).await
        }

        Commands::Screenshot {
            page,
            path,
            full_page,
            annotate_refs,
            crop,
        } => {
            let mut args = serde_json::json!({
                "path": path,
                "full_page": full_page,
                "annotate_refs": annotate_refs,
            });
            if !crop.trim().is_empty() {
                args["clip"] = serde_json::Value::String(crop);
            }
            commands::page::run_with_page(&globals, &page, "screenshot", &args).await
        }

        Commands::Wait {
            page,
            strategy,
            state,
            timeout_ms,
            min_wait_ms,
        } => {
            let args = serde_json::json!({
                "strategy": strategy,
                "state": state,
                "timeout_ms": timeout_ms,
                "min_wait_ms": min_wait_ms,
            });
            commands::page::run_with_page(&globals, &page, "wait", &args).await
        }

        Commands::Diagnose { diagnose } => {
            let args = diagnose.into_args()?;
            commands::diagnose_cmd::diagnose_cmd(&globals, &args).await
        }

        Commands::Assert { diagnose, rules } => {
            let rules = parse_assert_rules(&rules)?;
            let args = diagnose.into_args()?;
            commands::assert_cmd::assert_cmd(&globals, &args, &rules).await
        }

        Commands::Loop {
            diagnose,
            rules,
            watch,
            watch_interval_ms,
            watch_paths,
        } => {
            let rules = parse_assert_rules(&rules)?;
            let args = diagnose.into_args()?;
            let loop_args = LoopArgs {
                watch,
                watch_interval_ms,
                watch_paths: watch_paths.split(',').map(str::to_string).collect(),
            };
            commands::loop_cmd::loop_cmd(&globals, &args, &rules, &loop_args).await
        }

        Commands::Daemon { .. } => unreachable!("handled above"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Exit code 2 is reserved for assert failures, so flag parse errors map
    // to 1 (help/version still exit 0).
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("{e:#}");
            ExitCode::from(code)
        }
    }
}
