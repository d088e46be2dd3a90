//! pmteam-bot — supervisor entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Open the task store, build flags and permissions
//!   6. Start supervisor bus and register handlers
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Register the stand-up and triage schedules
//!   9. Start the task watcher and the comms channels
//!  10. Cancel token + join everything

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pmteam_bot::config::{self, Config};
use pmteam_bot::error::AppError;
use pmteam_bot::logger;
use pmteam_bot::services::{FeatureFlags, GitRepo, Permissions, TestRunner};
use pmteam_bot::subsystems::agents::{AgentsState, AgentsSubsystem};
use pmteam_bot::subsystems::comms::{self, NotifySubsystem};
use pmteam_bot::subsystems::cron::{self, CronSubsystem};
use pmteam_bot::subsystems::llm::LlmSubsystem;
use pmteam_bot::subsystems::management::{ManagementInfo, ManagementSubsystem};
use pmteam_bot::subsystems::runtime::{Component, spawn_components};
use pmteam_bot::subsystems::tools::ToolsSubsystem;
use pmteam_bot::subsystems::watcher::TaskWatcher;
use pmteam_bot::supervisor;
use pmteam_bot::supervisor::bus::{BusPayload, SupervisorBus};
use pmteam_bot::supervisor::control::SupervisorControl;
use pmteam_bot::supervisor::dispatch::BusHandler;
use pmteam_bot::supervisor::health::HealthRegistry;
use pmteam_bot::tasks::TaskStore;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config_path = args.config_path.clone().unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
    let mut config = config::load(&config_path)?;

    // The console channel only makes sense with a terminal attached.
    config.comms.pty.enabled = args.interactive;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    let force_cli_level = args.log_level.is_some();
    logger::init(effective_log_level, force_cli_level, config.log_file.as_deref())?;

    info!(
        bot_name = %config.bot_name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        interactive = %args.interactive,
        "config loaded"
    );

    let store = Arc::new(TaskStore::open(&config.tasks.root, config.tasks.auto_create_dirs)?);
    let flags = Arc::new(FeatureFlags::new(&config.features));
    let permissions = Arc::new(Permissions::new(&config.permissions));
    let health = HealthRegistry::new();
    health
        .reporter("tasks")
        .set_healthy_with(format!("root {}", store.root().display()), None)
        .await;

    info!(task_root = %store.root().display(), "task store ready — starting subsystems");

    // Shared shutdown token — Ctrl-C cancels it, all tasks watch it.
    let shutdown = CancellationToken::new();

    let bus = SupervisorBus::new(64);
    let control = SupervisorControl::new(32);
    let bus_handle = bus.handle.clone();
    let control_handle = control.handle.clone();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let outbound = comms::outbound_channel();
    let mut handlers: Vec<Box<dyn BusHandler>> = Vec::new();

    handlers.push(Box::new(ManagementSubsystem::new(
        control_handle,
        bus_handle.clone(),
        health.clone(),
        store.clone(),
        flags.clone(),
        ManagementInfo {
            bot_name: config.bot_name.clone(),
            llm_provider: config.llm.provider.clone(),
            llm_model: config.llm.openai.model.clone(),
            task_root: store.root().display().to_string(),
        },
    )));

    let llm = LlmSubsystem::new(&config.llm, config.llm_api_key.clone())
        .map_err(|e| AppError::Config(e.to_string()))?
        .with_health_reporter(health.reporter("llm"));
    llm.spawn_health_checker(shutdown.clone());
    let llm_model = llm.model_name().to_string();
    handlers.push(Box::new(llm));

    handlers.push(Box::new(AgentsSubsystem::new(
        &config.agents,
        AgentsState::new(
            bus_handle.clone(),
            store.clone(),
            permissions.clone(),
            flags.clone(),
            health.clone(),
            config.agents.prompts_dir.clone(),
            config.bot_name.clone(),
        ),
    )));

    handlers.push(Box::new(ToolsSubsystem::new(
        GitRepo::new(&config.git.repo_dir, config.git.remote.clone(), config.git.base_branch.clone()),
        TestRunner::new(
            config.testing.command.clone(),
            &config.work_dir,
            config.testing.timeout_secs,
            config.testing.summary_lines,
        ),
        permissions,
        flags,
    )));

    handlers.push(Box::new(NotifySubsystem::new(outbound.clone())));
    handlers.push(Box::new(CronSubsystem::new(bus_handle.clone(), shutdown.clone())));

    // Spawn supervisor run-loop (owns the bus receiver).
    let sup_token = shutdown.clone();
    let sup_handle = tokio::spawn(async move {
        supervisor::run(bus, control, sup_token, handlers).await;
    });

    for (method, every_secs) in [
        ("agents/pm/standup", config.scheduler.standup_every_secs),
        ("agents/pm/triage", config.scheduler.triage_every_secs),
    ] {
        if every_secs == 0 {
            info!(%method, "schedule disabled");
            continue;
        }
        match cron::schedule_interval(&bus_handle, method, &BusPayload::Empty, every_secs).await {
            Ok(schedule_id) => info!(%method, every_secs, %schedule_id, "schedule registered"),
            Err(e) => warn!(%method, error = %e, "schedule registration failed"),
        }
    }

    let mut background: Vec<Box<dyn Component>> = Vec::new();
    if config.watcher.enabled {
        background.push(Box::new(
            TaskWatcher::new(store.root(), config.watcher.debounce_ms, bus_handle.clone())
                .with_health_reporter(health.reporter("watcher")),
        ));
    }
    let background = spawn_components(background, shutdown.clone());

    print_startup_summary(&config, &llm_model, args.interactive);

    let comms = comms::start(&config, bus_handle, outbound, shutdown.clone());
    comms.join().await?;

    // Channels that stop on their own (no token, bind failure) leave the
    // schedules and the watcher running.
    if config.runs_until_ctrl_c() && !shutdown.is_cancelled() {
        info!("no active chat channels — running scheduled jobs until ctrl-c");
        shutdown.cancelled().await;
    }

    // If comms exited due to EOF (not Ctrl-C), still signal everything to stop.
    shutdown.cancel();

    if let Err(e) = background.join().await {
        warn!(error = %e, "background component ended with an error");
    }
    sup_handle.await.ok();

    if args.interactive {
        use std::io::Write as _;
        println!("\nBye :) ...");
        let _ = std::io::stdout().flush();
    }

    Ok(())
}

fn print_startup_summary(config: &Config, llm_model: &str, interactive: bool) {
    let fit = |text: String| -> String {
        const WIDTH: usize = 58;
        if text.chars().count() >= WIDTH {
            let mut out = text.chars().take(WIDTH - 1).collect::<String>();
            out.push('…');
            out
        } else {
            format!("{text:<WIDTH$}")
        }
    };

    let on_off = |enabled: bool| if enabled { "enabled" } else { "disabled" };
    let every = |secs: u64| if secs == 0 { "off".to_string() } else { format!("every {secs}s") };

    let mut comms_lines = Vec::new();
    #[cfg(feature = "channel-pty")]
    comms_lines.push(format!("pty: {}", on_off(config.comms.pty.enabled)));
    #[cfg(feature = "channel-telegram")]
    comms_lines.push(format!(
        "telegram: {} (notify chats: {})",
        on_off(config.comms.telegram.enabled),
        config.comms.telegram.notify_chat_ids.len()
    ));
    #[cfg(feature = "channel-axum")]
    comms_lines.push(if config.comms.http.enabled {
        format!("http: {}", config.comms.http.bind)
    } else {
        "http: disabled".to_string()
    });

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ PM Team Supervisor Status                                    ║");
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ Bot:   {:<54}║", config.bot_name);
    println!("║ PID:   {:<54}║", std::process::id());
    println!("║ Mode:  {:<54}║", if interactive { "interactive" } else { "daemon" });
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ Tasks                                                        ║");
    println!("║   {}║", fit(config.tasks.root.display().to_string()));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ Comms                                                        ║");
    for line in comms_lines {
        println!("║   {}║", fit(line));
    }
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ LLM                                                          ║");
    println!("║   {}║", fit(format!("provider={} model={llm_model}", config.llm.provider)));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ Schedules                                                    ║");
    println!("║   {}║", fit(format!("stand-up: {}", every(config.scheduler.standup_every_secs))));
    println!("║   {}║", fit(format!("triage:   {}", every(config.scheduler.triage_every_secs))));
    println!("║   {}║", fit(format!("watcher:  {}", on_off(config.watcher.enabled))));
    println!("╚══════════════════════════════════════════════════════════════╝");

    if interactive {
        println!("Type /help for commands, or just describe a task.");
    }
}

struct CliArgs {
    log_level: Option<&'static str>,
    interactive: bool,
    config_path: Option<PathBuf>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut interactive = false;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: pmteam-bot [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -i, --interactive          Run in interactive mode (enables the console channel)");
                println!("  -f, --config <PATH>        Path to configuration file (default: {})", config::DEFAULT_CONFIG_PATH);
                println!("  -v, -vv, -vvv              Increase logging verbosity");
                std::process::exit(0);
            }
            "-i" | "--interactive" => interactive = true,
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => eprintln!("warning: ignoring unknown argument {other}"),
        }
    }

    CliArgs { log_level: logger::level_for_verbosity(verbosity), interactive, config_path }
}
