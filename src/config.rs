//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory (or
//! the path given with `-f`), then applies `PMTEAM_WORK_DIR` and
//! `PMTEAM_LOG_LEVEL` env overrides. Secrets never come from TOML:
//! `LLM_API_KEY` and `TELEGRAM_BOT_TOKEN` are read from the environment.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub enabled: bool,
    /// Chats allowed to talk to the bot. Empty means everyone.
    pub allowed_chat_ids: Vec<i64>,
    /// Chats that receive outbound notifications (stand-ups, task changes).
    pub notify_chat_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct CommsConfig {
    pub pty: PtyConfig,
    pub telegram: TelegramConfig,
    pub http: HttpConfig,
}

/// OpenAI / OpenAI-compatible provider configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Active provider (`"dummy"` or `"openai"`); `default` in the TOML.
    pub provider: String,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone)]
pub struct AgentsConfig {
    /// Agent that handles messages with no explicit routing.
    pub default_agent: String,
    /// channel_id -> agent_id overrides (from `[agents.routing]`).
    pub channel_map: HashMap<String, String>,
    /// Directory holding the prompt layers.
    pub prompts_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TasksConfig {
    /// Task root, already resolved against `work_dir`.
    pub root: PathBuf,
    pub auto_create_dirs: bool,
}

/// Periodic PM jobs. `0` disables a job.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub standup_every_secs: u64,
    pub triage_every_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone)]
pub struct GitConfig {
    pub repo_dir: PathBuf,
    pub remote: String,
    pub base_branch: String,
}

#[derive(Debug, Clone)]
pub struct TestingConfig {
    pub command: String,
    pub timeout_secs: u64,
    /// Lines of output kept in the chat summary.
    pub summary_lines: usize,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_name: String,
    /// Project directory everything else is resolved against (no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub tasks: TasksConfig,
    pub comms: CommsConfig,
    pub agents: AgentsConfig,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY` — `None` for keyless local models.
    pub llm_api_key: Option<String>,
    pub scheduler: SchedulerConfig,
    pub watcher: WatcherConfig,
    pub git: GitConfig,
    pub testing: TestingConfig,
    /// `[features]` overrides on top of the built-in flag defaults.
    pub features: HashMap<String, bool>,
    /// `[permissions.<role>]` tables; each replaces the built-in role.
    pub permissions: HashMap<String, HashMap<String, Vec<String>>>,
}

impl Config {
    pub fn comms_pty_should_load(&self) -> bool {
        self.comms.pty.enabled
    }

    pub fn comms_telegram_should_load(&self) -> bool {
        self.comms.telegram.enabled
    }

    pub fn comms_http_should_load(&self) -> bool {
        self.comms.http.enabled
    }

    /// Scheduled jobs or the task watcher are configured.
    pub fn has_background_work(&self) -> bool {
        self.watcher.enabled || self.scheduler.standup_every_secs != 0 || self.scheduler.triage_every_secs != 0
    }

    /// Whether the process outlives its chat channels. Only the console
    /// ends the run on its own (EOF or `/exit`); a daemon whose channels
    /// stopped early keeps its schedules and watcher going until Ctrl-C.
    pub fn runs_until_ctrl_c(&self) -> bool {
        if self.comms_pty_should_load() {
            return false;
        }
        let any_channel = self.comms_telegram_should_load() || self.comms_http_should_load();
        self.has_background_work() || !any_channel
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    supervisor: RawSupervisor,
    #[serde(default)]
    tasks: RawTasks,
    #[serde(default)]
    comms: RawComms,
    #[serde(default)]
    agents: RawAgents,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    scheduler: RawScheduler,
    #[serde(default)]
    watcher: RawWatcher,
    #[serde(default)]
    git: RawGit,
    #[serde(default)]
    testing: RawTesting,
    #[serde(default)]
    features: HashMap<String, bool>,
    #[serde(default)]
    permissions: HashMap<String, HashMap<String, Vec<String>>>,
}

#[derive(Deserialize)]
struct RawSupervisor {
    bot_name: String,
    #[serde(default = "default_work_dir")]
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawTasks {
    root: String,
    auto_create_dirs: bool,
}

impl Default for RawTasks {
    fn default() -> Self {
        Self { root: "tasks".into(), auto_create_dirs: true }
    }
}

#[derive(Deserialize, Default)]
struct RawComms {
    #[serde(default)]
    pty: RawPty,
    #[serde(default)]
    telegram: RawTelegram,
    #[serde(default)]
    http: RawHttp,
}

#[derive(Deserialize)]
struct RawPty {
    #[serde(default = "default_false")]
    enabled: bool,
}

impl Default for RawPty {
    fn default() -> Self {
        Self { enabled: false }
    }
}

#[derive(Deserialize, Default)]
struct RawTelegram {
    #[serde(default = "default_false")]
    enabled: bool,
    #[serde(default)]
    allowed_chat_ids: Vec<i64>,
    #[serde(default)]
    notify_chat_ids: Vec<i64>,
}

#[derive(Deserialize)]
struct RawHttp {
    #[serde(default = "default_false")]
    enabled: bool,
    #[serde(default = "default_http_bind")]
    bind: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self { enabled: false, bind: default_http_bind() }
    }
}

#[derive(Deserialize)]
struct RawAgents {
    #[serde(rename = "default", default = "default_agent_name")]
    default_agent: String,
    #[serde(default)]
    routing: HashMap<String, String>,
    #[serde(default = "default_prompts_dir")]
    prompts_dir: String,
}

impl Default for RawAgents {
    fn default() -> Self {
        Self {
            default_agent: default_agent_name(),
            routing: HashMap::new(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawScheduler {
    standup_every_secs: u64,
    triage_every_secs: u64,
}

impl Default for RawScheduler {
    fn default() -> Self {
        Self { standup_every_secs: 86_400, triage_every_secs: 900 }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawWatcher {
    enabled: bool,
    debounce_ms: u64,
}

impl Default for RawWatcher {
    fn default() -> Self {
        Self { enabled: true, debounce_ms: 500 }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawGit {
    repo_dir: String,
    remote: String,
    base_branch: String,
}

impl Default for RawGit {
    fn default() -> Self {
        Self { repo_dir: ".".into(), remote: "origin".into(), base_branch: "main".into() }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawTesting {
    command: String,
    timeout_secs: u64,
    summary_lines: usize,
}

impl Default for RawTesting {
    fn default() -> Self {
        Self { command: "cargo test".into(), timeout_secs: 600, summary_lines: 15 }
    }
}

fn default_work_dir() -> String { ".".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_agent_name() -> String { "pm".to_string() }
fn default_prompts_dir() -> String { "config/prompts".to_string() }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.2 }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_http_bind() -> String { "127.0.0.1:8080".to_string() }
fn default_false() -> bool { false }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `path`, then apply env-var overrides.
pub fn load(path: &Path) -> Result<Config, AppError> {
    let work_dir_override = env::var("PMTEAM_WORK_DIR").ok();
    let log_level_override = env::var("PMTEAM_LOG_LEVEL").ok();
    load_from(path, work_dir_override.as_deref(), log_level_override.as_deref())
}

/// Loader with explicit overrides; tests pass them directly instead of
/// mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let s = parsed.supervisor;
    let work_dir = expand_home(work_dir_override.unwrap_or(&s.work_dir));
    let log_level = log_level_override.unwrap_or(&s.log_level).to_string();

    if parsed.llm.openai.timeout_seconds == 0 {
        return Err(AppError::Config("llm.openai.timeout_seconds must be > 0".into()));
    }
    if parsed.testing.command.trim().is_empty() {
        return Err(AppError::Config("testing.command must not be empty".into()));
    }

    Ok(Config {
        bot_name: s.bot_name,
        log_file: s.log_file.map(|f| resolve(&work_dir, &f)),
        log_level,
        tasks: TasksConfig {
            root: resolve(&work_dir, &parsed.tasks.root),
            auto_create_dirs: parsed.tasks.auto_create_dirs,
        },
        comms: CommsConfig {
            pty: PtyConfig { enabled: parsed.comms.pty.enabled },
            telegram: TelegramConfig {
                enabled: parsed.comms.telegram.enabled,
                allowed_chat_ids: parsed.comms.telegram.allowed_chat_ids,
                notify_chat_ids: parsed.comms.telegram.notify_chat_ids,
            },
            http: HttpConfig { enabled: parsed.comms.http.enabled, bind: parsed.comms.http.bind },
        },
        agents: AgentsConfig {
            default_agent: parsed.agents.default_agent,
            channel_map: parsed.agents.routing,
            prompts_dir: PathBuf::from(parsed.agents.prompts_dir),
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        llm_api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
        scheduler: SchedulerConfig {
            standup_every_secs: parsed.scheduler.standup_every_secs,
            triage_every_secs: parsed.scheduler.triage_every_secs,
        },
        watcher: WatcherConfig {
            enabled: parsed.watcher.enabled,
            debounce_ms: parsed.watcher.debounce_ms,
        },
        git: GitConfig {
            repo_dir: resolve(&work_dir, &parsed.git.repo_dir),
            remote: parsed.git.remote,
            base_branch: parsed.git.base_branch,
        },
        testing: TestingConfig {
            command: parsed.testing.command,
            timeout_secs: parsed.testing.timeout_secs,
            summary_lines: parsed.testing.summary_lines,
        },
        features: parsed.features,
        permissions: parsed.permissions,
        work_dir,
    })
}

/// Expand a leading `~` to the user's home directory.
/// Paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Absolute (or `~`) paths as-is, relative paths joined onto `base`.
fn resolve(base: &Path, path: &str) -> PathBuf {
    let p = expand_home(path);
    if p.is_absolute() { p } else { base.join(p) }
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Safe config for tests: dummy LLM, no channels, no keys, everything
    /// rooted in `work_dir`.
    pub fn test_default(work_dir: &Path) -> Self {
        Self {
            bot_name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            tasks: TasksConfig { root: work_dir.join("tasks"), auto_create_dirs: true },
            comms: CommsConfig {
                pty: PtyConfig { enabled: false },
                telegram: TelegramConfig {
                    enabled: false,
                    allowed_chat_ids: Vec::new(),
                    notify_chat_ids: Vec::new(),
                },
                http: HttpConfig { enabled: false, bind: default_http_bind() },
            },
            agents: AgentsConfig {
                default_agent: "pm".into(),
                channel_map: HashMap::new(),
                prompts_dir: work_dir.join("prompts"),
            },
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 1,
                },
            },
            llm_api_key: None,
            scheduler: SchedulerConfig { standup_every_secs: 0, triage_every_secs: 0 },
            watcher: WatcherConfig { enabled: false, debounce_ms: 50 },
            git: GitConfig {
                repo_dir: work_dir.to_path_buf(),
                remote: "origin".into(),
                base_branch: "main".into(),
            },
            testing: TestingConfig { command: "true".into(), timeout_secs: 5, summary_lines: 5 },
            features: HashMap::new(),
            permissions: HashMap::new(),
        }
    }
}
