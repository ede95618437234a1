pub mod agent_core;
pub mod commands;
pub mod config;
pub mod inference;
pub mod mcp_client;

use std::sync::Arc;

use agent_core::{ConversationEngine, SessionStore};
use config::AppConfig;
use inference::{InferenceClient, InferenceError};
use mcp_client::McpClient;

/// Async mutex for types that require `.await` inside their methods.
pub type TokioMutex<T> = tokio::sync::Mutex<T>;

/// Env var switching the log file to JSON lines.
const LOG_JSON_ENV_VAR: &str = "AGENTBRIDGE_LOG_JSON";

// ─── AppState ───────────────────────────────────────────────────────────────

/// Everything the command surface needs, shared by every caller.
pub struct AppState {
    engine: ConversationEngine,
    /// Owns the tool-server processes; the engine only holds the catalog.
    mcp: TokioMutex<McpClient>,
}

impl AppState {
    pub fn new(engine: ConversationEngine, mcp: McpClient) -> Self {
        Self {
            engine,
            mcp: TokioMutex::new(mcp),
        }
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    pub fn store(&self) -> &SessionStore {
        self.engine.store()
    }

    /// Stop every tool server.
    pub async fn shutdown(&self) {
        self.mcp.lock().await.shutdown_all().await;
        tracing::info!("tool servers stopped");
    }
}

/// Build the application from a loaded config.
///
/// Tool servers that fail to start are logged and left out of the catalog;
/// only an unusable model configuration is fatal.
pub async fn bootstrap(config: &AppConfig) -> Result<AppState, InferenceError> {
    let model = InferenceClient::from_config(config.model.clone())?;

    let mut mcp = McpClient::new(config.servers.clone(), config.bridge_settings());
    let errors = mcp.start_all().await;
    for (name, err) in &errors {
        tracing::warn!(
            server = %name,
            error = %err,
            "tool server failed to start (non-fatal)"
        );
    }

    let registry = mcp.registry();
    tracing::info!(
        running_servers = registry.server_names().len(),
        total_tools = registry.len(),
        model = %config.model.model_name,
        "tool bridge initialized"
    );

    let engine = ConversationEngine::new(
        Arc::new(model),
        registry,
        SessionStore::new(config.idle_timeout()),
        config.locator_extractor(),
        config.engine_settings(),
    );
    Ok(AppState::new(engine, mcp))
}

// ─── Logging ────────────────────────────────────────────────────────────────

/// Return the platform-standard data directory for AgentBridge.
///
/// - macOS: `~/Library/Application Support/agentbridge/`
/// - Windows: `{FOLDERID_RoamingAppData}\agentbridge\`
/// - Linux: `$XDG_DATA_HOME/agentbridge/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.agentbridge/` only if none of the above can be resolved.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("agentbridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".agentbridge")
}

/// Initialize the tracing subscriber, writing structured logs to the data directory.
///
/// On each startup:
/// 1. Rotates existing logs (agent.log → agent.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh agent.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the log path for discoverability.
///
/// If the log file cannot be opened, logs go to stderr instead.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    let log_path = log_dir.join("agent.log");

    rotate_log_file(&log_path, 3);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agentbridge=info,warn"));
    let json = std::env::var(LOG_JSON_ENV_VAR).is_ok_and(|v| v == "1" || v == "true");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    match (log_file, json) {
        (Ok(file), true) => fmt::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(FlushingWriter::new(file))
            .with_target(true)
            .init(),
        (Ok(file), false) => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(FlushingWriter::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .init(),
        (Err(e), _) => {
            fmt::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            tracing::warn!(path = %log_path.display(), error = %e, "could not open log file, logging to stderr");
        }
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== AgentBridge starting ==="
    );
}

/// Rotate log files: `agent.log` → `agent.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &std::path::Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Without explicit flushing, log entries may sit in OS buffers and be lost
/// if the process is killed mid-turn.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
