use config::{Config, File};
use serde::Deserialize;
use std::env;

/// Agent name enforcement mode for registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NameEnforcement {
    /// Reject names that are not valid adjective+noun identifiers.
    Strict,
    /// Silently auto-generate when the provided name is unusable.
    #[default]
    Coerce,
    /// Ignore caller-provided names entirely.
    AlwaysAuto,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WaggleConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub contact: ContactConfig,
    pub reservations: ReservationConfig,
    pub identity: IdentityConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path the streamable-HTTP MCP endpoint is mounted on.
    #[serde(default = "default_http_path")]
    pub http_path: String,
}

fn default_http_path() -> String {
    "/mcp".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite database file path.
    pub db_path: String,
    /// Root directory of the git-tracked archive.
    pub root: String,
    pub git_author_name: String,
    pub git_author_email: String,
    /// Convert referenced images to WebP by default.
    #[serde(default = "default_true")]
    pub convert_images: bool,
    /// Images at or below this size are inlined as data URIs.
    #[serde(default = "default_inline_max")]
    pub inline_image_max_bytes: usize,
    /// Glob patterns excluded from project listings (test/demo projects).
    #[serde(default)]
    pub project_ignore_patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_inline_max() -> usize {
    65536
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContactConfig {
    /// Master switch for contact-policy gating on sends.
    #[serde(default)]
    pub enforcement_enabled: bool,
    /// Window within which prior contact auto-allows further traffic.
    #[serde(default = "default_contact_ttl")]
    pub auto_ttl_seconds: u64,
}

fn default_contact_ttl() -> u64 {
    7 * 24 * 3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    /// When enabled, conflicting exclusive reservations block message writes.
    #[serde(default)]
    pub enforcement_enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    #[serde(default)]
    pub name_enforcement: NameEnforcement,
    /// Ack-required messages older than this count as stale.
    #[serde(default = "default_ack_ttl")]
    pub ack_ttl_seconds: u64,
    /// Optional JSON capability map; read once and memoized.
    #[serde(default)]
    pub capabilities_file: Option<String>,
}

fn default_ack_ttl() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for WaggleConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8765,
                http_path: default_http_path(),
            },
            storage: StorageConfig {
                db_path: "data/waggle.db".to_string(),
                root: "data/archive".to_string(),
                git_author_name: "waggle-bot".to_string(),
                git_author_email: "waggle-bot@localhost".to_string(),
                convert_images: true,
                inline_image_max_bytes: default_inline_max(),
                project_ignore_patterns: Vec::new(),
            },
            contact: ContactConfig {
                enforcement_enabled: false,
                auto_ttl_seconds: default_contact_ttl(),
            },
            reservations: ReservationConfig {
                enforcement_enabled: false,
            },
            identity: IdentityConfig {
                name_enforcement: NameEnforcement::Coerce,
                ack_ttl_seconds: default_ack_ttl(),
                capabilities_file: None,
            },
            llm: LlmConfig::default(),
        }
    }
}

/// Parse boolean environment variable with truthy value detection
fn parse_bool_env(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "t" | "y"))
}

impl WaggleConfig {
    /// Load configuration with 12-factor env var support.
    ///
    /// Priority order (highest to lowest):
    /// 1. `WAGGLE_*` / `PORT` / `HOST` env vars
    /// 2. Config files (`config/default.toml`, `config/{RUN_MODE}.toml`)
    /// 3. Hardcoded defaults
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let defaults = Self::default();

        let mut builder = Config::builder()
            .set_default("server.host", defaults.server.host.clone())?
            .set_default("server.port", i64::from(defaults.server.port))?
            .set_default("server.http_path", defaults.server.http_path.clone())?
            .set_default("storage.db_path", defaults.storage.db_path.clone())?
            .set_default("storage.root", defaults.storage.root.clone())?
            .set_default("storage.git_author_name", defaults.storage.git_author_name.clone())?
            .set_default("storage.git_author_email", defaults.storage.git_author_email.clone())?
            .set_default("storage.convert_images", true)?
            .set_default("storage.inline_image_max_bytes", default_inline_max() as i64)?
            .set_default("storage.project_ignore_patterns", Vec::<String>::new())?
            .set_default("contact.enforcement_enabled", false)?
            .set_default("contact.auto_ttl_seconds", default_contact_ttl() as i64)?
            .set_default("reservations.enforcement_enabled", false)?
            .set_default("identity.name_enforcement", "coerce")?
            .set_default("identity.ack_ttl_seconds", default_ack_ttl() as i64)?
            .set_default("llm.enabled", false)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false));

        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse::<i64>()
        {
            builder = builder.set_override("server.port", p)?;
        }
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }
        if let Ok(v) = env::var("WAGGLE_DB_PATH") {
            builder = builder.set_override("storage.db_path", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_STORAGE_ROOT") {
            builder = builder.set_override("storage.root", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_HTTP_PATH") {
            builder = builder.set_override("server.http_path", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_GIT_AUTHOR_NAME") {
            builder = builder.set_override("storage.git_author_name", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_GIT_AUTHOR_EMAIL") {
            builder = builder.set_override("storage.git_author_email", v)?;
        }
        if let Some(v) = parse_bool_env("WAGGLE_CONVERT_IMAGES") {
            builder = builder.set_override("storage.convert_images", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_INLINE_IMAGE_MAX_BYTES")
            && let Ok(n) = v.parse::<i64>()
        {
            builder = builder.set_override("storage.inline_image_max_bytes", n)?;
        }
        if let Ok(v) = env::var("WAGGLE_PROJECT_IGNORE_PATTERNS") {
            let patterns: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            builder = builder.set_override("storage.project_ignore_patterns", patterns)?;
        }
        if let Some(v) = parse_bool_env("WAGGLE_CONTACT_ENFORCEMENT") {
            builder = builder.set_override("contact.enforcement_enabled", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_CONTACT_AUTO_TTL_SECONDS")
            && let Ok(n) = v.parse::<i64>()
        {
            builder = builder.set_override("contact.auto_ttl_seconds", n)?;
        }
        if let Some(v) = parse_bool_env("WAGGLE_RESERVATION_ENFORCEMENT") {
            builder = builder.set_override("reservations.enforcement_enabled", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_NAME_ENFORCEMENT") {
            builder = builder.set_override("identity.name_enforcement", v.to_lowercase())?;
        }
        if let Ok(v) = env::var("WAGGLE_ACK_TTL_SECONDS")
            && let Ok(n) = v.parse::<i64>()
        {
            builder = builder.set_override("identity.ack_ttl_seconds", n)?;
        }
        if let Ok(v) = env::var("WAGGLE_CAPABILITIES_FILE") {
            builder = builder.set_override("identity.capabilities_file", v)?;
        }
        if let Some(v) = parse_bool_env("WAGGLE_LLM_ENABLED") {
            builder = builder.set_override("llm.enabled", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_LLM_MODEL") {
            builder = builder.set_override("llm.model", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_LLM_BASE_URL") {
            builder = builder.set_override("llm.base_url", v)?;
        }
        if let Ok(v) = env::var("WAGGLE_LLM_API_KEY") {
            builder = builder.set_override("llm.api_key", v)?;
        }

        builder.build()?.try_deserialize()
    }
}
