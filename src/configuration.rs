use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// development | production
    #[serde(default = "default_environment")]
    pub environment: String,
    /// stdio | http | websocket | auto
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Explicit server-mode flag, weighed by the auto heuristics.
    #[serde(default)]
    pub server_mode: bool,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub websocket: WebSocketSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_host")]
    pub host: String,
    /// None means "not explicitly configured"; the auto heuristics key off
    /// this, and the default port applies once the carrier actually starts.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub cors_credentials: bool,
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

impl HttpSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(DEFAULT_HTTP_PORT))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_ws_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub path: String,
    #[serde(default)]
    pub compression: bool,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
    /// None = no origin restriction; a literal "*" entry allows any origin.
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl WebSocketSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_session_secret")]
    pub secret: String,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
    #[serde(default)]
    pub enforce_ip_binding: bool,
    #[serde(default)]
    pub enforce_user_agent_binding: bool,
}

pub const DEFAULT_HTTP_PORT: u16 = 3001;

fn default_environment() -> String {
    "development".to_string()
}

fn default_transport() -> String {
    "auto".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ws_port() -> u16 {
    3002
}

fn default_ws_path() -> String {
    "/mcp".to_string()
}

fn default_max_payload() -> usize {
    1024 * 1024
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_cookie_name() -> String {
    "mcp-session".to_string()
}

fn default_session_ttl() -> u64 {
    30 * 60
}

/// Sessions live in memory, so a per-process random secret is a safe
/// default; deployments that need stable tokens set session.secret.
fn default_session_secret() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

fn default_rate_limit_max() -> u32 {
    50
}

fn default_rate_limit_window() -> u64 {
    15 * 60
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            cors_origins: Vec::new(),
            cors_credentials: false,
            trusted_proxies: Vec::new(),
        }
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_ws_port(),
            path: default_ws_path(),
            compression: false,
            max_payload: default_max_payload(),
            allowed_origins: None,
            trusted_proxies: Vec::new(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            tls: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cookie_name: default_cookie_name(),
            ttl_secs: default_session_ttl(),
            secret: default_session_secret(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window(),
            enforce_ip_binding: false,
            enforce_user_agent_binding: false,
        }
    }
}

impl Settings {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Startup validation. Production refuses to run without an explicit
    /// CORS origin list rather than defaulting to permissive development
    /// origins.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        match self.transport.as_str() {
            "stdio" | "http" | "websocket" | "auto" => {}
            other => {
                return Err(config::ConfigError::Message(format!(
                    "unknown transport '{}': expected stdio, http, websocket or auto",
                    other
                )))
            }
        }

        if self.is_production() {
            match self.transport.as_str() {
                "http" | "auto" if self.http.cors_origins.is_empty() => {
                    return Err(config::ConfigError::Message(
                        "production requires an explicit http.cors_origins list".to_string(),
                    ));
                }
                "websocket" if self.websocket.allowed_origins.is_none() => {
                    return Err(config::ConfigError::Message(
                        "production requires an explicit websocket.allowed_origins list"
                            .to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Optional `configuration` file (.yaml/.toml/.json), overridden by
    // MCP__-prefixed environment variables (e.g. MCP__TRANSPORT=http,
    // MCP__HTTP__PORT=3001, MCP__SESSION__ENABLED=true)
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("MCP")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("http.cors_origins")
                .with_list_parse_key("http.trusted_proxies")
                .with_list_parse_key("websocket.allowed_origins")
                .with_list_parse_key("websocket.trusted_proxies"),
        )
        .build()?;

    settings.try_deserialize()
}
