//! Configuration for the inklist directory service.
//!
//! Settings come from a TOML file (`-c`) or from `INKLIST_*` environment
//! variables; command line flags override both. Static admin operator
//! credentials are environment-only so they never end up in a config file.

use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::validation::is_host_in_list;

/// Directory service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listening address, e.g. `127.0.0.1:8080`.
    pub listen: String,

    /// SQLite database path. Empty means read-only mode: no local listings,
    /// only aggregated peer sessions are served.
    pub database: String,

    /// Server display name, shown in the root info endpoint.
    pub name: String,

    /// Server description.
    pub description: String,

    /// Favicon URL.
    pub favicon: String,

    /// Welcome message returned with successful announcements.
    pub welcome: String,

    /// Keywords that force the NSFM flag when found in a session title.
    /// Uppercased on load.
    pub nsfm_words: Vec<String>,

    /// Permit announcing ports below 1024.
    pub allow_well_known_ports: bool,

    /// When non-empty, only these exact protocol strings are accepted.
    pub protocol_whitelist: Vec<String>,

    /// Per-host cap on simultaneous active announcements.
    pub max_sessions_per_host: u32,

    /// Cap for hosts announcing under a DNS name. Auto-raised to at least
    /// `max_sessions_per_host`.
    pub max_sessions_per_named_host: u32,

    /// Hosts exempt from caps and probing. Lowercased on load; `*.` prefix
    /// wildcards are honored.
    pub trusted_hosts: Vec<String>,

    /// Hosts refused outright, in addition to database bans. Lowercased on
    /// load; `*.` prefix wildcards are honored.
    pub banned_hosts: Vec<String>,

    /// Trust X-Forwarded-For / X-Real-IP for the client address.
    pub proxy_headers: bool,

    /// Append an IPv6 caution to the welcome message for IPv6 hosts.
    pub warn_ipv6: bool,

    /// Serve a public session list and accept public announcements.
    pub public: bool,

    /// Accept private (unlisted) announcements.
    pub roomcodes: bool,

    /// Probe announced IP-literal hosts over the drawing protocol handshake.
    pub check_server: bool,

    /// Reject non-GET requests from clients whose User-Agent does not start
    /// with `user_agent_prefix`.
    pub check_user_agent: bool,

    /// Expected User-Agent prefix when `check_user_agent` is on.
    pub user_agent_prefix: String,

    /// Minutes without a refresh before a listing expires. Minimum 2.
    pub session_timeout: u32,

    /// Log every request through the tracing middleware.
    pub log_requests: bool,

    /// Mount the `/admin/` API.
    pub enable_admin_api: bool,

    /// Peer directory URLs whose sessions are merged into listings.
    pub include_servers: Vec<String>,

    /// CORS origins. `["*"]` allows any origin.
    pub allow_origins: Vec<String>,

    /// Seconds a fetched peer session list stays fresh.
    pub include_cache_ttl: u64,

    /// Seconds a peer's resolved host/port stays fresh. Auto-raised to at
    /// least `include_cache_ttl`.
    pub include_status_cache_ttl: u64,

    /// HTTP timeout in seconds for peer fetches.
    pub include_timeout: u64,

    /// Static admin operator name (environment only).
    #[serde(skip)]
    pub admin_user: Option<String>,

    /// Static admin operator password (environment only).
    #[serde(skip)]
    pub admin_pass: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            database: String::new(),
            name: String::new(),
            description: String::new(),
            favicon: String::new(),
            welcome: String::new(),
            nsfm_words: Vec::new(),
            allow_well_known_ports: false,
            protocol_whitelist: Vec::new(),
            max_sessions_per_host: 3,
            max_sessions_per_named_host: 3,
            trusted_hosts: Vec::new(),
            banned_hosts: Vec::new(),
            proxy_headers: false,
            warn_ipv6: false,
            public: true,
            roomcodes: false,
            check_server: true,
            check_user_agent: false,
            user_agent_prefix: "InklistClient/".to_string(),
            session_timeout: 10,
            log_requests: false,
            enable_admin_api: false,
            include_servers: Vec::new(),
            allow_origins: vec!["*".to_string()],
            include_cache_ttl: 0,
            include_status_cache_ttl: 0,
            include_timeout: 10,
            admin_user: None,
            admin_pass: None,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse configuration file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut cfg: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        cfg.load_admin_credentials();
        cfg.normalize()?;
        Ok(cfg)
    }

    /// Load configuration from `INKLIST_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Config::default();

        env_string("INKLIST_LISTEN", &mut cfg.listen);
        env_string("INKLIST_DATABASE", &mut cfg.database);
        env_string("INKLIST_NAME", &mut cfg.name);
        env_string("INKLIST_DESCRIPTION", &mut cfg.description);
        env_string("INKLIST_FAVICON", &mut cfg.favicon);
        env_string("INKLIST_WELCOME", &mut cfg.welcome);
        env_list("INKLIST_NSFM_WORDS", &mut cfg.nsfm_words);
        env_bool("INKLIST_ALLOW_WELL_KNOWN_PORTS", &mut cfg.allow_well_known_ports)?;
        env_list("INKLIST_PROTOCOL_WHITELIST", &mut cfg.protocol_whitelist);
        env_number("INKLIST_MAX_SESSIONS_PER_HOST", &mut cfg.max_sessions_per_host)?;
        env_number(
            "INKLIST_MAX_SESSIONS_PER_NAMED_HOST",
            &mut cfg.max_sessions_per_named_host,
        )?;
        env_list("INKLIST_TRUSTED_HOSTS", &mut cfg.trusted_hosts);
        env_list("INKLIST_BANNED_HOSTS", &mut cfg.banned_hosts);
        env_bool("INKLIST_PROXY_HEADERS", &mut cfg.proxy_headers)?;
        env_bool("INKLIST_WARN_IPV6", &mut cfg.warn_ipv6)?;
        env_bool("INKLIST_PUBLIC", &mut cfg.public)?;
        env_bool("INKLIST_ROOMCODES", &mut cfg.roomcodes)?;
        env_bool("INKLIST_CHECK_SERVER", &mut cfg.check_server)?;
        env_bool("INKLIST_CHECK_USER_AGENT", &mut cfg.check_user_agent)?;
        env_number("INKLIST_SESSION_TIMEOUT", &mut cfg.session_timeout)?;
        env_bool("INKLIST_LOG_REQUESTS", &mut cfg.log_requests)?;
        env_bool("INKLIST_ENABLE_ADMIN_API", &mut cfg.enable_admin_api)?;
        env_list("INKLIST_INCLUDE_SERVERS", &mut cfg.include_servers);
        env_list("INKLIST_ALLOW_ORIGINS", &mut cfg.allow_origins);
        env_number("INKLIST_INCLUDE_CACHE_TTL", &mut cfg.include_cache_ttl)?;
        env_number(
            "INKLIST_INCLUDE_STATUS_CACHE_TTL",
            &mut cfg.include_status_cache_ttl,
        )?;
        env_number("INKLIST_INCLUDE_TIMEOUT", &mut cfg.include_timeout)?;

        cfg.load_admin_credentials();
        cfg.normalize()?;
        Ok(cfg)
    }

    fn load_admin_credentials(&mut self) {
        self.admin_user = env::var("INKLIST_ADMIN_USER").ok().filter(|s| !s.is_empty());
        self.admin_pass = env::var("INKLIST_ADMIN_PASS").ok().filter(|s| !s.is_empty());
    }

    /// Apply the load-time invariants: minimum timeout, case folding, and the
    /// auto-raised caps and TTLs.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        if self.session_timeout < 2 {
            return Err(ConfigError::Invalid(
                "session_timeout",
                "must be at least 2 minutes".to_string(),
            ));
        }

        for word in &mut self.nsfm_words {
            *word = word.to_uppercase();
        }
        for host in &mut self.trusted_hosts {
            *host = host.to_lowercase();
        }
        for host in &mut self.banned_hosts {
            *host = host.to_lowercase();
        }

        self.max_sessions_per_named_host = self
            .max_sessions_per_named_host
            .max(self.max_sessions_per_host);
        self.include_status_cache_ttl = self.include_status_cache_ttl.max(self.include_cache_ttl);

        Ok(())
    }

    /// Read-only mode: no database configured.
    pub fn read_only(&self) -> bool {
        self.database.is_empty()
    }

    pub fn is_trusted_host(&self, host: &str) -> bool {
        is_host_in_list(host, &self.trusted_hosts)
    }

    pub fn is_banned_host(&self, host: &str) -> bool {
        is_host_in_list(host, &self.banned_hosts)
    }

    /// True if the (uppercased) title contains any configured NSFM keyword.
    pub fn contains_nsfm_words(&self, title: &str) -> bool {
        if self.nsfm_words.is_empty() {
            return false;
        }
        let title = title.to_uppercase();
        self.nsfm_words.iter().any(|word| title.contains(word))
    }

    pub fn session_timeout_secs(&self) -> i64 {
        i64::from(self.session_timeout) * 60
    }
}

fn env_string(key: &str, target: &mut String) {
    if let Ok(value) = env::var(key) {
        *target = value;
    }
}

fn env_list(key: &str, target: &mut Vec<String>) {
    if let Ok(value) = env::var(key) {
        *target = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
}

fn env_bool(key: &'static str, target: &mut bool) -> Result<(), ConfigError> {
    if let Ok(value) = env::var(key) {
        *target = match value.as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => return Err(ConfigError::Invalid(key, other.to_string())),
        };
    }
    Ok(())
}

fn env_number<T: std::str::FromStr>(key: &'static str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = env::var(key) {
        *target = value
            .parse()
            .map_err(|_| ConfigError::Invalid(key, value.clone()))?;
    }
    Ok(())
}
