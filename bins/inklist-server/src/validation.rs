//! Announcement validation rules.
//!
//! Everything here is pure except the hostname check, which resolves the name
//! over DNS and requires it to point back at the announcing client.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use tokio::net::lookup_host;

use crate::api::rest::types::SessionEntry;

/// A field-qualified validation failure, rendered as `field: message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Context for validating a single announcement.
pub struct ValidationRules<'a> {
    pub client_ip: IpAddr,
    pub allow_well_known_ports: bool,
    pub protocol_whitelist: &'a [String],
}

/// Validate an incoming announcement. Does not mutate the session; defaults
/// are the caller's job.
pub async fn validate_announcement(
    session: &SessionEntry,
    rules: &ValidationRules<'_>,
) -> Result<(), ValidationError> {
    validate_hostname(&session.host, rules.client_ip).await?;

    if !(0..=0xffff).contains(&session.port) {
        return Err(ValidationError::new("port", "invalid number"));
    }
    if !rules.allow_well_known_ports && session.port != 0 && session.port < 1024 {
        return Err(ValidationError::new("port", "ports below 1024 are not allowed"));
    }

    if !is_valid_session_id(&session.id) {
        return Err(ValidationError::new("id", "invalid ID"));
    }

    if !is_valid_protocol(&session.protocol, rules.protocol_whitelist) {
        return Err(ValidationError::new("protocol", "unsupported protocol version"));
    }

    Ok(())
}

/// Session IDs are 1-36 characters of `[A-Za-z0-9-]`.
pub fn is_valid_session_id(id: &str) -> bool {
    (1..=36).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// A protocol string is acceptable if it is on the whitelist (when one is
/// configured), or matches `namespace:major.server.minor`, or the legacy
/// two-part `major.minor`.
pub fn is_valid_protocol(protocol: &str, whitelist: &[String]) -> bool {
    if !whitelist.is_empty() {
        return whitelist.iter().any(|p| p == protocol);
    }

    static FULL: OnceLock<Regex> = OnceLock::new();
    static LEGACY: OnceLock<Regex> = OnceLock::new();
    let full = FULL.get_or_init(|| Regex::new(r"^\w+:\d+\.\d+\.\d+$").unwrap());
    let legacy = LEGACY.get_or_init(|| Regex::new(r"^\d+\.\d+$").unwrap());

    full.is_match(protocol) || legacy.is_match(protocol)
}

/// Heuristic: a hostname whose final label is alphabetic is a DNS name rather
/// than an IP literal.
pub fn is_named_host(hostname: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^.+\.[A-Za-z]+$").unwrap())
        .is_match(hostname)
}

/// Sloppy but sufficient for warning text: a hex group followed by a colon.
pub fn is_ipv6_literal(address: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]+:").unwrap())
        .is_match(address)
}

/// Case-insensitive host list membership. Entries starting with `*` match as
/// suffixes (`*.example.com`). The list itself must already be lowercase.
pub fn is_host_in_list(hostname: &str, hostlist: &[String]) -> bool {
    let host = hostname.to_lowercase();
    hostlist.iter().any(|item| {
        if let Some(suffix) = item.strip_prefix('*') {
            host.ends_with(suffix)
        } else {
            host == *item
        }
    })
}

async fn validate_hostname(hostname: &str, client_ip: IpAddr) -> Result<(), ValidationError> {
    let local_client = is_local_client(client_ip);

    // An empty hostname means "use the client IP", which is meaningless when
    // the announcement comes from this machine's own network.
    if hostname.is_empty() {
        if local_client {
            return Err(ValidationError::new(
                "host",
                "hostname must be set when announcing from localhost",
            ));
        }
        return Ok(());
    }

    static SYNTAX: OnceLock<Regex> = OnceLock::new();
    let syntax = SYNTAX.get_or_init(|| {
        Regex::new(
            r"^(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9])$",
        )
        .unwrap()
    });
    if !syntax.is_match(hostname) {
        return Err(ValidationError::new("host", "invalid hostname"));
    }

    let addrs: Vec<IpAddr> = lookup_host((hostname, 0u16))
        .await
        .map_err(|_| ValidationError::new("host", "hostname lookup failed"))?
        .map(|addr| addr.ip())
        .collect();
    if addrs.is_empty() {
        return Err(ValidationError::new("host", "hostname lookup failed"));
    }

    // A local announcer is trusted to use any resolvable name; everyone else
    // must announce a name that points back at them.
    if local_client || addrs.iter().any(|ip| *ip == client_ip) {
        Ok(())
    } else {
        Err(ValidationError::new("host", "hostname does not match client IP"))
    }
}

/// Whether the announcement came from this machine's own network: loopback,
/// link-local, or a private-range source address.
pub fn is_local_client(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                // fc00::/7 unique-local
                || (segments[0] & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}
