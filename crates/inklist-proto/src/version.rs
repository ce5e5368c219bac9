//! Protocol version string parsing.

/// Extract the server version from a full protocol string.
///
/// Protocol strings look like `dp:4.21.2` (namespace, then
/// `major.server.minor`); the middle component is the server protocol
/// version. Legacy two-part strings (`1.6`) and anything else return `None`.
pub fn server_version(protocol: &str) -> Option<u32> {
    let (namespace, rest) = protocol.split_once(':')?;
    if namespace.is_empty() || !namespace.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    let mut parts = rest.split('.');
    let major = parts.next()?;
    let server = parts.next()?;
    let minor = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(major) || !all_digits(server) || !all_digits(minor) {
        return None;
    }

    server.parse().ok()
}
