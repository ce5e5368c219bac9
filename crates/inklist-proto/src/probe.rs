//! Live-server probe over the v4 binary handshake.
//!
//! A v4 server greets every new TCP connection with a single framed JSON
//! message: a 4-byte header whose first two big-endian bytes carry the payload
//! length (the remaining two are reserved), followed by that many bytes of
//! UTF-8 JSON. A compatible server sends `{"version": 4, "type": "login"}`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::version::server_version;

/// Connect and read deadlines for a probe attempt.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(5),
        }
    }
}

/// Why a probe failed. The messages are user-visible: they end up verbatim in
/// the announcement rejection shown to the session host.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(
        "Connection to {0} timed out. Your session does not seem to be reachable \
         from the Internet. Check the hosting help page for port forwarding instructions."
    )]
    ConnectTimeout(String),

    #[error(
        "Your session does not seem to be reachable from the Internet. \
         Check the hosting help page for port forwarding instructions."
    )]
    Unreachable,

    #[error(
        "Your server does not seem to be a supported drawing server. \
         Check the hosting help page."
    )]
    NotSupported,
}

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    #[serde(default)]
    version: u32,
    #[serde(default, rename = "type")]
    kind: String,
}

/// Probe `address` if the protocol version has a known handshake.
///
/// Only v4 is checked; unknown server versions pass without a connection
/// attempt, since we cannot tell a broken host from a newer protocol.
pub async fn check_host(
    address: &str,
    protocol: &str,
    timeouts: ProbeTimeouts,
) -> Result<(), ProbeError> {
    match server_version(protocol) {
        Some(4) => probe_v4_login(address, timeouts).await,
        Some(version) => {
            debug!(address, version, "skipping probe for unknown server version");
            Ok(())
        }
        None => {
            debug!(address, protocol, "skipping probe, unparseable protocol");
            Ok(())
        }
    }
}

/// Open a TCP connection and verify the v4 login greeting.
pub async fn probe_v4_login(address: &str, timeouts: ProbeTimeouts) -> Result<(), ProbeError> {
    let connect = timeout(timeouts.connect, TcpStream::connect(address)).await;
    let mut stream = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            debug!(address, %err, "probe connection failed");
            return Err(ProbeError::Unreachable);
        }
        Err(_) => return Err(ProbeError::ConnectTimeout(address.to_string())),
    };

    let payload = match timeout(timeouts.read, read_frame(&mut stream)).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(err)) => {
            debug!(address, %err, "probe greeting read failed");
            return Err(ProbeError::NotSupported);
        }
        Err(_) => {
            debug!(address, "probe greeting read timed out");
            return Err(ProbeError::NotSupported);
        }
    };

    let greeting: Greeting = serde_json::from_slice(&payload).map_err(|err| {
        debug!(address, %err, "probe greeting is not valid JSON");
        ProbeError::NotSupported
    })?;

    if greeting.version == 4 && greeting.kind == "login" {
        Ok(())
    } else {
        Err(ProbeError::NotSupported)
    }
}

/// Read one framed message: 4-byte header (big-endian u16 length, two
/// reserved bytes), then the payload.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    let len = u16::from_be_bytes([header[0], header[1]]) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Frame a payload the way a v4 server would. Used by the directory's own
/// tests to stand up fake servers; exported because it is the other half of
/// the codec.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(payload.len()).expect("frame payload too large");
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn fast_timeouts() -> ProbeTimeouts {
        ProbeTimeouts {
            connect: Duration::from_millis(500),
            read: Duration::from_millis(500),
        }
    }

    async fn fake_server(greeting: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(&greeting).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn accepts_v4_login_greeting() {
        let frame = encode_frame(br#"{"version": 4, "type": "login"}"#);
        let addr = fake_server(frame).await;
        probe_v4_login(&addr, fast_timeouts()).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_wrong_version() {
        let frame = encode_frame(br#"{"version": 3, "type": "login"}"#);
        let addr = fake_server(frame).await;
        let err = probe_v4_login(&addr, fast_timeouts()).await.unwrap_err();
        assert!(matches!(err, ProbeError::NotSupported));
    }

    #[tokio::test]
    async fn rejects_non_json_greeting() {
        let frame = encode_frame(b"HTTP/1.1 400 Bad Request");
        let addr = fake_server(frame).await;
        let err = probe_v4_login(&addr, fast_timeouts()).await.unwrap_err();
        assert!(matches!(err, ProbeError::NotSupported));
    }

    #[tokio::test]
    async fn rejects_truncated_frame() {
        // Header promises more bytes than the server sends.
        let mut frame = encode_frame(br#"{"version": 4, "type": "login"}"#);
        frame.truncate(10);
        let addr = fake_server(frame).await;
        let err = probe_v4_login(&addr, fast_timeouts()).await.unwrap_err();
        assert!(matches!(err, ProbeError::NotSupported));
    }

    #[tokio::test]
    async fn closed_or_silent_server_is_not_supported() {
        let addr = fake_server(Vec::new()).await;
        let err = probe_v4_login(&addr, fast_timeouts()).await.unwrap_err();
        assert!(matches!(err, ProbeError::NotSupported));
    }

    #[tokio::test]
    async fn unknown_server_version_passes_without_probe() {
        // No listener anywhere near this address, so a real probe would fail.
        check_host("192.0.2.1:27750", "dp:9.0.0", fast_timeouts())
            .await
            .unwrap();
        check_host("192.0.2.1:27750", "1.6", fast_timeouts())
            .await
            .unwrap();
    }
}
