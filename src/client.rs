//! Remote execute trigger for a running daemon.
//!
//! Sends one register message over UDP to the daemon's companion listener,
//! asking it to load and run a session file. Fire and forget: no reply is
//! awaited, so success only means the datagram left this host.

use std::io;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::codec::{CodecError, MessageCodec};

/// Errors that can occur before the datagram is sent.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot resolve session file path {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("session file path {0} is not valid UTF-8")]
    NonUtf8Path(PathBuf),

    #[error("cannot encode execute request: {0}")]
    Encode(#[from] CodecError),

    #[error("cannot send to {host}:{port}: {source}")]
    Send {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// Ask the daemon at `host:port` to execute `filename`.
///
/// Returns the status code for the CLI (always 0 once sent).
pub fn request_execute(
    host: &str,
    port: u16,
    filename: &Path,
    codec: &impl MessageCodec,
) -> Result<i32, ClientError> {
    let path = std::path::absolute(filename).map_err(|source| ClientError::Path {
        path: filename.to_path_buf(),
        source,
    })?;
    let path_str = path
        .to_str()
        .ok_or_else(|| ClientError::NonUtf8Path(path.clone()))?;
    let message = codec.pack_execute(path_str)?;

    let send_error = |source| ClientError::Send {
        host: host.to_string(),
        port,
        source,
    };

    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .and_then(|s| s.connect((host, port)).map(|()| s))
        .or_else(|_| {
            // IPv6-only targets
            UdpSocket::bind(("::", 0)).and_then(|s| s.connect((host, port)).map(|()| s))
        })
        .map_err(send_error)?;
    socket.send(&message).map_err(send_error)?;

    debug!(%host, port, file = %path.display(), bytes = message.len(), "execute request sent");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MessageHeader, RegisterCodec, MSG_REGISTER};
    use std::time::Duration;

    #[test]
    fn test_sends_exactly_one_encoded_datagram() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = server.local_addr().unwrap().port();

        let code = request_execute("127.0.0.1", port, Path::new("/tmp/session.xml"), &RegisterCodec).unwrap();
        assert_eq!(code, 0);

        let mut buf = [0u8; 1024];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], RegisterCodec.pack_execute("/tmp/session.xml").unwrap().as_slice());
        assert_eq!(MessageHeader::parse(&buf[..len]).unwrap().msg_type, MSG_REGISTER);

        server.set_nonblocking(true).unwrap();
        assert!(server.recv_from(&mut buf).is_err(), "more than one datagram sent");
    }

    #[test]
    fn test_succeeds_without_listener() {
        let port = {
            let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let code = request_execute("127.0.0.1", port, Path::new("/tmp/session.xml"), &RegisterCodec).unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn test_relative_path_is_made_absolute() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = server.local_addr().unwrap().port();

        request_execute("127.0.0.1", port, Path::new("session.xml"), &RegisterCodec).unwrap();

        let expected = std::env::current_dir().unwrap().join("session.xml");
        let mut buf = [0u8; 4096];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        assert_eq!(
            &buf[..len],
            RegisterCodec
                .pack_execute(expected.to_str().unwrap())
                .unwrap()
                .as_slice()
        );
    }
}
