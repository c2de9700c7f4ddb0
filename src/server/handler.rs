//! Request-dispatch contract between listeners and the session engine.
//!
//! Listeners only move bytes. Everything a message means is up to the
//! [`RequestHandler`] they were started with.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::{CodecError, MessageHeader, HEADER_LEN};
use crate::config::Config;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] CodecError),

    #[error("unknown request handler {key:?} (known: {known})")]
    Unknown { key: String, known: String },
}

/// Serves traffic handed over by a listener.
pub trait RequestHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Serve one accepted connection until the peer closes it.
    fn handle_stream(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), HandlerError>;

    /// Serve one datagram received by the companion listener.
    fn handle_datagram(
        &self,
        payload: &[u8],
        peer: SocketAddr,
        _socket: &UdpSocket,
    ) -> Result<(), HandlerError> {
        debug!(handler = self.name(), %peer, bytes = payload.len(), "datagram ignored");
        Ok(())
    }
}

/// Builds a handler from the merged configuration.
pub type HandlerFactory = fn(&Config) -> Arc<dyn RequestHandler>;

/// Build-time mapping from `aux_request_handler` keys to handler constructors.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: BTreeMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the handlers shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(TraceHandler::KEY, TraceHandler::factory);
        registry.register("core.trace.TraceHandler", TraceHandler::factory);
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, factory: HandlerFactory) {
        self.factories.insert(key.into(), factory);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Construct the handler registered under `key`.
    pub fn resolve(&self, key: &str, config: &Config) -> Result<Arc<dyn RequestHandler>, HandlerError> {
        match self.factories.get(key) {
            Some(factory) => Ok(factory(config)),
            None => Err(HandlerError::Unknown {
                key: key.to_string(),
                known: self.factories.keys().cloned().collect::<Vec<_>>().join(", "),
            }),
        }
    }
}

/// Frames CORE API messages and logs their headers without acting on them.
///
/// Stands in for the session engine when the daemon runs on its own.
#[derive(Debug, Clone)]
pub struct TraceHandler {
    xml_file_version: String,
}

impl TraceHandler {
    pub const KEY: &'static str = "trace";

    pub fn new(config: &Config) -> Self {
        Self {
            xml_file_version: config.xml_file_version().to_string(),
        }
    }

    fn factory(config: &Config) -> Arc<dyn RequestHandler> {
        Arc::new(Self::new(config))
    }
}

impl RequestHandler for TraceHandler {
    fn name(&self) -> &str {
        Self::KEY
    }

    fn handle_stream(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<(), HandlerError> {
        info!(%peer, xmlfilever = %self.xml_file_version, "connection opened");
        let mut messages = 0usize;

        loop {
            let mut header = [0u8; HEADER_LEN];
            match stream.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let header = MessageHeader::parse(&header)?;
            let mut body = vec![0u8; header.length as usize];
            stream.read_exact(&mut body)?;
            messages += 1;

            info!(
                %peer,
                msg_type = header.msg_type,
                flags = header.flags,
                length = header.length,
                "message received"
            );
        }

        info!(%peer, messages, "connection closed");
        Ok(())
    }

    fn handle_datagram(
        &self,
        payload: &[u8],
        peer: SocketAddr,
        _socket: &UdpSocket,
    ) -> Result<(), HandlerError> {
        let header = MessageHeader::parse(payload)?;
        let body = payload.len() - HEADER_LEN;
        if body != header.length as usize {
            warn!(%peer, declared = header.length, actual = body, "datagram length mismatch");
        }
        info!(
            %peer,
            msg_type = header.msg_type,
            flags = header.flags,
            length = header.length,
            "datagram received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MessageCodec, RegisterCodec};
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_builtins_resolve() {
        let registry = HandlerRegistry::with_builtins();
        let handler = registry.resolve("trace", &Config::default()).unwrap();
        assert_eq!(handler.name(), "trace");
        assert!(registry.contains("core.trace.TraceHandler"));
    }

    #[test]
    fn test_unknown_key_lists_known_handlers() {
        let registry = HandlerRegistry::with_builtins();
        let err = registry
            .resolve("pkg.mod.Missing", &Config::default())
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.contains("pkg.mod.Missing"));
        assert!(message.contains("trace"));
    }

    #[test]
    fn test_trace_handler_reads_framed_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = std::thread::spawn(move || {
            let mut client = TcpStream::connect(addr).unwrap();
            let msg = RegisterCodec.pack_execute("/tmp/a.xml").unwrap();
            client.write_all(&msg).unwrap();
            client.write_all(&msg).unwrap();
        });

        let (stream, peer) = listener.accept().unwrap();
        writer.join().unwrap();
        let handler = TraceHandler::new(&Config::default());
        handler.handle_stream(stream, peer).unwrap();
    }

    #[test]
    fn test_trace_handler_rejects_short_datagram() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = socket.local_addr().unwrap();
        let handler = TraceHandler::new(&Config::default());
        assert!(matches!(
            handler.handle_datagram(&[1, 2], peer, &socket),
            Err(HandlerError::Codec(_))
        ));
        let msg = RegisterCodec.pack_execute("/tmp/a.xml").unwrap();
        handler.handle_datagram(&msg, peer, &socket).unwrap();
    }
}
