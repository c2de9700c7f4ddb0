//! Startup of the primary, companion and auxiliary listeners.
//!
//! Order matters: the auxiliary handler is resolved before anything is bound,
//! and the primary is bound before any companion starts, so a fatal error
//! never leaves a partial listener set behind.

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{info, warn};

use super::handler::{HandlerError, HandlerRegistry, RequestHandler};
use super::listener::{self, ListenerHandle, ListenerKind, ListenerState};
use super::registry::Supervisor;
use crate::config::{AuxHandlerSpec, Config, ConfigError};
use crate::daemon::set_cloexec;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("error starting {kind} server on {host}:{port}: {source}")]
    Bind {
        kind: ListenerKind,
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to start {kind} server thread: {source}")]
    Spawn {
        kind: ListenerKind,
        #[source]
        source: io::Error,
    },
}

/// The primary listener, served on the thread that started the daemon.
pub struct PrimaryServer {
    listener: TcpListener,
    state: Arc<ListenerState>,
    handler: Arc<dyn RequestHandler>,
    supervisor: Arc<Supervisor>,
}

impl PrimaryServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr()
    }

    /// Block in the accept loop until shut down or cancelled.
    pub fn serve_forever(self) {
        listener::serve_stream(&self.listener, &self.state, &self.handler, &self.supervisor);
    }
}

/// Start every configured listener and return the primary, not yet serving.
pub fn start(
    config: &Config,
    handler: Arc<dyn RequestHandler>,
    handlers: &HandlerRegistry,
    supervisor: &Arc<Supervisor>,
) -> Result<PrimaryServer, StartupError> {
    let host = config.listen_addr().to_string();
    let port = config.port();

    let aux = match config.aux_handler()? {
        Some(spec) => {
            let aux_handler = handlers.resolve(&spec.handler, config)?;
            Some((spec, aux_handler))
        }
        None => None,
    };

    let bind_error = |kind, port, source| StartupError::Bind {
        kind,
        host: host.clone(),
        port,
        source,
    };

    // Primary
    let primary = listener::bind_stream(&host, port)
        .and_then(|l| mark_cloexec(&l).map(|()| l))
        .map_err(|e| bind_error(ListenerKind::Primary, port, e))?;
    let primary_addr = primary
        .local_addr()
        .map_err(|e| bind_error(ListenerKind::Primary, port, e))?;
    let primary_state = ListenerState::new(ListenerKind::Primary, primary_addr);
    supervisor.register(ListenerHandle::new(
        format!("{} main", handler.name()),
        Arc::clone(&primary_state),
    ));
    info!(address = %primary_addr, handler = handler.name(), "main server started");

    if let Err(e) = start_companions(&host, primary_addr, &handler, aux, supervisor) {
        supervisor.shutdown();
        return Err(e);
    }

    // A cancel that landed before the primary was registered had nothing to wake.
    if supervisor.is_cancelled() {
        warn!("shutdown requested during startup");
        primary_state.wake();
    }

    Ok(PrimaryServer {
        listener: primary,
        state: primary_state,
        handler,
        supervisor: Arc::clone(supervisor),
    })
}

fn start_companions(
    host: &str,
    primary_addr: SocketAddr,
    handler: &Arc<dyn RequestHandler>,
    aux: Option<(AuxHandlerSpec, Arc<dyn RequestHandler>)>,
    supervisor: &Arc<Supervisor>,
) -> Result<(), StartupError> {
    // Companion UDP server on exactly the primary's address
    let udp = UdpSocket::bind(primary_addr)
        .and_then(|s| mark_cloexec(&s).map(|()| s))
        .map_err(|source| StartupError::Bind {
            kind: ListenerKind::Companion,
            host: host.to_string(),
            port: primary_addr.port(),
            source,
        })?;
    let udp_state = ListenerState::new(ListenerKind::Companion, primary_addr);
    {
        let state = Arc::clone(&udp_state);
        let handler = Arc::clone(handler);
        let supervisor = Arc::clone(supervisor);
        thread::Builder::new()
            .name("udp-server".to_string())
            .spawn(move || listener::serve_datagrams(&udp, &state, &handler, &supervisor))
            .map_err(|source| StartupError::Spawn {
                kind: ListenerKind::Companion,
                source,
            })?;
    }
    supervisor.register(ListenerHandle::new(
        format!("{} udp", handler.name()),
        udp_state,
    ));
    info!(address = %primary_addr, "udp server started");

    let Some((spec, aux_handler)) = aux else {
        return Ok(());
    };

    let aux_listener = listener::bind_stream(host, spec.port)
        .and_then(|l| mark_cloexec(&l).map(|()| l))
        .and_then(|l| l.local_addr().map(|addr| (l, addr)))
        .map_err(|source| StartupError::Bind {
            kind: ListenerKind::Auxiliary,
            host: host.to_string(),
            port: spec.port,
            source,
        })?;
    let (aux_listener, aux_addr) = aux_listener;
    let aux_state = ListenerState::new(ListenerKind::Auxiliary, aux_addr);
    {
        let state = Arc::clone(&aux_state);
        let handler = Arc::clone(&aux_handler);
        let supervisor = Arc::clone(supervisor);
        thread::Builder::new()
            .name("aux-server".to_string())
            .spawn(move || listener::serve_stream(&aux_listener, &state, &handler, &supervisor))
            .map_err(|source| StartupError::Spawn {
                kind: ListenerKind::Auxiliary,
                source,
            })?;
    }
    supervisor.register(ListenerHandle::new(
        spec.handler.clone(),
        aux_state,
    ));
    info!(address = %aux_addr, handler = %spec.handler, "auxiliary server started");

    Ok(())
}

fn mark_cloexec(socket: &impl AsRawFd) -> io::Result<()> {
    set_cloexec(socket.as_raw_fd())
}
