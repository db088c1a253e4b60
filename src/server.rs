//! Connection lifecycle: listen, inbound handshake, live peer set, outbound
//! dial, broadcast/directed send, shutdown. Built on blocking `std::net` +
//! `std::thread`: one accept thread, one reader thread per live session,
//! cooperative shutdown via an `AtomicBool` flag and thread joins.
//!
//! `std::net::TcpListener::accept` has no native timeout. Rather than pull
//! in a socket-options crate for one knob, the accept loop uses a
//! nonblocking listener polled every 10ms (`ACCEPT_POLL_INTERVAL`) — well
//! under the 10-second bound the design calls for, so the loop always
//! notices `running` promptly. The shutdown self-connect is kept anyway:
//! it is a cheap, previously-documented way to guarantee prompt wakeup and
//! it exercises the same "unblock accept" code path a blocking
//! implementation would need.

use std::collections::HashMap;
use std::io::BufReader;
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::envelope::Envelope;
use crate::error::{NodeError, Result};
use crate::framing;
use crate::identity::NodeIdentity;
use crate::peer_registry::PeerRegistry;
use crate::session::{PeerAddress, PeerSession};
use crate::unl::Unl;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A non-owning reference to a running `Server`, handed to announcer
/// functions and reader threads instead of those consumers holding a
/// global singleton.
pub type NodeHandle = Arc<Server>;

type SessionKey = (String, u16);

/// Routing behavior, supplied by the caller so this module never depends
/// on the router directly (avoids a dependency cycle between `server` and
/// `router`).
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, handle: &NodeHandle, session: &Arc<PeerSession>, envelope: Envelope);
}

pub struct Server {
    listener: TcpListener,
    listen_port: u16,
    running: AtomicBool,
    sessions: Mutex<HashMap<SessionKey, Arc<PeerSession>>>,
    identity: NodeIdentity,
    unl: Unl,
    registry: PeerRegistry,
    dispatch: Box<dyn Dispatch>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    reader_threads: Mutex<Vec<JoinHandle<()>>>,
    self_weak: Weak<Server>,
}

impl Server {
    /// Bind the listener and start the accept loop on a dedicated thread,
    /// using the default connect/handshake timeouts.
    pub fn spawn(
        listen_addr: impl ToSocketAddrs,
        identity: NodeIdentity,
        unl: Unl,
        registry: PeerRegistry,
        dispatch: Box<dyn Dispatch>,
    ) -> Result<NodeHandle> {
        Self::spawn_with_timeouts(
            listen_addr,
            identity,
            unl,
            registry,
            dispatch,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_HANDSHAKE_TIMEOUT,
        )
    }

    /// Same as `spawn`, but with the connect/handshake timeouts a
    /// `NodeConfig` may override.
    pub fn spawn_with_timeouts(
        listen_addr: impl ToSocketAddrs,
        identity: NodeIdentity,
        unl: Unl,
        registry: PeerRegistry,
        dispatch: Box<dyn Dispatch>,
        connect_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Result<NodeHandle> {
        let listener = TcpListener::bind(listen_addr).map_err(NodeError::Io)?;
        listener.set_nonblocking(true).map_err(NodeError::Io)?;
        let listen_port = listener.local_addr().map_err(NodeError::Io)?.port();

        let server = Arc::new_cyclic(|weak| Server {
            listener,
            listen_port,
            running: AtomicBool::new(true),
            sessions: Mutex::new(HashMap::new()),
            identity,
            unl,
            registry,
            dispatch,
            connect_timeout,
            handshake_timeout,
            accept_thread: Mutex::new(None),
            reader_threads: Mutex::new(Vec::new()),
            self_weak: weak.clone(),
        });

        let loop_handle = server.clone();
        let accept_thread = thread::spawn(move || run_accept_loop(loop_handle));
        *server.accept_thread.lock().expect("accept_thread mutex poisoned") = Some(accept_thread);

        Ok(server)
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn live_peer_count(&self) -> usize {
        self.sessions.lock().expect("sessions mutex poisoned").len()
    }

    pub fn sessions_snapshot(&self) -> Vec<Arc<PeerSession>> {
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    fn handle(&self) -> NodeHandle {
        self.self_weak
            .upgrade()
            .expect("Server method called while no Arc<Server> is alive")
    }

    /// Dial a peer. Skips if already connected; admits iff the peer's
    /// handshake id is a UNL member. Deliberately does not persist a
    /// registry entry — only inbound `accept` does.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        let key = (host.to_string(), port);
        if self.sessions.lock().expect("sessions mutex poisoned").contains_key(&key) {
            return Err(NodeError::AlreadyConnected(host.to_string(), port));
        }

        let socket_addr = (host, port)
            .to_socket_addrs()
            .map_err(NodeError::Io)?
            .next()
            .ok_or_else(|| NodeError::Handshake(format!("unresolvable address {}:{}", host, port)))?;

        let mut stream = TcpStream::connect_timeout(&socket_addr, self.connect_timeout).map_err(NodeError::Io)?;
        stream.set_read_timeout(Some(self.handshake_timeout)).map_err(NodeError::Io)?;

        framing::send_handshake_id(&mut stream, self.identity.id_pem())?;
        let peer_id = framing::read_handshake_id(&mut stream)?;
        if !self.unl.is_unl(&peer_id) {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(NodeError::NotUnl(peer_id));
        }
        stream.set_read_timeout(None).map_err(NodeError::Io)?;

        let session = Arc::new(PeerSession::new(
            stream,
            peer_id.clone(),
            PeerAddress {
                host: host.to_string(),
                port,
            },
        )?);
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .insert(key, session.clone());
        tracing::info!(peer = %peer_id, %host, port, "outbound peer admitted");

        let reader = spawn_reader(self.handle(), session);
        self.reader_threads.lock().expect("reader_threads mutex poisoned").push(reader);
        Ok(())
    }

    /// Load the peer registry and dial every known peer. Failures are
    /// logged and skipped; one bad entry must not stop the rest.
    pub fn reconnect_known_peers(&self) -> Result<()> {
        let entries = self.registry.load_all()?;
        for entry in entries.values() {
            if let Err(e) = self.connect(&entry.host, entry.port) {
                tracing::warn!(
                    peer = %entry.id, host = %entry.host, port = entry.port, error = %e,
                    "reconnect to known peer failed"
                );
            }
        }
        Ok(())
    }

    /// Sign `envelope` once and write it to every live session except
    /// `except` (a peer id). Per-peer write failures are logged and do not
    /// abort the fan-out.
    pub fn broadcast(&self, envelope: Envelope, except: Option<&str>) {
        let signed = self.identity.sign(envelope);
        let sessions = self.sessions.lock().expect("sessions mutex poisoned");
        for session in sessions.values() {
            if Some(session.id.as_str()) == except {
                continue;
            }
            if let Err(e) = session.send(&signed) {
                tracing::warn!(peer = %session.id, error = %e, "broadcast write failed");
            }
        }
    }

    /// Write `envelope` to exactly one live peer. Signs it unless the
    /// caller already stamped `id`/`signature`.
    pub fn send_to(&self, peer_id: &str, envelope: Envelope) -> Result<()> {
        let signed = if envelope.is_signed() {
            envelope
        } else {
            self.identity.sign(envelope)
        };
        let sessions = self.sessions.lock().expect("sessions mutex poisoned");
        let session = sessions
            .values()
            .find(|s| s.id == peer_id)
            .ok_or_else(|| NodeError::Handshake(format!("no live session for {}", peer_id)))?;
        session.send(&signed)
    }

    /// `running = false`, unblock the accept loop, close every session,
    /// wait out the grace period, then join every thread this server
    /// spawned.
    pub fn shutdown(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let _ = TcpStream::connect(("127.0.0.1", self.listen_port));

        for session in self.sessions.lock().expect("sessions mutex poisoned").values() {
            session.close();
        }

        thread::sleep(SHUTDOWN_GRACE);

        if let Some(handle) = self.accept_thread.lock().expect("accept_thread mutex poisoned").take() {
            let _ = handle.join();
        }
        let mut readers = self.reader_threads.lock().expect("reader_threads mutex poisoned");
        for handle in readers.drain(..) {
            let _ = handle.join();
        }
        self.sessions.lock().expect("sessions mutex poisoned").clear();
        Ok(())
    }
}

fn run_accept_loop(server: NodeHandle) {
    while server.running.load(Ordering::SeqCst) {
        match server.listener.accept() {
            Ok((stream, peer_addr)) => handle_inbound(server.clone(), stream, peer_addr),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept error");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn handle_inbound(server: NodeHandle, mut stream: TcpStream, peer_addr: std::net::SocketAddr) {
    let host = peer_addr.ip().to_string();
    let port = peer_addr.port();

    if server
        .sessions
        .lock()
        .expect("sessions mutex poisoned")
        .contains_key(&(host.clone(), port))
    {
        tracing::info!(%host, port, "rejecting duplicate inbound connection");
        let _ = stream.shutdown(Shutdown::Both);
        return;
    }

    if let Err(e) = stream.set_read_timeout(Some(server.handshake_timeout)) {
        tracing::warn!(error = %e, "failed to set handshake read timeout");
        return;
    }
    if let Err(e) = framing::send_handshake_id(&mut stream, server.identity.id_pem()) {
        tracing::warn!(error = %e, "failed to send handshake id");
        return;
    }
    let peer_id = match framing::read_handshake_id(&mut stream) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "handshake read failed");
            return;
        }
    };
    if !server.unl.is_unl(&peer_id) {
        tracing::info!(peer = %peer_id, %host, port, "rejecting non-UNL peer");
        let _ = stream.shutdown(Shutdown::Both);
        return;
    }
    if let Err(e) = stream.set_read_timeout(None) {
        tracing::warn!(error = %e, "failed to clear read timeout after handshake");
        return;
    }

    let addr = PeerAddress {
        host: host.clone(),
        port,
    };
    let session = match PeerSession::new(stream, peer_id.clone(), addr) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::warn!(error = %e, "failed to establish inbound session");
            return;
        }
    };
    server
        .sessions
        .lock()
        .expect("sessions mutex poisoned")
        .insert((host.clone(), port), session.clone());
    if let Err(e) = server.registry.save(&host, port, &peer_id) {
        tracing::warn!(error = %e, "failed to persist peer registry entry");
    }
    tracing::info!(peer = %peer_id, %host, port, "inbound peer admitted");

    let reader = spawn_reader(server.clone(), session);
    server.reader_threads.lock().expect("reader_threads mutex poisoned").push(reader);
}

fn spawn_reader(handle: NodeHandle, session: Arc<PeerSession>) -> JoinHandle<()> {
    thread::spawn(move || {
        let stream = match session.reader_stream() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to clone session socket for reading");
                return;
            }
        };
        let mut reader = BufReader::new(stream);
        loop {
            match framing::read_frame(&mut reader) {
                Ok(Some(envelope)) => handle.dispatch.dispatch(&handle, &session, envelope),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(peer = %session.id, error = %e, "session read error");
                    break;
                }
            }
        }
        session.close();
        remove_session(&handle, &session);
        tracing::info!(peer = %session.id, "session closed");
    })
}

fn remove_session(handle: &NodeHandle, session: &Arc<PeerSession>) {
    let mut sessions = handle.sessions.lock().expect("sessions mutex poisoned");
    let key = (session.addr.host.clone(), session.addr.port);
    if let Some(existing) = sessions.get(&key) {
        if Arc::ptr_eq(existing, session) {
            sessions.remove(&key);
        }
    }
}
