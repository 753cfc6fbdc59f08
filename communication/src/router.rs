//! The bound side of the bus: accepts dealers and addresses them by
//! identity.

use std::collections::HashMap;
use std::io::BufReader;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::message::ModuleId;
use crate::networking;
use crate::Result;

/// One registered connection: its outbound queue, plus a stream handle
/// retained so shutdown can unblock the peer's reader and writer.
struct Peer {
    outbound: Sender<Vec<u8>>,
    stream: TcpStream,
}

type PeerMap = Arc<Mutex<HashMap<ModuleId, Peer>>>;
type ThreadList = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// A bound endpoint that speaks to many identified dealers.
///
/// Every accepted connection is registered under the identity it announced
/// in its handshake; inbound frames from all connections are merged into a
/// single channel as `(identity, frame)` pairs. Frame order from one dealer
/// is preserved; order across dealers is arbitrary. Each connection gets a
/// dedicated reader thread and a dedicated writer thread, so neither
/// receiving from nor sending to one peer can stall traffic for another.
pub struct Router {
    port: u16,
    peers: PeerMap,
    threads: ThreadList,
    events: Receiver<(ModuleId, Vec<u8>)>,
    stopping: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl Router {
    /// Binds the router on the given TCP port. Port 0 picks an ephemeral
    /// port, available afterwards from [`Router::port`].
    pub fn bind(port: u16) -> Result<Router> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let port = listener.local_addr()?.port();
        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        let threads: ThreadList = Arc::new(Mutex::new(Vec::new()));
        let stopping = Arc::new(AtomicBool::new(false));
        let (tx, rx) = unbounded();

        let accept = {
            let peers = Arc::clone(&peers);
            let threads = Arc::clone(&threads);
            let stopping = Arc::clone(&stopping);
            std::thread::Builder::new()
                .name(format!("router :{}", port))
                .spawn(move || accept_loop(listener, peers, threads, stopping, tx))?
        };

        log::debug!("router bound on port {}", port);
        Ok(Router {
            port,
            peers,
            threads,
            events: rx,
            stopping,
            accept: Some(accept),
        })
    }

    /// The port the router is bound on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sends one frame to the dealer with the given identity.
    ///
    /// The frame is handed to the peer's writer thread and this call
    /// returns immediately; a peer that stops draining its socket stalls
    /// only its own writer. Frames addressed to unknown or disconnected
    /// identities are dropped silently.
    pub fn send(&self, to: &ModuleId, frame: &[u8]) {
        let peers = self.peers.lock().expect("peer map poisoned");
        match peers.get(to) {
            Some(peer) => {
                if peer.outbound.send(frame.to_vec()).is_err() {
                    log::debug!("router: peer {} writer gone, frame dropped", to);
                }
            }
            None => log::debug!("router: no peer {}, frame dropped", to),
        }
    }

    /// The merged inbound channel. Cloneable, so it can feed a `select!`.
    pub fn events(&self) -> &Receiver<(ModuleId, Vec<u8>)> {
        &self.events
    }

    /// Waits up to `timeout` for the next inbound frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<(ModuleId, Vec<u8>)> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Identities currently connected.
    pub fn peer_ids(&self) -> Vec<ModuleId> {
        self.peers
            .lock()
            .expect("peer map poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Shutting the streams unblocks the peer threads; clearing the map
        // drops the outbound queues, which ends the writers.
        {
            let mut peers = self.peers.lock().expect("peer map poisoned");
            for peer in peers.values() {
                let _ = peer.stream.shutdown(Shutdown::Both);
            }
            peers.clear();
        }
        // Wake the accept loop so it can observe the stop flag.
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
        // The accept loop has exited, so no new peer threads can appear.
        let handles: Vec<_> = self
            .threads
            .lock()
            .expect("thread list poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    peers: PeerMap,
    threads: ThreadList,
    stopping: Arc<AtomicBool>,
    tx: Sender<(ModuleId, Vec<u8>)>,
) {
    loop {
        let (mut stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(_) => break,
        };
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        if stream.set_nodelay(true).is_err() {
            continue;
        }
        let identity = match networking::recv_handshake(&mut stream) {
            Ok(bytes) => ModuleId::from_bytes(&bytes),
            Err(error) => {
                log::debug!("router: rejecting connection from {}: {}", addr, error);
                continue;
            }
        };
        let (writer_stream, shutdown_stream) = match (stream.try_clone(), stream.try_clone()) {
            (Ok(writer), Ok(shutdown)) => (writer, shutdown),
            _ => continue,
        };
        let (out_tx, out_rx) = unbounded();
        peers.lock().expect("peer map poisoned").insert(
            identity.clone(),
            Peer {
                outbound: out_tx,
                stream: shutdown_stream,
            },
        );
        log::debug!("router: registered peer {} from {}", identity, addr);

        let reader = {
            let tx = tx.clone();
            let peers = Arc::clone(&peers);
            let identity = identity.clone();
            std::thread::Builder::new()
                .name(format!("router recv {}", identity))
                .spawn(move || read_loop(stream, identity, tx, peers))
        };
        let writer = {
            let peers = Arc::clone(&peers);
            let identity = identity.clone();
            std::thread::Builder::new()
                .name(format!("router send {}", identity))
                .spawn(move || write_loop(writer_stream, identity, out_rx, peers))
        };
        match (reader, writer) {
            (Ok(reader), Ok(writer)) => {
                let mut threads = threads.lock().expect("thread list poisoned");
                threads.push(reader);
                threads.push(writer);
            }
            (reader, writer) => {
                log::debug!("router: failed to spawn peer threads for {}", identity);
                if let Some(peer) = peers.lock().expect("peer map poisoned").remove(&identity) {
                    let _ = peer.stream.shutdown(Shutdown::Both);
                }
                for spawned in [reader, writer] {
                    if let Ok(handle) = spawned {
                        threads.lock().expect("thread list poisoned").push(handle);
                    }
                }
            }
        }
    }
}

fn read_loop(
    stream: TcpStream,
    identity: ModuleId,
    tx: Sender<(ModuleId, Vec<u8>)>,
    peers: PeerMap,
) {
    let mut reader = BufReader::new(stream);
    loop {
        match networking::recv_frame(&mut reader) {
            Ok(frame) => {
                if tx.send((identity.clone(), frame)).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    peers.lock().expect("peer map poisoned").remove(&identity);
    log::debug!("router: peer {} disconnected", identity);
}

fn write_loop(
    mut stream: TcpStream,
    identity: ModuleId,
    outbound: Receiver<Vec<u8>>,
    peers: PeerMap,
) {
    while let Ok(frame) = outbound.recv() {
        if let Err(error) = networking::send_frame(&mut stream, &frame) {
            log::debug!("router: dropping peer {}: {}", identity, error);
            peers.lock().expect("peer map poisoned").remove(&identity);
            break;
        }
    }
}
