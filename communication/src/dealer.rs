//! The client side of the bus: an identified endpoint connected to a router.

use std::io::BufReader;
use std::net::{Shutdown, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::message::ModuleId;
use crate::networking;
use crate::{CommunicationError, Result};

const CONNECT_ATTEMPTS: usize = 400;
const CONNECT_DELAY: Duration = Duration::from_millis(25);

/// An identified client endpoint.
///
/// On connect the dealer announces its identity and spawns a reader thread
/// that pushes every inbound frame into a channel, so callers can block on
/// [`Dealer::events`] or select over it together with other sources.
pub struct Dealer {
    identity: ModuleId,
    stream: TcpStream,
    events: Receiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
    linger: Duration,
}

impl Dealer {
    /// Connects to the router at `addr` and performs the identity handshake.
    ///
    /// The connect retries for a while so dealers may start before the
    /// router has bound its port. `linger` bounds how long [`Dealer::close`]
    /// waits for in-flight frames to drain.
    pub fn connect(addr: &str, identity: &ModuleId, linger: Duration) -> Result<Dealer> {
        let mut stream = networking::connect_with_retry(addr, CONNECT_ATTEMPTS, CONNECT_DELAY)?;
        networking::send_handshake(&mut stream, identity.as_bytes())?;

        let (tx, rx) = unbounded();
        let reader_stream = stream.try_clone()?;
        let reader = std::thread::Builder::new()
            .name(format!("dealer {}", identity))
            .spawn(move || read_loop(reader_stream, tx))?;

        log::debug!("dealer {}: connected to {}", identity, addr);
        Ok(Dealer {
            identity: identity.clone(),
            stream,
            events: rx,
            reader: Some(reader),
            linger,
        })
    }

    /// The identity announced at connect time.
    pub fn identity(&self) -> &ModuleId {
        &self.identity
    }

    /// Sends one frame to the router.
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        networking::send_frame(&mut self.stream, frame)
    }

    /// The inbound frame channel. Cloneable, so it can feed a `select!`.
    pub fn events(&self) -> &Receiver<Vec<u8>> {
        &self.events
    }

    /// Blocks until the next inbound frame arrives.
    pub fn recv(&self) -> Result<Vec<u8>> {
        self.events.recv().map_err(|_| CommunicationError::Disconnected)
    }

    /// Shuts the connection down, giving the peer up to the linger interval
    /// to deliver frames already in flight.
    pub fn close(mut self) {
        let _ = self.stream.shutdown(Shutdown::Write);
        std::thread::sleep(self.linger);
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for Dealer {
    fn drop(&mut self) {
        // I/O errors during shutdown are absorbed; the stream may already
        // be gone if the router went away first.
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn read_loop(stream: TcpStream, tx: Sender<Vec<u8>>) {
    let mut reader = BufReader::new(stream);
    loop {
        match networking::recv_frame(&mut reader) {
            Ok(frame) => {
                if tx.send(frame).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}
