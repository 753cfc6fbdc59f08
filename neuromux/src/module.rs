//! Processing modules.
//!
//! A [`Module`] repeatedly executes an injected compute [`Kernel`] until a
//! `quit` frame arrives on its control socket. Every loop iteration drains
//! the inbound buffer into the kernel, runs one compute step, lets the
//! kernel populate the outbound buffer, and then synchronizes with the
//! broker: exactly one frame per output peer goes out (a null payload
//! stands in for peers with nothing addressed to them this step) and the
//! module blocks until one frame per input peer has come in. The broker
//! holds every frame until a full round has arrived, which is what makes
//! the per-peer exchange a global barrier.

use std::collections::HashMap;
use std::fmt;

use crossbeam_channel::{select, TryRecvError};

use neuromux_communication::{
    CommunicationError, CtrlBody, DataBody, Dealer, ModuleId, Payload, CMD_QUIT,
};

use crate::connectivity::Connectivity;
use crate::errors::{Error, Result};
use crate::process::ControlledProcess;
use crate::uid::fresh_id;
use crate::LINGER_TIME;

/// A module's role in the data plane.
///
/// Promotion is monotone: wiring a module as a source or destination can
/// only widen its role, never narrow it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NetMode {
    /// No sockets at all.
    None,
    /// Control socket only; data sync is skipped.
    Ctrl,
    /// Receives data.
    In,
    /// Sends data.
    Out,
    /// Sends and receives data.
    Full,
}

impl NetMode {
    /// The mode after this module gains an input peer.
    pub fn promote_in(self) -> NetMode {
        match self {
            NetMode::None => NetMode::In,
            NetMode::Out => NetMode::Full,
            other => other,
        }
    }

    /// The mode after this module gains an output peer.
    pub fn promote_out(self) -> NetMode {
        match self {
            NetMode::None => NetMode::Out,
            NetMode::In => NetMode::Full,
            other => other,
        }
    }

    /// Whether the mode receives data.
    pub fn wants_in(self) -> bool {
        matches!(self, NetMode::In | NetMode::Full)
    }

    /// Whether the mode sends data.
    pub fn wants_out(self) -> bool {
        matches!(self, NetMode::Out | NetMode::Full)
    }
}

impl fmt::Display for NetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetMode::None => "none",
            NetMode::Ctrl => "ctrl",
            NetMode::In => "in",
            NetMode::Out => "out",
            NetMode::Full => "full",
        };
        f.write_str(name)
    }
}

/// Which side of a module a connectivity object attaches to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnDir {
    /// The peer feeds this module.
    In,
    /// This module feeds the peer.
    Out,
}

/// Handle through which a kernel addresses its output peers.
pub struct Outbox<'a> {
    entries: &'a mut Vec<(ModuleId, Payload)>,
}

impl Outbox<'_> {
    /// Addresses `payload` to the peer `dst` this step.
    ///
    /// At most one payload per destination per step; a second entry for the
    /// same peer is detected during synchronization and terminates the
    /// module.
    pub fn put(&mut self, dst: ModuleId, payload: Payload) {
        self.entries.push((dst, payload));
    }
}

/// The injected per-step computation.
///
/// All methods have do-nothing defaults, so a kernel only overrides the
/// phases it participates in. `()` is the trivial kernel.
pub trait Kernel: Send {
    /// Absorbs the data received last step; called once per loop iteration
    /// with one entry per peer that sent a non-null payload.
    fn get_in_data(&mut self, _inbox: &[(ModuleId, Payload)]) {
        log::debug!("retrieving input");
    }

    /// Performs one step of computation.
    fn run_step(&mut self) {
        log::debug!("running execution step");
    }

    /// Populates the outbound buffer; peers in `out_ids` left unaddressed
    /// receive a null payload automatically.
    fn put_out_data(&mut self, _out_ids: &[ModuleId], _outbox: &mut Outbox) {
        log::debug!("populating output buffer");
    }
}

impl Kernel for () {}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Quit,
}

struct Endpoints {
    ctrl: Option<Dealer>,
    data: Option<Dealer>,
}

/// One participant of the emulation.
pub struct Module {
    id: ModuleId,
    net: NetMode,
    port_data: u16,
    port_ctrl: u16,
    in_data: Vec<(ModuleId, Payload)>,
    out_data: Vec<(ModuleId, Payload)>,
    conn_in: HashMap<ModuleId, Connectivity>,
    conn_out: HashMap<ModuleId, Connectivity>,
    kernel: Box<dyn Kernel>,
}

impl Module {
    /// Creates a module with the given data-plane role and ports.
    ///
    /// The data and control ports must differ.
    pub fn new(
        net: NetMode,
        port_data: u16,
        port_ctrl: u16,
        kernel: Box<dyn Kernel>,
    ) -> Result<Module> {
        if port_data == port_ctrl {
            return Err(Error::invalid("data and control ports must differ"));
        }
        Ok(Module {
            id: fresh_id(),
            net,
            port_data,
            port_ctrl,
            in_data: Vec::new(),
            out_data: Vec::new(),
            conn_in: HashMap::new(),
            conn_out: HashMap::new(),
            kernel,
        })
    }

    /// The module's bus identity.
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// The module's data-plane role.
    pub fn net(&self) -> NetMode {
        self.net
    }

    pub(crate) fn set_net(&mut self, net: NetMode) {
        log::info!("module {}: net status changed: {} -> {}", self.id, self.net, net);
        self.net = net;
    }

    /// Attaches a connectivity object describing the link with `peer`.
    pub fn add_conn(&mut self, conn: Connectivity, dir: ConnDir, peer: ModuleId) {
        match dir {
            ConnDir::In => self.conn_in.insert(peer, conn),
            ConnDir::Out => self.conn_out.insert(peer, conn),
        };
    }

    /// Ids of the modules feeding this one.
    pub fn in_ids(&self) -> Vec<ModuleId> {
        self.conn_in.keys().cloned().collect()
    }

    /// Ids of the modules this one feeds.
    pub fn out_ids(&self) -> Vec<ModuleId> {
        self.conn_out.keys().cloned().collect()
    }

    /// The connectivity attached for `peer`, if any.
    pub fn conn(&self, dir: ConnDir, peer: &ModuleId) -> Option<&Connectivity> {
        match dir {
            ConnDir::In => self.conn_in.get(peer),
            ConnDir::Out => self.conn_out.get(peer),
        }
    }

    fn init_net(&self) -> Result<Endpoints> {
        if self.net == NetMode::None {
            log::info!("module {}: not initializing network connection", self.id);
            return Ok(Endpoints {
                ctrl: None,
                data: None,
            });
        }
        log::info!("module {}: initializing network connection", self.id);
        let ctrl = Dealer::connect(
            &format!("localhost:{}", self.port_ctrl),
            &self.id,
            LINGER_TIME,
        )?;
        let data = if self.net == NetMode::Ctrl {
            None
        } else {
            Some(Dealer::connect(
                &format!("localhost:{}", self.port_data),
                &self.id,
                LINGER_TIME,
            )?)
        };
        log::info!("module {}: network connection initialized", self.id);
        Ok(Endpoints {
            ctrl: Some(ctrl),
            data,
        })
    }

    /// Handles one control frame: `quit` stops the module; anything else is
    /// acknowledged and otherwise ignored.
    fn handle_ctrl(&self, ctrl: &mut Dealer, frame: &[u8]) -> Result<Flow> {
        let body = match CtrlBody::decode(frame) {
            Ok(body) => body,
            Err(error) => {
                log::warn!("module {}: malformed control frame: {}", self.id, error);
                ctrl.send(&CtrlBody::ack().encode()?)?;
                return Ok(Flow::Continue);
            }
        };
        log::info!("module {}: recv: {}", self.id, body.command);
        ctrl.send(&CtrlBody::ack().encode()?)?;
        log::debug!("module {}: sent ack", self.id);
        if body.is(CMD_QUIT) {
            Ok(Flow::Quit)
        } else {
            Ok(Flow::Continue)
        }
    }

    /// Drains any control frames that arrived since the last step.
    fn poll_ctrl(&self, net: &mut Endpoints) -> Result<Flow> {
        let ctrl = match net.ctrl.as_mut() {
            Some(ctrl) => ctrl,
            None => return Ok(Flow::Continue),
        };
        loop {
            let frame = match ctrl.events().try_recv() {
                Ok(frame) => frame,
                Err(TryRecvError::Empty) => return Ok(Flow::Continue),
                Err(TryRecvError::Disconnected) => {
                    return Err(CommunicationError::Disconnected.into())
                }
            };
            if self.handle_ctrl(ctrl, &frame)? == Flow::Quit {
                return Ok(Flow::Quit);
            }
        }
    }

    /// Sends output data and receives input data for this step.
    ///
    /// The send phase emits exactly one frame per output peer: buffered
    /// payloads first, then null payloads for every peer the kernel left
    /// unaddressed. The receive phase blocks until one frame per input
    /// peer has arrived, discarding null payloads; a frame from a peer not
    /// (or no longer) expected this step is a protocol violation. Control
    /// frames are still serviced while blocked.
    fn sync(&mut self, net: &mut Endpoints) -> Result<Flow> {
        if !self.net.wants_out() && !self.net.wants_in() {
            log::debug!("module {}: not synchronizing with network", self.id);
            return Ok(Flow::Continue);
        }
        log::debug!("module {}: synchronizing with network", self.id);

        if self.net.wants_out() {
            let data = net
                .data
                .as_mut()
                .ok_or_else(|| Error::protocol("data socket missing"))?;
            let mut to_send = self.out_ids();
            for (dst, payload) in self.out_data.drain(..) {
                match to_send.iter().position(|id| id == &dst) {
                    Some(index) => {
                        to_send.swap_remove(index);
                    }
                    None => {
                        return Err(Error::protocol(format!(
                            "module {}: destination {} duplicated or not an output peer",
                            self.id, dst
                        )))
                    }
                }
                let body = DataBody {
                    peer: dst.clone(),
                    payload: Some(payload),
                };
                data.send(&body.encode()?)?;
                log::debug!("module {}: sent to {}", self.id, dst);
            }
            for dst in to_send {
                let body = DataBody {
                    peer: dst.clone(),
                    payload: None,
                };
                data.send(&body.encode()?)?;
                log::debug!("module {}: sent to {}: none", self.id, dst);
            }
            log::debug!("module {}: sent data to all output peers", self.id);
        }

        if self.net.wants_in() {
            let data_rx = net
                .data
                .as_ref()
                .ok_or_else(|| Error::protocol("data socket missing"))?
                .events()
                .clone();
            let ctrl_rx = net
                .ctrl
                .as_ref()
                .ok_or_else(|| Error::protocol("control socket missing"))?
                .events()
                .clone();
            let mut to_recv = self.in_ids();
            self.in_data.clear();
            while !to_recv.is_empty() {
                select! {
                    recv(data_rx) -> frame => {
                        let frame = frame.map_err(|_| CommunicationError::Disconnected)?;
                        let body = DataBody::decode(&frame)?;
                        let src = body.peer;
                        match to_recv.iter().position(|id| id == &src) {
                            Some(index) => {
                                to_recv.swap_remove(index);
                            }
                            None => {
                                return Err(Error::protocol(format!(
                                    "module {}: unexpected or duplicate source {}",
                                    self.id, src
                                )))
                            }
                        }
                        log::debug!("module {}: recv from {}", self.id, src);
                        if let Some(payload) = body.payload {
                            self.in_data.push((src, payload));
                        }
                    }
                    recv(ctrl_rx) -> frame => {
                        let frame = frame.map_err(|_| CommunicationError::Disconnected)?;
                        let ctrl = net
                            .ctrl
                            .as_mut()
                            .ok_or_else(|| Error::protocol("control socket missing"))?;
                        if self.handle_ctrl(ctrl, &frame)? == Flow::Quit {
                            return Ok(Flow::Quit);
                        }
                    }
                }
            }
            log::debug!("module {}: recv data from all input peers", self.id);
        }

        Ok(Flow::Continue)
    }
}

impl ControlledProcess for Module {
    fn id(&self) -> &ModuleId {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "module"
    }

    fn run(&mut self) -> Result<()> {
        log::info!("module {}: starting", self.id);
        let mut net = self.init_net()?;
        loop {
            if self.poll_ctrl(&mut net)? == Flow::Quit {
                break;
            }
            let inbox = std::mem::take(&mut self.in_data);
            self.kernel.get_in_data(&inbox);
            self.kernel.run_step();
            self.out_data.clear();
            let out_ids = self.out_ids();
            let mut outbox = Outbox {
                entries: &mut self.out_data,
            };
            self.kernel.put_out_data(&out_ids, &mut outbox);
            if self.sync(&mut net)? == Flow::Quit {
                break;
            }
        }
        // The quit ack may still be in flight; close with linger.
        if let Some(data) = net.data.take() {
            data.close();
        }
        if let Some(ctrl) = net.ctrl.take() {
            ctrl.close();
        }
        log::info!("module {}: exiting", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(mode: NetMode) -> u8 {
        match mode {
            NetMode::None => 0,
            NetMode::Ctrl | NetMode::In | NetMode::Out => 1,
            NetMode::Full => 2,
        }
    }

    #[test]
    fn promotions_never_demote() {
        let all = [
            NetMode::None,
            NetMode::Ctrl,
            NetMode::In,
            NetMode::Out,
            NetMode::Full,
        ];
        for mode in all {
            assert!(rank(mode.promote_in()) >= rank(mode));
            assert!(rank(mode.promote_out()) >= rank(mode));
            assert!(mode.promote_in().wants_in() || mode == NetMode::Ctrl);
            assert!(mode.promote_out().wants_out() || mode == NetMode::Ctrl);
        }
    }

    #[test]
    fn promotion_lattice() {
        assert_eq!(NetMode::None.promote_in(), NetMode::In);
        assert_eq!(NetMode::None.promote_out(), NetMode::Out);
        assert_eq!(NetMode::In.promote_out(), NetMode::Full);
        assert_eq!(NetMode::Out.promote_in(), NetMode::Full);
        assert_eq!(NetMode::Full.promote_in(), NetMode::Full);
        assert_eq!(NetMode::Full.promote_out(), NetMode::Full);
        assert_eq!(NetMode::In.promote_in(), NetMode::In);
        assert_eq!(NetMode::Out.promote_out(), NetMode::Out);
    }

    #[test]
    fn equal_ports_are_rejected() {
        assert!(matches!(
            Module::new(NetMode::None, 5000, 5000, Box::new(())),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn conn_maps_track_peers() {
        let mut module = Module::new(NetMode::None, 5000, 5001, Box::new(())).unwrap();
        let peer_in = ModuleId::new("upstream");
        let peer_out = ModuleId::new("downstream");
        module.add_conn(
            Connectivity::new(2, 2).unwrap(),
            ConnDir::In,
            peer_in.clone(),
        );
        module.add_conn(
            Connectivity::new(2, 2).unwrap(),
            ConnDir::Out,
            peer_out.clone(),
        );
        assert_eq!(module.in_ids(), vec![peer_in.clone()]);
        assert_eq!(module.out_ids(), vec![peer_out.clone()]);
        assert!(module.conn(ConnDir::In, &peer_in).is_some());
        assert!(module.conn(ConnDir::Out, &peer_in).is_none());
    }

    #[test]
    fn outbox_appends_entries() {
        let mut entries = Vec::new();
        let mut outbox = Outbox {
            entries: &mut entries,
        };
        outbox.put(ModuleId::new("a"), Payload::bytes(&b"x"[..]));
        outbox.put(ModuleId::new("a"), Payload::bytes(&b"y"[..]));
        assert_eq!(entries.len(), 2);
    }
}
