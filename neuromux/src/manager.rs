//! The emulation manager.
//!
//! The manager is the driver-side controller: it accepts module, broker,
//! and connectivity registrations, builds the routing table edge by edge
//! through [`Manager::connect`], starts the fleet (broker first, so its
//! data endpoint is bound before any module dials it), and drives clean
//! shutdown over the control plane. It is the only participant that speaks
//! to every child, over a single bound control endpoint; all control
//! exchanges are serialized request/ack pairs.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use neuromux_communication::{CtrlBody, ModuleId, Router};

use crate::broker::Broker;
use crate::connectivity::{ConnId, Connectivity};
use crate::errors::{Error, Result};
use crate::module::{ConnDir, Module, NetMode};
use crate::process::{spawn, ProcessHandle};
use crate::routing::RoutingTable;
use crate::uid::fresh_id;

/// How long one shutdown poll waits for an ack before the quit request is
/// resent.
const CTRL_POLL: Duration = Duration::from_millis(100);
/// Per-child join budget during shutdown; best-effort, a still-running
/// child does not block subsequent joins.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Direction of a connection between two modules.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkDir {
    /// Source feeds destination (`+`).
    Forward,
    /// Destination feeds source (`-`).
    Reverse,
    /// Both directions (`=`).
    Both,
}

impl fmt::Display for LinkDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self {
            LinkDir::Forward => "+",
            LinkDir::Reverse => "-",
            LinkDir::Both => "=",
        };
        f.write_str(sign)
    }
}

/// Owns every participant of one emulation and drives its lifecycle.
pub struct Manager {
    id: ModuleId,
    port_data: u16,
    port_ctrl: u16,
    ctrl: Router,
    brokers: HashMap<ModuleId, Broker>,
    broker_order: Vec<ModuleId>,
    modules: HashMap<ModuleId, Module>,
    module_order: Vec<ModuleId>,
    conns: HashMap<ConnId, Connectivity>,
    routing: RoutingTable,
    broker_handles: Vec<ProcessHandle>,
    module_handles: HashMap<ModuleId, ProcessHandle>,
    started: bool,
}

impl Manager {
    /// Creates a manager and binds its control endpoint on `port_ctrl`.
    ///
    /// The data and control ports must differ.
    pub fn new(port_data: u16, port_ctrl: u16) -> Result<Manager> {
        if port_data == port_ctrl {
            return Err(Error::invalid("data and control ports must differ"));
        }
        let ctrl = Router::bind(port_ctrl)?;
        let id = fresh_id();
        log::info!("manager {}: control endpoint bound on {}", id, port_ctrl);
        Ok(Manager {
            id,
            port_data,
            port_ctrl,
            ctrl,
            brokers: HashMap::new(),
            broker_order: Vec::new(),
            modules: HashMap::new(),
            module_order: Vec::new(),
            conns: HashMap::new(),
            routing: RoutingTable::new(),
            broker_handles: Vec::new(),
            module_handles: HashMap::new(),
            started: false,
        })
    }

    /// The manager's own id.
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// The routing table built so far.
    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing
    }

    /// Number of registered brokers.
    pub fn n_brok(&self) -> usize {
        self.broker_order.len()
    }

    /// Number of registered modules.
    pub fn n_mod(&self) -> usize {
        self.module_order.len()
    }

    /// Number of registered connectivity objects.
    pub fn n_conn(&self) -> usize {
        self.conns.len()
    }

    /// A registered module, by id. Modules move onto their own threads at
    /// start, so this only answers before [`Manager::start`].
    pub fn module(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Ids of all registered modules, in registration order.
    pub fn module_ids(&self) -> &[ModuleId] {
        &self.module_order
    }

    /// Registers a module. Fails after the emulation has started.
    pub fn add_module(&mut self, module: Module) -> Result<ModuleId> {
        self.check_not_started("add a module")?;
        let id = module.id().clone();
        if self.modules.contains_key(&id) {
            return Err(Error::invalid(format!("module {} already registered", id)));
        }
        self.modules.insert(id.clone(), module);
        self.module_order.push(id.clone());
        log::info!("manager {}: added module {}", self.id, id);
        Ok(id)
    }

    /// Registers the broker. At most one broker is permitted; its ports
    /// must match the manager's.
    pub fn add_broker(&mut self, broker: Broker) -> Result<ModuleId> {
        self.check_not_started("add a broker")?;
        if !self.brokers.is_empty() {
            return Err(Error::precondition("only one broker allowed"));
        }
        if broker.port_data() != self.port_data || broker.port_ctrl() != self.port_ctrl {
            return Err(Error::invalid("broker ports must match the manager's"));
        }
        let id = broker.id().clone();
        self.brokers.insert(id.clone(), broker);
        self.broker_order.push(id.clone());
        log::info!("manager {}: added broker {}", self.id, id);
        Ok(id)
    }

    /// Registers a connectivity object. Registering the same object twice
    /// is a no-op.
    pub fn add_conn(&mut self, conn: Connectivity) -> Result<ConnId> {
        self.check_not_started("add a connectivity")?;
        let id = conn.id().clone();
        if self.conns.insert(id.clone(), conn).is_none() {
            log::info!("manager {}: added connectivity {}", self.id, id);
        }
        Ok(id)
    }

    /// Connects two registered modules with a connectivity object.
    ///
    /// `Forward` adds the routing edge `(src, dst)` and wires `conn` as
    /// src's output view and its transpose as dst's input view; `Reverse`
    /// is the mirror image; `Both` does both. Net modes are promoted
    /// accordingly and never demoted. The connectivity is registered
    /// idempotently. Fails after the emulation has started.
    pub fn connect(
        &mut self,
        src: &ModuleId,
        dst: &ModuleId,
        conn: Connectivity,
        dir: LinkDir,
    ) -> Result<ConnId> {
        self.check_not_started("connect modules")?;
        if !self.modules.contains_key(src) {
            return Err(Error::invalid(format!("unknown module {}", src)));
        }
        if !self.modules.contains_key(dst) {
            return Err(Error::invalid(format!("unknown module {}", dst)));
        }

        let conn_id = conn.id().clone();
        let transposed = conn.transpose();
        if !self.conns.contains_key(&conn_id) {
            self.conns.insert(conn_id.clone(), conn.clone());
            log::info!("manager {}: added connectivity {}", self.id, conn_id);
        }
        log::info!(
            "manager {}: connecting {} {} {} via {}",
            self.id,
            src,
            dir,
            dst,
            conn_id
        );

        match dir {
            LinkDir::Forward => {
                self.routing.set(src, dst, true);
                self.promote(src, NetMode::promote_out)?;
                self.promote(dst, NetMode::promote_in)?;
                self.wire(src, conn, ConnDir::Out, dst)?;
                self.wire(dst, transposed, ConnDir::In, src)?;
            }
            LinkDir::Reverse => {
                self.routing.set(dst, src, true);
                self.promote(src, NetMode::promote_in)?;
                self.promote(dst, NetMode::promote_out)?;
                self.wire(src, conn, ConnDir::In, dst)?;
                self.wire(dst, transposed, ConnDir::Out, src)?;
            }
            LinkDir::Both => {
                self.routing.set(src, dst, true);
                self.routing.set(dst, src, true);
                self.promote(src, |_| NetMode::Full)?;
                self.promote(dst, |_| NetMode::Full)?;
                self.wire(src, conn.clone(), ConnDir::Out, dst)?;
                self.wire(dst, transposed.clone(), ConnDir::In, src)?;
                self.wire(src, conn, ConnDir::In, dst)?;
                self.wire(dst, transposed, ConnDir::Out, src)?;
            }
        }
        Ok(conn_id)
    }

    fn promote(&mut self, id: &ModuleId, next: impl Fn(NetMode) -> NetMode) -> Result<()> {
        let module = self
            .modules
            .get_mut(id)
            .ok_or_else(|| Error::invalid(format!("unknown module {}", id)))?;
        let promoted = next(module.net());
        if promoted != module.net() {
            module.set_net(promoted);
        }
        Ok(())
    }

    fn wire(
        &mut self,
        owner: &ModuleId,
        conn: Connectivity,
        dir: ConnDir,
        peer: &ModuleId,
    ) -> Result<()> {
        let module = self
            .modules
            .get_mut(owner)
            .ok_or_else(|| Error::invalid(format!("unknown module {}", owner)))?;
        module.add_conn(conn, dir, peer.clone());
        Ok(())
    }

    /// Starts every broker, then every module, each on its own thread.
    ///
    /// The broker goes first so its data endpoint is bound before modules
    /// dial it. The broker receives a value snapshot of the routing table;
    /// the table cannot change afterwards.
    pub fn start(&mut self) -> Result<()> {
        self.check_not_started("start")?;
        self.started = true;
        log::info!("manager {}: starting all processes", self.id);
        for id in &self.broker_order {
            let mut broker = self
                .brokers
                .remove(id)
                .ok_or_else(|| Error::invalid(format!("unknown broker {}", id)))?;
            broker.set_routing_table(self.routing.clone());
            self.broker_handles.push(spawn(broker)?);
        }
        for id in &self.module_order {
            let module = self
                .modules
                .remove(id)
                .ok_or_else(|| Error::invalid(format!("unknown module {}", id)))?;
            self.module_handles.insert(id.clone(), spawn(module)?);
        }
        Ok(())
    }

    /// Sends one control message to a child and blocks until an ack
    /// arrives.
    ///
    /// This is a single-threaded request/ack protocol; there is no
    /// correlation of acks to requests beyond strict alternation.
    pub fn send_ctrl_msg(&mut self, id: &ModuleId, command: &str, args: Vec<Vec<u8>>) -> Result<()> {
        let body = CtrlBody {
            command: command.to_owned(),
            args,
        };
        self.ctrl.send(id, &body.encode()?);
        log::info!("manager {}: sent to {}: {}", self.id, id, command);
        let (from, _frame) = self
            .ctrl
            .events()
            .recv()
            .map_err(|_| Error::from(neuromux_communication::CommunicationError::Disconnected))?;
        log::info!("manager {}: recv from {}: ack", self.id, from);
        Ok(())
    }

    /// Stops every module, then every broker.
    ///
    /// Quit requests are resent to the head of the remaining set on every
    /// poll timeout until all modules have acknowledged; each acked child
    /// is joined with a best-effort budget. Termination is guaranteed
    /// provided every child honors the quit contract.
    pub fn stop(&mut self) -> Result<()> {
        log::info!("manager {}: stopping all processes", self.id);
        let quit = CtrlBody::quit().encode()?;

        let mut remaining: Vec<ModuleId> = self
            .module_order
            .iter()
            .filter(|id| {
                self.module_handles
                    .get(*id)
                    .is_some_and(|handle| handle.outcome().is_none())
            })
            .cloned()
            .collect();
        while !remaining.is_empty() {
            let head = remaining[0].clone();
            log::debug!("manager {}: sent to {}: quit", self.id, head);
            self.ctrl.send(&head, &quit);
            if let Some((from, _frame)) = self.ctrl.recv_timeout(CTRL_POLL) {
                log::info!("manager {}: recv from {}: ack", self.id, from);
                if let Some(position) = remaining.iter().position(|id| id == &from) {
                    remaining.remove(position);
                    if let Some(handle) = self.module_handles.get_mut(&from) {
                        handle.join(JOIN_TIMEOUT);
                    }
                }
            }
        }
        log::info!("manager {}: all modules stopped", self.id);

        for handle in &mut self.broker_handles {
            if handle.outcome().is_none() {
                log::debug!("manager {}: sent to {}: quit", self.id, handle.id());
                self.ctrl.send(handle.id(), &quit);
                handle.join(JOIN_TIMEOUT);
            }
        }
        log::info!("manager {}: all brokers stopped", self.id);
        Ok(())
    }

    /// Waits up to `timeout` for one spawned module to terminate.
    pub fn join_module(&mut self, id: &ModuleId, timeout: Duration) -> Result<bool> {
        let handle = self
            .module_handles
            .get_mut(id)
            .ok_or_else(|| Error::invalid(format!("module {} is not running", id)))?;
        Ok(handle.join(timeout))
    }

    /// The outcome a module reported at termination, once joined.
    pub fn module_outcome(&self, id: &ModuleId) -> Option<&Result<()>> {
        self.module_handles.get(id).and_then(|handle| handle.outcome())
    }

    fn check_not_started(&self, what: &str) -> Result<()> {
        if self.started {
            Err(Error::precondition(format!(
                "cannot {} after the emulation has started",
                what
            )))
        } else {
            Ok(())
        }
    }
}
