//! The message broker.
//!
//! One broker routes every data frame of the emulation. It accepts frames
//! from all modules on a bound data endpoint and holds them until one
//! frame has arrived for every edge of the routing table; only then does
//! it deliver the whole round, in arrival order. Since no module can begin
//! its next step before receiving its inputs for the current one, holding
//! the round back is what realizes the global barrier.

use crossbeam_channel::select;

use neuromux_communication::{
    CommunicationError, CtrlBody, DataBody, Dealer, ModuleId, Payload, Router, CMD_QUIT,
};

use crate::errors::{Error, Result};
use crate::process::ControlledProcess;
use crate::routing::RoutingTable;
use crate::uid::fresh_id;
use crate::LINGER_TIME;

/// Frames accepted this round, in arrival order.
type Pending = Vec<(ModuleId, ModuleId, Option<Payload>)>;

/// Barrier state for one delivery round.
struct Round {
    pending: Pending,
    awaited: Vec<(ModuleId, ModuleId)>,
}

impl Round {
    fn new(routing: &RoutingTable) -> Round {
        Round {
            pending: Vec::new(),
            awaited: routing.coords().to_vec(),
        }
    }

    /// Records one frame. A frame for an edge still awaited this round is
    /// queued; anything else (an edge not in the routing table, or a
    /// duplicate for this round) is ignored. When the last awaited edge
    /// arrives, the completed round is returned in arrival order and the
    /// state resets for the next round.
    fn accept(
        &mut self,
        routing: &RoutingTable,
        in_id: ModuleId,
        out_id: ModuleId,
        payload: Option<Payload>,
    ) -> Option<Pending> {
        if let Some(index) = self
            .awaited
            .iter()
            .position(|(src, dst)| src == &in_id && dst == &out_id)
        {
            self.awaited.swap_remove(index);
            self.pending.push((in_id, out_id, payload));
        }
        if self.awaited.is_empty() {
            let complete = std::mem::take(&mut self.pending);
            self.awaited = routing.coords().to_vec();
            Some(complete)
        } else {
            None
        }
    }
}

/// Routes per-step frames between modules and enforces the barrier.
pub struct Broker {
    id: ModuleId,
    port_data: u16,
    port_ctrl: u16,
    routing: RoutingTable,
}

impl Broker {
    /// Creates a broker serving the given data and control ports.
    ///
    /// The ports must differ. The routing table is installed by the
    /// manager when the emulation starts.
    pub fn new(port_data: u16, port_ctrl: u16) -> Result<Broker> {
        if port_data == port_ctrl {
            return Err(Error::invalid("data and control ports must differ"));
        }
        Ok(Broker {
            id: fresh_id(),
            port_data,
            port_ctrl,
            routing: RoutingTable::new(),
        })
    }

    /// The broker's bus identity.
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// The data-plane port the broker binds.
    pub fn port_data(&self) -> u16 {
        self.port_data
    }

    /// The control-plane port the broker dials.
    pub fn port_ctrl(&self) -> u16 {
        self.port_ctrl
    }

    pub(crate) fn set_routing_table(&mut self, routing: RoutingTable) {
        self.routing = routing;
    }

    fn handle_data(&self, router: &Router, round: &mut Round, in_id: ModuleId, frame: Vec<u8>) {
        let body = match DataBody::decode(&frame) {
            Ok(body) => body,
            Err(error) => {
                log::info!("broker {}: skipping malformed message: {}", self.id, error);
                return;
            }
        };
        let out_id = body.peer;
        log::debug!("broker {}: recv from {} for {}", self.id, in_id, out_id);

        if let Some(complete) = round.accept(&self.routing, in_id, out_id, body.payload) {
            log::debug!("broker {}: recv from all modules", self.id);
            for (in_id, out_id, payload) in complete {
                let body = DataBody {
                    peer: in_id,
                    payload,
                };
                match body.encode() {
                    Ok(bytes) => router.send(&out_id, &bytes),
                    Err(error) => {
                        log::warn!("broker {}: failed to encode frame: {}", self.id, error)
                    }
                }
                log::debug!("broker {}: sent to {}", self.id, out_id);
            }
        }
    }
}

impl ControlledProcess for Broker {
    fn id(&self) -> &ModuleId {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "broker"
    }

    fn run(&mut self) -> Result<()> {
        log::info!("broker {}: starting", self.id);
        let router = Router::bind(self.port_data)?;
        let mut ctrl = Dealer::connect(
            &format!("localhost:{}", self.port_ctrl),
            &self.id,
            LINGER_TIME,
        )?;

        let mut round = Round::new(&self.routing);
        let data_rx = router.events().clone();
        let ctrl_rx = ctrl.events().clone();

        loop {
            select! {
                recv(data_rx) -> event => {
                    let (in_id, frame) =
                        event.map_err(|_| Error::from(CommunicationError::Disconnected))?;
                    self.handle_data(&router, &mut round, in_id, frame);
                }
                recv(ctrl_rx) -> frame => {
                    let frame =
                        frame.map_err(|_| Error::from(CommunicationError::Disconnected))?;
                    let body = match CtrlBody::decode(&frame) {
                        Ok(body) => body,
                        Err(error) => {
                            log::warn!("broker {}: malformed control frame: {}", self.id, error);
                            ctrl.send(&CtrlBody::ack().encode()?)?;
                            continue;
                        }
                    };
                    log::info!("broker {}: recv: {}", self.id, body.command);
                    ctrl.send(&CtrlBody::ack().encode()?)?;
                    if body.is(CMD_QUIT) {
                        break;
                    }
                }
            }
        }
        log::info!("broker {}: exiting", self.id);
        Ok(())
    }
}
