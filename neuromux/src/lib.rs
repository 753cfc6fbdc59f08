//! Coordination core for parallel emulation of local processing modules.
//!
//! An emulation is a fleet of [`Module`]s, each advancing its own
//! computation one time step at a time on its own thread, exchanging
//! per-step outputs through a single [`Broker`] over a star-topology
//! message bus. The broker enforces a global barrier: no module advances
//! past step `k + 1` until every module has received its step-`k` inputs.
//! A [`Manager`] wires the topology, starts the fleet, delivers control
//! commands to every participant, and shuts the emulation down cleanly.
//!
//! The per-step computation itself is injected through the [`Kernel`]
//! trait; the core only moves data and holds the barrier.
//!
//! ```no_run
//! use neuromux::{Connectivity, Kernel, LinkDir, Manager, Module, NetMode, Outbox};
//! use neuromux::{ModuleId, Payload};
//!
//! struct Shout;
//! impl Kernel for Shout {
//!     fn put_out_data(&mut self, out_ids: &[ModuleId], outbox: &mut Outbox) {
//!         for id in out_ids {
//!             outbox.put(id.clone(), Payload::bytes(&b"hi"[..]));
//!         }
//!     }
//! }
//!
//! let mut manager = Manager::new(neuromux::PORT_DATA, neuromux::PORT_CTRL).unwrap();
//! manager.add_broker(neuromux::Broker::new(neuromux::PORT_DATA, neuromux::PORT_CTRL).unwrap()).unwrap();
//! let m1 = manager.add_module(Module::new(NetMode::None, neuromux::PORT_DATA, neuromux::PORT_CTRL, Box::new(Shout)).unwrap()).unwrap();
//! let m2 = manager.add_module(Module::new(NetMode::None, neuromux::PORT_DATA, neuromux::PORT_CTRL, Box::new(())).unwrap()).unwrap();
//! let conn = Connectivity::new(3, 3).unwrap();
//! manager.connect(&m1, &m2, conn, LinkDir::Forward).unwrap();
//! manager.start().unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! manager.stop().unwrap();
//! ```

pub mod broker;
#[cfg(feature = "getopts")]
pub mod config;
pub mod connectivity;
pub mod errors;
pub mod manager;
pub mod module;
pub mod process;
pub mod routing;
pub mod uid;

use std::time::Duration;

pub use broker::Broker;
#[cfg(feature = "getopts")]
pub use config::Configuration;
pub use connectivity::{ConnId, Connectivity, Polarity};
pub use errors::{Error, Result};
pub use manager::{LinkDir, Manager};
pub use module::{ConnDir, Kernel, Module, NetMode, Outbox};
pub use process::{spawn, ControlledProcess, ProcessHandle};
pub use routing::RoutingTable;

pub use neuromux_communication::{ModuleId, Payload};

/// Default port for the data plane (module <-> broker).
pub const PORT_DATA: u16 = 5000;
/// Default port for the control plane (manager <-> everyone).
pub const PORT_CTRL: u16 = 5001;
/// Grace interval applied when closing sockets, so shutdown does not hang
/// on undeliverable frames.
pub const LINGER_TIME: Duration = Duration::from_millis(10);

/// Initializes `env_logger` with an `info` default filter.
///
/// Convenience for binaries and tests; library code only uses the `log`
/// facade. Calling this more than once is harmless.
pub fn setup_logger() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .try_init();
}
