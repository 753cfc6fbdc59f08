//! Command-line configuration for runnable emulation entry points.

use crate::{PORT_CTRL, PORT_DATA};

/// Ports and run parameters for an emulation binary.
#[derive(Clone, Debug)]
pub struct Configuration {
    /// TCP port for the data plane.
    pub port_data: u16,
    /// TCP port for the control plane.
    pub port_ctrl: u16,
    /// How many seconds to let the emulation run before stopping it.
    pub run_secs: u64,
    /// Whether to raise the log filter to `debug`.
    pub verbose: bool,
}

impl Configuration {
    /// Constructs a configuration by parsing supplied text arguments.
    ///
    /// Most commonly, this uses `std::env::args().skip(1)` as the supplied
    /// iterator.
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<Configuration, String> {
        let mut opts = getopts::Options::new();
        opts.optopt("d", "port-data", "TCP port for the data plane", "PORT");
        opts.optopt("c", "port-ctrl", "TCP port for the control plane", "PORT");
        opts.optopt("s", "secs", "seconds to run before stopping", "NUM");
        opts.optflag("v", "verbose", "enable debug logging");

        let matches = opts.parse(args).map_err(|e| format!("{:?}", e))?;

        let port_data = matches
            .opt_str("d")
            .map(|x| x.parse().map_err(|e| format!("bad data port: {}", e)))
            .transpose()?
            .unwrap_or(PORT_DATA);
        let port_ctrl = matches
            .opt_str("c")
            .map(|x| x.parse().map_err(|e| format!("bad control port: {}", e)))
            .transpose()?
            .unwrap_or(PORT_CTRL);
        let run_secs = matches
            .opt_str("s")
            .map(|x| x.parse().map_err(|e| format!("bad seconds: {}", e)))
            .transpose()?
            .unwrap_or(1);
        let verbose = matches.opt_present("v");

        if port_data == port_ctrl {
            return Err("data and control ports must differ".to_owned());
        }

        Ok(Configuration {
            port_data,
            port_ctrl,
            run_secs,
            verbose,
        })
    }
}
