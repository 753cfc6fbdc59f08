//! Two modules wired through the broker: one emits a random number to
//! every destination each step, the other prints what it receives.
//!
//! ```text
//! cargo run --example random_pair -- -d 5000 -c 5001 -s 2
//! ```

use std::time::Duration;

use neuromux::{
    Broker, Configuration, Connectivity, Kernel, LinkDir, Manager, Module, ModuleId, NetMode,
    Outbox, Payload,
};

struct RandomEmitter;

impl Kernel for RandomEmitter {
    fn run_step(&mut self) {
        // Stand-in for real per-step compute.
        std::thread::sleep(Duration::from_millis(10));
    }

    fn put_out_data(&mut self, out_ids: &[ModuleId], outbox: &mut Outbox) {
        for id in out_ids {
            outbox.put(id.clone(), Payload::Doubles(vec![rand::random::<f64>()]));
        }
    }
}

struct Printer;

impl Kernel for Printer {
    fn get_in_data(&mut self, inbox: &[(ModuleId, Payload)]) {
        for (src, payload) in inbox {
            if let Payload::Doubles(values) = payload {
                println!("received from {}: {:?}", src, values);
            }
        }
    }
}

fn main() {
    let config = Configuration::from_args(std::env::args().skip(1)).unwrap_or_else(|error| {
        eprintln!("error: {}", error);
        std::process::exit(1);
    });
    if config.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    neuromux::setup_logger();

    let mut manager =
        Manager::new(config.port_data, config.port_ctrl).expect("failed to create manager");
    manager
        .add_broker(Broker::new(config.port_data, config.port_ctrl).expect("bad broker ports"))
        .expect("failed to add broker");

    let m1 = manager
        .add_module(
            Module::new(
                NetMode::None,
                config.port_data,
                config.port_ctrl,
                Box::new(RandomEmitter),
            )
            .expect("bad module ports"),
        )
        .expect("failed to add module");
    let m2 = manager
        .add_module(
            Module::new(
                NetMode::None,
                config.port_data,
                config.port_ctrl,
                Box::new(Printer),
            )
            .expect("bad module ports"),
        )
        .expect("failed to add module");

    let mut conn = Connectivity::new(3, 3).expect("bad connectivity shape");
    for port in 0..3 {
        conn.link(port, port).expect("in range");
    }
    manager
        .connect(&m1, &m2, conn, LinkDir::Forward)
        .expect("failed to connect modules");

    manager.start().expect("failed to start emulation");
    std::thread::sleep(Duration::from_secs(config.run_secs));
    manager.stop().expect("failed to stop emulation");
    println!("all done");
}
