//! End-to-end emulation scenarios: full manager/broker/module topologies
//! over loopback TCP. Every test uses its own port pair so the scenarios
//! can run concurrently.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use neuromux::{
    Broker, Connectivity, Error, Kernel, LinkDir, Manager, Module, ModuleId, NetMode, Outbox,
    Payload,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

fn pair(port_data: u16, port_ctrl: u16) -> (Manager, ModuleId) {
    let mut manager = Manager::new(port_data, port_ctrl).unwrap();
    let broker = manager
        .add_broker(Broker::new(port_data, port_ctrl).unwrap())
        .unwrap();
    (manager, broker)
}

/// Emits a scripted payload per step (then `repeat` forever) to every
/// output peer, and reports every inbox it is handed.
struct ScriptKernel {
    script: Vec<Option<Payload>>,
    repeat: Option<Payload>,
    inbox_tx: Option<Sender<Vec<(ModuleId, Payload)>>>,
    pace: Duration,
    step: usize,
}

impl ScriptKernel {
    fn emitter(script: Vec<Option<Payload>>, repeat: Option<Payload>, pace: Duration) -> Self {
        ScriptKernel {
            script,
            repeat,
            inbox_tx: None,
            pace,
            step: 0,
        }
    }

    fn recorder(pace: Duration) -> (Self, Receiver<Vec<(ModuleId, Payload)>>) {
        let (tx, rx) = mpsc::channel();
        (
            ScriptKernel {
                script: Vec::new(),
                repeat: None,
                inbox_tx: Some(tx),
                pace,
                step: 0,
            },
            rx,
        )
    }

    fn with_inbox(mut self) -> (Self, Receiver<Vec<(ModuleId, Payload)>>) {
        let (tx, rx) = mpsc::channel();
        self.inbox_tx = Some(tx);
        (self, rx)
    }
}

impl Kernel for ScriptKernel {
    fn get_in_data(&mut self, inbox: &[(ModuleId, Payload)]) {
        if let Some(tx) = &self.inbox_tx {
            let _ = tx.send(inbox.to_vec());
        }
    }

    fn run_step(&mut self) {
        if !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }
    }

    fn put_out_data(&mut self, out_ids: &[ModuleId], outbox: &mut Outbox) {
        let payload = match self.script.get(self.step) {
            Some(entry) => entry.clone(),
            None => self.repeat.clone(),
        };
        if let Some(payload) = payload {
            for id in out_ids {
                outbox.put(id.clone(), payload.clone());
            }
        }
        self.step += 1;
    }
}

/// Emits its step index to every output peer; reports received indices
/// with their arrival instants, and optionally its own step ticks.
struct CounterKernel {
    data_tx: Option<Sender<(f64, Instant)>>,
    tick_tx: Option<Sender<f64>>,
    pace: Duration,
    step: f64,
}

impl CounterKernel {
    fn new(pace: Duration) -> Self {
        CounterKernel {
            data_tx: None,
            tick_tx: None,
            pace,
            step: 0.0,
        }
    }

    fn with_data(mut self) -> (Self, Receiver<(f64, Instant)>) {
        let (tx, rx) = mpsc::channel();
        self.data_tx = Some(tx);
        (self, rx)
    }

    fn with_ticks(mut self) -> (Self, Receiver<f64>) {
        let (tx, rx) = mpsc::channel();
        self.tick_tx = Some(tx);
        (self, rx)
    }
}

impl Kernel for CounterKernel {
    fn get_in_data(&mut self, inbox: &[(ModuleId, Payload)]) {
        if let Some(tx) = &self.data_tx {
            for (_, payload) in inbox {
                if let Payload::Doubles(values) = payload {
                    let _ = tx.send((values[0], Instant::now()));
                }
            }
        }
    }

    fn run_step(&mut self) {
        if !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }
        if let Some(tx) = &self.tick_tx {
            let _ = tx.send(self.step);
        }
    }

    fn put_out_data(&mut self, out_ids: &[ModuleId], outbox: &mut Outbox) {
        for id in out_ids {
            outbox.put(id.clone(), Payload::Doubles(vec![self.step]));
        }
        self.step += 1.0;
    }
}

/// Addresses the same destination twice in one step.
struct DupKernel;

impl Kernel for DupKernel {
    fn put_out_data(&mut self, out_ids: &[ModuleId], outbox: &mut Outbox) {
        let dst = out_ids[0].clone();
        outbox.put(dst.clone(), Payload::bytes(&b"one"[..]));
        outbox.put(dst, Payload::bytes(&b"two"[..]));
    }
}

fn add_module(manager: &mut Manager, ports: (u16, u16), kernel: Box<dyn Kernel>) -> ModuleId {
    manager
        .add_module(Module::new(NetMode::None, ports.0, ports.1, kernel).unwrap())
        .unwrap()
}

fn conn() -> Connectivity {
    let mut conn = Connectivity::new(3, 3).unwrap();
    conn.link(0, 0).unwrap();
    conn
}

/// Collects flattened inbox entries until `want` have been seen.
fn collect_entries(
    rx: &Receiver<Vec<(ModuleId, Payload)>>,
    want: usize,
) -> Vec<(ModuleId, Payload)> {
    let mut entries = Vec::new();
    while entries.len() < want {
        let inbox = rx.recv_timeout(RECV_TIMEOUT).expect("no inbox delivered");
        entries.extend(inbox);
    }
    entries
}

#[test]
fn unidirectional_pair_delivers_in_order() {
    let ports = (24110, 24111);
    let (mut manager, _broker) = pair(ports.0, ports.1);

    let script = vec![
        Some(Payload::bytes(&b"a"[..])),
        Some(Payload::bytes(&b"b"[..])),
        Some(Payload::bytes(&b"c"[..])),
    ];
    let m1 = add_module(
        &mut manager,
        ports,
        Box::new(ScriptKernel::emitter(script, None, Duration::from_millis(1))),
    );
    let (recorder, inboxes) = ScriptKernel::recorder(Duration::ZERO);
    let m2 = add_module(&mut manager, ports, Box::new(recorder));

    manager.connect(&m1, &m2, conn(), LinkDir::Forward).unwrap();
    assert_eq!(manager.module(&m1).unwrap().net(), NetMode::Out);
    assert_eq!(manager.module(&m2).unwrap().net(), NetMode::In);

    manager.start().unwrap();
    let entries = collect_entries(&inboxes, 3);
    assert_eq!(
        &entries[..3],
        &[
            (m1.clone(), Payload::bytes(&b"a"[..])),
            (m1.clone(), Payload::bytes(&b"b"[..])),
            (m1.clone(), Payload::bytes(&b"c"[..])),
        ]
    );
    manager.stop().unwrap();
}

#[test]
fn null_payloads_are_suppressed() {
    let ports = (24120, 24121);
    let (mut manager, _broker) = pair(ports.0, ports.1);

    // M1 emits nothing; M2 emits "x" every step; both are full duplex.
    let (quiet, m1_inboxes) =
        ScriptKernel::emitter(Vec::new(), None, Duration::ZERO).with_inbox();
    let m1 = add_module(&mut manager, ports, Box::new(quiet));
    let (chatty, m2_inboxes) = ScriptKernel::emitter(
        Vec::new(),
        Some(Payload::bytes(&b"x"[..])),
        Duration::ZERO,
    )
    .with_inbox();
    let m2 = add_module(&mut manager, ports, Box::new(chatty));

    manager.connect(&m1, &m2, conn(), LinkDir::Both).unwrap();
    assert_eq!(manager.module(&m1).unwrap().net(), NetMode::Full);
    assert_eq!(manager.module(&m2).unwrap().net(), NetMode::Full);

    manager.start().unwrap();

    // M1 sees exactly one entry per step, always ("m2", "x").
    let entries = collect_entries(&m1_inboxes, 3);
    for entry in &entries[..3] {
        assert_eq!(entry, &(m2.clone(), Payload::bytes(&b"x"[..])));
    }

    // M2 sees nothing at all: M1's null payloads are suppressed.
    let mut m2_calls = 0;
    while m2_calls < 5 {
        let inbox = m2_inboxes.recv_timeout(RECV_TIMEOUT).expect("m2 stalled");
        assert!(inbox.is_empty(), "m2 should never receive a payload");
        m2_calls += 1;
    }
    manager.stop().unwrap();
}

#[test]
fn barrier_holds_under_skew() {
    let ports = (24130, 24131);
    let (mut manager, _broker) = pair(ports.0, ports.1);

    let slow = CounterKernel::new(Duration::from_millis(30));
    let m1 = add_module(&mut manager, ports, Box::new(slow));
    let (fast, arrivals) = CounterKernel::new(Duration::ZERO).with_data();
    let m2 = add_module(&mut manager, ports, Box::new(fast));

    manager.connect(&m1, &m2, conn(), LinkDir::Forward).unwrap();
    manager.start().unwrap();

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(arrivals.recv_timeout(RECV_TIMEOUT).expect("m2 starved"));
    }
    manager.stop().unwrap();

    // Step k+1 is never observed before step k.
    let values: Vec<f64> = received.iter().map(|(value, _)| *value).collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    // The receiver is paced by the sender: five steps cannot complete
    // faster than the sender's compute time allows.
    let elapsed = received.last().unwrap().1 - received.first().unwrap().1;
    assert!(
        elapsed >= Duration::from_millis(4 * 20),
        "receiver outpaced the barrier: {:?}",
        elapsed
    );
}

#[test]
fn ring_of_four_stays_in_lockstep() {
    let ports = (24140, 24141);
    let (mut manager, _broker) = pair(ports.0, ports.1);

    let mut ids = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..4 {
        let (kernel, rx) = CounterKernel::new(Duration::ZERO).with_data();
        ids.push(add_module(&mut manager, ports, Box::new(kernel)));
        receivers.push(rx);
    }
    for index in 0..4 {
        let src = ids[index].clone();
        let dst = ids[(index + 1) % 4].clone();
        manager.connect(&src, &dst, conn(), LinkDir::Forward).unwrap();
    }
    for id in &ids {
        assert_eq!(manager.module(id).unwrap().net(), NetMode::Full);
    }

    manager.start().unwrap();
    for rx in &receivers {
        let mut values = Vec::new();
        while values.len() < 10 {
            let (value, _) = rx.recv_timeout(RECV_TIMEOUT).expect("ring stalled");
            values.push(value);
        }
        let expected: Vec<f64> = (0..10).map(f64::from).collect();
        assert_eq!(values, expected);
    }
    manager.stop().unwrap();
}

#[test]
fn clean_shutdown_joins_every_child() {
    let ports = (24150, 24151);
    let (mut manager, _broker) = pair(ports.0, ports.1);

    let m1 = add_module(
        &mut manager,
        ports,
        Box::new(ScriptKernel::emitter(Vec::new(), None, Duration::from_millis(1))),
    );
    let m2 = add_module(
        &mut manager,
        ports,
        Box::new(ScriptKernel::emitter(Vec::new(), None, Duration::from_millis(1))),
    );
    let m3 = add_module(
        &mut manager,
        ports,
        Box::new(ScriptKernel::emitter(Vec::new(), None, Duration::from_millis(1))),
    );
    manager.connect(&m1, &m2, conn(), LinkDir::Forward).unwrap();
    manager.connect(&m2, &m3, conn(), LinkDir::Forward).unwrap();

    manager.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    manager.stop().unwrap();

    for id in [&m1, &m2, &m3] {
        assert!(
            matches!(manager.module_outcome(id), Some(Ok(()))),
            "module {} did not exit cleanly",
            id
        );
    }
}

#[test]
fn duplicate_destination_terminates_only_the_offender() {
    let ports = (24160, 24161);
    let (mut manager, _broker) = pair(ports.0, ports.1);

    let bad = add_module(&mut manager, ports, Box::new(DupKernel));
    let (sink_kernel, _sink_inboxes) = ScriptKernel::recorder(Duration::ZERO);
    let sink = add_module(&mut manager, ports, Box::new(sink_kernel));

    let (ticker, ticks) = CounterKernel::new(Duration::from_millis(1)).with_ticks();
    let src = add_module(&mut manager, ports, Box::new(ticker));
    let (receiver, _rx) = CounterKernel::new(Duration::ZERO).with_data();
    let dst = add_module(&mut manager, ports, Box::new(receiver));

    manager.connect(&bad, &sink, conn(), LinkDir::Forward).unwrap();
    manager.connect(&src, &dst, conn(), LinkDir::Forward).unwrap();

    manager.start().unwrap();

    // The offender dies on its first sync with a protocol violation.
    assert!(manager.join_module(&bad, Duration::from_secs(5)).unwrap());
    assert!(matches!(
        manager.module_outcome(&bad),
        Some(Err(Error::ProtocolViolation(_)))
    ));

    // The unrelated sender keeps stepping after the offender is gone:
    // discard everything it reported so far, then require fresh ticks.
    while ticks.try_recv().is_ok() {}
    let first = ticks.recv_timeout(RECV_TIMEOUT).expect("sender stalled");
    let mut last = first;
    for _ in 0..10 {
        last = ticks.recv_timeout(RECV_TIMEOUT).expect("sender stalled");
    }
    assert!(last > first);

    // The stalled receiver is alive, just blocked at the barrier.
    assert!(!manager.join_module(&dst, Duration::from_millis(100)).unwrap());

    // The offender has been joined already, so the quit drain skips it and
    // shutdown completes.
    manager.stop().unwrap();
}
