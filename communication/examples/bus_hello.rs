use std::time::Duration;

use neuromux_communication::{Dealer, ModuleId, Router};

fn main() {
    env_logger::init();

    let router = Router::bind(0).expect("failed to bind router");
    let addr = format!("localhost:{}", router.port());
    println!("router bound on {}", addr);

    let mut handles = Vec::new();
    for index in 0..4 {
        let addr = addr.clone();
        handles.push(std::thread::spawn(move || {
            let id = ModuleId::new(format!("worker-{}", index));
            let mut dealer =
                Dealer::connect(&addr, &id, Duration::from_millis(10)).expect("connect failed");
            dealer
                .send(format!("hello from {}", id).as_bytes())
                .expect("send failed");
            let reply = dealer.recv().expect("recv failed");
            println!("{}: received <{}>", id, String::from_utf8_lossy(&reply));
        }));
    }

    for _ in 0..4 {
        let (from, frame) = router
            .recv_timeout(Duration::from_secs(5))
            .expect("no frame");
        println!("router: {} says <{}>", from, String::from_utf8_lossy(&frame));
        router.send(&from, b"hello back");
    }

    for handle in handles {
        handle.join().expect("worker panicked");
    }
}
