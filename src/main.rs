use gossip_kv::{NodeAddress, NodeOptions, Simulation};
use std::path::PathBuf;

// Demo: 4 nodes join, store a key, lose the key's primary, and still serve it.
//
// Usage: gossip-kv [LOG_DIR]. Logs go to stdout unless a directory is given.
fn main() {
    let logger = match std::env::args().nth(1).map(PathBuf::from) {
        Some(directory) => match gossip_kv::create_root_logger_for_file(&directory, "gossip-kv") {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("Failed to open a log file in {}: {}", directory.display(), e);
                std::process::exit(1);
            }
        },
        None => gossip_kv::create_root_logger_for_stdout(),
    };

    let mut sim = match Simulation::new(logger.clone(), 4, NodeOptions::default()) {
        Ok(sim) => sim,
        Err(e) => {
            slog::crit!(logger, "Failed to initialize nodes: {}", e);
            std::process::exit(1);
        }
    };

    sim.start_all();
    sim.run_ticks(10);

    let coordinator = NodeAddress::new(2, 0);
    let primary = match create_and_locate(&logger, &mut sim, coordinator, "foo", "bar") {
        Some(primary) => primary,
        None => std::process::exit(1),
    };

    slog::info!(logger, "Killing primary {} of \"foo\"", primary);
    sim.kill(primary);
    sim.run_ticks(30);

    let reader = sim
        .addresses()
        .into_iter()
        .find(|address| *address != primary)
        .unwrap_or(coordinator);
    if let Some(node) = sim.node_mut(reader) {
        if let Err(e) = node.read("foo") {
            slog::error!(logger, "Read failed to start: {}", e);
        }
    }
    sim.run_ticks(5);
    if let Some(node) = sim.node_mut(reader) {
        for outcome in node.take_outcomes() {
            slog::info!(logger, "{} {:?} -> {:?}", outcome.kind, outcome.key, outcome.result);
        }
    }
}

fn create_and_locate(
    logger: &slog::Logger,
    sim: &mut Simulation,
    coordinator: NodeAddress,
    key: &str,
    value: &str,
) -> Option<NodeAddress> {
    let node = sim.node_mut(coordinator)?;
    let primary = node.ring().replicas_for(key).ok()?.primary();
    node.create(key, value).ok()?;

    sim.run_ticks(5);
    for outcome in sim.node_mut(coordinator)?.take_outcomes() {
        slog::info!(logger, "{} {:?} -> {:?}", outcome.kind, outcome.key, outcome.result);
    }

    Some(primary)
}
