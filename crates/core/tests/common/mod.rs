//! Shared helpers for the end-to-end pipeline tests.

use mips64_core::config::Config;
use mips64_core::sim::RunResult;
use mips64_core::Simulator;

/// Assembles and runs a program to halt under the given configuration.
pub fn run_with(source: &str, config: Config) -> (Simulator, RunResult) {
    let mut sim = Simulator::new(config);
    sim.load(source).expect("program should assemble");
    let result = sim.run_to_halt(10_000).expect("run should not fault");
    (sim, result)
}

/// Assembles and runs a program to halt under the default configuration
/// (no forwarding, flush on branch).
pub fn run(source: &str) -> (Simulator, RunResult) {
    run_with(source, Config::default())
}

/// Default configuration with EX/MEM→EX forwarding enabled.
pub fn forwarding() -> Config {
    let mut config = Config::default();
    config.pipeline.forwarding = true;
    config
}
