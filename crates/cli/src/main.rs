//! MIPS64 pipeline simulator CLI.
//!
//! This binary assembles a MIPS64 source file and runs it to completion,
//! printing registers and pipeline statistics. It performs:
//! 1. **Assembly:** Parse the source; on failure, print every error and exit.
//! 2. **Execution:** Step the pipeline until halt or the cycle budget runs out.
//! 3. **Reporting:** Register dump and stall/commit statistics.

use clap::{Parser, Subcommand};
use std::{fs, process};

use mips64_core::config::Config;
use mips64_core::Simulator;

#[derive(Parser, Debug)]
#[command(
    name = "mipsim",
    author,
    version,
    about = "MIPS64 cycle-accurate pipeline simulator",
    long_about = "Assemble and run a MIPS64 program, observing hazards, stalls, and forwarding.\n\nExamples:\n  mipsim run -f program.s\n  mipsim run -f program.s --forwarding --registers\n  mipsim run -f program.s --config sim.json --trace"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Assemble and run a source file.
    Run {
        /// MIPS64 assembly source file.
        #[arg(short, long)]
        file: String,

        /// JSON configuration file (defaults apply when omitted).
        #[arg(long)]
        config: Option<String>,

        /// Enable EX/MEM→EX forwarding (overrides the config file).
        #[arg(long)]
        forwarding: bool,

        /// Trace cycles and stage occupancy to stderr.
        #[arg(long)]
        trace: bool,

        /// Cycle budget before giving up on a halt.
        #[arg(long, default_value_t = 100_000)]
        max_cycles: u64,

        /// Dump non-zero registers after the run.
        #[arg(long)]
        registers: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            file,
            config,
            forwarding,
            trace,
            max_cycles,
            registers,
        } => cmd_run(file, config, forwarding, trace, max_cycles, registers),
    }
}

fn load_config(path: Option<&str>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    let text = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading config {}: {}", path, e);
        process::exit(1);
    });
    serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("Error parsing config {}: {}", path, e);
        process::exit(1);
    })
}

fn cmd_run(
    file: String,
    config_path: Option<String>,
    forwarding: bool,
    trace: bool,
    max_cycles: u64,
    registers: bool,
) {
    let source = fs::read_to_string(&file).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {}", file, e);
        process::exit(1);
    });

    let mut config = load_config(config_path.as_deref());
    if forwarding {
        config.pipeline.forwarding = true;
    }
    if trace {
        config.general.trace = true;
    }

    println!(
        "[*] {} (forwarding: {}, delayed branches: {})",
        file, config.pipeline.forwarding, config.pipeline.delayed_branches
    );

    let mut sim = Simulator::new(config);
    if let Err(report) = sim.load(&source) {
        eprintln!("{} error(s) while assembling {}:", report.len(), file);
        for error in report.iter() {
            eprintln!("{}:{}", file, error);
        }
        process::exit(1);
    }

    match sim.run_to_halt(max_cycles) {
        Ok(result) => {
            for code in &result.exceptions {
                eprintln!("[!] synchronous exception: {}", code);
            }
            if result.breakpoints > 0 {
                eprintln!("[*] {} breakpoint(s) hit", result.breakpoints);
            }
            if !result.halted {
                eprintln!("[!] no halt within {} cycles", max_cycles);
                sim.cpu.stats.print();
                process::exit(1);
            }
            if registers {
                dump_registers(&sim);
            }
            sim.cpu.stats.print();
        }
        Err(e) => {
            eprintln!("[!] FATAL: {}", e);
            sim.cpu.stats.print();
            process::exit(1);
        }
    }
}

fn dump_registers(sim: &Simulator) {
    let snap = sim.snapshot();
    println!("PC = {:#010x}", snap.pc);
    for (i, value) in snap.gpr.iter().enumerate() {
        if *value != 0 {
            println!("r{:<2} = {:#018x} ({})", i, value, *value as i64);
        }
    }
    for (i, value) in snap.fpr.iter().enumerate() {
        if *value != 0 {
            println!("f{:<2} = {:#018x} ({})", i, value, f64::from_bits(*value));
        }
    }
    if snap.hi != 0 {
        println!("hi  = {:#018x}", snap.hi);
    }
    if snap.lo != 0 {
        println!("lo  = {:#018x}", snap.lo);
    }
}
