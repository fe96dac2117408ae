//! qubit bridge traffic simulation

use anyhow::Result;
use colored::Colorize;
use qubit_bridge_channel::EprMode;
use qubit_bridge_sim::{scenarios, SimulationPresets};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("{}", "Qubit Bridge Simulation".bright_blue().bold());
    println!("{}", "=======================".bright_blue());
    println!();

    let test_scenarios = vec![
        ("Rich Entanglement", SimulationPresets::rich_entanglement()),
        ("Scarce Entanglement", SimulationPresets::scarce_entanglement()),
        ("Requested Entanglement", SimulationPresets::manual_entanglement()),
        ("No Entanglement", SimulationPresets::no_entanglement()),
        ("Slow Link", SimulationPresets::slow_link()),
    ];

    let mut failures = 0;
    for (name, config) in test_scenarios {
        println!("{}", format!("\n>>> Testing: {}", name).bright_green().bold());
        println!("MTU: {} bytes", config.mtu);
        if config.epr_enabled && config.epr_mode == EprMode::Manual {
            println!("EPR distribution: on request");
        } else if config.epr_enabled {
            println!("EPR period: {:?}", config.epr_period);
        } else {
            println!("EPR distribution: disabled");
        }
        println!("Qubit latency: {:?}", config.link.qubit_latency);
        println!();

        let report = scenarios::traffic_test(config, 64, 48).await?;
        report.print();
        failures += report.mismatches;

        println!("{}", "Test complete!".bright_yellow());
        println!("{}", "-".repeat(50));
    }

    if failures > 0 {
        println!("\n{}", format!("{} packets arrived corrupted", failures).bright_red().bold());
        anyhow::bail!("{} corrupted packets", failures);
    }
    println!("\n{}", "All simulations complete!".bright_green().bold());
    Ok(())
}
