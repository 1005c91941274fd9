//! Juniper JunOS example
//!
//! Connects to a JunOS device (optionally through a bastion), prints what
//! the prober found and runs any commands given on the command line.
//!
//! # Usage
//!
//! ```bash
//! JUNIPER_HOST=10.0.0.1 JUNIPER_USER=admin JUNIPER_PASSWORD=secret \
//!     cargo run --example junos_facts -- "show system uptime"
//! ```
//!
//! Through a jump host:
//! ```bash
//! JUNIPER_HOST=10.0.0.1 JUNIPER_USER=admin JUNIPER_PASSWORD=secret \
//! JUNIPER_BASTION_HOST=10.0.0.254 JUNIPER_BASTION_PASSWORD=jump \
//!     cargo run --example junos_facts
//! ```
//!
//! Without a device, against the built-in simulator:
//! ```bash
//! cargo run --example junos_facts -- --mock "show version"
//! ```

use std::env;

use junossh::{CommandResult, DeviceFacts, DriverBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut mock = false;
    let mut commands = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--mock" | "-m" => mock = true,
            _ => commands.push(arg),
        }
    }

    if mock {
        let mut driver = DriverBuilder::new("mock").build_mock()?;
        driver.open().await?;
        print_facts(driver.platform()?);
        for command in &commands {
            print_result(&driver.run_command(command).await?);
        }
        driver.close().await?;
    } else {
        let mut driver = DriverBuilder::from_env()?.build()?;
        println!("Connecting to {}...", driver.config().socket_addr());
        driver.open().await?;
        if let Some(strategy) = driver.strategy() {
            println!("Bastion strategy: {}", strategy.name());
        }
        print_facts(driver.platform()?);
        println!("Identifier: {}\n", driver.unique_identifier().await?);
        for command in &commands {
            print_result(&driver.run_command(command).await?);
        }
        driver.close().await?;
    }

    Ok(())
}

fn print_facts(facts: &DeviceFacts) {
    println!("Hostname: {}", facts.hostname);
    println!("Model:    {}", facts.model);
    println!("Version:  {} ({})", facts.version, facts.family);
    println!("Arch:     {}", facts.arch);
    println!();
}

fn print_result(result: &CommandResult) {
    println!("=== {} ===", result.command);
    if result.is_success() {
        println!("{}", result.stdout);
    } else {
        eprintln!("{}", result.stderr);
    }
    println!("({:?})\n", result.elapsed);
}
