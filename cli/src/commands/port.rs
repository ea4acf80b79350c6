//! Port commands - inspect and free local ports.

use anyhow::{bail, Result};
use kubetunnel_core::{PortConflictResolver, SystemPortResolver};

pub async fn owner(port: u16, json: bool) -> Result<()> {
    let resolver = SystemPortResolver::new();
    let info = resolver.get_process_using_port(port).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    match info {
        Some(info) => {
            println!("{:<8} {:<20} COMMAND", "PID", "PROCESS");
            println!(
                "{:<8} {:<20} {}",
                info.pid,
                super::truncate(&info.process_name, 20),
                info.command_line
            );
        }
        None => println!("Nothing is listening on port {}.", port),
    }
    Ok(())
}

pub async fn kill(pid: u32, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to kill PID {} without --yes", pid);
    }

    SystemPortResolver::new().kill_process(pid).await?;
    println!("Killed process {}", pid);
    Ok(())
}
