//! Command table listing.

use anyhow::Result;

use gondola_core::command_table::standard_registry;

pub fn cmd_list() -> Result<()> {
    let registry = standard_registry()?;
    println!("═══════════════════════════════════════");
    println!("  Commands ({})", registry.len());
    println!("═══════════════════════════════════════");
    for command in registry.commands() {
        println!("  {:>3}  {}", command.number(), command.signature());
        if !command.doc().is_empty() {
            println!("       {}", command.doc());
        }
    }
    println!("\n  Destinations: all, widefield, narrowfield, lidar, super, 0-7");
    Ok(())
}
