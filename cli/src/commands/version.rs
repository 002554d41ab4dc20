//! `didiff version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("didiff version {}", didiff_core::VERSION);
    println!("runtime {}", didiff_runtime::VERSION);
    Ok(())
}
