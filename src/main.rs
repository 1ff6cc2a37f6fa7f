// Moonriver - Terminal console for Klipper printers
use clap::Parser;
use moonriver::cli::{execute_command, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    execute_command(args).await?;
    Ok(())
}
