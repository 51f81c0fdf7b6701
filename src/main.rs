use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    match args.get_command() {
        cli::Commands::Serve => {
            commands::serve::execute(&args.config).await?;
        }
        cli::Commands::Ship => {
            commands::ship::execute(&args.config).await?;
        }
        cli::Commands::Check => {
            commands::check::execute(&args.config)?;
        }
        cli::Commands::Version => {
            println!("Scoring Gateway v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
