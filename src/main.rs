use std::fs;
use std::path::Path;

use clap::Parser;

mod models;
mod repositories;
pub mod services;
pub mod settings;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let settings = settings::Settings::new(&args.config).expect("Could not load config file.");

    init_logging(&args.log4rs).expect("Failed to initialize logging.");
    log::info!("Starting AdEarn ledger.");
    if !settings.settlement_enabled() {
        log::warn!("settlement.api_key is empty, settlement endpoint is disabled.");
    }

    let ledger = repositories::connect(&settings.storage)
        .await
        .expect("Could not open ledger storage.");

    services::start_services(ledger, settings).await
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
