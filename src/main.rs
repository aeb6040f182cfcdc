use std::env;
use std::sync::Arc;

use dotenv::dotenv;
use env_logger::Env;
use imgvault::config::AppConfig;
use imgvault::store::InMemoryRecordStore;
use log::info;
use rocket::{
    figment::{
        providers::{Format, Toml},
        Figment, Profile,
    },
    Build, Config, Rocket,
};

#[rocket::launch]
async fn rocket() -> Rocket<Build> {
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    // Load config
    let mut figment = Figment::from(Config::default())
        .merge(Toml::file("App.toml").nested());

    if let Ok(root) = env::var("IMGVAULT_STORAGE_ROOT") {
        figment = figment.merge(("storage_root", root));
    }

    figment = figment.select(Profile::from_env_or("APP_PROFILE", "default"));

    let config = match figment.extract::<AppConfig>() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded successfully");
    info!(
        "Storing images under {} (re-encoding uploads over {} bytes or {}px)",
        config.storage_root.display(),
        config.ingest_max_bytes,
        config.ingest_max_dimension
    );

    let store = Arc::new(InMemoryRecordStore::new());

    info!(
        "Starting imgvault API server on {}:{}",
        config.address, config.port
    );

    imgvault::build_rocket(figment, config, store)
}
