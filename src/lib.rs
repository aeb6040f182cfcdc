#[macro_use]
extern crate rocket;

pub mod api;
pub mod cache;
pub mod config;
pub mod images;
pub mod ingest;
pub mod lifecycle;
pub mod models;
pub mod storage;
pub mod store;

use std::sync::Arc;

use rocket::figment::Figment;
use rocket::{Build, Rocket};

use cache::DerivativeCache;
use config::AppConfig;
use images::{ImageCodec, OutputLimits, PathResolver, Transformer};
use ingest::{IngestLimits, Ingestor};
use store::RecordStore;

/// Assemble the server around an injected record store.
pub fn build_rocket(figment: Figment, config: AppConfig, store: Arc<dyn RecordStore>) -> Rocket<Build> {
    let resolver = PathResolver::new(&config.storage_root);
    let codec: Arc<dyn Transformer> = Arc::new(ImageCodec::new(OutputLimits::from(&config)));
    let cache = DerivativeCache::new(codec.clone());
    let ingestor = Ingestor::new(
        store.clone(),
        resolver.clone(),
        codec,
        IngestLimits::from(&config),
    );

    rocket::custom(figment)
        .manage(store)
        .manage(resolver)
        .manage(cache)
        .manage(ingestor)
        .manage(config)
        .mount(
            "/image",
            routes![api::images::upload_image, api::images::download_image],
        )
        .mount("/user", routes![api::users::create_user])
        .mount("/project", routes![api::users::create_project])
}
