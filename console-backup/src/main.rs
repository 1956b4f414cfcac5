use actix_web::{middleware::Logger, web, App, HttpServer};
use dashmap::DashMap;
use dotenv::dotenv;
use std::sync::Arc;

use console_backup::api::{ResourceApi, RestResourceApi};
use console_backup::backup::SnapshotStore;
use console_backup::config::Config;
use console_backup::{controllers, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    let context = config
        .restore_context()
        .expect("CONSOLE_PROJECT_ID must be set");
    log::info!("Backing up {} (reasoning engines in {})", context.scope(), context.reasoning_engine_scope());

    let api: Arc<dyn ResourceApi> = Arc::new(
        RestResourceApi::new(
            &config.discovery_api_url,
            &config.aiplatform_api_url,
            config.access_token.clone(),
        )
        .expect("Failed to initialize resource API client"),
    );
    if config.access_token.is_none() {
        log::warn!("CONSOLE_ACCESS_TOKEN not set, API calls will be unauthenticated");
    }

    let objects = config.object_store().expect("Failed to initialize snapshot storage");
    let store = Arc::new(SnapshotStore::new(objects, &config.backup_bucket, &config.backup_prefix));
    log::info!(
        "Snapshots stored in {} bucket {} under {}",
        store.backend_name(),
        store.bucket(),
        config.backup_prefix
    );

    let restores_in_flight = Arc::new(DashMap::new());

    log::info!("Starting server on port {}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(AppState {
                config: config.clone(),
                api: Arc::clone(&api),
                store: Arc::clone(&store),
                context: context.clone(),
                restores_in_flight: Arc::clone(&restores_in_flight),
            }))
            .wrap(Logger::default())
            .configure(controllers::health::config)
            .configure(controllers::backups::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
