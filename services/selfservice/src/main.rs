use std::sync::Arc;

use chrono::Utc;
use sea_orm::Database;
use tracing::{error, info};

use tessera_core::tracing::init_tracing;
use tessera_selfservice::config::SelfServiceConfig;
use tessera_selfservice::domain::code::CodeGenerator;
use tessera_selfservice::router::build_router;
use tessera_selfservice::state::AppState;
use tessera_selfservice::usecase::flow::SweepExpiredFlowsUseCase;

#[tokio::main]
async fn main() {
    init_tracing("info");

    let config = SelfServiceConfig::from_env();

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let generator =
        CodeGenerator::new(&config.code_secrets).expect("CODE_SECRETS must not be empty");

    let state = AppState {
        db,
        nid: config.network_id,
        generator: Arc::new(generator),
        settings: config.flow_settings(),
    };

    let sweeper = state.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let usecase = SweepExpiredFlowsUseCase {
                flows: sweeper.flow_repo(),
                codes: sweeper.code_repo(),
            };
            if let Err(e) = usecase.execute(Utc::now()).await {
                error!(error = ?e, "expired flow sweep failed");
            }
        }
    });

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    info!("selfservice listening on {addr}");
    axum::serve(listener, router).await.expect("server error");
}
