use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::time::Duration;
use stepruntime::RuntimeConfig;
use stepserver::{build_runtime, configure, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Stepflow Server");

    let config = RuntimeConfig::from_env();
    info!(
        max_active_executions = config.max_active_executions,
        cleanup_after_days = config.cleanup_after_days,
        "Runtime configuration loaded"
    );

    let app_state = web::Data::new(AppState::new(build_runtime(config)));

    info!("✅ Runtime initialized with standard step handlers");

    // Daily retention sweep over finished runs
    let runtime = app_state.runtime.clone();
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            ticker.tick().await;
            let removed = runtime.cleanup_expired().await;
            if removed > 0 {
                info!("Cleaned up {} expired executions", removed);
            }
        }
    });

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
