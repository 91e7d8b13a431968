use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courseforge::api::router;
use courseforge::config::Config;
use courseforge::db;
use courseforge::sandbox::ProcessSandbox;
use courseforge::services::Grader;
use courseforge::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "courseforge=debug,tower_http=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::new_from_env()?;

    let pool = db::connect(&config.database_url).await?;

    let sandbox = Arc::new(ProcessSandbox::new(config.sandbox.program.clone()));
    info!(
        program = %config.sandbox.program,
        timeout_ms = config.sandbox.timeout.as_millis() as u64,
        max_parallel = config.sandbox.max_parallel,
        "sandbox configured"
    );

    let state = AppState {
        db: pool,
        grader: Grader::new(sandbox, &config.sandbox),
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
