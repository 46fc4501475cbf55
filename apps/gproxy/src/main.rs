mod cli;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = cli::Cli::parse();
    let global = cli::resolve_global_config(&cli)?;
    let host = global.host.clone();
    let port = global.port;

    let state = gproxy_core::bootstrap(global).await?;
    gproxy_core::spawn_background_refresh(state.clone());

    let app = gproxy_router::proxy_router(state);

    let bind = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "gproxy listening");
    axum::serve(listener, app).await?;
    Ok(())
}
