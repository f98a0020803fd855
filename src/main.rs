use loopback_call::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    loopback_call::init_tracing(&config.log_filter);

    tracing::info!(
        "Starting loopback call ({:?} engine, {} ICE server(s))",
        config.engine,
        config.ice_servers.len()
    );

    match loopback_call::run(&config).await? {
        Some(stream) => tracing::info!(
            "Remote peer received stream {} with {} track(s)",
            stream.id,
            stream.tracks.len()
        ),
        None => tracing::warn!("Remote peer received no media"),
    }

    Ok(())
}
