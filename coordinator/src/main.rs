use tilecoord_config::CoordinatorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CoordinatorConfig::parse_args();
    config.validate()?;

    tilecoord_coordinator::init_tracing(&config);

    let running = tilecoord_coordinator::bootstrap(&config).await?;
    tracing::info!(
        dispatcher = %running.dispatcher_addr,
        tileserver = %running.tileserver_addr,
        "coordinator running",
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, exiting");
    Ok(())
}
