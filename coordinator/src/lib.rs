//! Wires TileStore, StorageWorker, Leaseboard, Dispatcher, and TileServer
//! into one running coordinator process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use tilecoord_config::CoordinatorConfig;
use tilecoord_core::{
    monotonic_millis, DEFAULT_LEASE_TTL_MS, DEFAULT_SWEEP_PERIOD_MS, DISPATCHER_BACKLOG,
    TILESERVER_BACKLOG,
};
use tilecoord_leaseboard::{Leaseboard, OwnedLevel};
use tilecoord_storage_worker::StorageHandle;
use tilecoord_store::TileStore;

/// Binds a non-blocking TCP listener with an explicit OS-level backlog,
/// then hands it to tokio. `TcpListener::bind` alone leaves the backlog at
/// whatever default the platform picks.
fn bind_with_backlog(addr: SocketAddr, backlog: i32) -> anyhow::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(TcpListener::from_std(socket.into())?)
}

/// The listeners and shared state of a running coordinator, returned so
/// callers (tests, or `main`) can drive or observe it.
pub struct Bootstrapped {
    pub leaseboard: Arc<Leaseboard>,
    pub storage: StorageHandle,
    pub dispatcher_addr: SocketAddr,
    pub tileserver_addr: SocketAddr,
}

/// Build an `EnvFilter` from the four per-channel log toggles. Each channel
/// gets its own directive: `info` enables info-and-above (which already
/// covers error), `error` restricts to error-only, and both disabled turns
/// the channel off entirely.
pub fn build_env_filter(config: &CoordinatorConfig) -> EnvFilter {
    let directive = |log_info: bool, log_error: bool| -> &'static str {
        match (log_info, log_error) {
            (true, _) => "info",
            (false, true) => "error",
            (false, false) => "off",
        }
    };

    let filter = format!(
        "tilecoord_dispatcher={},tilecoord_tileserver={}",
        directive(config.distributer_log_info, config.distributer_log_error),
        directive(config.data_server_log_info, config.data_server_log_error),
    );
    EnvFilter::new(filter)
}

pub fn init_tracing(config: &CoordinatorConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(config))
        .init();
}

/// Open storage, spawn the StorageWorker, seed and construct the
/// Leaseboard, and start both TCP listeners and the sweeper task. Returns
/// once both listeners are bound and accepting.
pub async fn bootstrap(config: &CoordinatorConfig) -> anyhow::Result<Bootstrapped> {
    let store = TileStore::open(config.data_dir())?;
    let storage = tilecoord_storage_worker::spawn(store)?;

    let owned_levels: Vec<OwnedLevel> = config
        .levels
        .iter()
        .map(|spec| OwnedLevel {
            level: spec.level,
            max_depth: spec.max_depth,
        })
        .collect();
    let level_ids: Vec<u32> = owned_levels.iter().map(|l| l.level).collect();

    let seed_entries = storage.enumerate(level_ids).await?;
    let leaseboard = Arc::new(Leaseboard::new(owned_levels, DEFAULT_LEASE_TTL_MS, &seed_entries)?);

    let dispatcher_listener = bind_with_backlog(config.distributer_socket_addr()?, DISPATCHER_BACKLOG)?;
    let dispatcher_addr = dispatcher_listener.local_addr()?;
    let tileserver_listener = bind_with_backlog(config.data_server_socket_addr()?, TILESERVER_BACKLOG)?;
    let tileserver_addr = tileserver_listener.local_addr()?;

    let read_timeout = config.read_timeout();

    let lb = Arc::clone(&leaseboard);
    let storage_for_dispatcher = storage.clone();
    tokio::spawn(async move {
        if let Err(e) = tilecoord_dispatcher::serve(dispatcher_listener, lb, storage_for_dispatcher, read_timeout).await {
            tracing::error!(error = %e, "dispatcher accept loop exited");
        }
    });

    let storage_for_tileserver = storage.clone();
    tokio::spawn(async move {
        if let Err(e) = tilecoord_tileserver::serve(tileserver_listener, storage_for_tileserver, read_timeout).await {
            tracing::error!(error = %e, "tileserver accept loop exited");
        }
    });

    let lb = Arc::clone(&leaseboard);
    tokio::spawn(sweeper(lb));

    Ok(Bootstrapped {
        leaseboard,
        storage,
        dispatcher_addr,
        tileserver_addr,
    })
}

async fn sweeper(leaseboard: Arc<Leaseboard>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(DEFAULT_SWEEP_PERIOD_MS));
    loop {
        ticker.tick().await;
        leaseboard.sweep(monotonic_millis());
    }
}
