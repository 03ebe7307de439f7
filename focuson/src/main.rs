use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use focuson::badge::BroadcastBadge;
use focuson::config;
use focuson::coordinator::{BroadcastInjector, Coordinator, Surfaces};
use focuson::ipc::server;
use focuson::notify::DesktopNotifier;
use focuson::scheduler::IntervalScheduler;
use focuson::service::{self, CoordinatorHandle};
use focuson::store::{JsonFileStore, KeyValueStore, MemoryStore, SHARED_STORE_FILE};
use focuson::timer::TimerMachine;
use focuson_ipc::Diagnostics;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn open_store() -> Result<Arc<dyn KeyValueStore>> {
    match config::data_dir() {
        Ok(dir) => Ok(Arc::new(JsonFileStore::open(dir.join(SHARED_STORE_FILE))?)),
        Err(e) => {
            warn!("{:#}; block list will not persist", e);
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::load_config()?;
    let store = open_store()?;

    let (outbound, _) = broadcast::channel(64);
    let (events, rx) = service::channel();

    let scheduler =
        IntervalScheduler::new(&events, Duration::from_millis(config.daemon.tick_millis));
    let timer = TimerMachine::new(config.durations, Box::new(scheduler));
    let surfaces = Surfaces {
        badge: Box::new(BroadcastBadge::new(outbound.clone())),
        notifier: Box::new(DesktopNotifier::new(config.notifications.permission)),
        injector: Box::new(BroadcastInjector::new(outbound.clone())),
    };
    let coordinator = Coordinator::new(
        timer,
        store.clone(),
        surfaces,
        config.badge.color,
        Arc::new(Diagnostics::new()),
    );
    let handle = CoordinatorHandle::new(events);

    let _loop = service::spawn(coordinator, rx);
    let _watcher = service::watch_store(&store, &handle);

    let socket_path = config.daemon.socket_path.clone();
    let listener = server::bind(&socket_path)?;

    tokio::select! {
        result = server::serve(listener, handle, outbound) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}
