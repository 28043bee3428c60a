use anyhow::Context;
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::db::{AccessProxy, InstanceManager};
use crate::docker::{ContainerRuntime, DockerManager};
use crate::storage::{CatalogStore, TtlCache};

use super::{shutdown_signal, REQUEST_SIGNAL};

/// Worker side of the request-observed channel.
#[derive(Clone)]
pub struct RequestSignal {
    tx: mpsc::UnboundedSender<()>,
}

impl RequestSignal {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn observe(&self) {
        let _ = self.tx.send(());
    }
}

async fn observe_request(State(signal): State<RequestSignal>, req: Request, next: Next) -> Response {
    signal.observe();
    next.run(req).await
}

/// Count every request passing through `router` on `signal`.
pub fn with_request_signal(router: Router, signal: RequestSignal) -> Router {
    router.layer(middleware::from_fn_with_state(signal, observe_request))
}

/// Relay observed requests to the coordinator, one line each on stdout.
async fn forward_signals(mut rx: mpsc::UnboundedReceiver<()>) {
    let mut stdout = tokio::io::stdout();
    let line = format!("{}\n", REQUEST_SIGNAL);

    while rx.recv().await.is_some() {
        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await
        };
        if let Err(e) = written.await {
            warn!("Lost coordinator channel: {}", e);
            break;
        }
    }
}

/// Listener shared by every worker on the same address.
fn bind_shared(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// Serve the control API in this process until shutdown.
pub async fn run(config: Config, id: usize) -> anyhow::Result<()> {
    let docker = DockerManager::new().context("failed to connect to Docker")?;
    docker
        .health_check()
        .await
        .context("Docker daemon is not reachable")?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    let catalog = CatalogStore::new(&config.catalog_db_path)
        .with_context(|| format!("failed to open catalog at {}", config.catalog_db_path))?;
    let cache = Arc::new(TtlCache::new(config.cache_default_ttl));

    let manager = Arc::new(InstanceManager::new(
        runtime.clone(),
        catalog,
        cache.clone(),
        config.clone(),
    ));

    match manager.reconcile().await {
        Ok(0) => info!("Catalog matches the container runtime"),
        Ok(marked) => warn!("Marked {} instance(s) as error during reconcile", marked),
        Err(e) => warn!("Reconcile failed: {}", e),
    }

    let proxy = Arc::new(AccessProxy::new(
        manager.clone(),
        runtime,
        cache,
        config.cache_tables_ttl,
    ));

    let state = Arc::new(AppState {
        manager,
        proxy,
        principal_header: config.principal_header.clone(),
    });

    let (signal, signals) = RequestSignal::channel();
    tokio::spawn(forward_signals(signals));
    let app = with_request_signal(create_router(state), signal);

    let addr = config.socket_addr();
    let listener = bind_shared(addr).with_context(|| format!("failed to bind {}", addr))?;
    info!("Worker {} listening on {}", id, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Worker {} stopped", id);
    Ok(())
}
