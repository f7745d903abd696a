//! Process entry point: load config, bootstrap the auth service, serve
//! HTTP, shut down gracefully on SIGINT/SIGTERM. Signal handling trimmed
//! down from the teacher's `build_signals_fut` (Unix signals with a
//! `ctrl_c` fallback on other platforms).

use std::net::SocketAddr;
use std::sync::Arc;

use jobauth::config::ConfHandle;
use jobauth::repository::InMemoryUserRepository;
use jobauth::{api, bootstrap, DgwState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let conf_handle = ConfHandle::init()?;
    let conf = conf_handle.get_conf();

    let repository: Arc<dyn jobauth::repository::UserRepository> = Arc::new(InMemoryUserRepository::new());

    let bootstrapped = bootstrap::bootstrap(&conf, repository.clone())?;

    let state = DgwState {
        conf_handle,
        auth_service: bootstrapped.auth_service,
        session_key: bootstrapped.session_key,
        session_store: bootstrapped.session_store,
        oidc_provider: bootstrapped.oidc_provider,
        repository,
    };

    let addr: SocketAddr = conf
        .listener_url
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));

    let router = api::make_router(state).into_make_service_with_connect_info::<SocketAddr>();

    tracing::info!(%addr, "starting listener");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    for task in bootstrapped.background_tasks {
        task.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c");
    }
}
