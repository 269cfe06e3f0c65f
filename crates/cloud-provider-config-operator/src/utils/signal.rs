use snafu::{ResultExt, Snafu};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

#[derive(Debug, Snafu)]
#[snafu(display("failed to register handler for {signal}"))]
pub struct SignalError {
    source: std::io::Error,
    signal: &'static str,
}

/// Watches for termination signals and multiplies them by notifying all acquired handles.
pub struct SignalWatcher {
    watch_rx: watch::Receiver<()>,
}

impl SignalWatcher {
    /// Watches `SIGTERM` (sent by the kubelet when the Pod is stopped) and `SIGINT` (Ctrl-C when
    /// running locally).
    pub fn termination() -> Result<Self, SignalError> {
        let mut sigterm =
            signal(SignalKind::terminate()).context(SignalSnafu { signal: "SIGTERM" })?;
        let mut sigint =
            signal(SignalKind::interrupt()).context(SignalSnafu { signal: "SIGINT" })?;
        let (watch_tx, watch_rx) = watch::channel(());

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            }
            watch_tx.send(())
        });

        Ok(Self { watch_rx })
    }

    /// Acquire a new handle which will complete once a termination signal is received.
    ///
    /// This handle can be cheaply cloned to be able to gracefully shutdown multiple concurrent
    /// tasks.
    pub fn handle(&self) -> impl Future<Output = ()> + Send + Sync + 'static {
        let mut watch_rx = self.watch_rx.clone();

        async move {
            watch_rx.changed().await.ok();
        }
    }
}
