//! Graceful Shutdown Handler
//!
//! SIGTERM/SIGINT flip one watch channel; long-lived tasks and the HTTP
//! server observe it and wind down. There is no fine-grained cancellation:
//! pending broadcasts simply die at their retry budget.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Install OS signal handlers that trigger the shutdown
pub async fn install_signal_handlers(shutdown: Arc<Shutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut stream =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            stream.recv().await;
            info!("received SIGTERM");
            sd.trigger();
        });

        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut stream =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            stream.recv().await;
            info!("received SIGINT");
            sd.trigger();
        });
    }

    #[cfg(windows)]
    {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
            info!("received Ctrl+C");
            sd.trigger();
        });
    }
}
