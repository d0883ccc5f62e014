//! Two-phase shutdown signalling.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// The two cancellation levels driving orderly shutdown.
///
/// `stop` is cancelled when shutdown begins; in-flight work observes it at
/// safe points and drains. `cancel` is cancelled only when the stop timeout
/// expires; pending I/O is severed by racing against it. The two levels are
/// distinct so a graceful drain is possible before the hard cut.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    pub stop: CancellationToken,
    pub cancel: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Wait until SIGINT or SIGTERM arrives.
pub async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => info!("received SIGINT, shutting down"),
        _ = terminate.recv() => info!("received SIGTERM, shutting down"),
    }
    Ok(())
}
