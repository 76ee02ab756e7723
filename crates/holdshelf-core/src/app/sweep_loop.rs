use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::sweep::{ExpirationSweep, SweepMode};
use crate::ports::{Clock, EntityStore};

/// Periodic expiration sweep handle.
/// - the first sweep runs immediately, then once per `interval`
/// - dropping the handle closes the channel, which stops the loop after the
///   sweep in flight (without waiting for it)
pub struct SweepLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweepLoop {
    pub fn spawn<S, C>(sweep: ExpirationSweep<S, C>, interval: Duration) -> Self
    where
        S: EntityStore + 'static,
        C: Clock + Clone + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            sweep_loop(sweep, interval, &mut shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    /// Stop after the sweep in flight, if any.
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn sweep_loop<S, C>(
    sweep: ExpirationSweep<S, C>,
    interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) where
    S: EntityStore + 'static,
    C: Clock + Clone + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "sweep loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped: nobody can ask us to stop any more
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        // Store work is synchronous; keep it off the async workers.
        let job = sweep.clone();
        match tokio::task::spawn_blocking(move || job.run(SweepMode::Apply)).await {
            Ok(Ok(report)) if report.is_noop() => debug!("sweep tick: nothing expired"),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(kind = ?err.kind(), error = %err, "sweep tick failed"),
            Err(join_err) => warn!(error = %join_err, "sweep task panicked"),
        }
    }

    info!("sweep loop stopped");
}
