//! Signal traps – the future a robot or manager waits on before shutting
//! down when it was started with auto-run.
//!
//! Production code uses [`interrupt`], which resolves on Ctrl-C (and SIGTERM
//! on Unix). Tests inject a [`manual`] trap and fire it themselves.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Produces a fresh future that resolves when shutdown is requested.
pub type SignalTrap = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Resolve on SIGINT, or SIGTERM on Unix.
pub fn interrupt() -> SignalTrap {
    Arc::new(|| wait_for_interrupt().boxed())
}

async fn wait_for_interrupt() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => log_ctrl_c(res),
                    _ = term.recv() => info!("SIGTERM received"),
                }
                return;
            }
            Err(err) => warn!(%err, "cannot install SIGTERM handler"),
        }
    }
    log_ctrl_c(tokio::signal::ctrl_c().await);
}

fn log_ctrl_c(res: std::io::Result<()>) {
    match res {
        Ok(()) => info!("interrupt received"),
        // Without a handler there is no way to be interrupted; treat it as one.
        Err(err) => warn!(%err, "cannot listen for ctrl-c"),
    }
}

/// Fires a [`manual`] trap.
#[derive(Debug, Clone, Default)]
pub struct Trigger(CancellationToken);

impl Trigger {
    pub fn fire(&self) {
        self.0.cancel();
    }

    pub fn fired(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A trap that resolves once [`Trigger::fire`] has been called.
///
/// Firing before anyone waits is remembered, and every waiter sees it.
pub fn manual() -> (SignalTrap, Trigger) {
    let trigger = Trigger::default();
    let token = trigger.0.clone();
    let trap: SignalTrap = Arc::new(move || {
        let token = token.clone();
        async move { token.cancelled().await }.boxed()
    });
    (trap, trigger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn manual_trap_resolves_after_fire() {
        let (trap, trigger) = manual();
        let wait = tokio::spawn(trap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!wait.is_finished());

        trigger.fire();
        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn early_fire_is_remembered() {
        let (trap, trigger) = manual();
        trigger.fire();
        assert!(trigger.fired());
        tokio::time::timeout(Duration::from_millis(100), trap())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_millis(100), trap())
            .await
            .unwrap();
    }
}
