//! User cancellation requests.
//!
//! A [`CancelFlag`] is set at most once by the listener and read by the
//! scaling loop before each new image. It only stops the scaling stage; the
//! optimizer pool has its own shutdown signal.
//!
//! A second Ctrl-C escalates to a forced abort, which the enhancement
//! launcher observes to kill the running tool.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct CancelInner {
    requested: AtomicBool,
    forced: AtomicBool,
    notify: Notify,
}

/// Shared "stop starting new enhancement jobs" flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelInner>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns true if this call set it.
    pub fn request(&self) -> bool {
        !self.0.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.0.requested.load(Ordering::SeqCst)
    }

    /// Requests cancellation and also interrupts the running invocation.
    pub fn force(&self) {
        self.0.requested.store(true, Ordering::SeqCst);
        if !self.0.forced.swap(true, Ordering::SeqCst) {
            self.0.notify.notify_waiters();
        }
    }

    pub fn is_forced(&self) -> bool {
        self.0.forced.load(Ordering::SeqCst)
    }

    /// Resolves once [`force`](Self::force) has been called.
    pub async fn forced(&self) {
        loop {
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_forced() {
                return;
            }
            notified.await;
        }
    }
}

/// Whether a line typed on stdin asks for cancellation.
pub fn is_cancel_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("c")
}

/// Spawns the listener: a `c` line on stdin or Ctrl-C sets `flag` once, and a
/// further Ctrl-C forces an abort.
///
/// Stdin is read on a detached thread because a blocking read cannot be
/// interrupted; it ends with the process. Abort the returned handle once the
/// run is over.
pub fn spawn_cancel_listener(flag: CancelFlag) -> JoinHandle<()> {
    info!("Enter 'c' (or press Ctrl-C) to stop after the current image");

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let reader = std::thread::Builder::new()
        .name("cancel-listener".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if is_cancel_command(&line) => {
                        let _ = tx.send(());
                        return;
                    }
                    Ok(line) => debug!(input = %line.trim(), "Ignoring console input"),
                    Err(e) => {
                        warn!(error = %e, "Failed to read console input");
                        return;
                    }
                }
            }
            debug!("Stdin closed, cancellation only via Ctrl-C");
        });
    if let Err(e) = reader {
        warn!(error = %e, "Failed to start console listener");
    }

    tokio::spawn(async move {
        tokio::select! {
            // A closed channel disables this branch and leaves Ctrl-C.
            Some(()) = rx.recv() => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    return;
                }
            }
        }

        if flag.request() {
            info!("Cancellation requested, finishing current jobs; press Ctrl-C to abort");
        }

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting the running enhancement");
            flag.force();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_set_once() {
        let flag = CancelFlag::new();
        assert!(!flag.is_requested());

        let clone = flag.clone();
        assert!(clone.request());
        assert!(!flag.request());
        assert!(flag.is_requested());
    }

    #[tokio::test]
    async fn test_force_wakes_waiter() {
        let flag = CancelFlag::new();
        let waiter = tokio::spawn({
            let flag = flag.clone();
            async move { flag.forced().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        flag.force();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(flag.is_requested());
        assert!(flag.is_forced());
    }

    #[tokio::test]
    async fn test_forced_resolves_after_the_fact() {
        let flag = CancelFlag::new();
        flag.force();
        tokio::time::timeout(std::time::Duration::from_millis(100), flag.forced())
            .await
            .unwrap();
    }

    #[test]
    fn test_cancel_command() {
        assert!(is_cancel_command("c"));
        assert!(is_cancel_command(" C \n"));
        assert!(!is_cancel_command("cancel"));
        assert!(!is_cancel_command(""));
    }
}
