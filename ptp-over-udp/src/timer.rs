//! Cancellable one-shot timer.
//!
//! The receiver arms a [`LingerTimer`] when the FIN arrives and tears the
//! connection down once it fires.  The timer is polled from inside the
//! receiver's `tokio::select!` loop, so "cancelling" is simply disarming it:
//! a disarmed timer's [`LingerTimer::fired`] future never completes.
//!
//! ```ignore
//! let mut linger = LingerTimer::new();
//! loop {
//!     tokio::select! {
//!         seg = socket.recv_from() => { /* ... */ linger.arm(Duration::from_secs(2)); }
//!         _ = linger.fired() => break,
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// A deadline that may or may not be armed.
#[derive(Debug, Default)]
pub struct LingerTimer {
    deadline: Option<Instant>,
}

impl LingerTimer {
    /// A disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to fire `after` from now.
    ///
    /// Re-arming an already armed timer keeps the original deadline; a late
    /// duplicate FIN must not extend the linger period.
    pub fn arm(&mut self, after: Duration) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + after);
        }
    }

    /// Disarm the timer.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Completes when the deadline passes; pends forever while disarmed.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}
