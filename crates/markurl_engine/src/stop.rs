use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::ConvertError;

/// Sleeps are cut into slices of this length so a stop request is noticed quickly.
pub const POLL_SLICE: Duration = Duration::from_millis(200);

/// Cooperative cancellation: a zero-argument predicate polled at checkpoints.
#[derive(Clone)]
pub struct StopCheck {
    predicate: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl StopCheck {
    pub fn new(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn never() -> Self {
        Self::new(|| false)
    }

    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self::new(move || flag.load(Ordering::SeqCst))
    }

    pub fn should_stop(&self) -> bool {
        (self.predicate)()
    }

    /// Returns `ConvertError::Stopped` once a stop was requested.
    pub fn check(&self) -> Result<(), ConvertError> {
        if self.should_stop() {
            Err(ConvertError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `total`, polling the predicate every [`POLL_SLICE`].
    pub async fn sleep(&self, total: Duration) -> Result<(), ConvertError> {
        let mut remaining = total;
        loop {
            self.check()?;
            if remaining.is_zero() {
                return Ok(());
            }
            let slice = remaining.min(POLL_SLICE);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
    }
}

impl Default for StopCheck {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for StopCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopCheck")
            .field("stopped", &self.should_stop())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn sleep_returns_early_when_stopped() {
        let flag = Arc::new(AtomicBool::new(false));
        let stop = StopCheck::from_flag(flag.clone());
        let setter = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            setter.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let result = stop.sleep(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(ConvertError::Stopped)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_sleep_still_checks_the_flag() {
        let stop = StopCheck::new(|| true);
        assert!(stop.sleep(Duration::ZERO).await.is_err());
        assert!(StopCheck::never().sleep(Duration::ZERO).await.is_ok());
    }
}
