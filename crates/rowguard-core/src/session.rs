//! Session context carried through every check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Error;

/// Per-caller context: identity, cancellation, deadline, and the cascade signal.
///
/// Clones share the cancellation flag.
#[derive(Debug, Clone)]
pub struct Session {
    id: u64,
    canceled: Arc<AtomicBool>,
    deadline: Option<Instant>,
    cascading: bool,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            canceled: Arc::new(AtomicBool::new(false)),
            deadline: None,
            cascading: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fail checks once the deadline has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fail checks once `timeout` has elapsed from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A session for an external cascade orchestrator.
    ///
    /// Referenced-side foreign key checks whose declared action is not
    /// RESTRICT are skipped, since the orchestrator applies the action itself.
    pub fn cascading(&self) -> Self {
        Self {
            cascading: true,
            ..self.clone()
        }
    }

    pub fn is_cascading(&self) -> bool {
        self.cascading
    }

    /// Request cancellation; every clone observes it.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Poll cancellation and the deadline.
    pub fn check_canceled(&self) -> Result<(), Error> {
        if self.is_canceled() {
            return Err(Error::Interrupted {
                session: self.id,
                reason: "canceled",
            });
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Interrupted {
                    session: self.id,
                    reason: "deadline exceeded",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared() {
        let session = Session::new(3);
        let cascade = session.cascading();
        assert!(cascade.is_cascading());
        assert!(!session.is_cascading());

        cascade.cancel();
        assert!(session.check_canceled().is_err());
    }

    #[test]
    fn test_deadline() {
        let session = Session::new(4).with_deadline(Instant::now());
        let err = session.check_canceled().unwrap_err();
        assert!(matches!(
            err,
            Error::Interrupted {
                session: 4,
                reason: "deadline exceeded"
            }
        ));

        let session = Session::new(5).with_timeout(Duration::from_secs(3600));
        assert!(session.check_canceled().is_ok());
    }
}
