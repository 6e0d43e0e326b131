use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between the requesting side and the
/// blocked side. Cloning yields another handle to the same flag.
///
/// Blocking operations poll the token between wait slices, so a trip is
/// observed within one poll period of the primitive doing the waiting.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Option<Arc<Inner>>,
}

struct Inner {
    tripped: AtomicBool,
    sources: Vec<CancelToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                tripped: AtomicBool::new(false),
                sources: Vec::new(),
            })),
        }
    }

    /// A token that can never trip. Used where a wait must not be
    /// interruptible, such as the committed half of a tier-to-tier move.
    pub const fn never() -> Self {
        Self { inner: None }
    }

    /// A token that reports cancelled when either source does, or when
    /// cancelled directly. Cancelling the linked token does not propagate
    /// back to the sources.
    pub fn linked(first: &CancelToken, second: &CancelToken) -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                tripped: AtomicBool::new(false),
                sources: vec![first.clone(), second.clone()],
            })),
        }
    }

    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            inner.tripped.store(true, Ordering::Release);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.inner {
            Some(inner) => {
                inner.tripped.load(Ordering::Acquire)
                    || inner.sources.iter().any(CancelToken::is_cancelled)
            }
            None => false,
        }
    }

    pub fn can_cancel(&self) -> bool {
        self.inner.is_some()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("can_cancel", &self.can_cancel())
            .finish()
    }
}
