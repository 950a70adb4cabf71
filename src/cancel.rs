use super::*;

use fnv::FnvHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and a running solver.
///
/// Solvers poll it at bounded intervals; nothing is ever interrupted forcibly.
#[derive(Clone, Default, Debug)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Calling it again is harmless.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release)
    }

    /// Whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl PartialEq for CancellationToken {
    /// Tokens are equal when they share the same flag.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for CancellationToken {}

impl fmt::Display for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancellationToken(cancelled: {})", self.is_cancelled())
    }
}

/// Maps in-flight request ids to their cancellation tokens.
///
/// Owned by whoever issues requests; there is no process-wide registry.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: FnvHashMap<RequestId, CancellationToken>,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and records a fresh token for `request_id`.
    pub fn register(&mut self, request_id: RequestId) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.insert(request_id, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancels `request_id` and forgets it. Returns whether it was known.
    ///
    /// Unknown and already finished ids are ignored.
    pub fn cancel(&mut self, request_id: RequestId) -> bool {
        match self.tokens.remove(&request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forgets a finished request without cancelling it.
    pub fn release(&mut self, request_id: RequestId) {
        self.tokens.remove(&request_id);
    }

    /// Cancels everything still registered.
    pub fn cancel_all(&mut self) {
        for (_, token) in self.tokens.drain() {
            token.cancel();
        }
    }

    /// Whether `request_id` is still registered.
    pub fn contains(&self, request_id: RequestId) -> bool {
        self.tokens.contains_key(&request_id)
    }

    /// Number of registered requests.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no request is registered.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(token, clone);
        assert_ne!(token, CancellationToken::new());
    }

    #[test]
    fn registry_cancel_is_idempotent() {
        let mut registry = CancellationRegistry::new();
        let token = registry.register(7);
        assert!(registry.contains(7));

        assert!(registry.cancel(7));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(7));
        assert!(!registry.cancel(42));
        assert!(registry.is_empty());
    }

    #[test]
    fn release_does_not_cancel() {
        let mut registry = CancellationRegistry::new();
        let token = registry.register(1);
        registry.release(1);
        assert!(!token.is_cancelled());
        assert!(!registry.contains(1));
    }

    #[test]
    fn cancel_all_trips_every_token() {
        let mut registry = CancellationRegistry::new();
        let a = registry.register(1);
        let b = registry.register(2);
        registry.cancel_all();
        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(registry.len(), 0);
    }
}
