use std::error::Error;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::warn;

/// What a subscriber callback returns. Errors are logged and otherwise ignored.
pub type SubscriberResult = Result<(), Box<dyn Error + Send + Sync>>;

type Callback<T> = Box<dyn Fn(&T) -> SubscriberResult + Send + Sync>;

/// Handle returned by [`Subscribers::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Callback list that isolates failures: an erroring or panicking subscriber
/// is logged and the remaining subscribers still run.
pub struct Subscribers<T> {
    next_id: u64,
    callbacks: Vec<(SubscriberId, Callback<T>)>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            callbacks: Vec::new(),
        }
    }
}

impl<T> std::fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers").field("count", &self.callbacks.len()).finish()
    }
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, callback: F) -> SubscriberId
    where
        F: Fn(&T) -> SubscriberResult + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Returns `false` if the id was not registered.
    pub fn unregister(&mut self, id: SubscriberId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(sid, _)| *sid != id);
        self.callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Invoke every callback with `value`.
    pub fn notify(&self, value: &T) {
        for (id, callback) in &self.callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(subscriber = id.0, error = %e, "Subscriber callback failed"),
                Err(_) => warn!(subscriber = id.0, "Subscriber callback panicked"),
            }
        }
    }
}
