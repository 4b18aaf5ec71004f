use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::workflow::state::{Trigger, WorkflowState};

/// Emitted synchronously after every committed transition.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub run_id: String,
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub trigger: Trigger,
    pub timestamp: DateTime<Utc>,
}

pub type Subscriber = Box<dyn Fn(&StateChange) + Send + Sync>;

/// Subscriber list behind a mutex. Subscribers are registered before the run
/// starts; a panicking subscriber is logged and must not affect machine state.
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(subscriber);
    }

    pub fn emit(&self, change: &StateChange) {
        let subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        for subscriber in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(change))).is_err() {
                tracing::warn!(
                    run_id = %change.run_id,
                    from = %change.from,
                    to = %change.to,
                    "State change subscriber panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn change() -> StateChange {
        StateChange {
            run_id: "run-1".to_string(),
            from: WorkflowState::Idle,
            to: WorkflowState::Analyzing,
            trigger: Trigger::Start,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn delivers_to_all_subscribers() {
        let set = SubscriberSet::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            set.register(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        set.emit(&change());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let set = SubscriberSet::new();
        let count = Arc::new(AtomicUsize::new(0));
        set.register(Box::new(|_| panic!("subscriber bug")));
        {
            let count = Arc::clone(&count);
            set.register(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        set.emit(&change());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
