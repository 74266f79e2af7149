use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    mpsc::{self, Receiver, Sender},
};

use log::debug;

use crate::domain::station::StationState;

/// Issued when a poll starts; later polls get larger tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PollTicket(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// state swapped and observers notified
    Replaced,
    /// nothing observers render changed
    Unchanged,
    /// older than what is already shown, discarded
    Stale,
}

struct Inner {
    state: Arc<StationState>,
    next_ticket: u64,
    newest_applied: Option<PollTicket>,
    observers: Vec<Sender<Arc<StationState>>>,
}

/// Owns the one live [`StationState`] of a session and notifies observers on change.
pub struct StateHolder {
    inner: Mutex<Inner>,
}

impl StateHolder {
    pub fn new(initial: StationState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: Arc::new(initial),
                next_ticket: 0,
                newest_applied: None,
                observers: Vec::new(),
            }),
        }
    }

    /// Seeds the holder from a pre-fetched snapshot, falling back to `empty` without one.
    pub fn with_initial(prefetched: Option<StationState>, empty: StationState) -> Self {
        Self::new(prefetched.unwrap_or(empty))
    }

    pub fn get_state(&self) -> Arc<StationState> {
        Arc::clone(&self.inner().state)
    }

    pub fn subscribe(&self) -> Receiver<Arc<StationState>> {
        let (tx, rx) = mpsc::channel();
        self.inner().observers.push(tx);
        rx
    }

    pub fn issue_ticket(&self) -> PollTicket {
        let mut inner = self.inner();
        inner.next_ticket += 1;
        PollTicket(inner.next_ticket)
    }

    pub fn apply_update(&self, new_state: StationState) -> ApplyOutcome {
        let mut inner = self.inner();
        Self::apply_locked(&mut inner, new_state)
    }

    /// Applies the result of the poll holding `ticket`.
    ///
    /// Results from polls issued before the newest applied one are discarded,
    /// whatever order they arrive in.
    pub fn apply_polled(&self, ticket: PollTicket, new_state: StationState) -> ApplyOutcome {
        let mut inner = self.inner();
        if inner.newest_applied.is_some_and(|newest| ticket < newest) {
            debug!("discarding result of poll {:?}, newer poll already applied", ticket);
            return ApplyOutcome::Stale;
        }
        let outcome = Self::apply_locked(&mut inner, new_state);
        if outcome != ApplyOutcome::Stale {
            inner.newest_applied = Some(ticket);
        }
        outcome
    }

    /// Whether `ticket` is older than a poll whose result is already shown.
    pub fn is_superseded(&self, ticket: PollTicket) -> bool {
        self.inner()
            .newest_applied
            .is_some_and(|newest| ticket < newest)
    }

    fn apply_locked(inner: &mut Inner, new_state: StationState) -> ApplyOutcome {
        if new_state.last_update < inner.state.last_update {
            return ApplyOutcome::Stale;
        }
        if !inner.state.differs_from(&new_state) {
            return ApplyOutcome::Unchanged;
        }

        let state = Arc::new(new_state);
        inner.state = Arc::clone(&state);
        inner
            .observers
            .retain(|observer| observer.send(Arc::clone(&state)).is_ok());
        ApplyOutcome::Replaced
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
