//! Single-flight session refresh
//!
//! The first caller to [`RefreshCoordinator::join`] while no refresh is
//! outstanding gets the [`RefreshLease`] and performs the refresh. Everyone
//! else is queued and resumed, in arrival order, when the lease settles. A
//! lease that is dropped without settling rejects its queue, so the in-flight
//! flag can never stay set.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use taxdesk_core::{ErrorContext, TaxdeskError};
use tokio::sync::oneshot;
use tracing::debug;

/// Why a refresh did not succeed; delivered to every queued caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    pub message: String,
    pub status: Option<u16>,
}

impl RefreshFailure {
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    fn cancelled() -> Self {
        Self::new("Session refresh was abandoned before completing", None)
    }

    pub fn into_error(self) -> TaxdeskError {
        TaxdeskError::RefreshFailed {
            message: self.message,
            status: self.status,
            context: ErrorContext::new("session_refresh")
                .with_operation("refresh")
                .with_suggestion("Sign in again"),
        }
    }
}

type RefreshOutcome = Result<(), RefreshFailure>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

/// Owns the in-flight flag and the wait queue for one client
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

/// Role handed out by [`RefreshCoordinator::join`]
pub enum RefreshTicket<'a> {
    /// Perform the refresh and settle the lease
    Leader(RefreshLease<'a>),
    /// Wait for the outstanding refresh
    Follower(RefreshWait),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Become the leader, or queue behind the refresh already in flight
    pub fn join(&self) -> RefreshTicket<'_> {
        let mut state = self.lock();
        if state.in_flight {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(queued = state.waiters.len(), "Queued behind in-flight refresh");
            RefreshTicket::Follower(RefreshWait { rx })
        } else {
            state.in_flight = true;
            RefreshTicket::Leader(RefreshLease {
                coordinator: self,
                settled: false,
            })
        }
    }

    pub fn in_flight(&self) -> bool {
        self.lock().in_flight
    }

    /// Number of callers waiting on the outstanding refresh
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    fn settle(&self, outcome: RefreshOutcome) -> usize {
        let waiters = {
            let mut state = self.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };

        let count = waiters.len();
        for waiter in waiters {
            // A waiter whose caller went away has nothing left to resume
            let _ = waiter.send(outcome.clone());
        }
        count
    }
}

/// Exclusive right to perform the outstanding refresh
pub struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshLease<'_> {
    /// Clear the in-flight flag and resume every queued caller in order.
    ///
    /// Returns how many callers were resumed.
    pub fn settle(mut self, outcome: Result<(), RefreshFailure>) -> usize {
        self.settled = true;
        self.coordinator.settle(outcome)
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(Err(RefreshFailure::cancelled()));
        }
    }
}

/// A queued caller's handle on the outstanding refresh
pub struct RefreshWait {
    rx: oneshot::Receiver<RefreshOutcome>,
}

impl RefreshWait {
    pub async fn wait(self) -> Result<(), RefreshFailure> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(RefreshFailure::cancelled()))
    }
}
