use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::window::IndexRange;

/// The single buffer-filling fetch currently pending.
#[derive(Debug, Clone)]
pub struct InFlightRequest {
    pub range: IndexRange,
    pub ticket: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub enum Admission {
    /// A new request was registered; the caller must run it with `cancel` and
    /// report back through [`RequestCoordinator::complete`].
    Issued {
        ticket: u64,
        cancel: CancellationToken,
    },
    /// The same range is already being fetched.
    Duplicate,
}

/// Enforces at most one buffer-filling fetch at a time. A request for a
/// different range cancels the pending one instead of queueing behind it.
#[derive(Debug, Default)]
pub struct RequestCoordinator {
    in_flight: Option<InFlightRequest>,
    last_ticket: u64,
}

impl RequestCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, range: IndexRange) -> Admission {
        if let Some(pending) = &self.in_flight {
            if pending.range == range {
                debug!(
                    target = "grid::fetch",
                    range = %range,
                    ticket = pending.ticket,
                    "identical fetch already in flight"
                );
                return Admission::Duplicate;
            }
            debug!(
                target = "grid::fetch",
                superseded = %pending.range,
                range = %range,
                "cancelling superseded fetch"
            );
            pending.cancel.cancel();
        }

        self.last_ticket += 1;
        let cancel = CancellationToken::new();
        self.in_flight = Some(InFlightRequest {
            range,
            ticket: self.last_ticket,
            cancel: cancel.clone(),
        });
        Admission::Issued {
            ticket: self.last_ticket,
            cancel,
        }
    }

    /// Whether `ticket` is still the authoritative request.
    pub fn is_current(&self, ticket: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|pending| pending.ticket == ticket)
    }

    /// Releases the slot held by `ticket`. Completions of superseded requests
    /// are ignored.
    pub fn complete(&mut self, ticket: u64) -> bool {
        if self.is_current(ticket) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    pub fn cancel_all(&mut self) {
        if let Some(pending) = self.in_flight.take() {
            debug!(
                target = "grid::fetch",
                range = %pending.range,
                "cancelling in-flight fetch"
            );
            pending.cancel.cancel();
        }
    }

    pub fn in_flight(&self) -> Option<IndexRange> {
        self.in_flight.as_ref().map(|pending| pending.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(admission: Admission) -> (u64, CancellationToken) {
        match admission {
            Admission::Issued { ticket, cancel } => (ticket, cancel),
            Admission::Duplicate => panic!("expected a new request"),
        }
    }

    #[test]
    fn identical_range_is_not_reissued() {
        let mut requests = RequestCoordinator::new();
        let (ticket, cancel) = issued(requests.admit(IndexRange::new(80, 160)));
        assert!(matches!(
            requests.admit(IndexRange::new(80, 160)),
            Admission::Duplicate
        ));
        assert!(!cancel.is_cancelled());
        assert!(requests.is_current(ticket));
    }

    #[test]
    fn new_range_cancels_pending_request() {
        let mut requests = RequestCoordinator::new();
        let (first, first_cancel) = issued(requests.admit(IndexRange::new(80, 160)));
        let (second, second_cancel) = issued(requests.admit(IndexRange::new(440, 560)));
        assert!(first_cancel.is_cancelled());
        assert!(!second_cancel.is_cancelled());
        assert!(!requests.is_current(first));
        assert_eq!(requests.in_flight(), Some(IndexRange::new(440, 560)));

        assert!(!requests.complete(first));
        assert!(requests.complete(second));
        assert_eq!(requests.in_flight(), None);
    }

    #[test]
    fn completed_range_can_be_requested_again() {
        let mut requests = RequestCoordinator::new();
        let (ticket, _) = issued(requests.admit(IndexRange::new(0, 40)));
        requests.complete(ticket);
        let (retry, _) = issued(requests.admit(IndexRange::new(0, 40)));
        assert_ne!(ticket, retry);
    }

    #[test]
    fn cancel_all_releases_slot() {
        let mut requests = RequestCoordinator::new();
        let (ticket, cancel) = issued(requests.admit(IndexRange::new(0, 40)));
        requests.cancel_all();
        assert!(cancel.is_cancelled());
        assert!(!requests.is_current(ticket));
        assert_eq!(requests.in_flight(), None);
    }
}
