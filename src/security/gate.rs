//! Security Gate
//!
//! Boundary every outgoing view and incoming action passes through. Views
//! are filtered per participant; actions are validated against a read-only
//! table. A rejection is reported to the router as a critical security fault
//! and answered to the submitter, and nothing else happens: the session and
//! every other participant carry on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::table::TableState;
use super::validator::{validate_action, ActionKeyring, ActionRejection, ProposedAction};
use super::view::{filtered_view, FilteredView};
use crate::core::{ParticipantId, StateHash};
use crate::recovery::ErrorRouter;

/// Filter and validator with rejection reporting.
#[derive(Debug)]
pub struct SecurityGate {
    router: Arc<ErrorRouter>,
    keyring: ActionKeyring,
    rejections: AtomicU64,
    accepted: AtomicU64,
    views_served: AtomicU64,
}

impl SecurityGate {
    /// Gate reporting to `router`, checking checksums with `keyring`.
    pub fn new(router: Arc<ErrorRouter>, keyring: ActionKeyring) -> Self {
        Self {
            router,
            keyring,
            rejections: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            views_served: AtomicU64::new(0),
        }
    }

    /// Integrity key handed to a participant's client.
    pub fn key_for(&self, participant: &ParticipantId) -> StateHash {
        self.keyring.key_for(participant)
    }

    /// `viewer`'s filtered view of `table`.
    pub fn view_for(&self, table: &TableState, viewer: &ParticipantId) -> FilteredView {
        self.views_served.fetch_add(1, Ordering::Relaxed);
        filtered_view(table, viewer)
    }

    /// Validate an action submitted by `submitter`.
    ///
    /// Rejections are reported, never recovered.
    pub fn submit(
        &self,
        table: &TableState,
        action: &ProposedAction,
        submitter: &ParticipantId,
    ) -> Result<(), ActionRejection> {
        let key = self.keyring.key_for(submitter);
        match validate_action(table, action, submitter, &key) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(participant = %submitter, action_id = action.action_id, kind = ?action.kind, "Action accepted");
                Ok(())
            }
            Err(rejection) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(
                    participant = %submitter,
                    action_id = action.action_id,
                    reason = %rejection,
                    "Action rejected"
                );
                self.router.report(rejection.to_typed_error(action, submitter));
                Err(rejection)
            }
        }
    }

    /// Actions rejected so far.
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Actions accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Views built so far.
    pub fn views_served(&self) -> u64 {
        self.views_served.load(Ordering::Relaxed)
    }
}
