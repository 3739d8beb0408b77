//! Recovery Snapshots
//!
//! Versioned capture of the authoritative table taken before a reconnection
//! attempt. After reconnecting, the snapshot is checked against the live
//! session to detect incompatible changes, then discarded in favour of a
//! fresh resync.

use std::time::Duration;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;

use super::codec::{Codec, CodecError, WireCodec};
use super::link::Session;
use crate::core::{digests_match, DigestDomain, Digester, ParticipantId, SessionId, StateHash};
use crate::error::{ErrorKind, GameStateFault, TypedError};
use crate::security::table::TableState;

/// Snapshot layout version. Bump when the captured shape changes.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Snapshot capture and compatibility errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Encoding or decoding the table failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Snapshot was written by another format version.
    #[error("snapshot format {found} does not match {expected}")]
    FormatMismatch {
        /// Supported version.
        expected: u32,
        /// Snapshot's version.
        found: u32,
    },
    /// Seats changed while the participant was away.
    #[error("participant count changed from {before} to {after}")]
    ParticipantCountChanged {
        /// Count at capture time.
        before: usize,
        /// Count now.
        after: usize,
    },
    /// Snapshot is too old to compare against.
    #[error("snapshot expired after {age_ms}ms (limit {max_age_ms}ms)")]
    Expired {
        /// Snapshot age.
        age_ms: u64,
        /// Configured limit.
        max_age_ms: u64,
    },
    /// The participant rejoined a different session.
    #[error("session changed since capture")]
    SessionChanged,
    /// Payload does not hash to the recorded digest.
    #[error("snapshot digest mismatch")]
    DigestMismatch,
}

impl SnapshotError {
    /// Taxonomy kind.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            SnapshotError::Codec(e) => e.error_kind(),
            SnapshotError::DigestMismatch => ErrorKind::GameState(GameStateFault::Corruption),
            _ => ErrorKind::GameState(GameStateFault::Sync),
        }
    }

    /// Typed error for the router.
    pub fn to_typed_error(&self, participant: &ParticipantId) -> TypedError {
        TypedError::new(self.error_kind(), self.to_string())
            .with_context("participant", participant.to_uuid_string())
    }
}

/// Opaque capture of a session's table.
#[derive(Clone, Debug)]
pub struct GameStateRecoverySnapshot {
    session_id: SessionId,
    participant: ParticipantId,
    format_version: u32,
    codec: WireCodec,
    participant_count: usize,
    state_version: u64,
    digest: StateHash,
    payload: Vec<u8>,
    captured_at: Instant,
    captured_wall: DateTime<Utc>,
}

impl GameStateRecoverySnapshot {
    /// Capture `session` on behalf of `participant`.
    pub fn capture(
        session: &Session,
        participant: ParticipantId,
        codec: WireCodec,
    ) -> Result<Self, SnapshotError> {
        let payload = codec.encode(&session.table)?;
        Ok(Self {
            session_id: session.id,
            participant,
            format_version: SNAPSHOT_FORMAT_VERSION,
            codec,
            participant_count: session.participant_count(),
            state_version: session.state_version(),
            digest: digest(&session.id, session.state_version(), &payload),
            payload,
            captured_at: Instant::now(),
            captured_wall: Utc::now(),
        })
    }

    /// Can the snapshot still be compared against `current`?
    pub fn check_compatibility(&self, current: &Session, max_age: Duration) -> Result<(), SnapshotError> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::FormatMismatch {
                expected: SNAPSHOT_FORMAT_VERSION,
                found: self.format_version,
            });
        }
        if self.session_id != current.id {
            return Err(SnapshotError::SessionChanged);
        }
        let age = self.age();
        if age > max_age {
            return Err(SnapshotError::Expired {
                age_ms: age.as_millis() as u64,
                max_age_ms: max_age.as_millis() as u64,
            });
        }
        let after = current.participant_count();
        if after != self.participant_count {
            return Err(SnapshotError::ParticipantCountChanged {
                before: self.participant_count,
                after,
            });
        }
        Ok(())
    }

    /// Decode the captured table, verifying the digest first.
    pub fn restore_table(&self) -> Result<TableState, SnapshotError> {
        let expected = digest(&self.session_id, self.state_version, &self.payload);
        if !digests_match(&expected, &self.digest) {
            return Err(SnapshotError::DigestMismatch);
        }
        Ok(self.codec.decode(&self.payload)?)
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.captured_at)
    }

    /// Participant the snapshot was taken for.
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Session the snapshot belongs to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Table version at capture time.
    pub fn state_version(&self) -> u64 {
        self.state_version
    }

    /// Seats at capture time.
    pub fn participant_count(&self) -> usize {
        self.participant_count
    }

    /// Payload digest.
    pub fn digest(&self) -> &StateHash {
        &self.digest
    }

    /// Digest as hex, for logs.
    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest[..8])
    }

    /// Encoded payload size.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Wall clock capture time.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_wall
    }
}

fn digest(session_id: &SessionId, state_version: u64, payload: &[u8]) -> StateHash {
    Digester::new(DigestDomain::Snapshot)
        .id(session_id)
        .u32(SNAPSHOT_FORMAT_VERSION)
        .u64(state_version)
        .bytes(payload)
        .finish()
}
