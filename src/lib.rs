//! # Relic Session
//!
//! Session resilience and hidden-information security for multiplayer card
//! tables. The rules engine owns the authoritative table; this crate keeps
//! participants attached to it and keeps each of them from seeing or doing
//! what they should not.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RELIC SESSION                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── ids.rs      - Participant, session and card ids         │
//! │  ├── hash.rs     - SHA-256 digests                           │
//! │  ├── cancel.rs   - Cancellation token                        │
//! │  └── subscribers.rs - Weak subscriber registry               │
//! │                                                              │
//! │  error/          - Error taxonomy                            │
//! │  ├── kind.rs     - Categories, kinds, severity               │
//! │  ├── typed.rs    - TypedError with codes and context         │
//! │  └── classify.rs - Raw failure classification                │
//! │                                                              │
//! │  recovery/       - Recovery strategies and routing           │
//! │  ├── router.rs   - ErrorRouter and statistics                │
//! │  ├── backoff.rs  - Exponential backoff with jitter           │
//! │  ├── reconnect.rs, resync.rs, retry.rs, fallback.rs          │
//! │  └── degradation.rs - Degradable features                    │
//! │                                                              │
//! │  network/        - Connection lifecycle                      │
//! │  ├── connection.rs - State machine with history              │
//! │  ├── heartbeat.rs  - Liveness probes and timeouts            │
//! │  ├── reconnect.rs  - Reconnection pipelines                  │
//! │  ├── snapshot.rs   - Recovery snapshots                      │
//! │  ├── link.rs, codec.rs, protocol.rs, auth.rs                 │
//! │                                                              │
//! │  security/       - Hidden-information enforcement            │
//! │  ├── table.rs    - Read-only table model                     │
//! │  ├── view.rs     - Per-participant filtered views            │
//! │  ├── validator.rs - Action validation                        │
//! │  └── gate.rs     - View/action boundary                      │
//! │                                                              │
//! │  guard.rs        - SessionGuard facade                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Nothing here mutates the authoritative table.
//! - At most one reconnection pipeline runs per participant.
//! - A hidden card's identity never leaves [`security::filtered_view`].
//! - Security faults are critical and never trigger recovery.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod recovery;
pub mod network;
pub mod security;
pub mod config;
pub mod telemetry;
pub mod guard;

// Re-export commonly used types
pub use crate::core::{CancelToken, CardId, ParticipantId, SessionId, StateHash};
pub use crate::error::{ErrorCategory, ErrorKind, Severity, TypedError};
pub use crate::recovery::{ErrorRouter, RecoveryContext, RecoveryResult, RecoveryStrategy};
pub use crate::network::{
    ConnectionState, ConnectionStateMachine, DisconnectReason, HeartbeatMonitor, ReconnectCoordinator,
    ReconnectOutcome, SessionLink,
};
pub use crate::security::{filtered_view, validate_action, ActionRejection, FilteredView, TableState};
pub use crate::config::ResilienceConfig;
pub use crate::guard::SessionGuard;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
