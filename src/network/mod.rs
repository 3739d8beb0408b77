//! Network Layer
//!
//! Connection lifecycle, liveness, reconnection and the session boundary.
//! This layer never mutates game state: authoritative state lives behind
//! [`SessionLink`], and everything here reacts to what the link reports.

pub mod connection;
pub mod heartbeat;
pub mod reconnect;
pub mod snapshot;
pub mod link;
pub mod codec;
pub mod protocol;
pub mod auth;

pub use connection::{ConnectionState, ConnectionStateMachine, StateTransition, DEFAULT_HISTORY_LIMIT};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, ProbeSink, TimeoutCallback};
pub use reconnect::{
    DisconnectReason, ReconnectCoordinator, ReconnectEvent, ReconnectHandle, ReconnectOutcome,
    ReconnectPolicy, ReconnectSettings, ReconnectStats,
};
pub use snapshot::{GameStateRecoverySnapshot, SnapshotError, SNAPSHOT_FORMAT_VERSION};
pub use link::{ScriptedLink, Session, SessionLink};
pub use codec::{BincodeCodec, Codec, CodecError, JsonCodec, WireCodec};
pub use protocol::{ChannelProbeSink, ClientMessage, ResumeResult, ServerError, ServerMessage};
pub use auth::{
    authorize_resume, issue_resume_token, validate_resume_token, AuthConfig, AuthError, ResumeClaims,
};
