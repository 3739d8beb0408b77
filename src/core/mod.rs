//! Core primitives.
//!
//! Identifiers, integrity hashing, the subscriber registry and the
//! cancellation token. Everything above this module builds on these.

pub mod ids;
pub mod hash;
pub mod subscribers;
pub mod cancel;

// Re-export core types
pub use ids::{ParticipantId, CardId, SessionId};
pub use hash::{StateHash, DigestDomain, Digester, keyed_digest, digests_match};
pub use subscribers::{Subscriber, Subscribers, SubscriptionId};
pub use cancel::{CancelToken, Cancelled};
