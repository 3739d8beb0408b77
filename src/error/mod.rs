//! Error Taxonomy & Classifier
//!
//! ## Module Structure
//!
//! - `kind`: categories, leaf kinds, severities, recovery tags
//! - `typed`: the immutable [`TypedError`] value
//! - `classify`: maps lower-level failures onto a [`TypedError`]

pub mod kind;
pub mod typed;
pub mod classify;

pub use kind::{
    Severity, ErrorCategory, ErrorKind, RecoveryTag,
    ConnectionFault, SerializationFault, SecurityFault, GameStateFault,
    ProtocolFault, TimeoutFault, AuthenticationFault, ApplicationFault,
};
pub use typed::{TypedError, ErrorContext};
pub use classify::{classify, classify_error, classify_anyhow, FaultReport};
