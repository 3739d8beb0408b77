//! Security Layer
//!
//! Hidden-information enforcement. The table model is the read-only input;
//! [`filtered_view`] decides what each participant may see and
//! [`validate_action`] decides what each participant may do. Neither ever
//! mutates the table.

pub mod table;
pub mod view;
pub mod validator;
pub mod gate;

pub use table::{Card, Phase, Seat, TableState, TurnState, ZoneKind, ZoneVisibility};
pub use view::{filtered_view, CardRef, CardSlot, CardView, FilteredView, ZoneView};
pub use validator::{
    validate_action, ActionKeyring, ActionKind, ActionRejection, ProposedAction, TurnRight,
};
pub use gate::SecurityGate;
