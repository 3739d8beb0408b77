//! Action Validator
//!
//! Pure predicate over a read-only [`TableState`]: integrity first, then
//! structure, then visibility, then turn rights. Never mutates anything.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use super::table::{Phase, TableState};
use crate::core::{digests_match, CardId, DigestDomain, Digester, ParticipantId, StateHash};
use crate::error::{ErrorKind, SecurityFault, TypedError};

// =============================================================================
// ACTIONS
// =============================================================================

/// Kinds of player actions this layer gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Play a card from hand.
    PlayCard,
    /// Activate an ability of a card in play.
    ActivateAbility,
    /// Declare attackers.
    DeclareAttack,
    /// Pass priority.
    PassPriority,
    /// Concede the game.
    Concede,
}

/// What a participant must hold to take an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRight {
    /// Anyone, any time.
    None,
    /// Priority.
    Priority,
    /// Active turn, priority, main phase, empty stack.
    SorcerySpeed,
    /// Active turn in the combat phase.
    ActiveCombat,
}

impl ActionKind {
    /// Right required by the action.
    pub fn required_right(self) -> TurnRight {
        match self {
            ActionKind::PlayCard => TurnRight::SorcerySpeed,
            ActionKind::ActivateAbility | ActionKind::PassPriority => TurnRight::Priority,
            ActionKind::DeclareAttack => TurnRight::ActiveCombat,
            ActionKind::Concede => TurnRight::None,
        }
    }

    /// Does the action need a source card?
    pub fn needs_source(self) -> bool {
        matches!(self, ActionKind::PlayCard | ActionKind::ActivateAbility)
    }

    fn code(self) -> u8 {
        match self {
            ActionKind::PlayCard => 1,
            ActionKind::ActivateAbility => 2,
            ActionKind::DeclareAttack => 3,
            ActionKind::PassPriority => 4,
            ActionKind::Concede => 5,
        }
    }
}

/// An action submitted by a participant, with its integrity checksum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Per-participant action sequence number.
    pub action_id: u64,
    /// Participant claiming to take the action.
    pub participant: ParticipantId,
    /// Action kind.
    pub kind: ActionKind,
    /// Card the action comes from.
    pub source: Option<CardId>,
    /// Cards the action targets.
    pub targets: Vec<CardId>,
    /// Table version the participant acted on.
    pub state_version: u64,
    /// Integrity checksum over every field above.
    pub checksum: StateHash,
}

impl ProposedAction {
    /// Unsigned action.
    pub fn new(action_id: u64, participant: ParticipantId, kind: ActionKind) -> Self {
        Self {
            action_id,
            participant,
            kind,
            source: None,
            targets: Vec::new(),
            state_version: 0,
            checksum: [0u8; 32],
        }
    }

    /// Builder: set source card.
    pub fn with_source(mut self, source: CardId) -> Self {
        self.source = Some(source);
        self
    }

    /// Builder: add a target.
    pub fn with_target(mut self, target: CardId) -> Self {
        self.targets.push(target);
        self
    }

    /// Builder: set the table version.
    pub fn at_version(mut self, version: u64) -> Self {
        self.state_version = version;
        self
    }

    /// HMAC-SHA256 checksum under `key`.
    pub fn compute_checksum(&self, key: &[u8]) -> StateHash {
        let digester = Digester::keyed(DigestDomain::Action, key)
            .id(self.participant.as_bytes())
            .u64(self.action_id)
            .u8(self.kind.code())
            .flag(self.source.is_some())
            .u32(self.source.map(|c| c.0).unwrap_or(0))
            .u32(self.targets.len() as u32);
        self.targets
            .iter()
            .fold(digester, |d, target| d.u32(target.0))
            .u64(self.state_version)
            .finish()
    }

    /// Sign the action with `key`.
    pub fn sign(mut self, key: &[u8]) -> Self {
        self.checksum = self.compute_checksum(key);
        self
    }

    /// Does the checksum match `key`?
    pub fn verify(&self, key: &[u8]) -> bool {
        digests_match(&self.checksum, &self.compute_checksum(key))
    }
}

/// Derives per-participant integrity keys from a session secret.
#[derive(Clone)]
pub struct ActionKeyring {
    secret: Vec<u8>,
}

impl ActionKeyring {
    /// Keyring over a session secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// Keyring with a random secret.
    pub fn random() -> Self {
        Self::new(uuid::Uuid::new_v4().as_bytes().to_vec())
    }

    /// Key for one participant.
    pub fn key_for(&self, participant: &ParticipantId) -> StateHash {
        Digester::keyed(DigestDomain::ActionKey, &self.secret)
            .id(participant.as_bytes())
            .finish()
    }
}

impl std::fmt::Debug for ActionKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ActionKeyring(..)")
    }
}

// =============================================================================
// REJECTIONS
// =============================================================================

/// Why an action was refused.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ActionRejection {
    /// Checksum does not match.
    #[error("action checksum mismatch")]
    IntegrityMismatch,
    /// Submitter is not the participant named in the action.
    #[error("action submitted on behalf of another participant")]
    ImpersonationAttempt,
    /// Participant is not seated.
    #[error("participant is not seated at this table")]
    NotSeated,
    /// Action refers to a table version that does not exist yet.
    #[error("action references future state version {version}")]
    FutureVersion {
        /// Version claimed by the action.
        version: u64,
    },
    /// Action shape is wrong for its kind.
    #[error("malformed action: {detail}")]
    Malformed {
        /// What is wrong.
        detail: String,
    },
    /// Source or target is unknown or hidden. One variant for both, so the
    /// answer does not reveal whether a hidden card exists.
    #[error("card {card} is not visible")]
    NotVisible {
        /// Offending card.
        card: CardId,
    },
    /// Source card is not controlled by the participant.
    #[error("card {card} is not under your control")]
    NotController {
        /// Offending card.
        card: CardId,
    },
    /// Not the participant's turn.
    #[error("not your turn")]
    NotYourTurn,
    /// Participant does not hold priority.
    #[error("you do not hold priority")]
    NoPriority,
    /// Wrong phase or non-empty stack.
    #[error("action not allowed in {phase:?}")]
    WrongTiming {
        /// Current phase.
        phase: Phase,
    },
}

impl ActionRejection {
    /// Taxonomy kind for reporting.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ActionRejection::IntegrityMismatch
            | ActionRejection::Malformed { .. }
            | ActionRejection::FutureVersion { .. } => ErrorKind::Security(SecurityFault::Validation),
            ActionRejection::ImpersonationAttempt => ErrorKind::Security(SecurityFault::Authentication),
            _ => ErrorKind::Security(SecurityFault::Authorization),
        }
    }

    /// Typed error for the router.
    pub fn to_typed_error(&self, action: &ProposedAction, submitter: &ParticipantId) -> TypedError {
        TypedError::new(self.error_kind(), self.to_string())
            .with_context("participant", submitter.to_uuid_string())
            .with_context("action_id", action.action_id)
            .with_context("action_kind", format!("{:?}", action.kind))
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Validate `action` submitted by `submitter` against `table`.
pub fn validate_action(
    table: &TableState,
    action: &ProposedAction,
    submitter: &ParticipantId,
    key: &[u8],
) -> Result<(), ActionRejection> {
    // (c) integrity
    if !action.verify(key) {
        return Err(ActionRejection::IntegrityMismatch);
    }
    if action.participant != *submitter {
        return Err(ActionRejection::ImpersonationAttempt);
    }
    let seat = table.seat(submitter).ok_or(ActionRejection::NotSeated)?;
    if action.state_version > table.version {
        return Err(ActionRejection::FutureVersion {
            version: action.state_version,
        });
    }
    check_shape(action)?;
    if seat.conceded && action.kind != ActionKind::Concede {
        return Err(ActionRejection::Malformed {
            detail: "participant has conceded".into(),
        });
    }

    // (a) visibility
    for card_id in action.source.iter().chain(action.targets.iter()) {
        match table.card(*card_id) {
            Some(card) if card.is_visible_to(submitter) => {}
            _ => return Err(ActionRejection::NotVisible { card: *card_id }),
        }
    }
    if let Some(source) = action.source.and_then(|id| table.card(id)) {
        if source.controller != *submitter {
            return Err(ActionRejection::NotController { card: source.id });
        }
    }

    // (b) turn rights
    check_turn_right(table, action.kind.required_right(), submitter)
}

fn check_shape(action: &ProposedAction) -> Result<(), ActionRejection> {
    if action.kind.needs_source() && action.source.is_none() {
        return Err(ActionRejection::Malformed {
            detail: format!("{:?} requires a source card", action.kind),
        });
    }
    if matches!(action.kind, ActionKind::PassPriority | ActionKind::Concede)
        && (action.source.is_some() || !action.targets.is_empty())
    {
        return Err(ActionRejection::Malformed {
            detail: format!("{:?} takes no cards", action.kind),
        });
    }
    let mut seen = action.targets.clone();
    seen.sort();
    seen.dedup();
    if seen.len() != action.targets.len() {
        return Err(ActionRejection::Malformed {
            detail: "duplicate target".into(),
        });
    }
    Ok(())
}

fn check_turn_right(
    table: &TableState,
    right: TurnRight,
    participant: &ParticipantId,
) -> Result<(), ActionRejection> {
    let turn = &table.turn;
    match right {
        TurnRight::None => Ok(()),
        TurnRight::Priority => {
            if turn.priority == *participant {
                Ok(())
            } else {
                Err(ActionRejection::NoPriority)
            }
        }
        TurnRight::SorcerySpeed => {
            if turn.active != *participant {
                Err(ActionRejection::NotYourTurn)
            } else if turn.priority != *participant {
                Err(ActionRejection::NoPriority)
            } else if !turn.phase.is_main() || !turn.stack_empty {
                Err(ActionRejection::WrongTiming { phase: turn.phase })
            } else {
                Ok(())
            }
        }
        TurnRight::ActiveCombat => {
            if turn.active != *participant {
                Err(ActionRejection::NotYourTurn)
            } else if turn.phase != Phase::Combat {
                Err(ActionRejection::WrongTiming { phase: turn.phase })
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::table::{Card, ZoneKind};

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    fn setup() -> (TableState, ActionKeyring) {
        let (alice, bob) = (pid(1), pid(2));
        let mut table = TableState::new(&[alice, bob]);
        table.version = 3;
        table.cards = vec![
            Card::new(1, "Shock", alice, ZoneKind::Hand),
            Card::new(2, "Grizzly Bears", bob, ZoneKind::Battlefield),
            Card::new(3, "Counterspell", bob, ZoneKind::Hand),
            Card::new(4, "Morph", bob, ZoneKind::Battlefield).face_down(),
            Card::new(5, "Prodigal Sorcerer", alice, ZoneKind::Battlefield),
        ];
        (table, ActionKeyring::new(b"table-secret".to_vec()))
    }

    fn signed(keyring: &ActionKeyring, action: ProposedAction) -> ProposedAction {
        let key = keyring.key_for(&action.participant);
        action.sign(&key)
    }

    #[test]
    fn test_valid_play() {
        let (table, keyring) = setup();
        let alice = pid(1);
        let action = signed(
            &keyring,
            ProposedAction::new(1, alice, ActionKind::PlayCard)
                .with_source(CardId(1))
                .with_target(CardId(2))
                .at_version(3),
        );
        assert_eq!(validate_action(&table, &action, &alice, &keyring.key_for(&alice)), Ok(()));
    }

    #[test]
    fn test_integrity_checked_first() {
        let (table, keyring) = setup();
        let alice = pid(1);
        let mut action = signed(
            &keyring,
            ProposedAction::new(1, alice, ActionKind::PlayCard).with_source(CardId(1)),
        );
        action.targets.push(CardId(3));
        assert_eq!(
            validate_action(&table, &action, &alice, &keyring.key_for(&alice)),
            Err(ActionRejection::IntegrityMismatch)
        );

        let forged = ProposedAction::new(2, alice, ActionKind::PassPriority).sign(b"wrong key");
        assert_eq!(
            validate_action(&table, &forged, &alice, &keyring.key_for(&alice)),
            Err(ActionRejection::IntegrityMismatch)
        );
    }

    #[test]
    fn test_hidden_targets_rejected() {
        let (table, keyring) = setup();
        let alice = pid(1);
        let key = keyring.key_for(&alice);
        for hidden in [CardId(3), CardId(4), CardId(99)] {
            let action = signed(
                &keyring,
                ProposedAction::new(1, alice, ActionKind::PlayCard)
                    .with_source(CardId(1))
                    .with_target(hidden),
            );
            assert_eq!(
                validate_action(&table, &action, &alice, &key),
                Err(ActionRejection::NotVisible { card: hidden })
            );
        }
    }

    #[test]
    fn test_turn_rights() {
        let (mut table, keyring) = setup();
        let (alice, bob) = (pid(1), pid(2));
        let bob_key = keyring.key_for(&bob);

        let bob_pass = signed(&keyring, ProposedAction::new(1, bob, ActionKind::PassPriority));
        assert_eq!(validate_action(&table, &bob_pass, &bob, &bob_key), Err(ActionRejection::NoPriority));

        let bob_attack = signed(&keyring, ProposedAction::new(2, bob, ActionKind::DeclareAttack));
        assert_eq!(validate_action(&table, &bob_attack, &bob, &bob_key), Err(ActionRejection::NotYourTurn));

        table.turn.priority = bob;
        assert_eq!(validate_action(&table, &bob_pass, &bob, &bob_key), Ok(()));

        let alice_key = keyring.key_for(&alice);
        let alice_play = signed(
            &keyring,
            ProposedAction::new(3, alice, ActionKind::PlayCard).with_source(CardId(1)),
        );
        assert_eq!(validate_action(&table, &alice_play, &alice, &alice_key), Err(ActionRejection::NoPriority));

        table.turn.priority = alice;
        table.turn.phase = Phase::Combat;
        assert_eq!(
            validate_action(&table, &alice_play, &alice, &alice_key),
            Err(ActionRejection::WrongTiming { phase: Phase::Combat })
        );

        let concede = signed(&keyring, ProposedAction::new(4, bob, ActionKind::Concede));
        assert_eq!(validate_action(&table, &concede, &bob, &bob_key), Ok(()));
    }

    #[test]
    fn test_structural_checks() {
        let (table, keyring) = setup();
        let (alice, bob) = (pid(1), pid(2));
        let key = keyring.key_for(&alice);

        let spoofed = signed(&keyring, ProposedAction::new(1, bob, ActionKind::Concede));
        assert_eq!(
            validate_action(&table, &spoofed, &alice, &key),
            Err(ActionRejection::IntegrityMismatch)
        );
        let spoofed_with_key = ProposedAction::new(1, bob, ActionKind::Concede).sign(&key);
        assert_eq!(
            validate_action(&table, &spoofed_with_key, &alice, &key),
            Err(ActionRejection::ImpersonationAttempt)
        );

        let no_source = signed(&keyring, ProposedAction::new(2, alice, ActionKind::ActivateAbility));
        assert!(matches!(
            validate_action(&table, &no_source, &alice, &key),
            Err(ActionRejection::Malformed { .. })
        ));

        let future = signed(&keyring, ProposedAction::new(3, alice, ActionKind::PassPriority).at_version(10));
        assert_eq!(
            validate_action(&table, &future, &alice, &key),
            Err(ActionRejection::FutureVersion { version: 10 })
        );

        let steal = signed(
            &keyring,
            ProposedAction::new(4, alice, ActionKind::ActivateAbility).with_source(CardId(2)),
        );
        assert_eq!(
            validate_action(&table, &steal, &alice, &key),
            Err(ActionRejection::NotController { card: CardId(2) })
        );

        let stranger = pid(9);
        let outsider = ProposedAction::new(5, stranger, ActionKind::Concede).sign(&keyring.key_for(&stranger));
        assert_eq!(
            validate_action(&table, &outsider, &stranger, &keyring.key_for(&stranger)),
            Err(ActionRejection::NotSeated)
        );
    }

    #[test]
    fn test_validation_is_pure() {
        let (table, keyring) = setup();
        let before = table.clone();
        let alice = pid(1);
        let action = signed(&keyring, ProposedAction::new(1, alice, ActionKind::PlayCard).with_source(CardId(1)));
        let _ = validate_action(&table, &action, &alice, &keyring.key_for(&alice));
        assert_eq!(table, before);
    }

    #[test]
    fn test_rejection_kinds_are_fatal() {
        let rejection = ActionRejection::NotYourTurn;
        let action = ProposedAction::new(1, pid(1), ActionKind::DeclareAttack);
        let err = rejection.to_typed_error(&action, &pid(1));
        assert!(!err.is_recoverable());
        assert_eq!(err.severity(), crate::error::Severity::Critical);
        assert_eq!(err.context_value("action_id"), Some(&serde_json::json!(1)));
    }
}
