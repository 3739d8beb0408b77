//! Table Model
//!
//! Read-only snapshot of the authoritative shared state, as far as this layer
//! needs it: who sits at the table, where every card is, and whose turn it
//! is. The rules engine owns and mutates the real state; this layer only
//! reads snapshots of it.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::{CardId, ParticipantId};

// =============================================================================
// ZONES
// =============================================================================

/// Who may see the cards in a zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneVisibility {
    /// Everyone, unless a card is face down.
    Public,
    /// The owning participant only.
    Private,
    /// Nobody.
    Hidden,
}

/// Card zones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    /// Draw pile.
    Library,
    /// Cards in hand.
    Hand,
    /// Reserve cards outside the game.
    Sideboard,
    /// Cards in play.
    Battlefield,
    /// Discard pile.
    Graveyard,
    /// Removed from the game.
    Exile,
    /// Spells and abilities waiting to resolve.
    Stack,
}

impl ZoneKind {
    /// Every zone, in display order.
    pub const ALL: [ZoneKind; 7] = [
        ZoneKind::Library,
        ZoneKind::Hand,
        ZoneKind::Sideboard,
        ZoneKind::Battlefield,
        ZoneKind::Graveyard,
        ZoneKind::Exile,
        ZoneKind::Stack,
    ];

    /// Default visibility of the zone.
    pub fn visibility(self) -> ZoneVisibility {
        match self {
            ZoneKind::Library => ZoneVisibility::Hidden,
            ZoneKind::Hand | ZoneKind::Sideboard => ZoneVisibility::Private,
            ZoneKind::Battlefield | ZoneKind::Graveyard | ZoneKind::Exile | ZoneKind::Stack => {
                ZoneVisibility::Public
            }
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ZoneKind::Library => "library",
            ZoneKind::Hand => "hand",
            ZoneKind::Sideboard => "sideboard",
            ZoneKind::Battlefield => "battlefield",
            ZoneKind::Graveyard => "graveyard",
            ZoneKind::Exile => "exile",
            ZoneKind::Stack => "stack",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CARDS
// =============================================================================

/// A card instance on the table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Instance identifier.
    pub id: CardId,
    /// Card name.
    pub name: String,
    /// Participant the card belongs to.
    pub owner: ParticipantId,
    /// Participant currently controlling the card.
    pub controller: ParticipantId,
    /// Current zone.
    pub zone: ZoneKind,
    /// Face down cards are only visible to their controller.
    pub face_down: bool,
    /// Participants the card was explicitly revealed to.
    pub revealed_to: Vec<ParticipantId>,
    /// Printed and derived attributes (cost, type, text, ...).
    pub attributes: BTreeMap<String, String>,
    /// Card this one is attached to.
    pub attached_to: Option<CardId>,
    /// Other cards this one refers to (targets, copies, exiled-with).
    pub linked: Vec<CardId>,
}

impl Card {
    /// Face-up card owned and controlled by `owner`.
    pub fn new(id: u32, name: impl Into<String>, owner: ParticipantId, zone: ZoneKind) -> Self {
        Self {
            id: CardId(id),
            name: name.into(),
            owner,
            controller: owner,
            zone,
            face_down: false,
            revealed_to: Vec::new(),
            attributes: BTreeMap::new(),
            attached_to: None,
            linked: Vec::new(),
        }
    }

    /// Builder: set face down.
    pub fn face_down(mut self) -> Self {
        self.face_down = true;
        self
    }

    /// Builder: add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder: attach to another card.
    pub fn attached_to(mut self, target: CardId) -> Self {
        self.attached_to = Some(target);
        self
    }

    /// Builder: link to another card.
    pub fn linked_to(mut self, target: CardId) -> Self {
        self.linked.push(target);
        self
    }

    /// Builder: hand control to another participant.
    pub fn controlled_by(mut self, controller: ParticipantId) -> Self {
        self.controller = controller;
        self
    }

    /// Does `viewer` own or control the card?
    pub fn is_held_by(&self, viewer: &ParticipantId) -> bool {
        self.owner == *viewer || self.controller == *viewer
    }

    /// May `viewer` see this card's identity?
    ///
    /// Explicit reveals always win. Library cards are hidden from everyone,
    /// face down cards from everyone but their controller, and private zones
    /// from everyone but the owner or controller.
    pub fn is_visible_to(&self, viewer: &ParticipantId) -> bool {
        if self.revealed_to.contains(viewer) {
            return true;
        }
        match self.zone.visibility() {
            ZoneVisibility::Hidden => false,
            _ if self.face_down => self.controller == *viewer,
            ZoneVisibility::Private => self.is_held_by(viewer),
            ZoneVisibility::Public => true,
        }
    }
}

// =============================================================================
// TURN & SEATS
// =============================================================================

/// Turn phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Untap, upkeep, draw.
    Beginning,
    /// First main phase.
    PrecombatMain,
    /// Combat.
    Combat,
    /// Second main phase.
    PostcombatMain,
    /// End step and cleanup.
    Ending,
}

impl Phase {
    /// Is this a main phase?
    pub fn is_main(self) -> bool {
        matches!(self, Phase::PrecombatMain | Phase::PostcombatMain)
    }
}

/// Whose turn it is and who may act.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    /// Turn counter, starting at 1.
    pub turn_number: u32,
    /// Participant whose turn it is.
    pub active: ParticipantId,
    /// Participant holding priority.
    pub priority: ParticipantId,
    /// Current phase.
    pub phase: Phase,
    /// Is anything waiting on the stack?
    pub stack_empty: bool,
}

/// A participant's seat at the table. Everything here is public.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Participant.
    pub participant: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Life total.
    pub life: i32,
    /// Has the participant conceded?
    pub conceded: bool,
}

// =============================================================================
// TABLE
// =============================================================================

/// Read-only snapshot of the shared state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableState {
    /// Monotonic version assigned by the rules engine.
    pub version: u64,
    /// Seats in turn order.
    pub seats: Vec<Seat>,
    /// Every card instance.
    pub cards: Vec<Card>,
    /// Turn state.
    pub turn: TurnState,
}

impl TableState {
    /// Empty table for the given seats; the first seat is active.
    pub fn new(participants: &[ParticipantId]) -> Self {
        let first = participants.first().copied().unwrap_or_default();
        Self {
            version: 0,
            seats: participants
                .iter()
                .enumerate()
                .map(|(i, p)| Seat {
                    participant: *p,
                    display_name: format!("Player {}", i + 1),
                    life: 20,
                    conceded: false,
                })
                .collect(),
            cards: Vec::new(),
            turn: TurnState {
                turn_number: 1,
                active: first,
                priority: first,
                phase: Phase::PrecombatMain,
                stack_empty: true,
            },
        }
    }

    /// Lookup a card.
    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == id)
    }

    /// Lookup a seat.
    pub fn seat(&self, participant: &ParticipantId) -> Option<&Seat> {
        self.seats.iter().find(|s| s.participant == *participant)
    }

    /// Seated participants in turn order.
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.seats.iter().map(|s| s.participant).collect()
    }

    /// Cards owned by `owner` in `zone`.
    pub fn cards_in(&self, owner: &ParticipantId, zone: ZoneKind) -> impl Iterator<Item = &Card> {
        let owner = *owner;
        self.cards
            .iter()
            .filter(move |c| c.owner == owner && c.zone == zone)
    }
}
