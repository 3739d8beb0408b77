//! Filtered Views
//!
//! Per-participant projection of a [`TableState`].
//!
//! Hidden cards never contribute anything but a count (private and hidden
//! zones) or an anonymous placeholder (face down cards in public zones).
//! References from visible cards to hidden ones are redacted as well, so a
//! hidden card's identity cannot be recovered through an attachment or link.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use super::table::{Card, Seat, TableState, TurnState, ZoneKind, ZoneVisibility};
use crate::core::{CardId, ParticipantId};

/// A reference to another card, redacted when that card is hidden.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CardRef {
    /// Referenced card is visible.
    Visible(CardId),
    /// Referenced card is hidden from the viewer.
    Hidden,
}

/// Full detail of a visible card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardView {
    /// Instance identifier.
    pub id: CardId,
    /// Card name.
    pub name: String,
    /// Owner.
    pub owner: ParticipantId,
    /// Controller.
    pub controller: ParticipantId,
    /// Face down (only ever true for the viewer's own face down cards).
    pub face_down: bool,
    /// Attributes.
    pub attributes: BTreeMap<String, String>,
    /// Attachment target.
    pub attached_to: Option<CardRef>,
    /// Linked cards.
    pub linked: Vec<CardRef>,
}

/// One slot in a public zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "slot", rename_all = "snake_case")]
pub enum CardSlot {
    /// A card the viewer may see.
    Visible(CardView),
    /// A face down card. Only its controller is disclosed.
    FaceDown {
        /// Controller of the face down card.
        controller: ParticipantId,
    },
}

/// One owner's zone as seen by the viewer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneView {
    /// Zone owner.
    pub owner: ParticipantId,
    /// Zone.
    pub zone: ZoneKind,
    /// Number of cards in the zone, always exact.
    pub count: usize,
    /// Card slots. Empty for zones the viewer may not look into.
    pub cards: Vec<CardSlot>,
}

/// Everything a participant is entitled to see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredView {
    /// Participant this view was built for.
    pub viewer: ParticipantId,
    /// Table version the view was built from.
    pub version: u64,
    /// Public seat information.
    pub seats: Vec<Seat>,
    /// Turn state.
    pub turn: TurnState,
    /// Zones ordered by seat, then zone.
    pub zones: Vec<ZoneView>,
}

impl FilteredView {
    /// The viewer's or another owner's zone.
    pub fn zone(&self, owner: &ParticipantId, zone: ZoneKind) -> Option<&ZoneView> {
        self.zones.iter().find(|z| z.owner == *owner && z.zone == zone)
    }

    /// Every card identifier the view discloses, including references.
    pub fn disclosed_ids(&self) -> Vec<CardId> {
        let mut ids = Vec::new();
        for zone in &self.zones {
            for slot in &zone.cards {
                if let CardSlot::Visible(card) = slot {
                    ids.push(card.id);
                    ids.extend(card.attached_to.iter().chain(card.linked.iter()).filter_map(|r| match r {
                        CardRef::Visible(id) => Some(*id),
                        CardRef::Hidden => None,
                    }));
                }
            }
        }
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Build `viewer`'s projection of `table`.
pub fn filtered_view(table: &TableState, viewer: &ParticipantId) -> FilteredView {
    let mut zones = Vec::new();
    for seat in &table.seats {
        for zone in ZoneKind::ALL {
            let cards: Vec<&Card> = table.cards_in(&seat.participant, zone).collect();
            let count = cards.len();
            let slots = if zone_is_count_only(zone, &seat.participant, viewer) {
                cards
                    .iter()
                    .filter(|c| c.revealed_to.contains(viewer))
                    .map(|c| CardSlot::Visible(card_view(table, c, viewer)))
                    .collect()
            } else {
                cards.iter().map(|c| slot_for(table, c, viewer)).collect()
            };
            zones.push(ZoneView {
                owner: seat.participant,
                zone,
                count,
                cards: slots,
            });
        }
    }

    FilteredView {
        viewer: *viewer,
        version: table.version,
        seats: table.seats.clone(),
        turn: table.turn.clone(),
        zones,
    }
}

/// Zones the viewer may only count: every library, other owners' private zones.
fn zone_is_count_only(zone: ZoneKind, owner: &ParticipantId, viewer: &ParticipantId) -> bool {
    match zone.visibility() {
        ZoneVisibility::Hidden => true,
        ZoneVisibility::Private => owner != viewer,
        ZoneVisibility::Public => false,
    }
}

fn slot_for(table: &TableState, card: &Card, viewer: &ParticipantId) -> CardSlot {
    if card.is_visible_to(viewer) {
        CardSlot::Visible(card_view(table, card, viewer))
    } else {
        CardSlot::FaceDown {
            controller: card.controller,
        }
    }
}

fn card_view(table: &TableState, card: &Card, viewer: &ParticipantId) -> CardView {
    CardView {
        id: card.id,
        name: card.name.clone(),
        owner: card.owner,
        controller: card.controller,
        face_down: card.face_down,
        attributes: card.attributes.clone(),
        attached_to: card.attached_to.map(|id| redact(table, id, viewer)),
        linked: card.linked.iter().map(|id| redact(table, *id, viewer)).collect(),
    }
}

fn redact(table: &TableState, id: CardId, viewer: &ParticipantId) -> CardRef {
    match table.card(id) {
        Some(target) if target.is_visible_to(viewer) => CardRef::Visible(id),
        _ => CardRef::Hidden,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    fn sample_table() -> TableState {
        let (alice, bob) = (pid(1), pid(2));
        let mut table = TableState::new(&[alice, bob]);
        table.version = 7;
        table.cards = vec![
            Card::new(1, "Forest", alice, ZoneKind::Library),
            Card::new(2, "Giant Growth", alice, ZoneKind::Hand).with_attribute("cost", "G"),
            Card::new(3, "Llanowar Elves", alice, ZoneKind::Battlefield),
            Card::new(4, "Island", bob, ZoneKind::Library),
            Card::new(5, "Counterspell", bob, ZoneKind::Hand),
            Card::new(6, "Exalted Angel", bob, ZoneKind::Battlefield).face_down(),
            Card::new(7, "Pacifism", bob, ZoneKind::Battlefield).attached_to(CardId(3)),
            Card::new(8, "Clone", bob, ZoneKind::Battlefield).linked_to(CardId(6)),
            Card::new(9, "Brainstorm", bob, ZoneKind::Graveyard),
        ];
        table
    }

    fn names(view: &FilteredView) -> Vec<String> {
        view.zones
            .iter()
            .flat_map(|z| z.cards.iter())
            .filter_map(|s| match s {
                CardSlot::Visible(c) => Some(c.name.clone()),
                CardSlot::FaceDown { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_alice_view() {
        let table = sample_table();
        let (alice, bob) = (pid(1), pid(2));
        let view = filtered_view(&table, &alice);

        let seen = names(&view);
        assert!(seen.contains(&"Giant Growth".to_string()));
        assert!(seen.contains(&"Pacifism".to_string()));
        assert!(!seen.contains(&"Forest".to_string()));
        assert!(!seen.contains(&"Counterspell".to_string()));
        assert!(!seen.contains(&"Exalted Angel".to_string()));

        let bob_hand = view.zone(&bob, ZoneKind::Hand).unwrap();
        assert_eq!(bob_hand.count, 1);
        assert!(bob_hand.cards.is_empty());

        let bob_field = view.zone(&bob, ZoneKind::Battlefield).unwrap();
        assert_eq!(bob_field.count, 3);
        assert!(bob_field.cards.contains(&CardSlot::FaceDown { controller: bob }));
    }

    #[test]
    fn test_links_to_hidden_cards_are_redacted() {
        let table = sample_table();
        let alice = pid(1);
        let view = filtered_view(&table, &alice);
        let clone = view
            .zones
            .iter()
            .flat_map(|z| z.cards.iter())
            .find_map(|s| match s {
                CardSlot::Visible(c) if c.id == CardId(8) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(clone.linked, vec![CardRef::Hidden]);
        assert!(!view.disclosed_ids().contains(&CardId(6)));

        let bob_view = filtered_view(&table, &pid(2));
        assert!(bob_view.disclosed_ids().contains(&CardId(6)));
    }

    #[test]
    fn test_own_library_is_count_only() {
        let table = sample_table();
        let alice = pid(1);
        let view = filtered_view(&table, &alice);
        let library = view.zone(&alice, ZoneKind::Library).unwrap();
        assert_eq!(library.count, 1);
        assert!(library.cards.is_empty());
    }

    #[test]
    fn test_revealed_hand_card() {
        let mut table = sample_table();
        let alice = pid(1);
        if let Some(card) = table.cards.iter_mut().find(|c| c.id == CardId(5)) {
            card.revealed_to.push(alice);
        }
        let view = filtered_view(&table, &alice);
        assert!(names(&view).contains(&"Counterspell".to_string()));
    }

    // ===== Non-leakage =====

    fn arb_card(id: u32) -> impl Strategy<Value = Card> {
        (
            0u8..3,
            0u8..3,
            prop::sample::select(ZoneKind::ALL.to_vec()),
            any::<bool>(),
            prop::option::of(0u32..24),
            prop::collection::vec(0u32..24, 0..3),
        )
            .prop_map(move |(owner, controller, zone, face_down, attached, linked)| {
                let mut card = Card::new(id, format!("secret-{id}"), pid(owner), zone)
                    .controlled_by(pid(controller))
                    .with_attribute("oracle", format!("oracle-{id}"));
                card.face_down = face_down;
                card.attached_to = attached.map(CardId);
                card.linked = linked.into_iter().map(CardId).collect();
                card
            })
    }

    fn arb_table() -> impl Strategy<Value = TableState> {
        (1usize..24)
            .prop_flat_map(|n| (0..n as u32).map(arb_card).collect::<Vec<_>>())
            .prop_map(|cards| {
                let mut table = TableState::new(&[pid(0), pid(1), pid(2)]);
                table.cards = cards;
                table
            })
    }

    proptest! {
        #[test]
        fn prop_hidden_cards_never_leak(table in arb_table(), viewer in 0u8..3) {
            let viewer = pid(viewer);
            let view = filtered_view(&table, &viewer);
            let json = serde_json::to_string(&view).unwrap();

            for card in &table.cards {
                if !card.is_visible_to(&viewer) {
                    let name = format!("\"{}\"", card.name);
                    let oracle = format!("\"oracle-{}\"", card.id.0);
                    prop_assert!(!json.contains(&name), "leaked {}", card.name);
                    prop_assert!(!json.contains(&oracle), "leaked oracle of {}", card.id);
                    prop_assert!(!view.disclosed_ids().contains(&card.id));
                }
            }

            for owner in table.participants() {
                for zone in [ZoneKind::Library, ZoneKind::Hand] {
                    let zone_view = view.zone(&owner, zone).unwrap();
                    prop_assert_eq!(zone_view.count, table.cards_in(&owner, zone).count());
                    if zone == ZoneKind::Library || owner != viewer {
                        prop_assert!(zone_view.cards.iter().all(|s| matches!(
                            s,
                            CardSlot::Visible(c) if table.card(c.id).map(|t| t.revealed_to.contains(&viewer)).unwrap_or(false)
                        )));
                    }
                }
            }
        }
    }
}
