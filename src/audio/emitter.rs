use serde::{Deserialize, Serialize};

use super::deck::DeckId;
use crate::media::MediaEvent;

/// Engine-side consumers of deck media events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Listener {
    /// Evaluates transition triggers on playhead updates.
    TransitionWatch,
    /// Throttled host-facing position updates.
    PositionReporter,
    /// Lifecycle of the audible track: ended, errors, pending play.
    Playback,
    /// Readiness and failures of the staged next track.
    Preload,
}

impl Listener {
    /// Listeners that always follow the active deck.
    pub const ACTIVE: [Listener; 3] = [
        Listener::TransitionWatch,
        Listener::PositionReporter,
        Listener::Playback,
    ];

    /// Whether this listener wants `event` at all.
    pub fn accepts(self, event: &MediaEvent) -> bool {
        match self {
            Listener::TransitionWatch => matches!(event, MediaEvent::TimeUpdate { .. }),
            Listener::PositionReporter => matches!(event, MediaEvent::TimeUpdate { .. }),
            Listener::Playback => matches!(
                event,
                MediaEvent::CanPlay | MediaEvent::Ended | MediaEvent::Error { .. }
            ),
            Listener::Preload => matches!(event, MediaEvent::CanPlay | MediaEvent::Error { .. }),
        }
    }
}

/// Typed per-deck subscription table. Subscriptions are explicit and move
/// with [`Decks::swap_roles`](super::deck::Decks::swap_roles).
#[derive(Debug, Default)]
pub struct DeckEmitter {
    subscriptions: [Vec<Listener>; 2],
}

impl DeckEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribing twice is a no-op.
    pub fn subscribe(&mut self, deck: DeckId, listener: Listener) {
        let subs = &mut self.subscriptions[deck.index()];
        if !subs.contains(&listener) {
            subs.push(listener);
        }
    }

    /// Returns whether the listener was subscribed.
    pub fn unsubscribe(&mut self, deck: DeckId, listener: Listener) -> bool {
        let subs = &mut self.subscriptions[deck.index()];
        let before = subs.len();
        subs.retain(|l| *l != listener);
        subs.len() != before
    }

    pub fn is_subscribed(&self, deck: DeckId, listener: Listener) -> bool {
        self.subscriptions[deck.index()].contains(&listener)
    }

    pub fn listeners(&self, deck: DeckId) -> &[Listener] {
        &self.subscriptions[deck.index()]
    }

    /// Listeners on `deck` that should receive `event`, in subscription order.
    pub fn route(&self, deck: DeckId, event: &MediaEvent) -> Vec<Listener> {
        self.subscriptions[deck.index()]
            .iter()
            .copied()
            .filter(|l| l.accepts(event))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let mut e = DeckEmitter::new();
        e.subscribe(DeckId::DeckA, Listener::Playback);
        e.subscribe(DeckId::DeckA, Listener::Playback);
        assert_eq!(e.listeners(DeckId::DeckA), &[Listener::Playback]);
        assert!(e.listeners(DeckId::DeckB).is_empty());
    }

    #[test]
    fn unsubscribe_reports_presence() {
        let mut e = DeckEmitter::new();
        e.subscribe(DeckId::DeckB, Listener::Preload);
        assert!(e.unsubscribe(DeckId::DeckB, Listener::Preload));
        assert!(!e.unsubscribe(DeckId::DeckB, Listener::Preload));
    }

    #[test]
    fn route_filters_by_event() {
        let mut e = DeckEmitter::new();
        for l in Listener::ACTIVE {
            e.subscribe(DeckId::DeckA, l);
        }
        e.subscribe(DeckId::DeckB, Listener::Preload);

        let tick = MediaEvent::TimeUpdate { position: 3.0 };
        assert_eq!(
            e.route(DeckId::DeckA, &tick),
            vec![Listener::TransitionWatch, Listener::PositionReporter]
        );
        assert!(e.route(DeckId::DeckB, &tick).is_empty(), "idle deck time is ignored");
        assert_eq!(
            e.route(DeckId::DeckB, &MediaEvent::Error { code: 3 }),
            vec![Listener::Preload]
        );
        assert_eq!(e.route(DeckId::DeckA, &MediaEvent::Ended), vec![Listener::Playback]);
    }
}
