//! Transition lifecycle: trigger → wait for the incoming deck → crossfade →
//! deck swap, plus abandon/cancel back to a neutral state.

use chrono::Utc;

use super::{EngineEvent, MixEngine};
use crate::{
    audio::{
        crossfade::{
            select_crossfader, Crossfader, FadeRequest, FadeState, MixIo, COMPLETION_BUFFER,
            PROGRESS_STEPS,
        },
        deck::{DeckId, DeckState},
        effects::EffectCtx,
        graph::GAIN_FLOOR,
    },
    config::CrossfadePrecedence,
    error::EngineResult,
    history::{TransitionOutcome, TransitionRecord},
    queue::Track,
    scheduler::{
        transition_planner::{bpm_gap_effects, PlanInput},
        trigger, EngineTask, TriggerContext, TriggerDecision, TriggerReason,
    },
};

/// How long a started transition waits for the incoming deck to load.
pub(super) const READY_TIMEOUT_SECS: f64 = 10.0;

/// Fade used when the outgoing deck is already silent (ended or failed).
pub(super) const RECOVERY_FADE_SECS: f64 = 0.5;

pub(super) struct InFlight {
    pub id: u64,
    pub reason: TriggerReason,
    pub outgoing: DeckId,
    pub incoming: DeckId,
    /// Queue index that becomes current on completion.
    pub incoming_index: usize,
    /// Playhead the incoming track started from.
    pub entry_point: f64,
    /// Outgoing playhead when the trigger fired; cue planning measures
    /// from here even if the launch waited for the incoming deck.
    pub trigger_position: f64,
    pub phase: FlightPhase,
}

pub(super) enum FlightPhase {
    WaitingForReady,
    Fading {
        fader: Box<dyn Crossfader>,
        fade: FadeState,
    },
}

fn is_recovery(reason: TriggerReason) -> bool {
    matches!(reason, TriggerReason::TrackEnded | TriggerReason::Recovery)
}

impl MixEngine {
    /// Host request for an immediate transition. A no-op (returning `false`)
    /// while one is running or when nothing is staged.
    pub fn force_transition(&mut self) -> bool {
        self.start_transition(TriggerReason::Manual)
    }

    /// Cancel the transition in flight and return to neutral: outgoing deck
    /// audible, incoming deck muted and stopped.
    pub fn cancel_transition(&mut self, cause: &str) -> bool {
        if self.transition.is_none() {
            return false;
        }
        self.unwind_transition(TransitionOutcome::Cancelled, cause);
        true
    }

    // ── Start ────────────────────────────────────────────────────────────

    pub(super) fn start_transition(&mut self, reason: TriggerReason) -> bool {
        if self.session.is_transitioning() {
            log::debug!("Transition trigger {reason:?} ignored: already transitioning");
            return false;
        }
        let Some(index) = self.staged else {
            log::debug!("Transition trigger {reason:?} ignored: nothing staged");
            return false;
        };
        let incoming = self.decks.idle_id();
        let deck = self.decks.get(incoming);
        let Some(to_track) = deck.track_id().map(str::to_string) else {
            return false;
        };
        if matches!(deck.state, DeckState::Empty | DeckState::Error) {
            log::debug!("Transition trigger {reason:?} ignored: {incoming} is {:?}", deck.state);
            return false;
        }
        if !self.session.begin_transition() {
            return false;
        }

        self.next_transition_id += 1;
        let id = self.next_transition_id;
        let outgoing = self.decks.active_id();
        let trigger_position = self.decks.active().position();
        let from_track = self.decks.active().track_id().map(str::to_string);
        self.history.push(TransitionRecord {
            id,
            from_track: from_track.clone(),
            to_track: to_track.clone(),
            reason,
            strategy: select_crossfader(self.graph.as_ref()).strategy(),
            crossfade_secs: self.session.config.crossfade_secs,
            score: None,
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
        });
        log::info!("Transition {id} ({reason:?}): {from_track:?} -> {to_track}");
        self.events.push(EngineEvent::TransitionStarted {
            id,
            reason,
            from_track,
            to_track,
        });
        self.time_until_transition = None;
        self.transition = Some(InFlight {
            id,
            reason,
            outgoing,
            incoming,
            incoming_index: index,
            entry_point: 0.0,
            trigger_position,
            phase: FlightPhase::WaitingForReady,
        });

        if self.decks.get(incoming).is_ready() {
            self.launch_crossfade();
        } else {
            let at = self.wall.now() + READY_TIMEOUT_SECS;
            self.tasks.schedule(at, EngineTask::ReadyTimeout { transition: id });
            log::debug!("Transition {id} waiting for {incoming} to become ready");
        }
        true
    }

    /// Plan, start the incoming deck and schedule the fade. Runs once the
    /// incoming deck is ready; re-validates everything it reads.
    fn launch_crossfade(&mut self) {
        let Some(flight) = self.transition.as_ref() else {
            return;
        };
        if !matches!(flight.phase, FlightPhase::WaitingForReady) {
            return;
        }
        let (id, reason, outgoing, incoming) =
            (flight.id, flight.reason, flight.outgoing, flight.incoming);
        let trigger_position = flight.trigger_position;
        if !self.session.is_transitioning() || self.decks.active_id() != outgoing {
            log::error!("Transition {id} lost its decks before launch");
            self.unwind_transition(
                TransitionOutcome::Abandoned,
                "deck roles changed before launch",
            );
            return;
        }
        let Some(incoming_track) = self.decks.get(incoming).track.clone() else {
            self.unwind_transition(TransitionOutcome::Abandoned, "incoming deck was emptied");
            return;
        };

        let cfg = self.session.config.clone();
        let recovering = is_recovery(reason);
        let current_track = self.decks.get(outgoing).track.clone();
        let current_bpm = current_track.as_ref().and_then(Track::valid_bpm);
        let next_bpm = incoming_track.valid_bpm();

        let next_cues = self.cues.cues(&incoming_track.id);
        let plan = self.planner.plan(&PlanInput {
            position: trigger_position,
            duration: self.decks.get(outgoing).duration(),
            current_cues: current_track
                .as_ref()
                .map(|t| self.cues.cues(&t.id))
                .unwrap_or(&[]),
            next_cues,
            current_bpm,
            next_bpm,
        });
        let fallback_entry = self.planner.fallback_entry(next_cues);

        let fade_secs = if recovering {
            RECOVERY_FADE_SECS
        } else {
            match (cfg.crossfade_precedence, &plan) {
                (CrossfadePrecedence::Plan, Some(p)) => p.recommended_crossfade_secs,
                _ => cfg.crossfade_secs,
            }
        };
        let mut entry = plan.as_ref().map_or(fallback_entry, |p| p.intro_cue.time).max(0.0);
        if self.decks.get(incoming).duration().is_some_and(|d| entry >= d - fade_secs) {
            entry = 0.0;
        }

        let fader = select_crossfader(self.graph.as_ref());
        fader.prime_incoming(
            &mut MixIo {
                decks: &mut self.decks,
                graph: self.graph.as_mut(),
            },
            incoming,
        );
        let deck = self.decks.get_mut(incoming);
        deck.seek(entry);
        if let Err(e) = deck.play() {
            self.track_error(incoming, e.to_string());
            let detail = format!("incoming deck rejected play: {e}");
            self.unwind_transition(TransitionOutcome::Abandoned, &detail);
            return;
        }

        if !recovering {
            let outcome = self.bpm.apply(&mut self.decks, outgoing, current_bpm, next_bpm);
            self.events.push(EngineEvent::BpmSync { outcome });
            if cfg.auto_effects {
                let effects = match &plan {
                    Some(p) => p.recommended_effects.clone(),
                    None => bpm_gap_effects(&cfg.planner, current_bpm, next_bpm, fade_secs),
                };
                for effect in effects {
                    self.start_effect(effect, outgoing);
                }
            }
        }

        let fade = fader.schedule(
            &mut MixIo {
                decks: &mut self.decks,
                graph: self.graph.as_mut(),
            },
            FadeRequest {
                outgoing,
                incoming,
                duration: fade_secs,
                target_volume: cfg.master_volume.max(GAIN_FLOOR),
            },
        );

        let now = self.wall.now();
        for step in 1..=PROGRESS_STEPS {
            let at = now + fade_secs * step as f64 / PROGRESS_STEPS as f64;
            self.tasks.schedule(at, EngineTask::Progress { transition: id, step });
        }
        for step in 1..=fade.steps {
            let at = now + fade_secs * step as f64 / fade.steps as f64;
            self.tasks.schedule(at, EngineTask::FadeStep { transition: id, step });
        }
        self.tasks
            .schedule(now + fade_secs + COMPLETION_BUFFER, EngineTask::Complete { transition: id });

        let score = plan.as_ref().map(|p| p.compatibility_score);
        if let Some(record) = self.history.get_mut(id) {
            record.strategy = fader.strategy();
            record.crossfade_secs = fade_secs;
            record.score = score;
        }
        match &plan {
            Some(p) => log::info!(
                "Transition {id}: '{}' -> '{}' ({:.2}), entry {entry:.1}s, {fade_secs:.1}s {:?}",
                p.outro_cue.name,
                p.intro_cue.name,
                p.compatibility_score,
                fader.strategy()
            ),
            None => log::info!(
                "Transition {id}: no cue plan, entry {entry:.1}s, {fade_secs:.1}s {:?} fade",
                fader.strategy()
            ),
        }

        if let Some(flight) = self.transition.as_mut() {
            flight.entry_point = entry;
            flight.phase = FlightPhase::Fading { fader, fade };
        }
        self.playing = true;
        self.pending_play = false;
    }

    // ── Timers ───────────────────────────────────────────────────────────

    pub(super) fn handle_task(&mut self, task: EngineTask) {
        if let Some(tid) = task.transition_id() {
            if self.transition.as_ref().map(|f| f.id) != Some(tid) {
                log::debug!("Dropping stale task {task:?}");
                return;
            }
        }
        match task {
            EngineTask::Progress { transition, step } => {
                self.session.set_progress(step as f64 / PROGRESS_STEPS as f64);
                self.events.push(EngineEvent::TransitionProgress {
                    id: transition,
                    progress: self.session.progress(),
                });
            }
            EngineTask::FadeStep { step, .. } => {
                if let Some(InFlight {
                    phase: FlightPhase::Fading { fader, fade },
                    ..
                }) = self.transition.as_ref()
                {
                    let mut io = MixIo {
                        decks: &mut self.decks,
                        graph: self.graph.as_mut(),
                    };
                    fader.apply_step(&mut io, fade, step);
                }
            }
            EngineTask::Complete { .. } => self.complete_transition(),
            EngineTask::ReadyTimeout { transition } => {
                let waiting = self
                    .transition
                    .as_ref()
                    .is_some_and(|f| matches!(f.phase, FlightPhase::WaitingForReady));
                if waiting {
                    log::warn!(
                        "Transition {transition}: incoming deck not ready in {READY_TIMEOUT_SECS}s"
                    );
                    self.unwind_transition(
                        TransitionOutcome::Abandoned,
                        "incoming deck never became ready",
                    );
                }
            }
            EngineTask::EffectCleanup { kind } => {
                let mut ctx = EffectCtx {
                    decks: &mut self.decks,
                    graph: self.graph.as_mut(),
                    tasks: &mut self.tasks,
                    now: self.wall.now(),
                };
                if self.effects.finish(kind, &mut ctx) {
                    self.events.push(EngineEvent::EffectEnded { kind });
                }
            }
        }
    }

    // ── Completion ───────────────────────────────────────────────────────

    /// Swap decks and release the transition slot. The slot is released even
    /// when part of the swap fails.
    pub(super) fn complete_transition(&mut self) {
        let Some(flight) = self.transition.take() else {
            return;
        };
        let swapped = self.swap_decks(&flight);
        self.tasks.cancel_where(|t| t.transition_id() == Some(flight.id));
        self.session.end_transition();
        self.finish_record(flight.id, TransitionOutcome::Completed);

        let active_deck = self.decks.active_id();
        let track_id = self.decks.active().track_id().map(str::to_string);
        match swapped {
            Ok(()) => log::info!(
                "Transition {} complete: {active_deck} playing {track_id:?}",
                flight.id
            ),
            Err(e) => log::error!("Transition {} completed with errors: {e}", flight.id),
        }
        self.events.push(EngineEvent::TransitionCompleted {
            id: flight.id,
            active_deck,
            track_id,
        });
        self.stage_next();
    }

    fn swap_decks(&mut self, flight: &InFlight) -> EngineResult<()> {
        if let FlightPhase::Fading { fader, fade } = &flight.phase {
            let mut io = MixIo {
                decks: &mut self.decks,
                graph: self.graph.as_mut(),
            };
            fader.settle(&mut io, fade);
        }
        self.decks.get_mut(flight.outgoing).stop();
        self.bpm.reset(&mut self.decks);

        if self.decks.active_id() == flight.outgoing {
            self.decks.swap_roles();
        }
        debug_assert!(self.decks.roles_consistent(), "deck roles inconsistent after swap");

        self.active_entry = flight.entry_point;
        self.fired_boundary = None;
        self.last_position_report = None;
        self.staged = None;
        self.playing = true;

        self.session.queue.advance_to(flight.incoming_index)?;
        let track_id = self
            .decks
            .active()
            .track_id()
            .map(str::to_string)
            .unwrap_or_default();
        self.events.push(EngineEvent::QueueAdvanced {
            index: flight.incoming_index,
            track_id,
        });
        Ok(())
    }

    /// Tear down the transition in flight. Abandon is a media failure (the
    /// staged track is dropped); cancel is a host decision (it stays staged).
    fn unwind_transition(&mut self, outcome: TransitionOutcome, detail: &str) {
        let Some(flight) = self.transition.take() else {
            self.session.end_transition();
            return;
        };
        self.tasks.cancel_where(|t| t.transition_id() == Some(flight.id));
        self.cancel_effects();
        match &flight.phase {
            FlightPhase::Fading { fader, fade } => {
                let mut io = MixIo {
                    decks: &mut self.decks,
                    graph: self.graph.as_mut(),
                };
                fader.abort(&mut io, fade);
            }
            FlightPhase::WaitingForReady => self.set_level(flight.incoming, GAIN_FLOOR),
        }
        self.decks.get_mut(flight.incoming).stop();
        self.bpm.reset(&mut self.decks);
        self.session.end_transition();
        self.finish_record(flight.id, outcome);

        if outcome == TransitionOutcome::Abandoned {
            log::warn!("Transition {} abandoned: {detail}", flight.id);
            self.events.push(EngineEvent::TransitionAbandoned {
                id: flight.id,
                reason: detail.to_string(),
            });
            // Not retried until the queue changes.
            self.staged = None;
            self.staged_revision = Some(self.session.queue.revision());
            self.session.set_armed(false);
            if !self.decks.active().is_playing() {
                self.stopped();
            }
        } else {
            log::info!("Transition {} cancelled: {detail}", flight.id);
            self.events.push(EngineEvent::TransitionCancelled {
                id: flight.id,
                cause: detail.to_string(),
            });
            let armed = self.staged.is_some() && self.session.config.auto_transition;
            self.session.set_armed(armed);
        }
    }

    // ── Deck events ──────────────────────────────────────────────────────

    pub(super) fn on_incoming_ready(&mut self, deck: DeckId) {
        let waiting = self.transition.as_ref().is_some_and(|f| {
            f.incoming == deck && matches!(f.phase, FlightPhase::WaitingForReady)
        });
        if waiting {
            self.launch_crossfade();
        }
    }

    pub(super) fn on_incoming_error(&mut self, deck: DeckId, code: i32) {
        self.track_error(deck, format!("media error code {code}"));
        if self.transition.as_ref().is_some_and(|f| f.incoming == deck) {
            self.unwind_transition(
                TransitionOutcome::Abandoned,
                &format!("incoming track failed with code {code}"),
            );
        } else if self.decks.idle_id() == deck {
            self.staged = None;
            self.staged_revision = Some(self.session.queue.revision());
            self.session.set_armed(false);
        }
    }

    pub(super) fn on_active_ended(&mut self) {
        if self.session.is_transitioning() {
            return;
        }
        if self.staged.is_some() && self.start_transition(TriggerReason::TrackEnded) {
            return;
        }
        self.stopped();
    }

    pub(super) fn on_active_error(&mut self, deck: DeckId, code: i32) {
        self.track_error(deck, format!("media error code {code}"));
        let fading = self
            .transition
            .as_ref()
            .map(|f| matches!(f.phase, FlightPhase::Fading { .. }));
        match fading {
            // Incoming is already audible: finish now.
            Some(true) => self.complete_transition(),
            // Launches as soon as the incoming deck is ready.
            Some(false) => {}
            None => {
                let wanted = self.playing || self.pending_play;
                self.pending_play = false;
                if !(wanted && self.start_transition(TriggerReason::Recovery)) {
                    self.stopped();
                }
            }
        }
    }

    // ── Trigger ──────────────────────────────────────────────────────────

    /// Run the active mix-mode rule for a playhead update.
    pub(super) fn evaluate_trigger(&mut self, position: f64) {
        let cfg = &self.session.config;
        if self.session.is_transitioning() || !cfg.auto_transition || !self.playing {
            return;
        }
        let Some(index) = self.staged else {
            self.time_until_transition = None;
            return;
        };
        let active = self.decks.active();
        let current = active.track.as_ref();
        let ctx = TriggerContext {
            mode: cfg.mix_mode,
            position,
            entry_point: self.active_entry,
            duration: active.duration(),
            mix_interval: cfg.mix_interval_secs,
            transition_lead: cfg.transition_lead_secs,
            current_bpm: current.and_then(Track::valid_bpm),
            next_bpm: self.session.queue.get(index).and_then(Track::valid_bpm),
            first_beat: current.map_or(0.0, |t| t.first_beat),
            cues: current.map(|t| self.cues.cues(&t.id)).unwrap_or(&[]),
            last_interval_boundary: self.fired_boundary,
        };
        let decision = trigger::evaluate(&ctx);
        self.time_until_transition = decision.time_until();

        if let TriggerDecision::Fire(reason) = decision {
            if let TriggerReason::Interval { boundary } = reason {
                self.fired_boundary = Some(boundary);
            }
            self.start_transition(reason);
        }
    }

    // ── Staging ──────────────────────────────────────────────────────────

    /// Load the track that plays next onto the idle deck, computed fresh
    /// from the queue policy.
    pub(super) fn stage_next(&mut self) {
        if self.session.is_transitioning() {
            return;
        }
        self.staged_revision = Some(self.session.queue.revision());
        let auto = self.session.config.auto_transition;
        let idle = self.decks.idle_id();

        let next = self
            .session
            .queue
            .next_index()
            .and_then(|i| self.session.queue.get(i).cloned().map(|t| (i, t)));
        let Some((index, track)) = next else {
            if self.decks.idle().track.is_some() {
                self.decks.idle_mut().eject();
            }
            self.staged = None;
            self.session.set_armed(false);
            log::debug!("Nothing to stage after the current track");
            return;
        };

        let deck = self.decks.get(idle);
        if deck.track_id() == Some(track.id.as_str()) && deck.state != DeckState::Error {
            self.staged = Some(index);
            self.session.set_armed(auto);
            return;
        }

        self.set_level(idle, GAIN_FLOOR);
        let deck = self.decks.get_mut(idle);
        deck.stop();
        let uri = track.uri.clone();
        match deck.load(track) {
            Ok(()) => {
                log::info!("Staged {uri} on {idle} (queue index {index})");
                self.staged = Some(index);
                self.session.set_armed(auto);
            }
            Err(e) => {
                self.staged = None;
                self.session.set_armed(false);
                self.track_error(idle, e.to_string());
            }
        }
    }
}
