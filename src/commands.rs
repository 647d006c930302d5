//! Host commands as data, so they can cross a channel or arrive as JSON.

use serde::{Deserialize, Serialize};

use crate::{
    audio::{
        deck::DeckId,
        effects::{Effect, TriggerOutcome},
    },
    config::{CrossfadePrecedence, MixMode},
    cues::{HotCue, NewHotCue},
    engine::MixEngine,
    error::EngineResult,
    queue::{RepeatMode, Track},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineCommand {
    Play,
    Pause,
    Seek { position: f64 },
    SetVolume { volume: f32 },
    SetDjMode { enabled: bool },
    SetMixMode { mode: MixMode },
    SetMixInterval { secs: f64 },
    SetTransitionLead { secs: f64 },
    SetCrossfadeDuration { secs: f64 },
    SetBpmSync { enabled: bool },
    SetCrossfadePrecedence { precedence: CrossfadePrecedence },
    SetAutoEffects { enabled: bool },
    AddHotCue { track_id: String, cue: NewHotCue },
    RemoveHotCue { track_id: String, cue_id: u64 },
    MoveHotCue { track_id: String, cue_id: u64, time: f64 },
    ForceTransition,
    TriggerEffect { effect: Effect },
    SetQueue { tracks: Vec<Track> },
    Enqueue { track: Track },
    InsertTrack { index: usize, track: Track },
    RemoveTrack { index: usize },
    JumpTo { index: usize },
    SetRepeat { repeat: RepeatMode },
    SetShuffle { enabled: bool },
    ConnectDeck { deck: DeckId },
    DisconnectDeck { deck: DeckId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandReply {
    Ok,
    /// `false` when a transition was already running or nothing was staged.
    Started { started: bool },
    Effect { outcome: TriggerOutcome },
    HotCue { cue: HotCue },
}

impl EngineCommand {
    pub fn apply(self, engine: &mut MixEngine) -> EngineResult<CommandReply> {
        log::debug!("Command: {self:?}");
        match self {
            EngineCommand::Play => engine.play()?,
            EngineCommand::Pause => engine.pause(),
            EngineCommand::Seek { position } => engine.seek(position)?,
            EngineCommand::SetVolume { volume } => engine.set_volume(volume)?,
            EngineCommand::SetDjMode { enabled } => engine.set_dj_mode(enabled)?,
            EngineCommand::SetMixMode { mode } => engine.set_mix_mode(mode)?,
            EngineCommand::SetMixInterval { secs } => engine.set_mix_interval(secs)?,
            EngineCommand::SetTransitionLead { secs } => engine.set_transition_lead(secs)?,
            EngineCommand::SetCrossfadeDuration { secs } => engine.set_crossfade_secs(secs)?,
            EngineCommand::SetBpmSync { enabled } => {
                engine.update_config(|c| c.bpm_sync = enabled)?
            }
            EngineCommand::SetCrossfadePrecedence { precedence } => {
                engine.update_config(|c| c.crossfade_precedence = precedence)?
            }
            EngineCommand::SetAutoEffects { enabled } => {
                engine.update_config(|c| c.auto_effects = enabled)?
            }
            EngineCommand::AddHotCue { track_id, cue } => {
                let cue = engine.add_hot_cue(&track_id, cue)?;
                return Ok(CommandReply::HotCue { cue });
            }
            EngineCommand::RemoveHotCue { track_id, cue_id } => {
                let cue = engine.remove_hot_cue(&track_id, cue_id)?;
                return Ok(CommandReply::HotCue { cue });
            }
            EngineCommand::MoveHotCue { track_id, cue_id, time } => {
                engine.move_hot_cue(&track_id, cue_id, time)?
            }
            EngineCommand::ForceTransition => {
                return Ok(CommandReply::Started {
                    started: engine.force_transition(),
                })
            }
            EngineCommand::TriggerEffect { effect } => {
                return Ok(CommandReply::Effect {
                    outcome: engine.trigger_effect(effect),
                })
            }
            EngineCommand::SetQueue { tracks } => engine.set_queue(tracks)?,
            EngineCommand::Enqueue { track } => engine.enqueue(track)?,
            EngineCommand::InsertTrack { index, track } => engine.insert_track(index, track)?,
            EngineCommand::RemoveTrack { index } => {
                engine.remove_track(index)?;
            }
            EngineCommand::JumpTo { index } => engine.jump_to(index)?,
            EngineCommand::SetRepeat { repeat } => engine.set_repeat(repeat)?,
            EngineCommand::SetShuffle { enabled } => engine.set_shuffle(enabled)?,
            EngineCommand::ConnectDeck { deck } => engine.connect_deck(deck)?,
            EngineCommand::DisconnectDeck { deck } => engine.disconnect_deck(deck)?,
        }
        Ok(CommandReply::Ok)
    }
}
