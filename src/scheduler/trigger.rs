use serde::{Deserialize, Serialize};

use crate::config::MixMode;
use crate::cues::HotCue;

/// Interval mode fires this close to a boundary.
pub const INTERVAL_WINDOW_SECS: f64 = 0.5;
/// Hot-cue mode fires this long before the cue.
pub const HOT_CUE_LEAD_SECS: f64 = 1.0;
/// Eligible hot cues start at this fraction of the track...
pub const HOT_CUE_WINDOW_START: f64 = 0.6;
/// ...and end this many seconds before the end.
pub const HOT_CUE_END_GUARD_SECS: f64 = 15.0;
pub const PHRASE_BEATS: f64 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerReason {
    Interval { boundary: f64 },
    TrackEnd { lead: f64 },
    HotCue { cue_id: u64, cue_time: f64 },
    /// Host asked for it.
    Manual,
    /// Active deck ran out without a transition in flight.
    TrackEnded,
    /// Active deck failed; moving to the staged track.
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerDecision {
    /// Not yet. `time_until` is the playback time left before the trigger
    /// point when one can be computed.
    Wait { time_until: Option<f64> },
    Fire(TriggerReason),
}

impl TriggerDecision {
    pub fn time_until(&self) -> Option<f64> {
        match self {
            TriggerDecision::Wait { time_until } => *time_until,
            TriggerDecision::Fire(_) => Some(0.0),
        }
    }
}

/// Everything a trigger rule looks at, read fresh from the session on every
/// playback-time update.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub mode: MixMode,
    /// Playhead of the active deck.
    pub position: f64,
    /// Where listening of the active track began; interval mode measures
    /// elapsed time from here.
    pub entry_point: f64,
    pub duration: Option<f64>,
    pub mix_interval: f64,
    pub transition_lead: f64,
    pub current_bpm: Option<f64>,
    pub next_bpm: Option<f64>,
    /// First downbeat of the current track, anchors the phrase grid.
    pub first_beat: f64,
    /// Hot cues of the current track, ordered by time.
    pub cues: &'a [HotCue],
    /// Last interval boundary that already fired for this track.
    pub last_interval_boundary: Option<f64>,
}

/// Evaluate the active mix-mode rule. Pure: the same context always gives
/// the same answer, so repeated evaluation of one playback time is safe.
pub fn evaluate(ctx: &TriggerContext<'_>) -> TriggerDecision {
    match ctx.mode {
        MixMode::Interval => {
            let interval = interval_rule(ctx);
            if let TriggerDecision::Fire(_) = interval {
                return interval;
            }
            // An interval longer than the remaining track must not run off
            // the end.
            match track_end_rule(ctx) {
                fire @ TriggerDecision::Fire(_) => fire,
                TriggerDecision::Wait { time_until } => TriggerDecision::Wait {
                    time_until: min_opt(interval.time_until(), time_until),
                },
            }
        }
        MixMode::TrackEnd => track_end_rule(ctx),
        MixMode::HotCue => hot_cue_rule(ctx).unwrap_or_else(|| track_end_rule(ctx)),
    }
}

fn interval_rule(ctx: &TriggerContext<'_>) -> TriggerDecision {
    let interval = ctx.mix_interval;
    if !interval.is_finite() || interval <= 0.0 {
        return TriggerDecision::Wait { time_until: None };
    }
    let elapsed = (ctx.position - ctx.entry_point).max(0.0);
    let already = |b: f64| {
        ctx.last_interval_boundary
            .is_some_and(|last| (last - b).abs() < 1e-6 || last > b)
    };

    let next = (elapsed / interval).ceil().max(1.0) * interval;
    if next - elapsed <= INTERVAL_WINDOW_SECS && !already(next) {
        return TriggerDecision::Fire(TriggerReason::Interval { boundary: next });
    }
    // Coarse ticks can step over the approach window; catch the boundary
    // just crossed.
    let prev = (elapsed / interval).floor() * interval;
    if prev >= interval && elapsed - prev <= INTERVAL_WINDOW_SECS && !already(prev) {
        return TriggerDecision::Fire(TriggerReason::Interval { boundary: prev });
    }

    let upcoming = if already(next) { next + interval } else { next };
    TriggerDecision::Wait {
        time_until: Some((upcoming - elapsed - INTERVAL_WINDOW_SECS).max(0.0)),
    }
}

/// Lead time before the end, stretched to land the transition on a 32-beat
/// phrase boundary of the current track when both BPMs are known.
pub fn optimal_lead(ctx: &TriggerContext<'_>, duration: f64) -> f64 {
    let lead = ctx.transition_lead.max(0.0);
    let (Some(bpm), Some(_)) = (valid(ctx.current_bpm), valid(ctx.next_bpm)) else {
        return lead;
    };
    let phrase = PHRASE_BEATS * 60.0 / bpm;
    let target = duration - lead;
    let snapped = ctx.first_beat + ((target - ctx.first_beat) / phrase).round() * phrase;
    if snapped <= 0.0 || snapped >= duration {
        return lead;
    }
    lead.max(duration - snapped)
}

fn track_end_rule(ctx: &TriggerContext<'_>) -> TriggerDecision {
    let Some(duration) = ctx.duration.filter(|d| d.is_finite() && *d > 0.0) else {
        return TriggerDecision::Wait { time_until: None };
    };
    let lead = optimal_lead(ctx, duration);
    let remaining = duration - ctx.position - lead;
    if remaining <= 0.0 {
        TriggerDecision::Fire(TriggerReason::TrackEnd { lead })
    } else {
        TriggerDecision::Wait {
            time_until: Some(remaining),
        }
    }
}

/// `None` when no cue qualifies and the track-end rule should decide.
fn hot_cue_rule(ctx: &TriggerContext<'_>) -> Option<TriggerDecision> {
    let duration = ctx.duration.filter(|d| d.is_finite() && *d > 0.0)?;
    let lo = HOT_CUE_WINDOW_START * duration;
    let hi = duration - HOT_CUE_END_GUARD_SECS;
    let cue = ctx
        .cues
        .iter()
        .filter(|c| c.time >= lo && c.time <= hi && c.time > ctx.position)
        .min_by(|a, b| a.time.total_cmp(&b.time))?;
    let until = cue.time - ctx.position;
    Some(if until <= HOT_CUE_LEAD_SECS {
        TriggerDecision::Fire(TriggerReason::HotCue {
            cue_id: cue.id,
            cue_time: cue.time,
        })
    } else {
        TriggerDecision::Wait {
            time_until: Some(until - HOT_CUE_LEAD_SECS),
        }
    })
}

fn valid(bpm: Option<f64>) -> Option<f64> {
    bpm.filter(|b| b.is_finite() && *b > 0.0)
}

fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
