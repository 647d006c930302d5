pub mod timer;
pub mod transition_planner;
pub mod trigger;

pub use timer::{TaskHandle, TaskQueue};
pub use transition_planner::{TransitionPlan, TransitionPlanner};
pub use trigger::{TriggerContext, TriggerDecision, TriggerReason};

use crate::audio::effects::EffectKind;

/// Work deferred onto the engine's timer queue.
///
/// Transition tasks carry the id of the transition that scheduled them; the
/// engine drops any whose id no longer matches the transition in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTask {
    /// Host-facing progress report `step` of `PROGRESS_STEPS`.
    Progress { transition: u64, step: u32 },
    /// Element-volume fallback step.
    FadeStep { transition: u64, step: u32 },
    /// Crossfade time (plus buffer) has elapsed: swap decks.
    Complete { transition: u64 },
    /// The incoming deck never became ready.
    ReadyTimeout { transition: u64 },
    /// Tear down a timed effect.
    EffectCleanup { kind: EffectKind },
}

impl EngineTask {
    pub fn transition_id(&self) -> Option<u64> {
        match *self {
            EngineTask::Progress { transition, .. }
            | EngineTask::FadeStep { transition, .. }
            | EngineTask::Complete { transition }
            | EngineTask::ReadyTimeout { transition } => Some(transition),
            EngineTask::EffectCleanup { .. } => None,
        }
    }
}
