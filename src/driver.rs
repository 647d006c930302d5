//! Async host loop. The engine is single-threaded and not `Send`, so the
//! driver future runs on a current-thread runtime or a `LocalSet`; other
//! tasks talk to it through a cloneable [`DriverHandle`].

use std::time::Duration;

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{interval, MissedTickBehavior},
};

use crate::{
    commands::{CommandReply, EngineCommand},
    engine::{EngineEvent, EngineSnapshot, MixEngine},
    error::{EngineError, EngineResult},
};

/// Scheduler cadence: fine enough for the 0.5 s trigger window and the
/// fallback fade steps.
pub const DEFAULT_TICK: Duration = Duration::from_millis(20);

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

pub enum DriverMessage {
    Command {
        command: EngineCommand,
        reply: oneshot::Sender<EngineResult<CommandReply>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct DriverHandle {
    tx: mpsc::Sender<DriverMessage>,
    events: broadcast::Sender<EngineEvent>,
}

impl DriverHandle {
    /// Apply a command on the engine task and wait for its reply.
    pub async fn send(&self, command: EngineCommand) -> EngineResult<CommandReply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DriverMessage::Command { command, reply })
            .await
            .map_err(|_| EngineError::DriverClosed)?;
        rx.await.map_err(|_| EngineError::DriverClosed)?
    }

    pub async fn snapshot(&self) -> EngineResult<EngineSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DriverMessage::Snapshot { reply })
            .await
            .map_err(|_| EngineError::DriverClosed)?;
        rx.await.map_err(|_| EngineError::DriverClosed)
    }

    /// Engine events from now on. Slow receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&self) -> EngineResult<()> {
        self.tx
            .send(DriverMessage::Shutdown)
            .await
            .map_err(|_| EngineError::DriverClosed)
    }
}

pub struct Driver {
    engine: MixEngine,
    rx: mpsc::Receiver<DriverMessage>,
    events: broadcast::Sender<EngineEvent>,
    tick: Duration,
}

impl Driver {
    pub fn new(engine: MixEngine, tick: Duration) -> (Self, DriverHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let handle = DriverHandle {
            tx,
            events: events.clone(),
        };
        (
            Self {
                engine,
                rx,
                events,
                tick,
            },
            handle,
        )
    }

    /// Tick the engine and serve requests until shutdown or until every
    /// handle is dropped. Returns the engine for inspection.
    pub async fn run(mut self) -> MixEngine {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Engine driver started ({:?} tick)", self.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.engine.tick(),
                msg = self.rx.recv() => match msg {
                    Some(DriverMessage::Command { command, reply }) => {
                        let result = command.apply(&mut self.engine);
                        if let Err(e) = &result {
                            log::warn!("Command failed: {e}");
                        }
                        let _ = reply.send(result);
                    }
                    Some(DriverMessage::Snapshot { reply }) => {
                        let _ = reply.send(self.engine.snapshot());
                    }
                    Some(DriverMessage::Shutdown) | None => break,
                },
            }

            for event in self.engine.drain_events() {
                // No subscribers is fine.
                let _ = self.events.send(event);
            }
        }

        log::info!("Engine driver stopped");
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MixConfig,
        error::GraphError,
        media::simulated::{SimClock, SimulatedSource},
        queue::Track,
    };

    fn engine() -> MixEngine {
        let clock = SimClock::new();
        let (a, _) = SimulatedSource::new(clock.clone());
        let (b, _) = SimulatedSource::new(clock.clone());
        MixEngine::new(
            MixConfig::default(),
            Box::new(a),
            Box::new(b),
            Err(GraphError::Unavailable("test".into())),
            Box::new(clock),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn commands_snapshots_and_events_flow() {
        let (driver, handle) = Driver::new(engine(), DEFAULT_TICK);
        let mut events = handle.subscribe();

        let client = async {
            handle
                .send(EngineCommand::SetQueue {
                    tracks: vec![Track::new("a", "a.mp3"), Track::new("b", "b.mp3")],
                })
                .await
                .unwrap();
            handle.send(EngineCommand::Play).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;

            let snap = handle.snapshot().await.unwrap();
            assert!(snap.is_playing);
            assert_eq!(snap.next_index, Some(1));

            let reply = handle.send(EngineCommand::ForceTransition).await.unwrap();
            assert_eq!(reply, CommandReply::Started { started: true });
            handle.shutdown().await.unwrap();
        };

        let (engine, ()) = tokio::join!(driver.run(), client);
        assert!(engine.is_transitioning());

        let mut started = false;
        while let Ok(event) = events.try_recv() {
            started |= matches!(event, EngineEvent::TransitionStarted { .. });
        }
        assert!(started);
    }

    #[tokio::test]
    async fn closed_driver_reports_error() {
        let (driver, handle) = Driver::new(engine(), DEFAULT_TICK);
        drop(driver);
        assert!(matches!(
            handle.send(EngineCommand::Pause).await,
            Err(EngineError::DriverClosed)
        ));
        assert!(matches!(handle.snapshot().await, Err(EngineError::DriverClosed)));
    }
}
