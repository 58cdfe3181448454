//! Undoable engine edits.
//!
//! Every [`Command`] applies itself to an [`Engine`] and returns the command
//! that reverses it. [`UndoStack`] keeps those inverses, so undo is "apply the
//! inverse" and redo is "apply the inverse of the inverse".

use std::collections::VecDeque;

use crate::error::EngineError;
use crate::port::{NodeAddress, PortAddress};
use crate::processor::NodeState;
use crate::track::{OutputTarget, SendTarget, StageRef, TrackId, TrackKind};

use super::Engine;
use super::snapshot::TrackSnapshot;

/// One reversible edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Add a track, with a fixed id when replaying.
    AddTrack {
        /// Track kind.
        kind: TrackKind,
        /// Display name.
        name: String,
        /// Id to use; `None` picks the next free one.
        id: Option<TrackId>,
    },
    /// Remove a track.
    RemoveTrack {
        /// Track to remove.
        id: TrackId,
    },
    /// Bring a track back to a recorded state.
    RestoreTrack(Box<TrackSnapshot>),
    /// Connect two ports.
    Connect {
        /// Source output.
        src: PortAddress,
        /// Destination input.
        dst: PortAddress,
        /// Signal multiplier.
        multiplier: f32,
        /// Delayed-feedback edge.
        feedback: bool,
    },
    /// Remove a user connection.
    Disconnect {
        /// Source output.
        src: PortAddress,
        /// Destination input.
        dst: PortAddress,
    },
    /// Enable or disable a connection.
    SetConnectionEnabled {
        /// Source output.
        src: PortAddress,
        /// Destination input.
        dst: PortAddress,
        /// New flag.
        enabled: bool,
    },
    /// Route a track's direct output.
    SetOutput {
        /// Track.
        track: TrackId,
        /// New target.
        output: OutputTarget,
    },
    /// Set a control port's base value.
    SetControl {
        /// Control port.
        port: PortAddress,
        /// New value.
        value: f32,
    },
    /// Bypass or re-activate a stage.
    SetBypassed {
        /// Track.
        track: TrackId,
        /// Stage slot.
        stage: StageRef,
        /// New flag.
        bypassed: bool,
    },
    /// Set the record-armed flag.
    SetArmed {
        /// Track.
        track: TrackId,
        /// New flag.
        armed: bool,
    },
    /// Load a processor into a stage.
    InsertPlugin {
        /// Track.
        track: TrackId,
        /// Stage slot.
        stage: StageRef,
        /// Registry id.
        kind: String,
    },
    /// Empty a stage.
    RemovePlugin {
        /// Track.
        track: TrackId,
        /// Stage slot.
        stage: StageRef,
    },
    /// Point a send slot at a target.
    SetSend {
        /// Track.
        track: TrackId,
        /// Send slot.
        slot: usize,
        /// Target.
        target: SendTarget,
    },
    /// Unassign a send slot.
    ClearSend {
        /// Track.
        track: TrackId,
        /// Send slot.
        slot: usize,
    },
    /// Several commands as one step. Rolled back as a whole on failure.
    Batch(Vec<Command>),
}

impl Command {
    /// Apply to `engine` and return the inverse.
    ///
    /// # Errors
    ///
    /// Whatever the underlying engine operation returns. A failed
    /// [`Command::Batch`] has already undone the part that succeeded.
    pub fn apply(&self, engine: &mut Engine) -> Result<Command, EngineError> {
        match self {
            Command::AddTrack { kind, name, id } => {
                let id = match id {
                    Some(id) => engine.add_track_with_id(*id, *kind, name.clone())?,
                    None => engine.add_track(*kind, name.clone())?,
                };
                Ok(Command::RemoveTrack { id })
            }
            Command::RemoveTrack { id } => remove_track(engine, *id),
            Command::RestoreTrack(snap) => {
                let current = engine
                    .track_snapshot(snap.id)
                    .ok_or(EngineError::TrackNotFound(snap.id))?;
                engine.reapply_track(snap)?;
                Ok(Command::RestoreTrack(Box::new(current)))
            }
            Command::Connect {
                src,
                dst,
                multiplier,
                feedback,
            } => {
                let previous = existing(engine, src, dst);
                if *feedback {
                    engine.connect_feedback(src, dst, *multiplier)?;
                } else {
                    engine.connect(src, dst, *multiplier)?;
                }
                Ok(previous.unwrap_or_else(|| Command::Disconnect {
                    src: src.clone(),
                    dst: dst.clone(),
                }))
            }
            Command::Disconnect { src, dst } => {
                let previous = existing(engine, src, dst);
                engine.disconnect(src, dst)?;
                Ok(previous.unwrap_or(Command::Batch(Vec::new())))
            }
            Command::SetConnectionEnabled { src, dst, enabled } => {
                let was = engine.connection(src, dst)?.is_enabled();
                engine.set_connection_enabled(src, dst, *enabled)?;
                Ok(Command::SetConnectionEnabled {
                    src: src.clone(),
                    dst: dst.clone(),
                    enabled: was,
                })
            }
            Command::SetOutput { track, output } => {
                let was = track_ref(engine, *track)?.output();
                engine.set_output(*track, *output)?;
                Ok(Command::SetOutput {
                    track: *track,
                    output: was,
                })
            }
            Command::SetControl { port, value } => {
                let was = engine.control_value(port)?;
                engine.set_control(port, *value)?;
                Ok(Command::SetControl {
                    port: port.clone(),
                    value: was,
                })
            }
            Command::SetBypassed {
                track,
                stage,
                bypassed,
            } => {
                let was = engine.stage_state(*track, *stage)? == NodeState::Bypassed;
                engine.set_bypassed(*track, *stage, *bypassed)?;
                Ok(Command::SetBypassed {
                    track: *track,
                    stage: *stage,
                    bypassed: was,
                })
            }
            Command::SetArmed { track, armed } => {
                let was = track_ref(engine, *track)?.is_armed();
                engine.set_armed(*track, *armed)?;
                Ok(Command::SetArmed {
                    track: *track,
                    armed: was,
                })
            }
            Command::InsertPlugin { track, stage, kind } => {
                let previous = restore_stage(engine, *track, *stage)?;
                engine.insert_plugin(*track, *stage, kind)?;
                Ok(previous.unwrap_or(Command::RemovePlugin {
                    track: *track,
                    stage: *stage,
                }))
            }
            Command::RemovePlugin { track, stage } => {
                let previous = match engine.track(*track) {
                    Some(_) => restore_stage(engine, *track, *stage)?,
                    None => None,
                };
                engine.remove_plugin(*track, *stage)?;
                Ok(previous.unwrap_or(Command::Batch(Vec::new())))
            }
            Command::SetSend { track, slot, target } => {
                let previous = restore_send(engine, *track, *slot)?;
                engine.set_send(*track, *slot, *target)?;
                Ok(previous)
            }
            Command::ClearSend { track, slot } => {
                let previous = restore_send(engine, *track, *slot)?;
                engine.clear_send(*track, *slot)?;
                Ok(previous)
            }
            Command::Batch(commands) => {
                let mut inverses = Vec::with_capacity(commands.len());
                for command in commands {
                    match command.apply(engine) {
                        Ok(inverse) => inverses.push(inverse),
                        Err(err) => {
                            for inverse in inverses.iter().rev() {
                                if let Err(_rollback) = inverse.apply(engine) {
                                    #[cfg(feature = "tracing")]
                                    tracing::warn!("undo_rollback: {_rollback}");
                                }
                            }
                            return Err(err);
                        }
                    }
                }
                inverses.reverse();
                Ok(Command::Batch(inverses))
            }
        }
    }
}

fn track_ref(engine: &Engine, id: TrackId) -> Result<&crate::track::Track, EngineError> {
    engine.track(id).ok_or(EngineError::TrackNotFound(id))
}

/// Commands recreating the user connection `src -> dst`, if there is one.
fn existing(engine: &Engine, src: &PortAddress, dst: &PortAddress) -> Option<Command> {
    let c = engine.connection(src, dst).ok()?;
    if c.is_managed() {
        return None;
    }
    Some(recreate_connection(
        src.clone(),
        dst.clone(),
        c.multiplier(),
        c.is_feedback(),
        c.is_enabled(),
    ))
}

fn recreate_connection(src: PortAddress, dst: PortAddress, multiplier: f32, feedback: bool, enabled: bool) -> Command {
    let connect = Command::Connect {
        src: src.clone(),
        dst: dst.clone(),
        multiplier,
        feedback,
    };
    if enabled {
        connect
    } else {
        Command::Batch(vec![
            connect,
            Command::SetConnectionEnabled {
                src,
                dst,
                enabled: false,
            },
        ])
    }
}

/// Commands reloading what stage `at` holds now, or `None` if it is empty.
fn restore_stage(engine: &Engine, track: TrackId, at: StageRef) -> Result<Option<Command>, EngineError> {
    let Some(info) = track_ref(engine, track)?.stage(at) else {
        return Ok(None);
    };
    let mut commands = vec![Command::InsertPlugin {
        track,
        stage: at,
        kind: info.kind().to_string(),
    }];
    commands.extend(info.params().into_iter().map(|(symbol, value)| Command::SetControl {
        port: PortAddress::track(track, format!("{}.{symbol}", at.prefix())),
        value,
    }));
    if info.state() == NodeState::Bypassed {
        commands.push(Command::SetBypassed {
            track,
            stage: at,
            bypassed: true,
        });
    }
    Ok(Some(Command::Batch(commands)))
}

fn restore_send(engine: &Engine, track: TrackId, slot: usize) -> Result<Command, EngineError> {
    Ok(match track_ref(engine, track)?.send(slot) {
        Some(target) => Command::SetSend { track, slot, target },
        None => Command::ClearSend { track, slot },
    })
}

/// Remove a track and build the batch that puts it back with its routing.
fn remove_track(engine: &mut Engine, id: TrackId) -> Result<Command, EngineError> {
    let Some(snap) = engine.track_snapshot(id) else {
        engine.remove_track(id)?;
        return Ok(Command::Batch(Vec::new()));
    };
    let node = NodeAddress::Track(id);
    let connections: Vec<Command> = engine
        .user_connections()
        .into_iter()
        .filter(|c| c.src.node == node || c.dst.node == node)
        .map(|c| recreate_connection(c.src, c.dst, c.multiplier, c.feedback, c.enabled))
        .collect();
    let outputs: Vec<Command> = engine
        .tracks()
        .filter(|t| t.output() == OutputTarget::Track(id))
        .map(|t| Command::SetOutput {
            track: t.id(),
            output: OutputTarget::Track(id),
        })
        .collect();
    let sends: Vec<Command> = engine
        .tracks()
        .flat_map(|t| {
            (0..t.kind().send_slots()).filter_map(move |slot| {
                let target = t.send(slot)?;
                (target.track == id).then_some(Command::SetSend {
                    track: t.id(),
                    slot,
                    target,
                })
            })
        })
        .collect();

    engine.remove_track(id)?;

    let mut commands = vec![
        Command::AddTrack {
            kind: snap.kind,
            name: snap.name.clone(),
            id: Some(id),
        },
        Command::RestoreTrack(Box::new(snap)),
    ];
    commands.extend(outputs);
    commands.extend(sends);
    commands.extend(connections);
    Ok(Command::Batch(commands))
}

/// Undo/redo history of applied commands.
#[derive(Debug, Default)]
pub struct UndoStack {
    undo: VecDeque<Command>,
    redo: Vec<Command>,
    limit: Option<usize>,
}

impl UndoStack {
    /// Unbounded history.
    pub fn new() -> Self {
        Self::default()
    }

    /// History keeping at most `limit` undo steps; older ones are forgotten.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Apply `command` and record it. Clears the redo history.
    pub fn execute(&mut self, engine: &mut Engine, command: Command) -> Result<(), EngineError> {
        let inverse = command.apply(engine)?;
        self.push_undo(inverse);
        self.redo.clear();
        Ok(())
    }

    /// Undo the last step. Returns `false` if there was nothing to undo.
    ///
    /// A step that fails to undo is dropped from the history.
    pub fn undo(&mut self, engine: &mut Engine) -> Result<bool, EngineError> {
        let Some(inverse) = self.undo.pop_back() else {
            return Ok(false);
        };
        let forward = inverse.apply(engine)?;
        self.redo.push(forward);
        Ok(true)
    }

    /// Redo the last undone step. Returns `false` if there was nothing to redo.
    pub fn redo(&mut self, engine: &mut Engine) -> Result<bool, EngineError> {
        let Some(forward) = self.redo.pop() else {
            return Ok(false);
        };
        let inverse = forward.apply(engine)?;
        self.push_undo(inverse);
        Ok(true)
    }

    /// Whether [`undo`](Self::undo) has anything to do.
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Whether [`redo`](Self::redo) has anything to do.
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Forget all history.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    fn push_undo(&mut self, inverse: Command) {
        self.undo.push_back(inverse);
        if let Some(limit) = self.limit {
            while self.undo.len() > limit {
                self.undo.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::EngineOptions;

    fn engine() -> Engine {
        Engine::new(EngineOptions::offline(48_000.0, 64)).unwrap()
    }

    #[test]
    fn control_change_undoes_and_redoes() {
        let mut engine = engine();
        let mut history = UndoStack::new();
        let amp = PortAddress::track(engine.master(), "amp");
        history
            .execute(&mut engine, Command::SetControl { port: amp.clone(), value: 0.25 })
            .unwrap();
        assert_eq!(engine.control_value(&amp).unwrap(), 0.25);

        assert!(history.undo(&mut engine).unwrap());
        assert_eq!(engine.control_value(&amp).unwrap(), 1.0);
        assert!(!history.undo(&mut engine).unwrap());

        assert!(history.redo(&mut engine).unwrap());
        assert_eq!(engine.control_value(&amp).unwrap(), 0.25);
        assert!(!history.can_redo());
    }

    #[test]
    fn removed_track_comes_back_with_its_routing() {
        let mut engine = engine();
        let bus = engine.add_track(TrackKind::Bus, "Bus").unwrap();
        let gtr = engine.add_track(TrackKind::Audio, "Gtr").unwrap();
        let keys = engine.add_track(TrackKind::Audio, "Keys").unwrap();
        engine.set_output(gtr, OutputTarget::Track(bus)).unwrap();
        engine.set_send(keys, 2, SendTarget::main(bus)).unwrap();
        engine.insert_plugin(bus, StageRef::insert(4), "gain").unwrap();
        engine
            .connect(
                &PortAddress::new(NodeAddress::HardwareInput, "in_r"),
                &PortAddress::track(bus, "in_r"),
                0.7,
            )
            .unwrap();
        let before = engine.snapshot();

        let mut history = UndoStack::new();
        history
            .execute(&mut engine, Command::RemoveTrack { id: bus })
            .unwrap();
        assert!(engine.track(bus).is_none());
        assert_eq!(engine.track(gtr).unwrap().output(), OutputTarget::Master);

        history.undo(&mut engine).unwrap();
        assert_eq!(engine.snapshot(), before);

        history.redo(&mut engine).unwrap();
        assert!(engine.track(bus).is_none());
    }

    #[test]
    fn insert_over_existing_stage_restores_old_processor() {
        let mut engine = engine();
        let track = engine.add_track(TrackKind::Audio, "A").unwrap();
        engine.insert_plugin(track, StageRef::insert(0), "gain").unwrap();
        engine
            .set_control(&PortAddress::track(track, "insert0.gain_db"), 6.0)
            .unwrap();
        engine.set_bypassed(track, StageRef::insert(0), true).unwrap();
        let before = engine.snapshot();

        let mut history = UndoStack::new();
        history
            .execute(
                &mut engine,
                Command::InsertPlugin {
                    track,
                    stage: StageRef::insert(0),
                    kind: "ducker".to_string(),
                },
            )
            .unwrap();
        history.undo(&mut engine).unwrap();
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn failed_batch_rolls_back() {
        let mut engine = engine();
        let before = engine.snapshot();
        let batch = Command::Batch(vec![
            Command::AddTrack {
                kind: TrackKind::Audio,
                name: "A".to_string(),
                id: None,
            },
            Command::SetArmed {
                track: TrackId(99),
                armed: true,
            },
        ]);
        assert!(matches!(
            batch.apply(&mut engine),
            Err(EngineError::TrackNotFound(_))
        ));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn limit_forgets_oldest() {
        let mut engine = engine();
        let mut history = UndoStack::with_limit(2);
        let master = engine.master();
        for armed in [true, false, true] {
            history
                .execute(&mut engine, Command::SetArmed { track: master, armed })
                .unwrap();
        }
        assert!(history.undo(&mut engine).unwrap());
        assert!(history.undo(&mut engine).unwrap());
        assert!(!history.undo(&mut engine).unwrap());
        assert!(engine.track(master).unwrap().is_armed());
    }

    #[test]
    fn disconnect_of_missing_connection_is_a_noop() {
        let mut engine = engine();
        let track = engine.add_track(TrackKind::Audio, "A").unwrap();
        let inverse = Command::Disconnect {
            src: PortAddress::new(NodeAddress::HardwareInput, "in_l"),
            dst: PortAddress::track(track, "in_l"),
        }
        .apply(&mut engine)
        .unwrap();
        assert_eq!(inverse, Command::Batch(Vec::new()));
    }
}
