//! Serializable engine state.
//!
//! A snapshot records intent (track outputs, send targets, stage kinds and
//! their parameter values) rather than the managed connections that realize
//! it. Everything is addressed by [`TrackId`], [`NodeKey`] and
//! [`PortAddress`], which stay stable across a save/load round trip.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::graph::ConnectionOptions;
use crate::port::PortAddress;
use crate::processor::NodeState;
use crate::track::{NodeKey, OutputTarget, SendTarget, StageRef, Track, TrackId, TrackKind};

use super::{Engine, MASTER};

/// Complete routing state of an engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Tracks in id order, Master included.
    pub tracks: Vec<TrackSnapshot>,
    /// Engine-owned processors.
    #[serde(default)]
    pub processors: Vec<ProcessorSnapshot>,
    /// User connections (engine-managed routing is implied by tracks).
    #[serde(default)]
    pub connections: Vec<ConnectionSnapshot>,
}

/// One track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    /// Stable id.
    pub id: TrackId,
    /// Display name.
    pub name: String,
    /// Track kind.
    pub kind: TrackKind,
    /// Direct output routing.
    #[serde(default)]
    pub output: OutputTarget,
    /// Record-armed flag.
    #[serde(default)]
    pub armed: bool,
    /// Fader control values by symbol.
    #[serde(default)]
    pub fader: BTreeMap<String, f32>,
    /// Occupied stages.
    #[serde(default)]
    pub stages: Vec<StageSnapshot>,
    /// Send slots that are assigned or have a non-default amount.
    #[serde(default)]
    pub sends: Vec<SendSnapshot>,
}

/// One occupied stage slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// Slot.
    pub at: StageRef,
    /// Registry id of the processor.
    pub kind: String,
    /// Control values by unprefixed symbol.
    #[serde(default)]
    pub params: BTreeMap<String, f32>,
    /// Bypassed at snapshot time.
    #[serde(default)]
    pub bypassed: bool,
}

/// One send slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendSnapshot {
    /// Slot index.
    pub slot: usize,
    /// Target, if assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<SendTarget>,
    /// Send amount.
    pub amount: f32,
}

/// One engine-owned processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSnapshot {
    /// Stable key.
    pub key: NodeKey,
    /// Registry id.
    pub kind: String,
    /// Control values by symbol.
    #[serde(default)]
    pub params: BTreeMap<String, f32>,
    /// Bypassed at snapshot time.
    #[serde(default)]
    pub bypassed: bool,
}

/// One user connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    /// Source output.
    pub src: PortAddress,
    /// Destination input.
    pub dst: PortAddress,
    /// Signal multiplier.
    pub multiplier: f32,
    /// Enabled flag.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Delayed-feedback edge.
    #[serde(default)]
    pub feedback: bool,
}

fn enabled() -> bool {
    true
}

impl EngineSnapshot {
    /// Check ids before anything is torn down.
    fn validate(&self) -> Result<(), EngineError> {
        let mut ids = BTreeSet::new();
        for track in &self.tracks {
            if !ids.insert(track.id) {
                return Err(EngineError::snapshot(format!("duplicate track id {}", track.id)));
            }
            let is_master = track.kind == TrackKind::Master;
            if is_master != (track.id == MASTER) {
                return Err(EngineError::snapshot(format!(
                    "track {} ({}): only {} may be the master track",
                    track.id, track.kind, MASTER
                )));
            }
        }
        let mut keys = BTreeSet::new();
        for processor in &self.processors {
            if !keys.insert(processor.key) {
                return Err(EngineError::snapshot(format!(
                    "duplicate processor key {}",
                    processor.key
                )));
            }
        }
        Ok(())
    }
}

impl Engine {
    /// Capture the current routing state.
    pub fn snapshot(&self) -> EngineSnapshot {
        let tracks = self.tracks.values().map(snapshot_track).collect();
        let processors = self
            .processors
            .iter()
            .map(|(key, p)| ProcessorSnapshot {
                key: *key,
                kind: p.kind.clone(),
                params: p
                    .controls
                    .iter()
                    .map(|(symbol, value)| (symbol.clone(), value.base()))
                    .collect(),
                bypassed: p.status.state() == NodeState::Bypassed,
            })
            .collect();
        let connections = self.user_connections();

        EngineSnapshot {
            tracks,
            processors,
            connections,
        }
    }

    /// State of one track, if it exists.
    pub(crate) fn track_snapshot(&self, id: TrackId) -> Option<TrackSnapshot> {
        self.tracks.get(&id).map(snapshot_track)
    }

    /// Connections the user made, by address.
    pub(crate) fn user_connections(&self) -> Vec<ConnectionSnapshot> {
        self.graph
            .connections()
            .filter(|c| !c.is_managed())
            .filter_map(|c| {
                Some(ConnectionSnapshot {
                    src: self.address_of(c.src())?,
                    dst: self.address_of(c.dst())?,
                    multiplier: c.multiplier(),
                    enabled: c.is_enabled(),
                    feedback: c.is_feedback(),
                })
            })
            .collect()
    }

    /// Bring an existing track to the state in `snap`, emptying stages and
    /// sends it does not mention.
    pub(crate) fn reapply_track(&mut self, snap: &TrackSnapshot) -> Result<(), EngineError> {
        let id = snap.id;
        let track = self.tracks.get(&id).ok_or(EngineError::TrackNotFound(id))?;
        let stale: Vec<StageRef> = track
            .stages
            .keys()
            .copied()
            .filter(|at| !snap.stages.iter().any(|s| s.at == *at))
            .collect();
        let unsent: Vec<usize> = (0..track.sends.len())
            .filter(|slot| !snap.sends.iter().any(|s| s.slot == *slot))
            .collect();
        self.batch(|e| {
            for at in stale {
                e.remove_plugin(id, at)?;
            }
            for slot in unsent {
                e.clear_send(id, slot)?;
                if let Some(send) = e.tracks.get(&id).and_then(|t| t.sends.get(slot)) {
                    send.amount.set(send.amount.range().default);
                }
            }
            e.restore_track(snap)
        })
    }

    /// Replace the session with `snapshot`. The Master track is kept and reconfigured.
    ///
    /// Ids are validated before anything changes. A failure after that point
    /// (an unknown processor, an unresolvable connection) puts the previous
    /// session's tracks and routing back. Control values already written to
    /// surviving tracks keep their new values.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Snapshot`] for duplicate or misplaced ids
    /// - any error of the individual operations the restore replays
    pub fn restore(&mut self, snapshot: &EngineSnapshot) -> Result<(), EngineError> {
        snapshot.validate()?;
        self.batch(|e| {
            e.clear_session()?;

            for track in snapshot.tracks.iter().filter(|t| t.id != MASTER) {
                e.add_track_with_id(track.id, track.kind, track.name.clone())?;
            }
            for p in &snapshot.processors {
                e.add_processor_with_key(p.key, &p.kind)?;
                if let Some(entry) = e.processors.get(&p.key) {
                    for (symbol, value) in &entry.controls {
                        if let Some(v) = p.params.get(symbol) {
                            value.set(*v);
                        }
                    }
                }
                e.set_processor_bypassed(p.key, p.bypassed)?;
            }
            for track in &snapshot.tracks {
                e.restore_track(track)?;
            }
            for c in &snapshot.connections {
                let options = ConnectionOptions {
                    multiplier: c.multiplier,
                    enabled: c.enabled,
                    feedback: c.feedback,
                    managed: false,
                };
                e.connect_with(&c.src, &c.dst, options)?;
            }
            e.compile()
        })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "session_restore: {} tracks, {} processors, {} connections",
            snapshot.tracks.len(),
            snapshot.processors.len(),
            snapshot.connections.len()
        );
        Ok(())
    }

    fn restore_track(&mut self, snap: &TrackSnapshot) -> Result<(), EngineError> {
        let id = snap.id;
        for stage in &snap.stages {
            let same_kind = self
                .tracks
                .get(&id)
                .and_then(|t| t.stages.get(&stage.at))
                .is_some_and(|info| info.kind == stage.kind);
            if !same_kind {
                self.insert_plugin(id, stage.at, &stage.kind)?;
            }
            let info = self.stage_info(id, stage.at)?;
            for (symbol, value) in &stage.params {
                if let Some(control) = info.control(symbol) {
                    control.set(*value);
                }
            }
            self.set_bypassed(id, stage.at, stage.bypassed)?;
        }

        let track = self.tracks.get(&id).ok_or(EngineError::TrackNotFound(id))?;
        for (symbol, value) in &snap.fader {
            if let Some(control) = track.controls.by_symbol(symbol) {
                control.set(*value);
            }
        }
        self.set_armed(id, snap.armed)?;
        if id != MASTER {
            self.set_output(id, snap.output)?;
        }
        for send in &snap.sends {
            match send.target {
                Some(target) => self.set_send(id, send.slot, target)?,
                None => self.clear_send(id, send.slot)?,
            }
            self.set_send_amount(id, send.slot, send.amount)?;
        }
        Ok(())
    }

    /// Back to an empty session: a bare Master track and no user routing.
    fn clear_session(&mut self) -> Result<(), EngineError> {
        let tracks: Vec<TrackId> = self.tracks.keys().copied().filter(|id| *id != MASTER).collect();
        for id in tracks {
            self.remove_track(id)?;
        }
        let keys: Vec<NodeKey> = self.processors.keys().copied().collect();
        for key in keys {
            self.remove_processor(key)?;
        }
        let user: Vec<_> = self
            .graph
            .connections()
            .filter(|c| !c.is_managed())
            .map(|c| (c.src(), c.dst()))
            .collect();
        for (src, dst) in user {
            self.graph.remove_connection(src, dst);
        }

        let stages: Vec<StageRef> = self
            .tracks
            .get(&MASTER)
            .map(|t| t.stages.keys().copied().collect())
            .unwrap_or_default();
        for at in stages {
            self.remove_plugin(MASTER, at)?;
        }
        for slot in 0..TrackKind::Master.send_slots() {
            self.clear_send(MASTER, slot)?;
        }
        if let Some(master) = self.tracks.get_mut(&MASTER) {
            master.armed = false;
            for (symbol, _) in master.controls.values() {
                if let Some(control) = master.controls.by_symbol(&symbol) {
                    control.set(control.range().default);
                }
            }
            for send in &master.sends {
                send.amount.set(send.amount.range().default);
            }
        }
        self.compile()
    }
}

fn snapshot_track(t: &Track) -> TrackSnapshot {
    TrackSnapshot {
        id: t.id,
        name: t.name.clone(),
        kind: t.kind,
        output: t.output,
        armed: t.armed,
        fader: t.controls.values(),
        stages: t
            .stages
            .iter()
            .map(|(at, info)| StageSnapshot {
                at: *at,
                kind: info.kind.clone(),
                params: info.params(),
                bypassed: info.state() == NodeState::Bypassed,
            })
            .collect(),
        sends: t
            .sends
            .iter()
            .enumerate()
            .filter(|(_, s)| s.target.is_some() || s.amount.base() != s.amount.range().default)
            .map(|(slot, s)| SendSnapshot {
                slot,
                target: s.target,
                amount: s.amount.base(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::EngineOptions;
    use crate::port::NodeAddress;

    fn engine() -> Engine {
        Engine::new(EngineOptions::offline(48_000.0, 64)).unwrap()
    }

    fn session(engine: &mut Engine) -> (TrackId, TrackId) {
        let vox = engine.add_track(TrackKind::Audio, "Vox").unwrap();
        let verb = engine.add_track(TrackKind::Bus, "Verb").unwrap();
        engine.insert_plugin(vox, StageRef::insert(1), "gain").unwrap();
        engine
            .set_control(&PortAddress::track(vox, "insert1.gain_db"), -12.0)
            .unwrap();
        engine.set_bypassed(vox, StageRef::insert(1), true).unwrap();
        engine.set_send(vox, 7, SendTarget::main(verb)).unwrap();
        engine.set_send_amount(vox, 7, 0.3).unwrap();
        engine.set_volume(verb, 0.8).unwrap();
        engine.set_armed(vox, true).unwrap();
        engine
            .connect(
                &PortAddress::new(NodeAddress::HardwareInput, "in_l"),
                &PortAddress::track(vox, "in_l"),
                0.5,
            )
            .unwrap();
        (vox, verb)
    }

    #[test]
    fn snapshot_records_intent_not_managed_routing() {
        let mut engine = engine();
        let (vox, verb) = session(&mut engine);
        let snap = engine.snapshot();

        assert_eq!(snap.tracks.len(), 3);
        assert_eq!(snap.connections.len(), 1);
        assert_eq!(snap.connections[0].multiplier, 0.5);

        let vox_snap = snap.tracks.iter().find(|t| t.id == vox).unwrap();
        assert!(vox_snap.armed);
        assert_eq!(vox_snap.stages.len(), 1);
        assert!(vox_snap.stages[0].bypassed);
        assert_eq!(vox_snap.stages[0].params["gain_db"], -12.0);
        assert_eq!(vox_snap.sends.len(), 1);
        assert_eq!(vox_snap.sends[0].target, Some(SendTarget::main(verb)));

        let verb_snap = snap.tracks.iter().find(|t| t.id == verb).unwrap();
        assert_eq!(verb_snap.fader["amp"], 0.8);
    }

    #[test]
    fn restore_into_fresh_engine_reproduces_snapshot() {
        let mut source = engine();
        session(&mut source);
        let snap = source.snapshot();

        let mut target = engine();
        target.add_track(TrackKind::Midi, "Leftover").unwrap();
        target.restore(&snap).unwrap();
        assert_eq!(target.snapshot(), snap);
        assert_eq!(target.graph().connection_count(), source.graph().connection_count());
    }

    #[test]
    fn restore_rejects_bad_ids_without_touching_session() {
        let mut engine = engine();
        let (vox, _) = session(&mut engine);
        let before = engine.snapshot();

        let mut bad = before.clone();
        bad.tracks.push(bad.tracks[1].clone());
        assert!(matches!(engine.restore(&bad), Err(EngineError::Snapshot(_))));

        let mut bad = before.clone();
        if let Some(t) = bad.tracks.iter_mut().find(|t| t.id == vox) {
            t.kind = TrackKind::Master;
        }
        assert!(matches!(engine.restore(&bad), Err(EngineError::Snapshot(_))));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn failed_restore_keeps_previous_session() {
        let mut engine = engine();
        let (vox, _) = session(&mut engine);
        let before = engine.snapshot();
        let connections = engine.graph().connection_count();

        let mut bad = before.clone();
        if let Some(t) = bad.tracks.iter_mut().find(|t| t.id == vox) {
            t.stages[0].kind = "no_such_plugin".to_string();
        }
        assert!(matches!(engine.restore(&bad), Err(EngineError::UnknownProcessor(_))));
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.graph().connection_count(), connections);

        engine.write_input(0, &[1.0; 64]).unwrap();
        engine.process_cycle(64).unwrap();
    }

    #[test]
    fn empty_snapshot_clears_to_master() {
        let mut engine = engine();
        session(&mut engine);
        engine.set_volume(MASTER, 0.5).unwrap();
        engine.restore(&EngineSnapshot::default()).unwrap();
        assert_eq!(engine.tracks().count(), 1);
        assert_eq!(engine.track(MASTER).unwrap().fader().volume(), 1.0);
        assert!(engine.snapshot().connections.is_empty());
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let mut engine = engine();
        session(&mut engine);
        let snap = engine.snapshot();
        let text = serde_json::to_string(&snap).unwrap();
        let back: EngineSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snap);
    }
}
