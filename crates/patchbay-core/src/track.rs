//! Tracks: ids, kinds, slot addressing and the control-side track record.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::channel::{FaderControls, StageHandle};
use crate::graph::NodeId;
use crate::mixer::MixFlags;
use crate::port::ControlValue;
use crate::processor::{NodeState, NodeStatus};

/// Number of insert slots per track.
pub const INSERT_SLOTS: usize = 9;
/// Inserts `0..PRE_FADER_INSERTS` run before the fader.
pub const PRE_FADER_INSERTS: usize = 5;
/// Number of MIDI effect slots per track.
pub const MIDI_FX_SLOTS: usize = 9;
/// Number of send slots per track.
pub const SEND_SLOTS: usize = 9;
/// Sends `0..PRE_FADER_SENDS` tap before the fader.
pub const PRE_FADER_SENDS: usize = 6;

/// Stable, persisted track identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub(crate) u32);

impl TrackId {
    /// Raw index.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

/// Stable, persisted key of an engine-owned free-standing processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(pub(crate) u32);

impl NodeKey {
    /// Raw index.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc#{}", self.0)
    }
}

/// What a track carries and which stages it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Audio in, audio out.
    Audio,
    /// MIDI in, MIDI out. No audio stages.
    Midi,
    /// MIDI in, instrument, audio out.
    Instrument,
    /// Group/aux bus: audio in from other tracks, audio out.
    Bus,
    /// The final mix. One per engine.
    Master,
}

impl TrackKind {
    /// Produces audio (has inserts, fader audio path and sends).
    pub const fn has_audio(self) -> bool {
        !matches!(self, TrackKind::Midi)
    }

    /// Takes MIDI input (has MIDI effect slots).
    pub const fn has_midi(self) -> bool {
        matches!(self, TrackKind::Midi | TrackKind::Instrument)
    }

    /// Has main audio inputs.
    pub const fn has_audio_input(self) -> bool {
        matches!(self, TrackKind::Audio | TrackKind::Bus | TrackKind::Master)
    }

    /// Whether `stage` exists on tracks of this kind.
    pub const fn has_stage(self, stage: StageKind) -> bool {
        match stage {
            StageKind::MidiFx => self.has_midi(),
            StageKind::Instrument => matches!(self, TrackKind::Instrument),
            StageKind::Insert => self.has_audio(),
        }
    }

    /// Number of send slots.
    pub const fn send_slots(self) -> usize {
        if self.has_audio() { SEND_SLOTS } else { 0 }
    }

    /// Lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Midi => "midi",
            TrackKind::Instrument => "instrument",
            TrackKind::Bus => "bus",
            TrackKind::Master => "master",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a track's main output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTarget {
    /// Not routed.
    None,
    /// The Master track.
    #[default]
    Master,
    /// Another track's main inputs.
    Track(TrackId),
}

/// Kind of per-track processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// MIDI effect slot.
    MidiFx,
    /// Instrument slot.
    Instrument,
    /// Audio insert slot.
    Insert,
}

impl StageKind {
    /// Number of slots of this kind.
    pub const fn slots(self) -> usize {
        match self {
            StageKind::MidiFx => MIDI_FX_SLOTS,
            StageKind::Instrument => 1,
            StageKind::Insert => INSERT_SLOTS,
        }
    }
}

/// A specific stage slot on a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageRef {
    /// Stage kind.
    pub stage: StageKind,
    /// Slot index within that kind.
    #[serde(default)]
    pub slot: usize,
}

impl StageRef {
    /// Insert slot `slot`.
    pub const fn insert(slot: usize) -> Self {
        Self {
            stage: StageKind::Insert,
            slot,
        }
    }

    /// MIDI effect slot `slot`.
    pub const fn midi_fx(slot: usize) -> Self {
        Self {
            stage: StageKind::MidiFx,
            slot,
        }
    }

    /// The instrument slot.
    pub const fn instrument() -> Self {
        Self {
            stage: StageKind::Instrument,
            slot: 0,
        }
    }

    /// Slot index is in range for the stage kind.
    pub const fn is_valid(self) -> bool {
        self.slot < self.stage.slots()
    }

    /// Runs before the fader.
    pub const fn is_pre_fader(self) -> bool {
        match self.stage {
            StageKind::Insert => self.slot < PRE_FADER_INSERTS,
            StageKind::MidiFx | StageKind::Instrument => true,
        }
    }

    /// Symbol prefix for ports exported from this stage (`insert3`, `instrument`).
    pub fn prefix(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            StageKind::MidiFx => write!(f, "midi_fx{}", self.slot),
            StageKind::Instrument => f.write_str("instrument"),
            StageKind::Insert => write!(f, "insert{}", self.slot),
        }
    }
}

/// Destination of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SendTarget {
    /// Receiving track.
    pub track: TrackId,
    /// Feed the target's sidechain inputs instead of its main inputs.
    #[serde(default)]
    pub sidechain: bool,
}

impl SendTarget {
    /// Send into `track`'s main inputs.
    pub const fn main(track: TrackId) -> Self {
        Self {
            track,
            sidechain: false,
        }
    }

    /// Send into `track`'s sidechain inputs.
    pub const fn sidechain(track: TrackId) -> Self {
        Self {
            track,
            sidechain: true,
        }
    }
}

/// Control-side view of a filled stage slot.
#[derive(Debug, Clone)]
pub struct StageInfo {
    pub(crate) kind: String,
    pub(crate) status: Arc<NodeStatus>,
    pub(crate) controls: Vec<(String, Arc<ControlValue>)>,
    pub(crate) handle: StageHandle,
}

impl StageInfo {
    /// Registry id of the processor.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Lifecycle state.
    pub fn state(&self) -> NodeState {
        self.status.state()
    }

    /// Base values of the stage's control inputs, by unprefixed symbol.
    pub fn params(&self) -> BTreeMap<String, f32> {
        self.controls
            .iter()
            .map(|(symbol, value)| (symbol.clone(), value.base()))
            .collect()
    }

    pub(crate) fn control(&self, symbol: &str) -> Option<&Arc<ControlValue>> {
        self.controls
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, v)| v)
    }
}

/// Control-side state of one send slot.
#[derive(Debug, Clone)]
pub(crate) struct SendSlot {
    pub(crate) target: Option<SendTarget>,
    pub(crate) amount: Arc<ControlValue>,
    pub(crate) enabled: Arc<AtomicBool>,
}

impl SendSlot {
    pub(crate) fn set_target(&mut self, target: Option<SendTarget>) {
        self.target = target;
        self.enabled.store(target.is_some(), Ordering::Relaxed);
    }
}

/// A track as seen from the control thread.
#[derive(Debug, Clone)]
pub struct Track {
    pub(crate) id: TrackId,
    pub(crate) name: String,
    pub(crate) kind: TrackKind,
    pub(crate) node: NodeId,
    pub(crate) output: OutputTarget,
    pub(crate) armed: bool,
    pub(crate) controls: FaderControls,
    pub(crate) mix: Arc<MixFlags>,
    pub(crate) stages: BTreeMap<StageRef, StageInfo>,
    pub(crate) sends: Vec<SendSlot>,
}

impl Track {
    /// Track id.
    pub fn id(&self) -> TrackId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Track kind.
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Graph node of the channel strip.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Direct-output target.
    pub fn output(&self) -> OutputTarget {
        self.output
    }

    /// Record-armed flag.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Fader control values.
    pub fn fader(&self) -> &FaderControls {
        &self.controls
    }

    /// Silenced by another track's solo during the last cycle.
    pub fn is_silenced_by_solo(&self) -> bool {
        self.mix.is_silenced()
    }

    /// Filled stage at `at`.
    pub fn stage(&self, at: StageRef) -> Option<&StageInfo> {
        self.stages.get(&at)
    }

    /// All filled stages in pipeline order of kind, then slot.
    pub fn stages(&self) -> impl Iterator<Item = (StageRef, &StageInfo)> {
        self.stages.iter().map(|(at, info)| (*at, info))
    }

    /// Send target in `slot`.
    pub fn send(&self, slot: usize) -> Option<SendTarget> {
        self.sends.get(slot).and_then(|s| s.target)
    }

    /// Base amount of send `slot`.
    pub fn send_amount(&self, slot: usize) -> Option<f32> {
        self.sends.get(slot).map(|s| s.amount.base())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_prefixes() {
        assert_eq!(StageRef::insert(3).prefix(), "insert3");
        assert_eq!(StageRef::midi_fx(0).prefix(), "midi_fx0");
        assert_eq!(StageRef::instrument().prefix(), "instrument");
    }

    #[test]
    fn pre_fader_split() {
        assert!(StageRef::insert(4).is_pre_fader());
        assert!(!StageRef::insert(5).is_pre_fader());
        assert!(StageRef::insert(8).is_valid());
        assert!(!StageRef::insert(9).is_valid());
        assert!(!StageRef {
            stage: StageKind::Instrument,
            slot: 1
        }
        .is_valid());
    }

    #[test]
    fn kind_capabilities() {
        assert!(TrackKind::Instrument.has_stage(StageKind::Instrument));
        assert!(!TrackKind::Audio.has_stage(StageKind::Instrument));
        assert!(!TrackKind::Midi.has_stage(StageKind::Insert));
        assert!(TrackKind::Midi.has_stage(StageKind::MidiFx));
        assert_eq!(TrackKind::Midi.send_slots(), 0);
        assert_eq!(TrackKind::Bus.send_slots(), SEND_SLOTS);
        assert!(!TrackKind::Instrument.has_audio_input());
    }

    #[test]
    fn output_target_serde() {
        let json = serde_json::to_string(&OutputTarget::Track(TrackId(4))).unwrap();
        assert_eq!(json, r#"{"track":4}"#);
        let master: OutputTarget = serde_json::from_str(r#""master""#).unwrap();
        assert_eq!(master, OutputTarget::Master);
    }
}
