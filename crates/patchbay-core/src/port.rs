//! Typed ports: the endpoints every connection starts and ends on.
//!
//! A port has a semantic [`PortType`], a [`PortDirection`] and a buffer sized
//! once at creation:
//!
//! | type    | buffer                                  |
//! |---------|-----------------------------------------|
//! | Audio   | `max_block` samples                     |
//! | CV      | `max_block` samples, clamped to range   |
//! | MIDI    | fixed-capacity [`MidiBuffer`]           |
//! | Control | shared atomic [`ControlValue`]          |
//!
//! Output ports are written by their processor. Input ports are filled only by
//! the graph executor, which gathers every connected output each cycle. Public
//! writes to inputs fail with [`PortError::WriteToInput`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PortError;
use crate::math::add_scaled;
use crate::midi::MidiBuffer;
use crate::track::{NodeKey, TrackId};

/// Port identifier. Sequential, never reused within an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) u32);

impl PortId {
    /// Raw index.
    pub fn index(self) -> u32 {
        self.0
    }

    /// Id for ports that live outside the routing graph (stage and tap ports).
    pub(crate) const fn detached() -> Self {
        Self(u32::MAX)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Semantic signal type carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// Audio-rate sample blocks.
    Audio,
    /// Timestamped MIDI events.
    Midi,
    /// Audio-rate control voltage, nominally -1..1.
    Cv,
    /// One value per cycle with a range.
    Control,
}

impl PortType {
    /// True if an output of this type may feed an input of type `dst`.
    pub const fn can_feed(self, dst: PortType) -> bool {
        matches!(
            (self, dst),
            (PortType::Audio, PortType::Audio)
                | (PortType::Midi, PortType::Midi)
                | (PortType::Cv, PortType::Cv)
                | (PortType::Cv, PortType::Control)
                | (PortType::Control, PortType::Cv)
                | (PortType::Control, PortType::Control)
        )
    }

    /// True for types backed by a sample block.
    pub const fn is_signal(self) -> bool {
        matches!(self, PortType::Audio | PortType::Cv)
    }

    /// Lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            PortType::Audio => "audio",
            PortType::Midi => "midi",
            PortType::Cv => "cv",
            PortType::Control => "control",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data-flow direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// Receives data from connections.
    Input,
    /// Produces data for connections.
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        })
    }
}

/// Port capability flags.
///
/// # Example
///
/// ```rust
/// use patchbay_core::PortFlags;
///
/// let flags = PortFlags::SINGLE_INPUT.union(PortFlags::SIDECHAIN);
/// assert!(flags.contains(PortFlags::SIDECHAIN));
/// assert!(!flags.contains(PortFlags::TOGGLE));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortFlags(u8);

impl PortFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Input accepts at most one incoming connection.
    pub const SINGLE_INPUT: Self = Self(1 << 0);
    /// Connections into this input are delayed-feedback edges.
    pub const CYCLE_TOLERANT: Self = Self(1 << 1);
    /// Input is a sidechain key.
    pub const SIDECHAIN: Self = Self(1 << 2);
    /// Control is an on/off switch.
    pub const TOGGLE: Self = Self(1 << 3);
    /// Port is fed or read by the audio backend.
    pub const HARDWARE: Self = Self(1 << 4);

    /// Returns `true` if all bits in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of two flag sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Range of a control or CV port.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlRange {
    /// Minimum value.
    pub min: f32,
    /// Maximum value.
    pub max: f32,
    /// Initial value, always inside `[min, max]`.
    pub default: f32,
}

impl ControlRange {
    /// Create a range; `default` is clamped into it.
    pub fn new(min: f32, max: f32, default: f32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            default: default.clamp(min, max),
        }
    }

    /// 0..1 switch, off by default.
    pub fn toggle() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }

    /// -1..1, centred.
    pub fn bipolar() -> Self {
        Self::new(-1.0, 1.0, 0.0)
    }

    /// Clamp `value` into the range. NaN maps to the default.
    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }

    /// Half the span. CV signals in -1..1 are scaled by this.
    #[inline]
    pub fn depth(&self) -> f32 {
        (self.max - self.min) * 0.5
    }
}

impl Default for ControlRange {
    fn default() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }
}

/// Atomic control value shared between the control thread and processors.
///
/// `base` is what the user (or automation) set; `value` is the effective
/// value after this cycle's connections and CV modulation were applied.
pub struct ControlValue {
    range: ControlRange,
    base: AtomicU32,
    value: AtomicU32,
    generation: AtomicU64,
}

impl ControlValue {
    /// Create a value at `range.default`.
    pub fn new(range: ControlRange) -> Self {
        let bits = range.default.to_bits();
        Self {
            range,
            base: AtomicU32::new(bits),
            value: AtomicU32::new(bits),
            generation: AtomicU64::new(0),
        }
    }

    /// The value's range.
    pub fn range(&self) -> ControlRange {
        self.range
    }

    /// Effective value seen by processors this cycle.
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Relaxed))
    }

    /// Base value as last set.
    #[inline]
    pub fn base(&self) -> f32 {
        f32::from_bits(self.base.load(Ordering::Relaxed))
    }

    /// Set the base value (clamped) and bump the generation. Returns the stored value.
    pub fn set(&self, value: f32) -> f32 {
        let v = self.range.clamp(value);
        self.base.store(v.to_bits(), Ordering::Relaxed);
        self.value.store(v.to_bits(), Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Release);
        v
    }

    /// Toggle state: the effective value sits above the range midpoint.
    #[inline]
    pub fn is_toggled(&self) -> bool {
        self.get() > self.range.min + self.range.depth()
    }

    /// Number of `set` calls so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn set_effective(&self, value: f32) {
        self.value
            .store(self.range.clamp(value).to_bits(), Ordering::Relaxed);
    }
}

impl fmt::Debug for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlValue")
            .field("range", &self.range)
            .field("base", &self.base())
            .field("value", &self.get())
            .finish()
    }
}

/// Static description of a port, as returned by `ProcessorNode::ports`.
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    /// Stable identifier, unique per node and direction (e.g. `"out_l"`).
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Semantic type.
    pub kind: PortType,
    /// Data-flow direction.
    pub direction: PortDirection,
    /// Range for control and CV ports.
    pub range: Option<ControlRange>,
    /// Capability flags.
    pub flags: PortFlags,
    pub(crate) shared: Option<Arc<ControlValue>>,
}

impl PortDescriptor {
    fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        kind: PortType,
        direction: PortDirection,
    ) -> Self {
        let range = match kind {
            PortType::Cv => Some(ControlRange::bipolar()),
            PortType::Control => Some(ControlRange::default()),
            PortType::Audio | PortType::Midi => None,
        };
        Self {
            symbol: symbol.into(),
            name: name.into(),
            kind,
            direction,
            range,
            flags: PortFlags::NONE,
            shared: None,
        }
    }

    /// Audio input.
    pub fn audio_in(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, PortType::Audio, PortDirection::Input)
    }

    /// Audio output.
    pub fn audio_out(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, PortType::Audio, PortDirection::Output)
    }

    /// MIDI input.
    pub fn midi_in(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, PortType::Midi, PortDirection::Input)
    }

    /// MIDI output.
    pub fn midi_out(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, PortType::Midi, PortDirection::Output)
    }

    /// CV input, range -1..1.
    pub fn cv_in(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, PortType::Cv, PortDirection::Input)
    }

    /// CV output, range -1..1.
    pub fn cv_out(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(symbol, name, PortType::Cv, PortDirection::Output)
    }

    /// Control input with a range.
    pub fn control_in(
        symbol: impl Into<String>,
        name: impl Into<String>,
        range: ControlRange,
    ) -> Self {
        Self::new(symbol, name, PortType::Control, PortDirection::Input).with_range(range)
    }

    /// Control output with a range.
    pub fn control_out(
        symbol: impl Into<String>,
        name: impl Into<String>,
        range: ControlRange,
    ) -> Self {
        Self::new(symbol, name, PortType::Control, PortDirection::Output).with_range(range)
    }

    /// On/off control input.
    pub fn toggle_in(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self::control_in(symbol, name, ControlRange::toggle()).with_flags(PortFlags::TOGGLE)
    }

    /// Replace the range.
    pub fn with_range(mut self, range: ControlRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Add flags.
    pub fn with_flags(mut self, flags: PortFlags) -> Self {
        self.flags = self.flags.union(flags);
        self
    }

    /// Mark as a single-input sidechain key.
    pub fn sidechain(self) -> Self {
        self.with_flags(PortFlags::SIDECHAIN.union(PortFlags::SINGLE_INPUT))
    }

    /// Back this control port with an existing value instead of a fresh one.
    pub(crate) fn with_shared_value(mut self, value: Arc<ControlValue>) -> Self {
        self.range = Some(value.range());
        self.shared = Some(value);
        self
    }

    /// Copy with `prefix.` prepended to symbol and `prefix ` to name.
    pub(crate) fn prefixed(&self, prefix: &str) -> Self {
        let mut desc = self.clone();
        desc.symbol = format!("{prefix}.{}", self.symbol);
        desc.name = format!("{prefix} {}", self.name);
        desc
    }
}

pub(crate) enum PortBuffer {
    Signal(Vec<f32>),
    Midi(MidiBuffer),
    Control(Arc<ControlValue>),
}

#[derive(Debug, Default, Clone, Copy)]
struct GatherScratch {
    control_sum: f32,
    has_control_source: bool,
    cv_offset: f32,
}

/// A live port with its buffer.
pub struct Port {
    id: PortId,
    descriptor: PortDescriptor,
    buffer: PortBuffer,
    scratch: GatherScratch,
}

impl Port {
    pub(crate) fn new(
        id: PortId,
        mut descriptor: PortDescriptor,
        max_block: usize,
        midi_capacity: usize,
    ) -> Self {
        let buffer = match descriptor.kind {
            PortType::Audio | PortType::Cv => PortBuffer::Signal(vec![0.0; max_block]),
            PortType::Midi => PortBuffer::Midi(MidiBuffer::with_capacity(midi_capacity)),
            PortType::Control => {
                let value = descriptor.shared.clone().unwrap_or_else(|| {
                    Arc::new(ControlValue::new(descriptor.range.unwrap_or_default()))
                });
                descriptor.shared = Some(Arc::clone(&value));
                PortBuffer::Control(value)
            }
        };
        Self {
            id,
            descriptor,
            buffer,
            scratch: GatherScratch::default(),
        }
    }

    /// Port id (detached ports report `u32::MAX`).
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Static description.
    pub fn descriptor(&self) -> &PortDescriptor {
        &self.descriptor
    }

    /// Semantic type.
    pub fn kind(&self) -> PortType {
        self.descriptor.kind
    }

    /// Direction.
    pub fn direction(&self) -> PortDirection {
        self.descriptor.direction
    }

    /// Stable symbol.
    pub fn symbol(&self) -> &str {
        &self.descriptor.symbol
    }

    /// Whole sample buffer for audio/CV ports, empty for other types.
    pub fn read(&self) -> &[f32] {
        match &self.buffer {
            PortBuffer::Signal(buf) => buf,
            PortBuffer::Midi(_) | PortBuffer::Control(_) => &[],
        }
    }

    /// Copy `block` into the start of an output port's sample buffer.
    ///
    /// # Errors
    ///
    /// - [`PortError::WriteToInput`] for input ports
    /// - [`PortError::NotASignal`] for MIDI and control ports
    /// - [`PortError::BlockTooLarge`] if `block` is longer than the buffer
    pub fn write(&mut self, block: &[f32]) -> Result<(), PortError> {
        if self.direction() == PortDirection::Input {
            return Err(PortError::WriteToInput(self.id));
        }
        let id = self.id;
        let kind = self.kind();
        match &mut self.buffer {
            PortBuffer::Signal(buf) => {
                if block.len() > buf.len() {
                    return Err(PortError::BlockTooLarge {
                        len: block.len(),
                        capacity: buf.len(),
                    });
                }
                buf[..block.len()].copy_from_slice(block);
                Ok(())
            }
            PortBuffer::Midi(_) | PortBuffer::Control(_) => {
                Err(PortError::NotASignal { port: id, kind })
            }
        }
    }

    /// Effective value of a control port.
    pub fn value(&self) -> Option<f32> {
        self.control().map(|c| c.get())
    }

    /// Set a control port's base value (clamped). Returns the stored value.
    pub fn set_value(&self, value: f32) -> Result<f32, PortError> {
        self.control()
            .map(|c| c.set(value))
            .ok_or(PortError::NotAControl(self.id))
    }

    /// Shared value behind a control port.
    pub fn control(&self) -> Option<&Arc<ControlValue>> {
        match &self.buffer {
            PortBuffer::Control(value) => Some(value),
            PortBuffer::Signal(_) | PortBuffer::Midi(_) => None,
        }
    }

    /// Event buffer of a MIDI port.
    pub fn midi(&self) -> Option<&MidiBuffer> {
        match &self.buffer {
            PortBuffer::Midi(buf) => Some(buf),
            PortBuffer::Signal(_) | PortBuffer::Control(_) => None,
        }
    }

    pub(crate) fn signal_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.buffer {
            PortBuffer::Signal(buf) => Some(buf),
            PortBuffer::Midi(_) | PortBuffer::Control(_) => None,
        }
    }

    pub(crate) fn midi_mut(&mut self) -> Option<&mut MidiBuffer> {
        match &mut self.buffer {
            PortBuffer::Midi(buf) => Some(buf),
            PortBuffer::Signal(_) | PortBuffer::Control(_) => None,
        }
    }

    /// Silence the first `frames` samples or drop all events. Controls keep their value.
    pub(crate) fn clear(&mut self, frames: usize) {
        match &mut self.buffer {
            PortBuffer::Signal(buf) => {
                let n = frames.min(buf.len());
                buf[..n].fill(0.0);
            }
            PortBuffer::Midi(buf) => buf.clear(),
            PortBuffer::Control(_) => {}
        }
    }

    /// Copy `src`'s current content for pass-through. Mismatched types clear.
    pub(crate) fn copy_from(&mut self, src: &Port, frames: usize) {
        match (&mut self.buffer, &src.buffer) {
            (PortBuffer::Signal(dst), PortBuffer::Signal(s)) => {
                let n = frames.min(dst.len()).min(s.len());
                dst[..n].copy_from_slice(&s[..n]);
            }
            (PortBuffer::Midi(dst), PortBuffer::Midi(s)) => dst.copy_from(s),
            (PortBuffer::Control(dst), PortBuffer::Control(s)) => dst.set_effective(s.get()),
            (PortBuffer::Signal(dst), _) => {
                let n = frames.min(dst.len());
                dst[..n].fill(0.0);
            }
            (PortBuffer::Midi(dst), _) => dst.clear(),
            (PortBuffer::Control(_), _) => {}
        }
    }

    pub(crate) fn begin_gather(&mut self, frames: usize) {
        self.scratch = GatherScratch::default();
        self.clear(frames);
    }

    /// Accumulate one connected source into this input.
    pub(crate) fn gather_from(&mut self, src: &Port, multiplier: f32, frames: usize) {
        let depth = self.descriptor.range.map_or(1.0, |r| r.depth());
        match (&mut self.buffer, &src.buffer) {
            (PortBuffer::Signal(dst), PortBuffer::Signal(s)) => {
                let n = frames.min(dst.len()).min(s.len());
                let gain = match self.descriptor.kind {
                    PortType::Cv if src.descriptor.kind == PortType::Cv => multiplier * depth,
                    _ => multiplier,
                };
                add_scaled(&mut dst[..n], &s[..n], gain);
            }
            (PortBuffer::Signal(dst), PortBuffer::Control(value)) => {
                let offset = value.get() * multiplier;
                let n = frames.min(dst.len());
                for sample in &mut dst[..n] {
                    *sample += offset;
                }
            }
            (PortBuffer::Control(_), PortBuffer::Control(value)) => {
                self.scratch.control_sum += value.get() * multiplier;
                self.scratch.has_control_source = true;
            }
            (PortBuffer::Control(_), PortBuffer::Signal(s)) => {
                if let Some(first) = s.first() {
                    self.scratch.cv_offset += depth * *first * multiplier;
                }
            }
            (PortBuffer::Midi(dst), PortBuffer::Midi(s)) => dst.merge_from(s, frames),
            _ => {}
        }
    }

    /// Clamp CV to range and resolve the effective control value.
    pub(crate) fn finish_gather(&mut self, frames: usize) {
        let range = self.descriptor.range;
        match &mut self.buffer {
            PortBuffer::Signal(buf) => {
                if let (PortType::Cv, Some(range)) = (self.descriptor.kind, range) {
                    let n = frames.min(buf.len());
                    for sample in &mut buf[..n] {
                        *sample = sample.clamp(range.min, range.max);
                    }
                }
            }
            PortBuffer::Control(value) => {
                let start = if self.scratch.has_control_source {
                    self.scratch.control_sum
                } else {
                    value.base()
                };
                value.set_effective(start + self.scratch.cv_offset);
            }
            PortBuffer::Midi(_) => {}
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("symbol", &self.descriptor.symbol)
            .field("kind", &self.descriptor.kind)
            .field("direction", &self.descriptor.direction)
            .finish()
    }
}

/// Stable address of a node, valid across snapshot/restore and undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAddress {
    /// A track's channel strip.
    Track(TrackId),
    /// An engine-owned free-standing processor.
    Processor(NodeKey),
    /// The hardware input node.
    HardwareInput,
    /// The monitor (control room) node.
    Monitor,
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddress::Track(id) => write!(f, "{id}"),
            NodeAddress::Processor(key) => write!(f, "{key}"),
            NodeAddress::HardwareInput => f.write_str("hw_in"),
            NodeAddress::Monitor => f.write_str("monitor"),
        }
    }
}

/// Stable address of a port: owning node plus port symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortAddress {
    /// Owning node.
    pub node: NodeAddress,
    /// Port symbol on that node.
    pub port: String,
}

impl PortAddress {
    /// Create an address.
    pub fn new(node: NodeAddress, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }

    /// Port on a track's channel strip.
    pub fn track(track: TrackId, port: impl Into<String>) -> Self {
        Self::new(NodeAddress::Track(track), port)
    }

    /// Port on an engine-owned processor.
    pub fn processor(key: NodeKey, port: impl Into<String>) -> Self {
        Self::new(NodeAddress::Processor(key), port)
    }
}

impl fmt::Display for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}
