//! MIDI events and fixed-capacity per-port event buffers.

use serde::{Deserialize, Serialize};

/// A short MIDI message stamped with its frame offset inside the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    /// Frame offset from the start of the block.
    pub time: u32,
    /// Status byte and up to two data bytes.
    pub data: [u8; 3],
}

impl MidiEvent {
    /// Create an event from raw bytes.
    pub const fn new(time: u32, data: [u8; 3]) -> Self {
        Self { time, data }
    }

    /// Note-on on `channel` (0-15).
    pub const fn note_on(time: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(time, [0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F])
    }

    /// Note-off on `channel` (0-15).
    pub const fn note_off(time: u32, channel: u8, note: u8) -> Self {
        Self::new(time, [0x80 | (channel & 0x0F), note & 0x7F, 0])
    }

    /// Control change on `channel` (0-15).
    pub const fn control_change(time: u32, channel: u8, controller: u8, value: u8) -> Self {
        Self::new(
            time,
            [0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F],
        )
    }

    /// Status nibble (message type without channel).
    #[inline]
    pub const fn status(&self) -> u8 {
        self.data[0] & 0xF0
    }

    /// Channel nibble.
    #[inline]
    pub const fn channel(&self) -> u8 {
        self.data[0] & 0x0F
    }

    /// Note-on with non-zero velocity.
    #[inline]
    pub const fn is_note_on(&self) -> bool {
        self.status() == 0x90 && self.data[2] > 0
    }

    /// Note-off, or note-on with zero velocity.
    #[inline]
    pub const fn is_note_off(&self) -> bool {
        self.status() == 0x80 || (self.status() == 0x90 && self.data[2] == 0)
    }

    /// Note number for note messages.
    #[inline]
    pub const fn note(&self) -> u8 {
        self.data[1]
    }

    /// Velocity for note messages.
    #[inline]
    pub const fn velocity(&self) -> u8 {
        self.data[2]
    }
}

/// Time-ordered event list with a hard capacity fixed at construction.
///
/// Pushing beyond capacity drops the event and bumps [`dropped`](Self::dropped)
/// instead of allocating.
#[derive(Debug, Clone, Default)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    capacity: usize,
    dropped: u64,
}

impl MidiBuffer {
    /// Pre-allocate room for `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of events held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Events in time order.
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Iterate events in time order.
    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.events.iter()
    }

    /// Remove all events. The dropped counter is kept.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Insert `event` after every buffered event with the same or earlier time.
    ///
    /// Returns `false` (and counts a drop) when the buffer is full.
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        let at = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(at, event);
        true
    }

    /// Merge every event of `other` with `time < frames`.
    ///
    /// Equal timestamps keep already-buffered events first, so merging sources
    /// in registration order yields a stable, registration-ordered tie-break.
    pub fn merge_from(&mut self, other: &MidiBuffer, frames: usize) {
        for event in other.events.iter().filter(|e| (e.time as usize) < frames) {
            self.push(*event);
        }
    }

    /// Replace contents with a copy of `other`.
    pub fn copy_from(&mut self, other: &MidiBuffer) {
        self.events.clear();
        let take = other.events.len().min(self.capacity);
        self.events.extend_from_slice(&other.events[..take]);
        self.dropped += (other.events.len() - take) as u64;
    }

    /// Keep only events matching `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&MidiEvent) -> bool) {
        self.events.retain(keep);
    }

    /// Mutable access for in-place edits that do not change timestamps.
    pub fn events_mut(&mut self) -> &mut [MidiEvent] {
        &mut self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_helpers() {
        let on = MidiEvent::note_on(0, 2, 60, 100);
        assert!(on.is_note_on());
        assert_eq!(on.channel(), 2);
        assert_eq!(on.note(), 60);
        let zero_vel = MidiEvent::note_on(0, 0, 60, 0);
        assert!(zero_vel.is_note_off());
        assert!(!zero_vel.is_note_on());
        assert!(MidiEvent::note_off(0, 0, 60).is_note_off());
    }

    #[test]
    fn push_keeps_time_order() {
        let mut buf = MidiBuffer::with_capacity(8);
        buf.push(MidiEvent::note_on(10, 0, 1, 1));
        buf.push(MidiEvent::note_on(2, 0, 2, 1));
        buf.push(MidiEvent::note_on(5, 0, 3, 1));
        let times: Vec<u32> = buf.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![2, 5, 10]);
    }

    #[test]
    fn merge_breaks_ties_by_arrival() {
        let mut first = MidiBuffer::with_capacity(4);
        first.push(MidiEvent::note_on(4, 0, 10, 1));
        let mut second = MidiBuffer::with_capacity(4);
        second.push(MidiEvent::note_on(4, 0, 20, 1));
        second.push(MidiEvent::note_on(1, 0, 30, 1));

        let mut dst = MidiBuffer::with_capacity(8);
        dst.merge_from(&first, 64);
        dst.merge_from(&second, 64);
        let notes: Vec<u8> = dst.iter().map(MidiEvent::note).collect();
        assert_eq!(notes, vec![30, 10, 20]);
    }

    #[test]
    fn merge_ignores_events_past_block_end() {
        let mut src = MidiBuffer::with_capacity(4);
        src.push(MidiEvent::note_on(100, 0, 1, 1));
        let mut dst = MidiBuffer::with_capacity(4);
        dst.merge_from(&src, 64);
        assert!(dst.is_empty());
    }

    #[test]
    fn overflow_drops_and_counts() {
        let mut buf = MidiBuffer::with_capacity(2);
        assert!(buf.push(MidiEvent::note_on(0, 0, 1, 1)));
        assert!(buf.push(MidiEvent::note_on(0, 0, 2, 1)));
        assert!(!buf.push(MidiEvent::note_on(0, 0, 3, 1)));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.dropped(), 1);
        buf.clear();
        assert_eq!(buf.dropped(), 1);
    }
}
