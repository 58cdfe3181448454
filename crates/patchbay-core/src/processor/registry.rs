//! Processor registry and factory.
//!
//! Snapshots, sessions and undo commands refer to processors by string id.
//! The registry maps those ids back to factories, so a restored session can
//! rebuild every stage and free-standing processor.
//!
//! # Example
//!
//! ```rust
//! use patchbay_core::{ProcessorCategory, ProcessorRegistry};
//!
//! let registry = ProcessorRegistry::new();
//! let gain = registry.create("gain").expect("built-in");
//! assert_eq!(gain.kind(), "gain");
//!
//! for desc in registry.in_category(ProcessorCategory::Midi) {
//!     println!("{}: {}", desc.id, desc.description);
//! }
//! ```

use super::ProcessorNode;
use super::builtin::{Ducker, Gain, Lfo, SineSynth, ToneGenerator, Transpose};

/// Category of processor for organization and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorCategory {
    /// Gain stages and routing helpers.
    Utility,
    /// Audio or CV sources.
    Generator,
    /// MIDI-driven sound sources.
    Instrument,
    /// MIDI transformers.
    Midi,
    /// Gain reduction and envelope processors.
    Dynamics,
}

impl ProcessorCategory {
    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            ProcessorCategory::Utility => "Utility",
            ProcessorCategory::Generator => "Generator",
            ProcessorCategory::Instrument => "Instrument",
            ProcessorCategory::Midi => "MIDI",
            ProcessorCategory::Dynamics => "Dynamics",
        }
    }
}

/// Describes a processor type in the registry.
#[derive(Debug, Clone)]
pub struct ProcessorDescriptor {
    /// Unique identifier (lowercase, no spaces).
    pub id: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Brief description.
    pub description: &'static str,
    /// Category for organization.
    pub category: ProcessorCategory,
}

/// Factory function type for creating processors.
pub type ProcessorFactory = fn() -> Box<dyn ProcessorNode>;

struct RegistryEntry {
    descriptor: ProcessorDescriptor,
    factory: ProcessorFactory,
}

/// Registry of available processor types.
///
/// Built-in processors are registered on construction. Plugin format adapters
/// add their own entries with [`register`](Self::register).
pub struct ProcessorRegistry {
    entries: Vec<RegistryEntry>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    /// Create a registry with all built-in processors.
    pub fn new() -> Self {
        let mut registry = Self {
            entries: Vec::with_capacity(6),
        };
        registry.register_builtins();
        registry
    }

    /// Create a registry with no entries.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn register_builtins(&mut self) {
        self.register(
            ProcessorDescriptor {
                id: "gain",
                name: "Gain",
                description: "Stereo gain in decibels",
                category: ProcessorCategory::Utility,
            },
            || Box::new(Gain),
        );
        self.register(
            ProcessorDescriptor {
                id: "tone",
                name: "Test Tone",
                description: "Sine test-tone generator",
                category: ProcessorCategory::Generator,
            },
            || Box::new(ToneGenerator::default()),
        );
        self.register(
            ProcessorDescriptor {
                id: "lfo",
                name: "LFO",
                description: "Sine low-frequency oscillator with CV output",
                category: ProcessorCategory::Generator,
            },
            || Box::new(Lfo::default()),
        );
        self.register(
            ProcessorDescriptor {
                id: "sine_synth",
                name: "Sine Synth",
                description: "Polyphonic sine instrument",
                category: ProcessorCategory::Instrument,
            },
            || Box::new(SineSynth::default()),
        );
        self.register(
            ProcessorDescriptor {
                id: "transpose",
                name: "Transpose",
                description: "MIDI note transposer",
                category: ProcessorCategory::Midi,
            },
            || Box::new(Transpose::default()),
        );
        self.register(
            ProcessorDescriptor {
                id: "ducker",
                name: "Ducker",
                description: "Sidechain-keyed gain reduction",
                category: ProcessorCategory::Dynamics,
            },
            || Box::new(Ducker::default()),
        );
    }

    /// Register a processor type. A later registration with the same id shadows earlier ones.
    pub fn register(&mut self, descriptor: ProcessorDescriptor, factory: ProcessorFactory) {
        self.entries.insert(
            0,
            RegistryEntry {
                descriptor,
                factory,
            },
        );
    }

    /// Descriptors of every registered type, built-ins last.
    pub fn all(&self) -> Vec<&ProcessorDescriptor> {
        self.entries.iter().map(|e| &e.descriptor).collect()
    }

    /// Descriptors in one category.
    pub fn in_category(&self, category: ProcessorCategory) -> Vec<&ProcessorDescriptor> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.category == category)
            .map(|e| &e.descriptor)
            .collect()
    }

    /// Descriptor by id.
    pub fn get(&self, id: &str) -> Option<&ProcessorDescriptor> {
        self.entries
            .iter()
            .find(|e| e.descriptor.id == id)
            .map(|e| &e.descriptor)
    }

    /// Create an uninstantiated processor by id.
    pub fn create(&self, id: &str) -> Option<Box<dyn ProcessorNode>> {
        self.entries
            .iter()
            .find(|e| e.descriptor.id == id)
            .map(|e| (e.factory)())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
