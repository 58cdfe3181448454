//! Solo and listen resolution across tracks.
//!
//! A track is *silenced* when any track is soloed and it is neither soloed
//! itself nor related to a soloed track. Related means upstream (feeding it)
//! or downstream (fed by it), so soloing a bus keeps its sources audible and
//! soloing a source keeps its bus and the Master audible. The Master track is
//! never silenced.
//!
//! Resolution runs once at the top of every cycle, before any node processes,
//! so every strip in a cycle sees the same solo state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::port::ControlValue;

/// Per-track mix state written by the resolver and read by the track's fader.
#[derive(Debug, Default)]
pub struct MixFlags {
    explicit: AtomicBool,
    soloed: AtomicBool,
    silenced: AtomicBool,
}

impl MixFlags {
    /// Explicitly or implicitly soloed during the last resolution.
    pub fn is_soloed(&self) -> bool {
        self.soloed.load(Ordering::Relaxed)
    }

    /// Silenced by another track's solo during the last resolution.
    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::Relaxed)
    }

    pub(crate) fn store(&self, soloed: bool, silenced: bool) {
        self.soloed.store(soloed, Ordering::Relaxed);
        self.silenced.store(silenced, Ordering::Relaxed);
    }
}

/// Solo-relevant controls of one track, captured at compile time.
#[derive(Debug, Clone)]
pub(crate) struct SoloMember {
    pub(crate) flags: Arc<MixFlags>,
    pub(crate) solo: Arc<ControlValue>,
    pub(crate) listen: Arc<ControlValue>,
    pub(crate) exempt: bool,
    /// Indices of related members.
    pub(crate) related: Vec<usize>,
}

/// Resolves solo and listen state for one compiled graph.
#[derive(Debug, Default)]
pub(crate) struct SoloResolver {
    members: Vec<SoloMember>,
    any_listened: Option<Arc<AtomicBool>>,
}

impl SoloResolver {
    pub(crate) fn new(members: Vec<SoloMember>, any_listened: Option<Arc<AtomicBool>>) -> Self {
        Self {
            members,
            any_listened,
        }
    }

    /// Recompute every member's flags from current control values.
    pub(crate) fn resolve(&self) {
        let mut any_solo = false;
        let mut any_listen = false;
        for member in &self.members {
            let soloed = !member.exempt && member.solo.is_toggled();
            member.flags.explicit.store(soloed, Ordering::Relaxed);
            any_solo |= soloed;
            any_listen |= member.listen.is_toggled();
        }

        for member in &self.members {
            if member.exempt {
                member.flags.store(false, false);
                continue;
            }
            let explicit = member.flags.explicit.load(Ordering::Relaxed);
            let implied = !explicit
                && member
                    .related
                    .iter()
                    .any(|&j| self.members[j].flags.explicit.load(Ordering::Relaxed));
            let silenced = any_solo && !explicit && !implied;
            member.flags.store(explicit || implied, silenced);
        }

        if let Some(flag) = &self.any_listened {
            flag.store(any_listen, Ordering::Relaxed);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::ControlRange;

    fn member(related: Vec<usize>, exempt: bool) -> SoloMember {
        SoloMember {
            flags: Arc::new(MixFlags::default()),
            solo: Arc::new(ControlValue::new(ControlRange::toggle())),
            listen: Arc::new(ControlValue::new(ControlRange::toggle())),
            exempt,
            related,
        }
    }

    // a -> bus -> master, b -> master
    fn chain() -> SoloResolver {
        let members = vec![
            member(vec![1, 3], false),
            member(vec![0, 3], false),
            member(vec![3], false),
            member(vec![0, 1, 2], true),
        ];
        SoloResolver::new(members, Some(Arc::new(AtomicBool::new(false))))
    }

    #[test]
    fn nothing_soloed_nothing_silenced() {
        let r = chain();
        r.resolve();
        assert!(r.members.iter().all(|m| !m.flags.is_silenced()));
    }

    #[test]
    fn soloing_source_keeps_its_bus() {
        let r = chain();
        r.members[0].solo.set(1.0);
        r.resolve();
        assert!(!r.members[0].flags.is_silenced());
        assert!(!r.members[1].flags.is_silenced());
        assert!(r.members[1].flags.is_soloed());
        assert!(r.members[2].flags.is_silenced());
        assert!(!r.members[3].flags.is_silenced());
    }

    #[test]
    fn soloing_bus_keeps_its_sources() {
        let r = chain();
        r.members[1].solo.set(1.0);
        r.resolve();
        assert!(!r.members[0].flags.is_silenced());
        assert!(r.members[2].flags.is_silenced());
    }

    #[test]
    fn master_solo_is_ignored() {
        let r = chain();
        r.members[3].solo.set(1.0);
        r.resolve();
        assert!(r.members.iter().all(|m| !m.flags.is_silenced()));
    }

    #[test]
    fn listen_sets_monitor_flag() {
        let r = chain();
        r.members[2].listen.set(1.0);
        r.resolve();
        assert!(r.any_listened.as_ref().unwrap().load(Ordering::Relaxed));
        assert_eq!(r.len(), 4);
    }
}
