//! Property-based tests for the routing graph and engine.
//!
//! Random connection sequences must never leave a cycle behind, compiled
//! orders must respect every edge, and control values stay inside their
//! ranges whatever is written to them.

use proptest::prelude::*;
use patchbay_core::{
    ConnectionOptions, ControlRange, ControlValue, Engine, EngineError, EngineOptions, GraphError,
    OutputTarget, PortAddress, PortDescriptor, RoutingGraph, TrackKind,
};

fn stereo_node() -> Vec<PortDescriptor> {
    vec![
        PortDescriptor::audio_in("in_l", "In L"),
        PortDescriptor::audio_in("in_r", "In R"),
        PortDescriptor::audio_out("out_l", "Out L"),
        PortDescriptor::audio_out("out_r", "Out R"),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Whatever edges are attempted, the accepted ones form a DAG and the
    /// topological order places every source before its destination.
    #[test]
    fn accepted_edges_stay_acyclic(
        nodes in 2usize..12,
        edges in prop::collection::vec((0usize..12, 0usize..12, any::<bool>()), 0..60),
    ) {
        let mut graph = RoutingGraph::new();
        let ids: Vec<_> = (0..nodes)
            .map(|i| graph.add_node(format!("n{i}"), &stereo_node()))
            .collect();

        for (a, b, feedback) in edges {
            let (src, dst) = (ids[a % nodes], ids[b % nodes]);
            let out = graph.node(src).unwrap().outputs()[0];
            let inp = graph.node(dst).unwrap().inputs()[0];
            let options = if feedback {
                ConnectionOptions::new(1.0).feedback()
            } else {
                ConnectionOptions::new(1.0)
            };
            match graph.add_connection_with(out, inp, options) {
                Ok(_) => {}
                Err(GraphError::Cycle(_)) => prop_assert!(!feedback),
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }

        prop_assert!(!graph.has_cycle());
        let order = graph.topological_order().unwrap();
        prop_assert_eq!(order.len(), nodes);
        let position = |n| order.iter().position(|o| *o == n).unwrap();
        for c in graph.connections().filter(|c| !c.is_feedback()) {
            prop_assert!(position(c.src_node()) < position(c.dst_node()));
        }
    }

    /// Removing any node removes exactly the connections that touched it.
    #[test]
    fn node_removal_drops_its_connections(
        edges in prop::collection::vec((0usize..6, 0usize..6), 1..20),
        victim in 0usize..6,
    ) {
        let mut graph = RoutingGraph::new();
        let ids: Vec<_> = (0..6).map(|i| graph.add_node(format!("n{i}"), &stereo_node())).collect();
        for (a, b) in edges {
            let out = graph.node(ids[a]).unwrap().outputs()[1];
            let inp = graph.node(ids[b]).unwrap().inputs()[1];
            let _ = graph.add_connection(out, inp, 0.5);
        }
        let touching = graph
            .connections()
            .filter(|c| c.src_node() == ids[victim] || c.dst_node() == ids[victim])
            .count();
        let before = graph.connection_count();
        let removed = graph.remove_node(ids[victim]);
        prop_assert_eq!(removed.len(), touching);
        prop_assert_eq!(graph.connection_count(), before - touching);
        prop_assert!(graph.node(ids[victim]).is_none());
    }

    /// Control values always land inside their range.
    #[test]
    fn control_values_clamp(
        min in -100.0f32..0.0,
        span in 0.1f32..200.0,
        writes in prop::collection::vec(-1000.0f32..1000.0, 1..32),
    ) {
        let range = ControlRange::new(min, min + span, min);
        let value = ControlValue::new(range);
        for v in writes {
            let stored = value.set(v);
            prop_assert!(stored >= range.min && stored <= range.max);
            prop_assert_eq!(value.base(), stored);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Random bus routing: every accepted output change leaves a renderable
    /// graph, every rejected one is a cycle or a kind mismatch, and the output
    /// stays finite and within the hard limit.
    #[test]
    fn random_bus_routing_renders(
        kinds in prop::collection::vec(0u8..3, 1..8),
        routes in prop::collection::vec((0usize..8, 0usize..9), 0..24),
        solo in prop::collection::vec(any::<bool>(), 8),
    ) {
        let mut engine = Engine::new(EngineOptions::offline(48_000.0, 32)).unwrap();
        let tracks: Vec<_> = kinds
            .iter()
            .enumerate()
            .map(|(i, k)| {
                let kind = match k {
                    0 => TrackKind::Audio,
                    1 => TrackKind::Bus,
                    _ => TrackKind::Instrument,
                };
                engine.add_track(kind, format!("t{i}")).unwrap()
            })
            .collect();

        for (src, dst) in routes {
            let src = tracks[src % tracks.len()];
            let target = if dst >= tracks.len() {
                OutputTarget::Master
            } else {
                OutputTarget::Track(tracks[dst])
            };
            match engine.set_output(src, target) {
                Ok(()) => prop_assert_eq!(engine.track(src).unwrap().output(), target),
                Err(EngineError::Graph(GraphError::Cycle(_)) | EngineError::IncompatibleRouting { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
        for (id, on) in tracks.iter().zip(&solo) {
            engine.set_solo(*id, *on).unwrap();
        }
        for id in &tracks {
            engine
                .connect(
                    &PortAddress::new(patchbay_core::NodeAddress::HardwareInput, "in_l"),
                    &PortAddress::track(*id, "in_l"),
                    1.0,
                )
                .ok();
        }

        prop_assert!(!engine.graph().has_cycle());
        let (mut l, mut r) = (vec![0.0; 32], vec![0.0; 32]);
        for _ in 0..3 {
            engine.process_block(&[1.5; 32], &[0.0; 32], &mut l, &mut r).unwrap();
        }
        prop_assert!(l.iter().chain(&r).all(|s| s.is_finite() && s.abs() <= patchbay_core::OUTPUT_LIMIT));
        prop_assert!(!engine.track(engine.master()).unwrap().is_silenced_by_solo());
    }
}
