//! Graph scheduler: compiles topology and runs cycles across worker threads.
//!
//! ```text
//!  control thread            compiler thread              audio callback + workers
//!  ──────────────            ───────────────              ────────────────────────
//!  submit(plan) ──plans──▶   CompiledGraph::build
//!                            ArcSwap::store ───────────▶  load_full() per cycle
//!                            graveyard (old graphs)       trigger queue (MPMC)
//!  flush() ◀──condvar──────  generation installed
//! ```
//!
//! The callback thread always takes part in its own cycle, so a scheduler with
//! zero workers is fully functional (and deterministic). Old descriptors are
//! released on the compiler thread once no cycle still holds them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{EngineError, GraphCompilationError, Xrun};
use crate::events::{EngineEvent, EventSender};
use crate::graph::cell::NodeCell;
use crate::graph::{CompiledGraph, NodeId};
use crate::graph::schedule::{GraphPlan, Job};
use crate::options::EngineOptions;

const RECLAIM_INTERVAL: Duration = Duration::from_millis(50);

/// Coarse scheduler state.
///
/// `Idle → Compiling → Ready → Running → Ready`. Compiling and Running may
/// overlap (the old graph serves cycles while the new one builds); Running
/// wins when both hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    /// No graph installed yet.
    Idle,
    /// A submitted topology is not installed yet.
    Compiling,
    /// A graph is installed and no cycle is running.
    Ready,
    /// A cycle is in flight.
    Running,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Compiling => "compiling",
            SchedulerState::Ready => "ready",
            SchedulerState::Running => "running",
        })
    }
}

/// Outcome of one processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Frames processed.
    pub frames: usize,
    /// Wall-clock duration of the cycle.
    pub elapsed: Duration,
    /// Set when the cycle overran its deadline.
    pub xrun: Option<Xrun>,
    /// Generation of the graph that ran, `None` if nothing was installed.
    pub generation: Option<u64>,
}

struct Shared {
    current: ArcSwapOption<CompiledGraph>,
    jobs_tx: Sender<Job>,
    jobs_rx: Receiver<Job>,
    capacity: usize,
    sample_rate: f32,
    requested: AtomicU64,
    processed: Mutex<u64>,
    installed: Condvar,
    graveyard: Mutex<Vec<Arc<CompiledGraph>>>,
    running: AtomicBool,
    cycle_lock: Mutex<()>,
    cycles: AtomicU64,
    xruns: AtomicU64,
    events: EventSender,
}

impl Shared {
    fn install(&self, plan: GraphPlan) -> Result<(), GraphCompilationError> {
        let generation = plan.generation;
        let result = CompiledGraph::build(plan, self.capacity).map(|graph| {
            let nodes = graph.node_count();
            if let Some(old) = self.current.swap(Some(Arc::new(graph))) {
                self.graveyard.lock().push(old);
            }
            self.events
                .post(EngineEvent::GraphInstalled { generation, nodes });
        });
        if let Err(error) = &result {
            #[cfg(feature = "tracing")]
            tracing::warn!("graph_compile: generation {generation} failed: {error}");
            self.events.post(EngineEvent::CompileFailed {
                generation,
                error: error.clone(),
            });
        }
        self.mark_processed(generation);
        result
    }

    fn mark_processed(&self, generation: u64) {
        let mut processed = self.processed.lock();
        if generation > *processed {
            *processed = generation;
        }
        self.installed.notify_all();
    }

    fn reclaim(&self) {
        self.graveyard
            .lock()
            .retain(|graph| Arc::strong_count(graph) > 1);
    }
}

/// Compiles graph plans and executes cycles.
pub struct Scheduler {
    shared: Arc<Shared>,
    plans: Option<Sender<GraphPlan>>,
    stop: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
    workers: usize,
}

impl Scheduler {
    /// Start `options.worker_threads` workers and, if configured, the compiler thread.
    pub(crate) fn new(options: &EngineOptions, events: EventSender) -> Result<Self, EngineError> {
        let (jobs_tx, jobs_rx) = crossbeam_channel::bounded(options.max_nodes.max(1));
        let shared = Arc::new(Shared {
            current: ArcSwapOption::empty(),
            jobs_tx,
            jobs_rx,
            capacity: options.max_nodes,
            sample_rate: options.sample_rate,
            requested: AtomicU64::new(0),
            processed: Mutex::new(0),
            installed: Condvar::new(),
            graveyard: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            cycle_lock: Mutex::new(()),
            cycles: AtomicU64::new(0),
            xruns: AtomicU64::new(0),
            events,
        });

        let mut scheduler = Self {
            shared,
            plans: None,
            stop: None,
            threads: Vec::new(),
            workers: options.worker_threads,
        };

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        scheduler.stop = Some(stop_tx);
        for i in 0..options.worker_threads {
            let shared = Arc::clone(&scheduler.shared);
            let stop = stop_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("patchbay-worker-{i}"))
                .spawn(move || worker_loop(&shared, &stop))?;
            scheduler.threads.push(handle);
        }

        if options.background_compile {
            let (plans_tx, plans_rx) = crossbeam_channel::unbounded();
            let shared = Arc::clone(&scheduler.shared);
            let handle = thread::Builder::new()
                .name("patchbay-compiler".to_string())
                .spawn(move || compiler_loop(&shared, &plans_rx))?;
            scheduler.threads.push(handle);
            scheduler.plans = Some(plans_tx);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "scheduler_start: {} workers, capacity {}, background_compile={}",
            options.worker_threads,
            options.max_nodes,
            options.background_compile
        );
        Ok(scheduler)
    }

    /// Queue `plan` for compilation and return its generation.
    ///
    /// Inline compilation reports failures directly. Background compilation
    /// always returns `Ok`; failures arrive as [`EngineEvent::CompileFailed`].
    pub(crate) fn submit(&self, mut plan: GraphPlan) -> Result<u64, GraphCompilationError> {
        let generation = self.shared.requested.fetch_add(1, Ordering::AcqRel) + 1;
        plan.generation = generation;
        match &self.plans {
            Some(tx) => {
                if let Err(err) = tx.send(plan) {
                    // Compiler thread is gone; fall back to building here.
                    self.shared.install(err.into_inner())?;
                }
            }
            None => {
                self.shared.reclaim();
                self.shared.install(plan)?;
            }
        }
        Ok(generation)
    }

    /// Block until every submitted plan has been compiled (or has failed).
    pub fn flush(&self) {
        let target = self.shared.requested.load(Ordering::Acquire);
        let mut processed = self.shared.processed.lock();
        while *processed < target {
            self.shared.installed.wait(&mut processed);
        }
    }

    /// Run one cycle of `frames` frames on the installed graph.
    ///
    /// Cycles are serialized; concurrent callers wait for each other. A
    /// zero-frame cycle runs nothing and never reports an xrun.
    pub fn run_cycle(&self, frames: usize) -> CycleReport {
        let shared = &*self.shared;
        let _cycle = shared.cycle_lock.lock();
        let graph = match shared.current.load_full() {
            Some(graph) if frames > 0 => graph,
            idle => {
                return CycleReport {
                    frames,
                    elapsed: Duration::ZERO,
                    xrun: None,
                    generation: idle.map(|g| g.generation()),
                };
            }
        };

        shared.running.store(true, Ordering::Release);
        let start = Instant::now();
        graph.begin_cycle(frames);
        for &node in graph.init_triggers() {
            let job = Job {
                graph: Arc::clone(&graph),
                node,
            };
            if let Err(err) = shared.jobs_tx.try_send(job) {
                err.into_inner().run(&shared.jobs_tx);
            }
        }
        while !graph.is_cycle_done() {
            match shared.jobs_rx.try_recv() {
                Ok(job) => job.run(&shared.jobs_tx),
                Err(_) => std::hint::spin_loop(),
            }
        }
        graph.end_cycle();
        let elapsed = start.elapsed();
        shared.running.store(false, Ordering::Release);
        shared.cycles.fetch_add(1, Ordering::Relaxed);

        let deadline = Duration::try_from_secs_f64(frames as f64 / f64::from(shared.sample_rate))
            .unwrap_or(Duration::MAX);
        let xrun = (elapsed > deadline).then(|| {
            let xrun = Xrun {
                frames,
                elapsed,
                deadline,
            };
            shared.xruns.fetch_add(1, Ordering::Relaxed);
            shared.events.post(EngineEvent::Xrun(xrun));
            #[cfg(feature = "tracing")]
            tracing::warn!("{xrun}");
            xrun
        });

        CycleReport {
            frames,
            elapsed,
            xrun,
            generation: Some(graph.generation()),
        }
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        if self.shared.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else if *self.shared.processed.lock() < self.shared.requested.load(Ordering::Acquire) {
            SchedulerState::Compiling
        } else if self.shared.current.load().is_some() {
            SchedulerState::Ready
        } else {
            SchedulerState::Idle
        }
    }

    /// The installed graph.
    pub fn current(&self) -> Option<Arc<CompiledGraph>> {
        self.shared.current.load_full()
    }

    /// Run `f` on node `id`'s cell in the installed graph.
    ///
    /// Takes no reference count, so it is safe on the audio thread.
    pub(crate) fn with_cell<R>(&self, id: NodeId, f: impl FnOnce(&NodeCell) -> R) -> Option<R> {
        let current = self.shared.current.load();
        let cell = Option::as_ref(&*current)?.cell(id)?;
        Some(f(cell))
    }

    /// Generation of the installed graph.
    pub fn generation(&self) -> Option<u64> {
        self.shared.current.load().as_ref().map(|g| g.generation())
    }

    /// Cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    /// Deadline overruns so far.
    pub fn xruns(&self) -> u64 {
        self.shared.xruns.load(Ordering::Relaxed)
    }

    /// Worker threads besides the callback thread.
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Graphs swapped out but still referenced by a cycle.
    pub fn retired_graphs(&self) -> usize {
        self.shared.graveyard.lock().len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.plans = None;
        self.stop = None;
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("scheduler_stop: {} cycles, {} xruns", self.cycles(), self.xruns());
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("workers", &self.workers)
            .field("generation", &self.generation())
            .field("cycles", &self.cycles())
            .finish_non_exhaustive()
    }
}

fn worker_loop(shared: &Shared, stop: &Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(shared.jobs_rx) -> job => match job {
                Ok(job) => job.run(&shared.jobs_tx),
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
}

fn compiler_loop(shared: &Shared, plans: &Receiver<GraphPlan>) {
    loop {
        match plans.recv_timeout(RECLAIM_INTERVAL) {
            Ok(mut plan) => {
                // Only the newest topology matters.
                while let Ok(newer) = plans.try_recv() {
                    shared.mark_processed(plan.generation);
                    plan = newer;
                }
                let _ = shared.install(plan);
                shared.reclaim();
            }
            Err(RecvTimeoutError::Timeout) => shared.reclaim(),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use crate::graph::NodeId;
    use crate::graph::cell::{NodeCell, NodeKind};
    use crate::graph::schedule::PlanNode;
    use crate::port::{Port, PortDirection, PortId};
    use crate::processor::{NodeSlot, ProcessConfig, ProcessorRegistry};

    fn tone_cell(id: u32) -> Arc<NodeCell> {
        let mut slot = NodeSlot::new(ProcessorRegistry::new().create("tone").unwrap());
        slot.instantiate(&ProcessConfig::default()).unwrap();
        let (mut inputs, mut outputs) = (Vec::new(), Vec::new());
        for (i, desc) in slot.processor().ports().into_iter().enumerate() {
            let port = Port::new(PortId(id * 100 + i as u32), desc, 64, 8);
            match port.direction() {
                PortDirection::Input => inputs.push(port),
                PortDirection::Output => outputs.push(port),
            }
        }
        Arc::new(NodeCell::new(NodeId(id), NodeKind::Processor(slot), inputs, outputs))
    }

    fn plan(cells: &[Arc<NodeCell>], events: &EventSender) -> GraphPlan {
        GraphPlan {
            generation: 0,
            order: cells.iter().map(|c| c.id()).collect::<Vec<_>>().into(),
            nodes: cells
                .iter()
                .map(|c| PlanNode {
                    id: c.id(),
                    cell: Arc::clone(c),
                })
                .collect(),
            connections: Vec::new(),
            solo: Vec::new(),
            any_listened: None,
            sample_rate: 48_000.0,
            max_block: 64,
            midi_capacity: 8,
            events: events.clone(),
        }
    }

    fn options(workers: usize, background: bool, max_nodes: usize) -> EngineOptions {
        EngineOptions {
            worker_threads: workers,
            background_compile: background,
            max_nodes,
            ..EngineOptions::default()
        }
    }

    #[test]
    fn idle_until_first_install() {
        let (events, _rx) = event_channel(16);
        let scheduler = Scheduler::new(&options(0, false, 8), events).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let report = scheduler.run_cycle(64);
        assert_eq!(report.generation, None);
    }

    #[test]
    fn inline_submit_installs_immediately() {
        let (events, rx) = event_channel(16);
        let scheduler = Scheduler::new(&options(0, false, 8), events.clone()).unwrap();
        let generation = scheduler.submit(plan(&[tone_cell(0)], &events)).unwrap();
        assert_eq!(generation, 1);
        assert_eq!(scheduler.state(), SchedulerState::Ready);
        assert_eq!(scheduler.run_cycle(64).generation, Some(1));
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::GraphInstalled { generation: 1, nodes: 1 }
        ));
    }

    #[test]
    fn failed_compile_keeps_previous_graph() {
        let (events, rx) = event_channel(16);
        let scheduler = Scheduler::new(&options(0, false, 1), events.clone()).unwrap();
        scheduler.submit(plan(&[tone_cell(0)], &events)).unwrap();
        let err = scheduler
            .submit(plan(&[tone_cell(1), tone_cell(2)], &events))
            .unwrap_err();
        assert!(matches!(err, GraphCompilationError::CapacityExceeded { .. }));
        assert_eq!(scheduler.generation(), Some(1));
        let _ = rx.try_recv();
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::CompileFailed { generation: 2, .. }
        ));
    }

    #[test]
    fn zero_frame_cycle_is_not_an_xrun() {
        let (events, rx) = event_channel(16);
        let scheduler = Scheduler::new(&options(0, false, 8), events.clone()).unwrap();
        scheduler.submit(plan(&[tone_cell(0)], &events)).unwrap();
        let _ = rx.try_recv();

        let report = scheduler.run_cycle(0);
        assert_eq!(report.xrun, None);
        assert_eq!(report.generation, Some(1));
        assert_eq!(scheduler.xruns(), 0);
        assert_eq!(scheduler.cycles(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn installed_cells_are_reachable_by_id() {
        let (events, _rx) = event_channel(16);
        let scheduler = Scheduler::new(&options(0, false, 8), events.clone()).unwrap();
        assert_eq!(scheduler.with_cell(NodeId(4), |cell| cell.id()), None);
        scheduler.submit(plan(&[tone_cell(4)], &events)).unwrap();
        assert_eq!(scheduler.with_cell(NodeId(4), |cell| cell.id()), Some(NodeId(4)));
        assert_eq!(scheduler.with_cell(NodeId(5), |cell| cell.id()), None);
    }

    #[test]
    fn background_compile_and_flush() {
        let (events, _rx) = event_channel(64);
        let scheduler = Scheduler::new(&options(2, true, 8), events.clone()).unwrap();
        for _ in 0..5 {
            scheduler.submit(plan(&[tone_cell(0), tone_cell(1)], &events)).unwrap();
        }
        scheduler.flush();
        assert_eq!(scheduler.generation(), Some(5));
        for _ in 0..10 {
            assert_eq!(scheduler.run_cycle(64).generation, Some(5));
        }
        assert_eq!(scheduler.cycles(), 10);
    }

    #[test]
    fn workers_shut_down_on_drop() {
        let (events, _rx) = event_channel(16);
        let scheduler = Scheduler::new(&options(3, true, 8), events).unwrap();
        assert_eq!(scheduler.worker_count(), 3);
        drop(scheduler);
    }
}
