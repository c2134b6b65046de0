//! Worker pool for intra-cycle graph parallelism.
//!
//! One producer (the audio thread) kicks the trigger nodes into a shared
//! ready queue; N workers plus the audio thread itself drain it. A node
//! becomes ready when its last predecessor finishes, so independent
//! subgraphs run concurrently while the topological contract holds.

use crate::graph::{GraphCtx, ProcessingGraph};
use crate::time::TimeInfo;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// One cycle's worth of scheduling state, shared with the workers.
pub struct CycleRun {
    graph: Arc<ProcessingGraph>,
    ctx: GraphCtx,
    time: TimeInfo,
    /// Unmet predecessor count per node.
    remaining: Vec<AtomicU32>,
    ready_tx: Sender<usize>,
    ready_rx: Receiver<usize>,
    processed: AtomicUsize,
}

impl CycleRun {
    fn new(graph: Arc<ProcessingGraph>, ctx: GraphCtx, time: TimeInfo) -> Arc<Self> {
        let (ready_tx, ready_rx) = unbounded();
        let remaining: Vec<AtomicU32> = graph
            .nodes()
            .iter()
            .map(|n| AtomicU32::new(n.predecessor_count() as u32))
            .collect();
        let run = Arc::new(Self {
            graph,
            ctx,
            time,
            remaining,
            ready_tx,
            ready_rx,
            processed: AtomicUsize::new(0),
        });
        for &idx in run.graph.trigger_nodes() {
            let _ = run.ready_tx.send(idx);
        }
        run
    }

    /// Drain ready nodes until the whole graph has run.
    fn work(&self) {
        let total = self.graph.node_count();
        loop {
            if self.processed.load(Ordering::Acquire) >= total {
                return;
            }
            match self.ready_rx.try_recv() {
                Ok(idx) => {
                    self.graph.process_node(idx, &self.ctx, self.time);
                    self.processed.fetch_add(1, Ordering::AcqRel);
                    for &succ in self.graph.successors_of(idx) {
                        if self.remaining[succ].fetch_sub(1, Ordering::AcqRel) == 1 {
                            let _ = self.ready_tx.send(succ);
                        }
                    }
                }
                Err(_) => std::hint::spin_loop(),
            }
        }
    }
}

enum WorkerMsg {
    Cycle(Arc<CycleRun>),
    Shutdown,
}

/// Persistent worker pool.
pub struct GraphScheduler {
    workers: Vec<JoinHandle<()>>,
    work_tx: Sender<WorkerMsg>,
}

impl GraphScheduler {
    /// Spawn `count` workers (0 disables the pool; `run_cycle` then runs
    /// everything on the calling thread).
    pub fn new(count: usize) -> Self {
        let (work_tx, work_rx) = unbounded::<WorkerMsg>();
        let workers = (0..count)
            .map(|i| {
                let rx: Receiver<WorkerMsg> = work_rx.clone();
                std::thread::Builder::new()
                    .name(format!("ostinato-graph-{i}"))
                    .spawn(move || {
                        while let Ok(msg) = rx.recv() {
                            match msg {
                                WorkerMsg::Cycle(run) => run.work(),
                                WorkerMsg::Shutdown => break,
                            }
                        }
                    })
                    .expect("spawn graph worker")
            })
            .collect();
        Self { workers, work_tx }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Run one window of the graph, fanning out to the pool.
    ///
    /// Blocks (spinning, never parking) until every node has processed.
    pub fn run_cycle(&self, graph: &Arc<ProcessingGraph>, ctx: GraphCtx, time: TimeInfo) {
        if self.workers.is_empty() {
            graph.run_single_threaded(&ctx, time);
            return;
        }
        let run = CycleRun::new(graph.clone(), ctx, time);
        for _ in 0..self.workers.len() {
            let _ = self.work_tx.send(WorkerMsg::Cycle(run.clone()));
        }
        run.work();
    }
}

impl Drop for GraphScheduler {
    fn drop(&mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.work_tx.send(WorkerMsg::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
