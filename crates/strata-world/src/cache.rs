//! The per-world chunk cache: bounded residency, load deduplication,
//! and asynchronous write-back.
//!
//! A coordinate is resident as either a live column or a pending
//! write-back. Write-backs keep their source column at hand so a read
//! racing the in-flight write re-materializes the in-memory state
//! instead of waiting on (or re-reading) the disk. A write-back that
//! completes after its entry was replaced or re-materialized is
//! superseded: it must not clobber the newer state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info};

use strata_common::{ChunkCoords, WorldError, WorldResult};

use crate::chunk::{ChunkColumn, ChunkColumnData};
use crate::generation::ChunkGenerator;
use crate::loader::{LoadCallback, LoadCoordinator};
use crate::store::ChunkStore;
use crate::tasks::TaskPool;

/// Cache operation kinds reported to an [`ErrorSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    /// A chunk load (store read or generation)
    Load,
    /// A write-back of an evicted dirty chunk
    WriteBack,
}

/// Structured failure-reporting collaborator. The cache never throws;
/// failures reach callers through results and callbacks, and this sink.
pub trait ErrorSink: Send + Sync {
    /// Reports one failed cache operation.
    fn report(&self, coords: ChunkCoords, op: CacheOp, error: &WorldError);
}

/// Default sink that logs failures via `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, coords: ChunkCoords, op: CacheOp, error: &WorldError) {
        error!("{op:?} failed for chunk {coords}: {error}");
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum resident columns before the sweeper starts evicting
    pub max_resident: usize,
    /// Interval of the background sweep; `None` disables the sweeper
    /// thread (insert-triggered sweeps still run)
    pub sweep_interval: Option<Duration>,
    /// Worker threads for chunk generation
    pub generation_workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_resident: 512,
            sweep_interval: Some(Duration::from_secs(10)),
            generation_workers: 2,
        }
    }
}

/// Residency state of one coordinate.
enum Slot {
    /// A resident column handed out to callers.
    Live(Arc<ChunkColumn>),
    /// Evicted while dirty; a snapshot write is in flight. The source
    /// column stays here so reads re-materialize it rather than racing
    /// the write with a stale disk read.
    WriteBack {
        column: Arc<ChunkColumn>,
        ticket: u64,
    },
}

struct CacheEntry {
    slot: Slot,
    /// External holders that must not lose this entry to eviction
    pins: u32,
    /// Logical access stamp for the approximate-LRU sweep
    last_access: u64,
}

struct WriteBackDone {
    coords: ChunkCoords,
    ticket: u64,
    result: WorldResult<()>,
}

struct CacheInner {
    config: CacheConfig,
    store: Arc<ChunkStore>,
    generator: Arc<dyn ChunkGenerator>,
    /// Generation context; store IO runs on the store's own pool
    workers: TaskPool,
    entries: DashMap<ChunkCoords, CacheEntry, ahash::RandomState>,
    loader: LoadCoordinator,
    done_tx: Sender<WriteBackDone>,
    done_rx: Receiver<WriteBackDone>,
    clock: AtomicU64,
    next_ticket: AtomicU64,
    sink: Arc<dyn ErrorSink>,
}

struct SweeperHandle {
    stop: Sender<()>,
    thread: thread::JoinHandle<()>,
}

/// A memory-bounded cache of the chunk columns of one world.
///
/// Loads are deduplicated per coordinate, evicted dirty columns are
/// persisted asynchronously without ever serving stale data to readers,
/// and residency is bounded by an approximate-LRU sweep instead of a
/// host garbage collector.
pub struct ChunkCache {
    inner: Arc<CacheInner>,
    sweeper: Option<SweeperHandle>,
}

impl ChunkCache {
    /// Creates a cache over `store`, generating missing chunks with
    /// `generator`. Failures are logged through [`TracingSink`].
    #[must_use]
    pub fn new(
        config: CacheConfig,
        store: Arc<ChunkStore>,
        generator: Arc<dyn ChunkGenerator>,
    ) -> Self {
        Self::with_sink(config, store, generator, Arc::new(TracingSink))
    }

    /// Creates a cache reporting failures to `sink`.
    #[must_use]
    pub fn with_sink(
        config: CacheConfig,
        store: Arc<ChunkStore>,
        generator: Arc<dyn ChunkGenerator>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        let (done_tx, done_rx) = unbounded();
        let workers = TaskPool::new("chunk-gen", config.generation_workers);
        let inner = Arc::new(CacheInner {
            entries: DashMap::with_hasher(ahash::RandomState::new()),
            loader: LoadCoordinator::new(),
            done_tx,
            done_rx,
            clock: AtomicU64::new(0),
            next_ticket: AtomicU64::new(0),
            config,
            store,
            generator,
            workers,
            sink,
        });
        let sweeper = inner
            .config
            .sweep_interval
            .map(|interval| spawn_sweeper(&inner, interval));
        Self { inner, sweeper }
    }

    /// Returns a chunk column from the cache, or `None` if the
    /// coordinate is not resident.
    ///
    /// Applies write-backs that completed since the last cache
    /// operation, but performs no IO of its own and never blocks.
    #[must_use]
    pub fn get_cached(&self, coords: ChunkCoords) -> Option<Arc<ChunkColumn>> {
        self.inner.drain_completed();
        self.inner.lookup_live(coords)
    }

    /// Synchronously gets a chunk column, blocking on a miss until the
    /// (shared) load resolves.
    ///
    /// Use only when blocking is acceptable; prefer
    /// [`get_cached`](Self::get_cached) or [`get_async`](Self::get_async).
    pub fn get_sync(&self, coords: ChunkCoords) -> WorldResult<Arc<ChunkColumn>> {
        debug!("get_sync({coords})");
        self.inner.drain_completed();
        if let Some(column) = self.inner.lookup_live(coords) {
            return Ok(column);
        }
        let (tx, rx) = bounded(1);
        self.inner.request_load(
            coords,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        match rx.recv() {
            Ok(result) => result,
            Err(_) => Err(WorldError::LoadFailed(format!(
                "load for {coords} was abandoned"
            ))),
        }
    }

    /// Asynchronously gets a chunk column.
    ///
    /// A resident column is delivered inline; on a miss the callback
    /// runs from the context that resolved the load (store IO or a
    /// generation worker), never inline with this call.
    pub fn get_async(
        &self,
        coords: ChunkCoords,
        on_done: impl FnOnce(WorldResult<Arc<ChunkColumn>>) + Send + 'static,
    ) {
        debug!("get_async({coords})");
        self.inner.drain_completed();
        if let Some(column) = self.inner.lookup_live(coords) {
            on_done(Ok(column));
            return;
        }
        self.inner.request_load(coords, Box::new(on_done));
    }

    /// Marks a resident coordinate as pinned; pinned columns are never
    /// selected for eviction. Returns false if not resident.
    pub fn pin(&self, coords: ChunkCoords) -> bool {
        match self.inner.entries.get_mut(&coords) {
            Some(mut entry) => {
                entry.pins += 1;
                true
            }
            None => false,
        }
    }

    /// Releases one pin on a coordinate.
    pub fn unpin(&self, coords: ChunkCoords) {
        if let Some(mut entry) = self.inner.entries.get_mut(&coords) {
            entry.pins = entry.pins.saturating_sub(1);
        }
    }

    /// Number of resident coordinates (live or awaiting write-back).
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.inner.entries.len()
    }

    /// Runs one reclamation pass: applies completed write-backs, then
    /// evicts least-recently-used unpinned columns until the resident
    /// count is within budget.
    pub fn sweep(&self) {
        self.inner.sweep();
    }

    /// Synchronously persists every dirty resident column without
    /// evicting anything. Returns the number of chunks saved.
    pub fn flush_all(&self) -> usize {
        self.inner.drain_completed();
        self.inner.flush_all()
    }
}

impl Drop for ChunkCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            let _ = handle.stop.send(());
            let _ = handle.thread.join();
        }
    }
}

fn spawn_sweeper(inner: &Arc<CacheInner>, interval: Duration) -> SweeperHandle {
    let (stop_tx, stop_rx) = bounded(1);
    let weak: Weak<CacheInner> = Arc::downgrade(inner);
    let thread = thread::Builder::new()
        .name("chunk-sweeper".into())
        .spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.sweep();
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
            debug!("Chunk sweeper stopped");
        })
        .expect("failed to spawn chunk sweeper");
    SweeperHandle {
        stop: stop_tx,
        thread,
    }
}

impl CacheInner {
    /// Looks up a resident coordinate, re-materializing a pending
    /// write-back into a live entry.
    fn lookup_live(&self, coords: ChunkCoords) -> Option<Arc<ChunkColumn>> {
        let mut entry = self.entries.get_mut(&coords)?;
        entry.last_access = self.clock.fetch_add(1, Ordering::Relaxed);
        match &entry.slot {
            Slot::Live(column) => Some(Arc::clone(column)),
            Slot::WriteBack { column, .. } => {
                debug!("Chunk {coords} re-materialized during write-back");
                let column = Arc::clone(column);
                entry.slot = Slot::Live(Arc::clone(&column));
                Some(column)
            }
        }
    }

    /// Attaches a waiter for `coords`, starting the load if none is in
    /// flight.
    fn request_load(self: &Arc<Self>, coords: ChunkCoords, waiter: LoadCallback) {
        if !self.loader.enlist(coords, waiter) {
            return;
        }
        // The ticket is ours. A load that finished between the caller's
        // miss and enlist installed its entry before closing its ticket,
        // so re-check the index before touching the store.
        if let Some(column) = self.lookup_live(coords) {
            let inner = Arc::clone(self);
            self.workers
                .execute(move || inner.loader.resolve(coords, Ok(column)));
            return;
        }
        if self.store.exists(coords) {
            debug!("Chunk {coords} is on disk, reading");
            let inner = Arc::clone(self);
            self.store
                .read_async(coords, move |result| inner.finish_read(coords, result));
        } else {
            debug!("Chunk {coords} not on disk, generating");
            self.start_generation(coords);
        }
    }

    fn start_generation(self: &Arc<Self>, coords: ChunkCoords) {
        let inner = Arc::clone(self);
        self.workers.execute(move || {
            let result = inner.generator.generate(coords);
            inner.deliver_load(coords, result);
        });
    }

    fn finish_read(self: &Arc<Self>, coords: ChunkCoords, result: WorldResult<ChunkColumnData>) {
        match result {
            // the file vanished between the exists check and the read
            Err(WorldError::ChunkNotFound { .. }) => {
                debug!("Chunk {coords} disappeared from disk, generating instead");
                self.start_generation(coords);
            }
            other => self.deliver_load(coords, other),
        }
    }

    /// Installs a load outcome and fans it out to every waiter.
    fn deliver_load(self: &Arc<Self>, coords: ChunkCoords, result: WorldResult<ChunkColumnData>) {
        match result {
            Ok(data) => {
                let column = Arc::new(ChunkColumn::new(coords, data));
                self.install_live(coords, Arc::clone(&column));
                self.loader.resolve(coords, Ok(column));
                self.maybe_sweep();
            }
            Err(err) => {
                self.sink.report(coords, CacheOp::Load, &err);
                self.loader.resolve(coords, Err(err));
            }
        }
    }

    fn install_live(&self, coords: ChunkCoords, column: Arc<ChunkColumn>) {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            coords,
            CacheEntry {
                slot: Slot::Live(column),
                pins: 0,
                last_access: stamp,
            },
        );
    }

    /// Applies write-backs that completed since the last poll. Cost is
    /// proportional to the completions, never to the index size.
    fn drain_completed(&self) {
        while let Ok(done) = self.done_rx.try_recv() {
            self.finish_write_back(done);
        }
    }

    fn finish_write_back(&self, done: WriteBackDone) {
        let WriteBackDone {
            coords,
            ticket,
            result,
        } = done;
        if let Err(err) = &result {
            self.sink.report(coords, CacheOp::WriteBack, err);
        }
        match self.entries.entry(coords) {
            Entry::Occupied(mut occupied) => {
                let keep = match &occupied.get().slot {
                    Slot::WriteBack {
                        column,
                        ticket: current,
                    } if *current == ticket => {
                        if column.is_dirty() || occupied.get().pins > 0 {
                            Some(Arc::clone(column))
                        } else {
                            None
                        }
                    }
                    _ => {
                        // a newer live column won the race; this
                        // completion must not clobber it
                        debug!("Write-back for {coords} superseded");
                        return;
                    }
                };
                match keep {
                    Some(column) => {
                        debug!("Chunk {coords} changed during write-back, keeping it live");
                        occupied.get_mut().slot = Slot::Live(column);
                    }
                    None => {
                        occupied.remove();
                        if result.is_ok() {
                            debug!("Chunk {coords} evicted after write-back");
                        }
                    }
                }
            }
            Entry::Vacant(_) => {
                debug!("Write-back for {coords} finished after entry removal");
            }
        }
    }

    fn maybe_sweep(&self) {
        if self.entries.len() > self.config.max_resident {
            self.sweep();
        }
    }

    fn sweep(&self) {
        self.drain_completed();
        let over = self
            .entries
            .len()
            .saturating_sub(self.config.max_resident);
        if over == 0 {
            return;
        }
        let mut candidates: Vec<(ChunkCoords, u64)> = self
            .entries
            .iter()
            .filter(|e| e.value().pins == 0 && matches!(&e.value().slot, Slot::Live(_)))
            .map(|e| (*e.key(), e.value().last_access))
            .collect();
        candidates.sort_unstable_by_key(|&(_, stamp)| stamp);
        candidates.truncate(over);

        let mut write_backs = Vec::new();
        let mut dropped = 0_usize;
        for (coords, stamp) in candidates {
            let Entry::Occupied(mut occupied) = self.entries.entry(coords) else {
                continue;
            };
            // skip entries touched or pinned since the scan
            if occupied.get().pins != 0 || occupied.get().last_access != stamp {
                continue;
            }
            let column = match &occupied.get().slot {
                Slot::Live(column) => Arc::clone(column),
                Slot::WriteBack { .. } => continue,
            };
            match column.snapshot_for_save() {
                Some(snapshot) => {
                    let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                    occupied.get_mut().slot = Slot::WriteBack { column, ticket };
                    write_backs.push((coords, ticket, snapshot));
                }
                None => {
                    // clean columns drop without touching the store
                    occupied.remove();
                    dropped += 1;
                }
            }
        }
        if dropped > 0 || !write_backs.is_empty() {
            debug!(
                "Sweep dropped {dropped} clean and scheduled {} dirty columns",
                write_backs.len()
            );
        }
        // issue the IO outside the entry locks
        for (coords, ticket, snapshot) in write_backs {
            let done = self.done_tx.clone();
            self.store.write_async(coords, snapshot, move |result| {
                let _ = done.send(WriteBackDone {
                    coords,
                    ticket,
                    result,
                });
            });
        }
    }

    fn flush_all(&self) -> usize {
        let live: Vec<(ChunkCoords, Arc<ChunkColumn>)> = self
            .entries
            .iter()
            .filter_map(|e| match &e.value().slot {
                Slot::Live(column) => Some((*e.key(), Arc::clone(column))),
                Slot::WriteBack { .. } => None,
            })
            .collect();
        let mut saved = 0;
        for (coords, column) in live {
            let Some(snapshot) = column.snapshot_for_save() else {
                continue;
            };
            match self.store.write_sync(coords, &snapshot) {
                Ok(()) => saved += 1,
                Err(err) => {
                    // the data is still in memory; keep it marked for
                    // the next attempt
                    column.data_mut().mark_dirty();
                    self.sink.report(coords, CacheOp::WriteBack, &err);
                }
            }
        }
        info!("Saved {saved} chunks");
        saved
    }
}
