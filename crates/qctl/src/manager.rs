//! Queue manager: per-thread activation stacks over a shared queue pool.
//!
//! Every thread sees its own stack of activated queues; the top of that stack
//! is the thread's current queue. A thread with an empty stack falls back to
//! the process default queue, which is shared by all threads and can be
//! replaced with [`QueueManager::reset_global_default`].
//!
//! The pool (and with it device enumeration) is built on first use. Each
//! thread's stack sits behind its own mutex, contended only when a manager
//! is dropped while other threads still hold activated queues; the default
//! queue sits behind a `RwLock`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};

use tracing::{debug, info, warn};

use crate::backend::{Backend, Category, DeviceType};
use crate::config::{PlatformConfig, PlatformKind};
use crate::context::Context;
use crate::device::Device;
use crate::error::{PlatformError, QueueError, Result};
use crate::platform::Platform;
use crate::pool::QueuePool;
use crate::queue::Queue;
use crate::reference::ReferencePlatform;
use crate::registry::DeviceRegistry;

/// Categories searched, in order, for the process default queue. The default
/// is device 0 of the first entry that has any device.
pub const DEFAULT_CATEGORY_ORDER: [Category; 4] = [
    Category::new(Backend::OpenCl, DeviceType::Cpu),
    Category::new(Backend::OpenCl, DeviceType::Gpu),
    Category::new(Backend::LevelZero, DeviceType::Gpu),
    Category::new(Backend::Host, DeviceType::Host),
];

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL: OnceLock<QueueManager> = OnceLock::new();

type Stack = Arc<Mutex<Vec<Queue>>>;

thread_local! {
    /// Non-empty activation stacks of the current thread, one per manager.
    static ACTIVATED: RefCell<HashMap<u64, Stack>> = RefCell::new(HashMap::new());
}

/// Owner of the queue pool and of every thread's activation stack.
pub struct QueueManager {
    id: u64,
    platform: Arc<dyn Platform>,
    pool: OnceLock<QueuePool>,
    default_queue: RwLock<Option<Queue>>,
    /// Every thread's stack for this manager, so a drop can release queues
    /// still activated on threads that outlive it.
    stacks: Mutex<Vec<Weak<Mutex<Vec<Queue>>>>>,
}

impl QueueManager {
    /// A manager over `platform`. Nothing is enumerated until first use.
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);
        debug!(manager = id, platform = platform.name(), "queue manager created");
        Self {
            id,
            platform,
            pool: OnceLock::new(),
            default_queue: RwLock::new(None),
            stacks: Mutex::new(Vec::new()),
        }
    }

    /// A manager over the platform `config` selects.
    pub fn from_config(config: &PlatformConfig) -> std::result::Result<Self, PlatformError> {
        Ok(Self::new(platform_for(config)?))
    }

    /// The process-wide manager.
    ///
    /// Built on first call from [`PlatformConfig::from_env`] unless one was
    /// installed earlier. An unusable configuration is logged and replaced by
    /// the default reference platform.
    pub fn global() -> &'static QueueManager {
        GLOBAL.get_or_init(|| {
            let platform = PlatformConfig::from_env()
                .map_err(|e| e.to_string())
                .and_then(|config| platform_for(&config).map_err(|e| e.to_string()));
            match platform {
                Ok(platform) => QueueManager::new(platform),
                Err(reason) => {
                    warn!(%reason, "falling back to the default reference platform");
                    QueueManager::new(Arc::new(ReferencePlatform::from_config(
                        &PlatformConfig::default(),
                    )))
                }
            }
        })
    }

    /// Install `manager` as the process-wide manager.
    ///
    /// Returns the manager back if [`QueueManager::global`] was already
    /// initialized.
    pub fn install_global(manager: QueueManager) -> std::result::Result<(), QueueManager> {
        GLOBAL.set(manager)
    }

    /// The queue pool, enumerating devices on first call.
    pub fn pool(&self) -> &QueuePool {
        self.pool.get_or_init(|| {
            debug!(manager = self.id, "initializing queue pool");
            QueuePool::new(Arc::clone(&self.platform))
        })
    }

    pub fn registry(&self) -> &DeviceRegistry {
        self.pool().registry()
    }

    pub fn platform_name(&self) -> &str {
        self.platform.name()
    }

    // ── Pool pass-through ───────────────────────────────────────────────────

    /// The `index`-th default queue of (backend, device type).
    pub fn get_queue(
        &self,
        backend: Backend,
        device_type: DeviceType,
        index: usize,
    ) -> Result<Queue> {
        self.pool()
            .queue(backend, device_type, index)
            .ok_or_else(|| QueueError::not_found(backend, device_type, index))
    }

    pub fn num_queues(&self, backend: Backend, device_type: DeviceType) -> usize {
        self.pool().num_queues(backend, device_type)
    }

    /// A fresh queue bound to exactly `context` and `device`, independent of
    /// pool and stack state.
    pub fn queue_from_context_and_device(
        &self,
        context: &Context,
        device: &Device,
    ) -> Result<Queue> {
        self.pool().queue_from_context_and_device(context, device)
    }

    // ── Activation stack ────────────────────────────────────────────────────

    /// Activate the `index`-th queue of (backend, device type) on the calling
    /// thread and return a copy of it.
    pub fn push_queue(
        &self,
        backend: Backend,
        device_type: DeviceType,
        index: usize,
    ) -> Result<Queue> {
        let queue = self.get_queue(backend, device_type, index)?;
        let depth = {
            let stack = self.stack_or_insert();
            let mut stack = lock(&stack);
            stack.push(queue.clone());
            stack.len()
        };
        debug!(
            manager = self.id,
            queue = %queue.native(),
            %backend,
            %device_type,
            index,
            depth,
            "pushed queue"
        );
        Ok(queue)
    }

    /// Deactivate the calling thread's current queue.
    ///
    /// Only the stack's copy is dropped; copies handed out by
    /// [`push_queue`](Self::push_queue) stay valid. Fails with
    /// [`QueueError::EmptyStack`] and changes nothing if the stack is empty.
    pub fn pop_queue(&self) -> Result<()> {
        let popped = self.update_stack(Vec::pop).flatten();
        match popped {
            Some(queue) => {
                debug!(manager = self.id, queue = %queue.native(), "popped queue");
                Ok(())
            }
            None => Err(QueueError::EmptyStack),
        }
    }

    /// The calling thread's current queue: the top of its stack, or the
    /// process default when the stack is empty.
    pub fn current_queue(&self) -> Result<Queue> {
        if let Some(top) = self.read_stack(|stack| stack.last().cloned()) {
            return Ok(top);
        }
        self.default_queue()
    }

    /// Whether `queue` denotes the same device and context as the current
    /// queue.
    pub fn is_current_queue(&self, queue: &Queue) -> bool {
        self.current_queue().is_ok_and(|current| current == *queue)
    }

    /// Depth of the calling thread's stack.
    pub fn num_activated_queues(&self) -> usize {
        self.read_stack(<[Queue]>::len)
    }

    /// Push a queue for the lifetime of the returned guard.
    ///
    /// Dropping the guard restores the stack to the depth it had before the
    /// push, discarding anything pushed above it in the meantime.
    pub fn activate(
        &self,
        backend: Backend,
        device_type: DeviceType,
        index: usize,
    ) -> Result<ActivatedQueue<'_>> {
        let depth = self.num_activated_queues();
        let queue = self.push_queue(backend, device_type, index)?;
        Ok(ActivatedQueue { manager: self, queue, depth, _not_send: PhantomData })
    }

    // ── Process default ─────────────────────────────────────────────────────

    /// The process default queue, selecting it on first call.
    pub(crate) fn default_queue(&self) -> Result<Queue> {
        {
            let guard =
                self.default_queue.read().map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
            if let Some(queue) = guard.as_ref() {
                return Ok(queue.clone());
            }
        }

        let mut guard =
            self.default_queue.write().map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
        if let Some(queue) = guard.as_ref() {
            return Ok(queue.clone());
        }
        let pool = self.pool();
        let (category, queue) = DEFAULT_CATEGORY_ORDER
            .iter()
            .find_map(|c| pool.queue(c.backend, c.device_type, 0).map(|q| (*c, q)))
            .ok_or_else(|| {
                let first = DEFAULT_CATEGORY_ORDER[0];
                QueueError::not_found(first.backend, first.device_type, 0)
            })?;
        info!(
            manager = self.id,
            %category,
            device = queue.device().name(),
            "selected default queue"
        );
        *guard = Some(queue.clone());
        Ok(queue)
    }

    /// Replace the process default with a fresh queue on device 0 of
    /// `device_type`.
    ///
    /// Backends are tried in [`DEFAULT_CATEGORY_ORDER`] first, then in
    /// declaration order. On failure the previous default stays in place.
    pub fn reset_global_default(&self, device_type: DeviceType) -> Result<Queue> {
        let registry = self.registry();
        let preferred = DEFAULT_CATEGORY_ORDER
            .iter()
            .filter(|c| c.device_type == device_type)
            .map(|c| c.backend);
        let device = preferred
            .chain(Backend::ALL)
            .find_map(|backend| registry.device(backend, device_type, 0))
            .ok_or_else(|| {
                QueueError::not_found(DEFAULT_CATEGORY_ORDER[0].backend, device_type, 0)
            })?;
        self.install_default(&device)
    }

    /// Replace the process default with a fresh queue on the `index`-th
    /// device of (backend, device type).
    pub fn reset_global_default_to(
        &self,
        backend: Backend,
        device_type: DeviceType,
        index: usize,
    ) -> Result<Queue> {
        let device = self
            .registry()
            .device(backend, device_type, index)
            .ok_or_else(|| QueueError::not_found(backend, device_type, index))?;
        self.install_default(&device)
    }

    fn install_default(&self, device: &Device) -> Result<Queue> {
        let queue = self.pool().create_queue_for_device(device)?;
        let previous = {
            let mut guard =
                self.default_queue.write().map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
            guard.replace(queue.clone())
        };
        info!(
            manager = self.id,
            category = %queue.category(),
            device = device.name(),
            replaced = previous.is_some(),
            "reset default queue"
        );
        Ok(queue)
    }

    // ── Thread-local storage ────────────────────────────────────────────────

    /// The calling thread's stack, if it has activated anything.
    fn stack(&self) -> Option<Stack> {
        ACTIVATED.try_with(|stacks| stacks.borrow().get(&self.id).cloned()).ok().flatten()
    }

    fn read_stack<R>(&self, f: impl FnOnce(&[Queue]) -> R) -> R {
        match self.stack() {
            Some(stack) => f(&lock(&stack)),
            None => f(&[]),
        }
    }

    fn stack_or_insert(&self) -> Stack {
        ACTIVATED.with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            if let Some(stack) = stacks.get(&self.id) {
                return Arc::clone(stack);
            }
            let stack = Stack::default();
            stacks.insert(self.id, Arc::clone(&stack));
            let mut registered = self.stacks.lock().unwrap_or_else(PoisonError::into_inner);
            registered.retain(|w| w.strong_count() > 0);
            registered.push(Arc::downgrade(&stack));
            stack
        })
    }

    /// Apply `f` to the calling thread's stack, forgetting the stack once it
    /// is empty. `None` if the thread has no stack.
    fn update_stack<R>(&self, f: impl FnOnce(&mut Vec<Queue>) -> R) -> Option<R> {
        let stack = self.stack()?;
        let (result, empty) = {
            let mut stack = lock(&stack);
            let result = f(&mut stack);
            (result, stack.is_empty())
        };
        if empty {
            self.forget_stack();
        }
        Some(result)
    }

    fn forget_stack(&self) {
        let removed = ACTIVATED
            .try_with(|stacks| stacks.try_borrow_mut().ok().and_then(|mut s| s.remove(&self.id)))
            .ok()
            .flatten();
        drop(removed);
    }

    fn truncate_stack(&self, depth: usize) {
        let discarded = self
            .update_stack(|stack| {
                if stack.len() > depth { stack.split_off(depth) } else { Vec::new() }
            })
            .unwrap_or_default();
        if !discarded.is_empty() {
            debug!(manager = self.id, depth, discarded = discarded.len(), "restored stack depth");
        }
    }
}

impl Drop for QueueManager {
    // Other threads keep an empty entry for this manager until they exit; the
    // queues in it are released here.
    fn drop(&mut self) {
        let stacks =
            std::mem::take(self.stacks.get_mut().unwrap_or_else(PoisonError::into_inner));
        let mut released = 0;
        for stack in stacks.iter().filter_map(Weak::upgrade) {
            let queues = std::mem::take(&mut *lock(&stack));
            released += queues.len();
        }
        if released > 0 {
            debug!(manager = self.id, released, "released queues still activated at drop");
        }
        self.forget_stack();
    }
}

fn lock(stack: &Mutex<Vec<Queue>>) -> MutexGuard<'_, Vec<Queue>> {
    stack.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("id", &self.id)
            .field("platform", &self.platform.name())
            .field("pool", &self.pool.get())
            .finish()
    }
}

fn platform_for(config: &PlatformConfig) -> std::result::Result<Arc<dyn Platform>, PlatformError> {
    match config.platform {
        PlatformKind::Reference => Ok(Arc::new(ReferencePlatform::from_config(config))),
        #[cfg(feature = "opencl")]
        PlatformKind::OpenCl => Ok(Arc::new(crate::opencl::OpenClPlatform::new()?)),
        #[cfg(not(feature = "opencl"))]
        PlatformKind::OpenCl => {
            Err(PlatformError::Unavailable("built without the `opencl` feature".into()))
        }
    }
}

/// A queue activated for a scope; see [`QueueManager::activate`].
///
/// Tied to the thread that created it.
#[must_use = "the queue is deactivated as soon as the guard is dropped"]
pub struct ActivatedQueue<'a> {
    manager: &'a QueueManager,
    queue: Queue,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ActivatedQueue<'_> {
    pub fn queue(&self) -> &Queue {
        &self.queue
    }
}

impl Deref for ActivatedQueue<'_> {
    type Target = Queue;

    fn deref(&self) -> &Queue {
        &self.queue
    }
}

impl Drop for ActivatedQueue<'_> {
    fn drop(&mut self) {
        self.manager.truncate_stack(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSpec;

    fn manager(devices: Vec<DeviceSpec>) -> (Arc<ReferencePlatform>, QueueManager) {
        let config = PlatformConfig { probe_host: true, devices, ..PlatformConfig::default() };
        let reference = Arc::new(ReferencePlatform::from_config(&config));
        let manager = QueueManager::new(reference.clone());
        (reference, manager)
    }

    fn cpu_and_gpu() -> (Arc<ReferencePlatform>, QueueManager) {
        manager(vec![
            DeviceSpec::new(Backend::OpenCl, DeviceType::Cpu).with_count(2),
            DeviceSpec::new(Backend::OpenCl, DeviceType::Gpu),
        ])
    }

    #[test]
    fn enumeration_is_deferred_until_first_use() {
        let (reference, mgr) = cpu_and_gpu();
        assert!(mgr.pool.get().is_none());
        assert_eq!(mgr.num_activated_queues(), 0);
        assert!(mgr.pool.get().is_none());
        mgr.current_queue().unwrap();
        assert!(mgr.pool.get().is_some());
        assert!(reference.live_queues() > 0);
    }

    #[test]
    fn default_follows_category_order() {
        let (_, mgr) = cpu_and_gpu();
        let current = mgr.current_queue().unwrap();
        assert_eq!(current.category(), Category::new(Backend::OpenCl, DeviceType::Cpu));
        assert!(current.same_handle(&mgr.get_queue(Backend::OpenCl, DeviceType::Cpu, 0).unwrap()));

        let (_, host_only) = manager(vec![]);
        assert!(host_only.current_queue().unwrap().device().is_host());
    }

    #[test]
    fn no_devices_means_no_default() {
        let mgr = QueueManager::new(Arc::new(ReferencePlatform::with_devices(vec![])));
        assert!(mgr.current_queue().unwrap_err().is_not_found());

        let (_, other) = cpu_and_gpu();
        assert!(!mgr.is_current_queue(&other.current_queue().unwrap()));
    }

    #[test]
    fn push_pop_is_lifo() {
        let (_, mgr) = cpu_and_gpu();
        let before = mgr.current_queue().unwrap();

        let gpu = mgr.push_queue(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
        let cpu1 = mgr.push_queue(Backend::OpenCl, DeviceType::Cpu, 1).unwrap();
        assert_eq!(mgr.num_activated_queues(), 2);
        assert!(mgr.is_current_queue(&cpu1));

        mgr.pop_queue().unwrap();
        assert!(mgr.is_current_queue(&gpu));
        mgr.pop_queue().unwrap();
        assert_eq!(mgr.current_queue().unwrap(), before);
        assert_eq!(mgr.pop_queue(), Err(QueueError::EmptyStack));
        assert_eq!(mgr.num_activated_queues(), 0);
    }

    #[test]
    fn popped_copy_stays_usable() {
        let (reference, mgr) = cpu_and_gpu();
        let gpu = mgr.push_queue(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
        let live = reference.live_queues();
        mgr.pop_queue().unwrap();
        assert_eq!(reference.live_queues(), live);
        assert!(gpu.context().contains(gpu.device()));
    }

    #[test]
    fn unknown_triple_is_not_found_and_leaves_stack_alone() {
        let (_, mgr) = cpu_and_gpu();
        let err = mgr.push_queue(Backend::LevelZero, DeviceType::Gpu, 0).unwrap_err();
        assert!(err.is_not_found());
        assert!(mgr.push_queue(Backend::OpenCl, DeviceType::Cpu, 2).is_err());
        assert_eq!(mgr.num_activated_queues(), 0);
    }

    #[test]
    fn guard_restores_depth() {
        let (_, mgr) = cpu_and_gpu();
        mgr.push_queue(Backend::OpenCl, DeviceType::Cpu, 0).unwrap();
        {
            let active = mgr.activate(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
            assert!(mgr.is_current_queue(&active));
            mgr.push_queue(Backend::OpenCl, DeviceType::Cpu, 1).unwrap();
            assert_eq!(mgr.num_activated_queues(), 3);
        }
        assert_eq!(mgr.num_activated_queues(), 1);
        assert_eq!(
            mgr.current_queue().unwrap().category(),
            Category::new(Backend::OpenCl, DeviceType::Cpu)
        );
    }

    #[test]
    fn managers_keep_separate_stacks() {
        let (_, a) = cpu_and_gpu();
        let (_, b) = cpu_and_gpu();
        a.push_queue(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
        assert_eq!(a.num_activated_queues(), 1);
        assert_eq!(b.num_activated_queues(), 0);
    }

    #[test]
    fn reset_default_swaps_for_every_empty_stack() {
        let (_, mgr) = cpu_and_gpu();
        let old = mgr.current_queue().unwrap();
        let new = mgr.reset_global_default(DeviceType::Gpu).unwrap();
        assert!(new.device().is_gpu());
        assert!(mgr.is_current_queue(&new));
        assert!(!mgr.is_current_queue(&old));

        let seen = std::thread::scope(|s| s.spawn(|| mgr.current_queue().unwrap()).join().unwrap());
        assert!(seen.same_handle(&new));
    }

    #[test]
    fn failed_reset_keeps_previous_default() {
        let (_, mgr) = cpu_and_gpu();
        let old = mgr.current_queue().unwrap();
        assert!(mgr.reset_global_default(DeviceType::Accelerator).unwrap_err().is_not_found());
        assert!(mgr.reset_global_default_to(Backend::OpenCl, DeviceType::Cpu, 9).is_err());
        assert!(mgr.current_queue().unwrap().same_handle(&old));
    }

    #[test]
    fn reset_to_explicit_device() {
        let (_, mgr) = cpu_and_gpu();
        let q = mgr.reset_global_default_to(Backend::OpenCl, DeviceType::Cpu, 1).unwrap();
        let device = mgr.registry().device(Backend::OpenCl, DeviceType::Cpu, 1).unwrap();
        assert_eq!(q.device(), &device);
        assert!(mgr.is_current_queue(&q));
    }

    #[test]
    fn dropping_the_manager_releases_everything() {
        let (reference, mgr) = cpu_and_gpu();
        mgr.push_queue(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
        mgr.reset_global_default(DeviceType::Host).unwrap();
        assert!(reference.live_queues() > 0);
        drop(mgr);
        assert_eq!(reference.live_queues(), 0);
        assert_eq!(reference.live_contexts(), 0);
    }

    #[test]
    fn reads_do_not_create_a_stack() {
        let (_, mgr) = cpu_and_gpu();
        mgr.num_activated_queues();
        mgr.current_queue().unwrap();
        assert!(mgr.stack().is_none());

        mgr.push_queue(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
        assert!(mgr.stack().is_some());
        mgr.pop_queue().unwrap();
        assert!(mgr.stack().is_none());

        drop(mgr.activate(Backend::OpenCl, DeviceType::Cpu, 0).unwrap());
        assert!(mgr.stack().is_none());
    }

    #[test]
    fn dropping_the_manager_releases_queues_of_live_threads() {
        use std::sync::mpsc;

        let (reference, mgr) = cpu_and_gpu();
        let mgr = Arc::new(mgr);
        let (pushed_tx, pushed_rx) = mpsc::channel();
        let (exit_tx, exit_rx) = mpsc::channel::<()>();

        let worker = {
            let mgr = Arc::clone(&mgr);
            std::thread::spawn(move || {
                mgr.push_queue(Backend::OpenCl, DeviceType::Gpu, 0).unwrap();
                drop(mgr);
                pushed_tx.send(()).unwrap();
                exit_rx.recv().unwrap();
            })
        };

        pushed_rx.recv().unwrap();
        assert!(reference.live_queues() > 0);
        drop(Arc::into_inner(mgr).unwrap());
        assert_eq!(reference.live_queues(), 0);
        assert_eq!(reference.live_contexts(), 0);

        exit_tx.send(()).unwrap();
        worker.join().unwrap();
    }
}
