//! Exclusive leases over a fixed set of engine slots.
//!
//! Every slot is its own mutex; a per-class semaphore counts the unlocked
//! slots so waiting acquirers park instead of polling. Alongside the
//! semaphore each class keeps the indices of its unlocked slots. A lease
//! unlocks its slot, returns the index, then hands the permit back, so a
//! permit holder always pops an index whose slot is free.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::OracleError;
use crate::oracle::{EngineSpec, Oracle, OracleLauncher, ResourceClass};
use crate::score::EvaluationValue;

struct Slot<O> {
    id: usize,
    spec: EngineSpec,
    /// Started on first use; dropped again when the process dies
    oracle: Option<O>,
}

type FreeList = Arc<StdMutex<Vec<usize>>>;

struct ClassPool<O> {
    slots: Vec<Arc<Mutex<Slot<O>>>>,
    /// Positions in `slots` that no lease holds
    unlocked: FreeList,
    free: Arc<Semaphore>,
}

pub struct ResourceArbiter<L: OracleLauncher> {
    launcher: Arc<L>,
    pools: BTreeMap<ResourceClass, ClassPool<L::Oracle>>,
}

impl<L: OracleLauncher> ResourceArbiter<L> {
    pub fn new(launcher: L, specs: Vec<EngineSpec>) -> Self {
        let mut grouped: BTreeMap<ResourceClass, Vec<Arc<Mutex<Slot<L::Oracle>>>>> =
            BTreeMap::new();
        for (id, spec) in specs.into_iter().enumerate() {
            grouped.entry(spec.class).or_default().push(Arc::new(Mutex::new(Slot {
                id,
                spec,
                oracle: None,
            })));
        }

        let pools = grouped
            .into_iter()
            .map(|(class, slots)| {
                let free = Arc::new(Semaphore::new(slots.len()));
                let unlocked = Arc::new(StdMutex::new((0..slots.len()).rev().collect()));
                (class, ClassPool { slots, unlocked, free })
            })
            .collect();

        Self {
            launcher: Arc::new(launcher),
            pools,
        }
    }

    /// Number of slots registered for `class`.
    pub fn capacity(&self, class: ResourceClass) -> usize {
        self.pools.get(&class).map_or(0, |pool| pool.slots.len())
    }

    /// Number of currently unleased slots for `class`.
    pub fn available(&self, class: ResourceClass) -> usize {
        self.pools
            .get(&class)
            .map_or(0, |pool| pool.free.available_permits())
    }

    /// Lease a free slot of `class` without waiting.
    pub fn try_acquire(&self, class: ResourceClass) -> Option<OracleLease<L>> {
        let pool = self.pools.get(&class)?;
        let permit = pool.free.clone().try_acquire_owned().ok()?;
        self.claim(pool, permit)
    }

    /// Lease a slot of `class`, waiting until one is released.
    /// Returns `None` only when no slot of that class exists.
    pub async fn acquire(&self, class: ResourceClass) -> Option<OracleLease<L>> {
        let pool = self.pools.get(&class)?;
        let permit = pool.free.clone().acquire_owned().await.ok()?;
        self.claim(pool, permit)
    }

    /// Try each class in order without waiting, then wait on the last one.
    pub async fn acquire_preferring(&self, order: &[ResourceClass]) -> Option<OracleLease<L>> {
        for class in order {
            if let Some(lease) = self.try_acquire(*class) {
                return Some(lease);
            }
        }
        let fallback = order.iter().rev().find(|class| self.capacity(**class) > 0)?;
        self.acquire(*fallback).await
    }

    fn claim(&self, pool: &ClassPool<L::Oracle>, permit: OwnedSemaphorePermit) -> Option<OracleLease<L>> {
        let index = pool
            .unlocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let guard = index.and_then(|i| pool.slots[i].clone().try_lock_owned().ok());
        let (Some(index), Some(guard)) = (index, guard) else {
            error!(?index, "Permit granted without a free engine slot");
            return None;
        };

        debug!(slot = guard.id, engine = %guard.spec.label, "Leased engine");
        Some(OracleLease {
            slot: guard,
            launcher: self.launcher.clone(),
            _release: SlotRelease {
                index,
                unlocked: pool.unlocked.clone(),
                _permit: permit,
            },
        })
    }

    /// Wait for every lease to come back and stop all running engines.
    /// Acquirers queue behind the shutdown and find stopped slots afterwards.
    pub async fn shutdown(&self) {
        for pool in self.pools.values() {
            let Ok(_all) = pool.free.clone().acquire_many_owned(pool.slots.len() as u32).await else {
                continue;
            };
            for slot in &pool.slots {
                let mut slot = slot.lock().await;
                if let Some(mut oracle) = slot.oracle.take() {
                    info!(engine = %slot.spec.label, "Shutting down engine");
                    oracle.quit().await;
                }
            }
        }
    }
}

/// Returns a slot's index to the free list, then its permit to the semaphore.
struct SlotRelease {
    index: usize,
    unlocked: FreeList,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.unlocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.index);
    }
}

/// Exclusive hold on one engine slot. Released when dropped.
pub struct OracleLease<L: OracleLauncher> {
    // Field order matters: the slot unlocks before its index and permit return.
    slot: OwnedMutexGuard<Slot<L::Oracle>>,
    launcher: Arc<L>,
    _release: SlotRelease,
}

impl<L: OracleLauncher> OracleLease<L> {
    pub fn id(&self) -> usize {
        self.slot.id
    }

    pub fn class(&self) -> ResourceClass {
        self.slot.spec.class
    }

    /// Whether the slot currently has a running engine.
    pub fn is_running(&self) -> bool {
        self.slot.oracle.is_some()
    }

    /// The slot's engine, launching it if this is its first use.
    pub async fn oracle(&mut self) -> Result<&mut L::Oracle, OracleError> {
        let slot = &mut *self.slot;
        let oracle = match slot.oracle.take() {
            Some(oracle) => oracle,
            None => self.launcher.launch(&slot.spec).await?,
        };
        Ok(slot.oracle.insert(oracle))
    }

    pub async fn evaluate(&mut self, fen: &str, candidate: &str) -> Result<EvaluationValue, OracleError> {
        self.oracle().await?.evaluate(fen, candidate).await
    }

    /// Drop a dead engine so the next lease of this slot starts a fresh one.
    pub fn discard(&mut self) {
        if self.slot.oracle.take().is_some() {
            warn!(slot = self.slot.id, engine = %self.slot.spec.label, "Discarded dead engine");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use rand::Rng;

    use super::*;
    use crate::fakes::ScriptedLauncher;

    fn specs(local: usize, remote: usize) -> Vec<EngineSpec> {
        let mut specs: Vec<EngineSpec> = (0..local)
            .map(|_| EngineSpec::local("stockfish", vec![]))
            .collect();
        specs.extend((0..remote).map(|i| EngineSpec::remote(&format!("host{i}"), "stockfish", vec![])));
        specs
    }

    #[tokio::test]
    async fn test_try_acquire_exhausts_class() {
        let arbiter = ResourceArbiter::new(ScriptedLauncher::default(), specs(1, 2));
        assert_eq!(arbiter.capacity(ResourceClass::Remote), 2);

        let a = arbiter.try_acquire(ResourceClass::Remote).unwrap();
        let b = arbiter.try_acquire(ResourceClass::Remote).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(arbiter.try_acquire(ResourceClass::Remote).is_none());
        assert_eq!(arbiter.available(ResourceClass::Remote), 0);
        assert_eq!(arbiter.available(ResourceClass::Local), 1);

        drop(a);
        let c = arbiter.try_acquire(ResourceClass::Remote).unwrap();
        assert_eq!(c.class(), ResourceClass::Remote);
        drop((b, c));
        assert_eq!(arbiter.available(ResourceClass::Remote), 2);
    }

    #[tokio::test]
    async fn test_unknown_class_is_none() {
        let arbiter = ResourceArbiter::new(ScriptedLauncher::default(), specs(1, 0));
        assert!(arbiter.try_acquire(ResourceClass::Remote).is_none());
        assert!(arbiter.acquire(ResourceClass::Remote).await.is_none());
    }

    #[tokio::test]
    async fn test_preferring_falls_back_to_local() {
        let arbiter = ResourceArbiter::new(ScriptedLauncher::default(), specs(1, 1));
        let order = [ResourceClass::Remote, ResourceClass::Local];

        let first = arbiter.acquire_preferring(&order).await.unwrap();
        assert_eq!(first.class(), ResourceClass::Remote);
        let second = arbiter.acquire_preferring(&order).await.unwrap();
        assert_eq!(second.class(), ResourceClass::Local);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let arbiter = Arc::new(ResourceArbiter::new(ScriptedLauncher::default(), specs(1, 0)));
        let held = arbiter.acquire(ResourceClass::Local).await.unwrap();

        let waiter = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move { arbiter.acquire(ResourceClass::Local).await.map(|l| l.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let id = held.id();
        drop(held);
        assert_eq!(waiter.await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_engine_launched_lazily_and_reused() {
        let launcher = ScriptedLauncher::default();
        let launches = launcher.launches();
        let arbiter = ResourceArbiter::new(launcher, specs(1, 0));

        let mut lease = arbiter.acquire(ResourceClass::Local).await.unwrap();
        assert!(!lease.is_running());
        assert_eq!(launches.load(Ordering::SeqCst), 0);
        lease.evaluate("8/8/8/8/8/8/8/8 w - - 0 1", "e2e4").await.unwrap();
        drop(lease);

        let mut lease = arbiter.acquire(ResourceClass::Local).await.unwrap();
        assert!(lease.is_running());
        lease.evaluate("8/8/8/8/8/8/8/8 w - - 0 1", "d2d4").await.unwrap();
        assert_eq!(launches.load(Ordering::SeqCst), 1);

        lease.discard();
        assert!(!lease.is_running());
        lease.evaluate("8/8/8/8/8/8/8/8 w - - 0 1", "d2d4").await.unwrap();
        assert_eq!(launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_never_grants_same_slot_twice() {
        const SLOTS: usize = 3;
        let arbiter = Arc::new(ResourceArbiter::new(ScriptedLauncher::default(), specs(2, 1)));
        let in_use: Arc<Vec<AtomicBool>> = Arc::new((0..SLOTS).map(|_| AtomicBool::new(false)).collect());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let arbiter = arbiter.clone();
            let in_use = in_use.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = HashSet::new();
                for _ in 0..50 {
                    let (prefer_remote, hold_us) = {
                        let mut rng = rand::thread_rng();
                        (rng.gen_bool(0.5), rng.gen_range(0..200u64))
                    };
                    let lease = if prefer_remote {
                        arbiter
                            .acquire_preferring(&[ResourceClass::Remote, ResourceClass::Local])
                            .await
                    } else {
                        arbiter.try_acquire(ResourceClass::Local)
                    };
                    let Some(lease) = lease else {
                        tokio::task::yield_now().await;
                        continue;
                    };
                    let was_in_use = in_use[lease.id()].swap(true, Ordering::SeqCst);
                    assert!(!was_in_use, "slot {} granted twice", lease.id());
                    seen.insert(lease.id());
                    tokio::time::sleep(Duration::from_micros(hold_us)).await;
                    in_use[lease.id()].store(false, Ordering::SeqCst);
                    drop(lease);
                }
                seen
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(arbiter.available(ResourceClass::Local), 2);
        assert_eq!(arbiter.available(ResourceClass::Remote), 1);
    }

    #[tokio::test]
    async fn test_shutdown_quits_running_engines() {
        let arbiter = ResourceArbiter::new(ScriptedLauncher::default(), specs(1, 0));
        {
            let mut lease = arbiter.acquire(ResourceClass::Local).await.unwrap();
            lease.evaluate("8/8/8/8/8/8/8/8 w - - 0 1", "a2a3").await.unwrap();
        }
        arbiter.shutdown().await;
        let lease = arbiter.acquire(ResourceClass::Local).await.unwrap();
        assert!(!lease.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_outstanding_leases() {
        let arbiter = Arc::new(ResourceArbiter::new(ScriptedLauncher::default(), specs(1, 1)));
        let mut held = arbiter.acquire(ResourceClass::Local).await.unwrap();
        held.evaluate("8/8/8/8/8/8/8/8 w - - 0 1", "a2a3").await.unwrap();

        let stopping = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move { arbiter.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!stopping.is_finished());

        drop(held);
        stopping.await.unwrap();
        assert_eq!(arbiter.available(ResourceClass::Local), 1);
        assert_eq!(arbiter.available(ResourceClass::Remote), 1);

        let lease = arbiter.try_acquire(ResourceClass::Local).unwrap();
        assert!(!lease.is_running());
    }
}
