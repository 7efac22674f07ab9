use std::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam::utils::Backoff;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

const STATE_DIRTY: usize = 0; // Value is dirty and not being locked
const STATE_DIRTY_LOCK: usize = 1; // Value is being dirtied (should not compute)
const STATE_COMPUTING: usize = 2; // Value is being computed (should not dirtify nor compute nor read)
const STATE_CLEAN: usize = 3; // Value is clean and can be used or dirtified
// Everything above STATE_CLEAN is counting number of "in use" which should prevent dirtifying

/// Guard for a lazy value
///
/// This is akin to a reference `&'a T` however it also enforces that we cannot modify the associated
/// element while this guard is active.
pub struct LazyGuard<'a, K: ?Sized> {
    guard: MappedRwLockReadGuard<'a, K>,
    state: &'a AtomicUsize,
}

impl<'a, K: ?Sized> Deref for LazyGuard<'a, K> {
    type Target = K;

    fn deref(&self) -> &'_ Self::Target {
        &self.guard
    }
}

impl<'a, K: ?Sized> Drop for LazyGuard<'a, K> {
    fn drop(&mut self) {
        release(self.state);
    }
}

fn release(state: &AtomicUsize) {
    let backoff = Backoff::new();

    loop {
        let prev_state = state.load(Ordering::Acquire);
        debug_assert!(
            prev_state > STATE_CLEAN,
            "LazyGuard state should be CLEAN_IN_USE when releasing"
        );

        // Decrement the in-use counter
        if state
            .compare_exchange(
                prev_state,
                prev_state - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            break;
        } else {
            backoff.spin();
        }
    }
}

/// A lazily computed value that can be invalidated.
///
/// The value is computed on first access by [`Self::try_get`], shared by every reader until it
/// is invalidated through [`Self::dirtify`] or [`Self::reset`], and recomputed on the next
/// access. A failed computation leaves the container dirty, so the next access retries.
pub struct LazyContainer<T> {
    elem: RwLock<Option<T>>,
    state: AtomicUsize,
}

impl<T> Default for LazyContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LazyContainer<T> {
    pub const fn new() -> Self {
        Self {
            elem: RwLock::new(None),
            state: AtomicUsize::new(STATE_DIRTY),
        }
    }

    /// Returns `true` if a computed value is currently available.
    pub fn is_clean(&self) -> bool {
        self.state.load(Ordering::Acquire) >= STATE_CLEAN
    }

    /// Lock the container dirty while `elem` is being modified. The next access recomputes.
    pub fn dirtify<'a, E>(&'a self, elem: &'a mut E) -> LazyDirtifierGuard<'a, E> {
        // Can only dirtify if the state is either DIRTY or CLEAN (not CLEAN_IN_USE)
        let backoff = Backoff::new();
        loop {
            let prev_state = self.state.load(Ordering::Acquire);

            if matches!(prev_state, STATE_DIRTY | STATE_CLEAN) {
                if self
                    .state
                    .compare_exchange(
                        prev_state,
                        STATE_DIRTY_LOCK,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    break;
                }
            } else {
                // Wait until the state is DIRTY or CLEAN
                backoff.snooze();
            }
        }

        LazyDirtifierGuard {
            state: &self.state,
            elem,
        }
    }

    /// Drop the computed value. Exclusive access guarantees no guard is alive.
    pub fn reset(&mut self) {
        *self.elem.get_mut() = None;
        *self.state.get_mut() = STATE_DIRTY;
    }

    /// Mutable access to the computed value, if any.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if *self.state.get_mut() >= STATE_CLEAN {
            self.elem.get_mut().as_mut()
        } else {
            None
        }
    }

    fn guard(&self) -> Option<LazyGuard<'_, T>> {
        RwLockReadGuard::try_map(self.elem.read(), Option::as_ref)
            .ok()
            .map(|guard| LazyGuard {
                guard,
                state: &self.state,
            })
    }

    /// Retrieve the value, computing it first if the container is dirty.
    ///
    /// `compute` receives the previous value, if any, which allows reusing allocations.
    pub fn try_get<E>(
        &self,
        compute: impl FnOnce(Option<T>) -> Result<T, E>,
    ) -> Result<LazyGuard<'_, T>, E> {
        // Here is the logic:
        // - If the state is CLEAN, return the value
        // - If the state is DIRTY, compute the value and set the state to CLEAN
        // - If any other state, wait
        let backoff = Backoff::new();
        let mut compute = Some(compute);

        loop {
            let prev_state = self.state.load(Ordering::Acquire);

            match prev_state {
                STATE_CLEAN..=usize::MAX => {
                    // Attempt to increment the in-use counter
                    if self
                        .state
                        .compare_exchange(
                            prev_state,
                            prev_state + 1,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        match self.guard() {
                            Some(guard) => return Ok(guard),
                            None => release(&self.state),
                        }
                    }
                }
                STATE_DIRTY => {
                    if self
                        .state
                        .compare_exchange(
                            STATE_DIRTY,
                            STATE_COMPUTING,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        let Some(compute) = compute.take() else {
                            // The computation of this call was already spent, let another
                            // caller compute
                            self.state.store(STATE_DIRTY, Ordering::Release);
                            backoff.snooze();
                            continue;
                        };

                        let mut mut_guard = self.elem.write();
                        let previous_value = mut_guard.take();

                        match compute(previous_value) {
                            Ok(new_value) => {
                                *mut_guard = Some(new_value);

                                // Mark as in-use before anyone else may observe CLEAN
                                self.state.store(STATE_CLEAN + 1, Ordering::Release);
                                let guard = RwLockWriteGuard::downgrade(mut_guard);
                                match RwLockReadGuard::try_map(guard, Option::as_ref) {
                                    Ok(guard) => {
                                        return Ok(LazyGuard {
                                            guard,
                                            state: &self.state,
                                        });
                                    }
                                    Err(_) => release(&self.state),
                                }
                            }
                            Err(err) => {
                                drop(mut_guard);
                                self.state.store(STATE_DIRTY, Ordering::Release);
                                return Err(err);
                            }
                        }
                    }
                }
                _ => {
                    // Wait until the state is either DIRTY or CLEAN or higher (CLEAN_IN_USE)
                    backoff.snooze();
                }
            }
        }
    }
}

/// Dirty guard for a lazy value
pub struct LazyDirtifierGuard<'a, E> {
    state: &'a AtomicUsize,
    elem: &'a mut E,
}

impl<'a, E> Deref for LazyDirtifierGuard<'a, E> {
    type Target = E;

    fn deref(&self) -> &'_ Self::Target {
        self.elem
    }
}

impl<'a, E> DerefMut for LazyDirtifierGuard<'a, E> {
    fn deref_mut(&mut self) -> &'_ mut Self::Target {
        self.elem
    }
}

impl<'a, E> Drop for LazyDirtifierGuard<'a, E> {
    fn drop(&mut self) {
        self.state.store(STATE_DIRTY, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn computes_once_until_dirtied() {
        let calls = AtomicUsize::new(0);
        let mut source = 1;
        let lazy = LazyContainer::new();

        let compute = |_: Option<i32>| -> Result<i32, ()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(10)
        };
        assert_eq!(*lazy.try_get(compute).unwrap(), 10);
        assert_eq!(*lazy.try_get(compute).unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        {
            let mut guard = lazy.dirtify(&mut source);
            *guard = 2;
        }
        assert!(!lazy.is_clean());
        assert_eq!(*lazy.try_get(|prev| Ok::<_, ()>(prev.unwrap_or(0) + source)).unwrap(), 12);
    }

    #[test]
    fn failed_computation_stays_dirty() {
        let lazy: LazyContainer<String> = LazyContainer::new();
        assert_eq!(lazy.try_get(|_| Err("boom")).err(), Some("boom"));
        assert!(!lazy.is_clean());

        let value = lazy.try_get(|_| Ok::<_, ()>("ok".to_string())).unwrap();
        assert_eq!(&*value, "ok");
    }

    #[test]
    fn concurrent_readers_share_one_computation() {
        let calls = AtomicUsize::new(0);
        let lazy = LazyContainer::new();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let value = lazy
                        .try_get(|_| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, ()>(7u64)
                        })
                        .unwrap();
                    assert_eq!(*value, 7);
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_and_get_mut_need_exclusive_access() {
        let mut lazy = LazyContainer::new();
        assert!(lazy.get_mut().is_none());
        drop(lazy.try_get(|_| Ok::<_, ()>(vec![1, 2])).unwrap());

        lazy.get_mut().unwrap().push(3);
        assert_eq!(&*lazy.try_get(|_| Ok::<_, ()>(vec![])).unwrap(), &vec![1, 2, 3]);

        lazy.reset();
        assert!(!lazy.is_clean());
    }
}
