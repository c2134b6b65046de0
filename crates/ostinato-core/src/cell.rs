//! Interior-mutable slots for processors shared with the graph.

use std::cell::UnsafeCell;

/// Interior-mutable processor slot (track processors, plugins, faders).
///
/// SAFETY: the same discipline as port cells — each processor is mutated
/// only by the graph node that owns it, nodes run in topological order, and
/// control-thread mutation happens under the port operation semaphore while
/// the audio thread skips cycles.
pub struct ProcCell<T>(UnsafeCell<T>);

unsafe impl<T: Send> Send for ProcCell<T> {}
unsafe impl<T: Send> Sync for ProcCell<T> {}

impl<T> ProcCell<T> {
    pub fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// SAFETY: caller must have exclusive access per the discipline above.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut(&self) -> &mut T {
        &mut *self.0.get()
    }

    /// SAFETY: caller must guarantee no concurrent `&mut` access.
    pub(crate) unsafe fn get(&self) -> &T {
        &*self.0.get()
    }

    /// Exclusive access for the control thread.
    ///
    /// Caller must hold the port operation lock so no cycle is running.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // SAFETY: see above.
        f(unsafe { self.get_mut() })
    }

    /// Shared access for control-thread reads of RT-stable fields.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        // SAFETY: see above.
        f(unsafe { self.get() })
    }
}
