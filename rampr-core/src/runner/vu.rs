use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tokio::sync::Notify;

/// Virtual-user lifecycle state. Only the pool's reconciler moves a user
/// into `Retiring`; the user's own runner moves between the other states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Idle = 0,
    Running = 1,
    Sleeping = 2,
    Retiring = 3,
}

impl VuState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Sleeping,
            3 => Self::Retiring,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug)]
pub struct VirtualUser {
    id: u64,
    state: AtomicU8,
}

impl VirtualUser {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(VuState::Idle as u8),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> VuState {
        VuState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Retiring is terminal; any other state transition is ignored once set.
    pub fn set_state(&self, state: VuState) {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if cur == VuState::Retiring as u8 {
                return;
            }
            match self.state.compare_exchange_weak(
                cur,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(v) => cur = v,
            }
        }
    }

    pub fn retire(&self) {
        self.state.store(VuState::Retiring as u8, Ordering::Release);
    }

    pub fn is_retiring(&self) -> bool {
        self.state() == VuState::Retiring
    }
}

/// Run-wide cancellation flag. Consulted by virtual users at iteration
/// boundaries and by the pool's reconciler between ticks; in-flight requests
/// are left to complete or time out.
#[derive(Debug, Default)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retiring_is_terminal() {
        let vu = VirtualUser::new(1);
        vu.set_state(VuState::Running);
        assert_eq!(vu.state(), VuState::Running);

        vu.retire();
        assert!(vu.is_retiring());

        // The runner racing a state update must not resurrect the user.
        vu.set_state(VuState::Sleeping);
        assert!(vu.is_retiring());
    }

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let signal = std::sync::Arc::new(CancelSignal::new());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        signal.cancel();
        waiter.await.unwrap_or_else(|e| panic!("{e}"));
        assert!(signal.is_cancelled());
    }
}
