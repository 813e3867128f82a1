//! Single-flight admission control for model generation.
//!
//! At most one generation runs at a time, and none start for `cooldown`
//! after a timeout. Requests that are not admitted are answered from
//! retrieval instead of waiting. The permit is owned so it can travel with
//! the worker task; the slot is free only once that task is gone.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct GateInner {
    is_generating: bool,
    last_timeout_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Idle,
    Generating,
    Cooldown,
}

pub struct GenerationGate {
    inner: Mutex<GateInner>,
    cooldown: Duration,
}

/// Outcome of [`GenerationGate::try_acquire`].
pub enum GateDecision {
    Admitted(GenerationPermit),
    CoolingDown { remaining: Duration },
    Busy,
}

impl std::fmt::Debug for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admitted(_) => f.write_str("Admitted"),
            Self::CoolingDown { remaining } => {
                f.debug_struct("CoolingDown").field("remaining", remaining).finish()
            }
            Self::Busy => f.write_str("Busy"),
        }
    }
}

impl GenerationGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(GateInner::default()),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Check cooldown, then busy, and claim the slot, all under one lock.
    pub fn try_acquire(self: &Arc<Self>) -> GateDecision {
        let mut inner = self.inner.lock();

        if let Some(at) = inner.last_timeout_at {
            let elapsed = at.elapsed();
            if elapsed < self.cooldown {
                return GateDecision::CoolingDown {
                    remaining: self.cooldown - elapsed,
                };
            }
        }

        if inner.is_generating {
            return GateDecision::Busy;
        }

        inner.is_generating = true;
        GateDecision::Admitted(GenerationPermit {
            gate: Arc::clone(self),
        })
    }

    /// Start the cooldown window from now.
    pub fn record_timeout(&self) {
        self.inner.lock().last_timeout_at = Some(Instant::now());
    }

    /// Reported in admission order: cooldown wins over an abandoned worker
    /// that has not been torn down yet.
    pub fn state(&self) -> GateState {
        let inner = self.inner.lock();
        if let Some(at) = inner.last_timeout_at {
            if at.elapsed() < self.cooldown {
                return GateState::Cooldown;
            }
        }
        if inner.is_generating {
            GateState::Generating
        } else {
            GateState::Idle
        }
    }

    fn release(&self) {
        self.inner.lock().is_generating = false;
    }
}

/// Held by the generation worker. Dropping it frees the slot.
pub struct GenerationPermit {
    gate: Arc<GenerationGate>,
}

impl std::fmt::Debug for GenerationPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GenerationPermit")
    }
}

impl Drop for GenerationPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_flight() {
        let gate = Arc::new(GenerationGate::new(Duration::from_secs(60)));
        let permit = match gate.try_acquire() {
            GateDecision::Admitted(p) => p,
            other => panic!("expected admission, got {:?}", other),
        };
        assert_eq!(gate.state(), GateState::Generating);
        assert!(matches!(gate.try_acquire(), GateDecision::Busy));

        drop(permit);
        assert_eq!(gate.state(), GateState::Idle);
        assert!(matches!(gate.try_acquire(), GateDecision::Admitted(_)));
    }

    #[tokio::test]
    async fn test_release_on_panic() {
        let gate = Arc::new(GenerationGate::new(Duration::from_secs(60)));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = match gate.try_acquire() {
                GateDecision::Admitted(p) => p,
                _ => unreachable!(),
            };
            panic!("generation blew up");
        }));
        assert!(result.is_err());
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_boundary() {
        let gate = Arc::new(GenerationGate::new(Duration::from_secs(60)));
        {
            let GateDecision::Admitted(_permit) = gate.try_acquire() else {
                panic!("expected admission");
            };
            gate.record_timeout();
        }
        assert_eq!(gate.state(), GateState::Cooldown);

        tokio::time::advance(Duration::from_secs(59)).await;
        match gate.try_acquire() {
            GateDecision::CoolingDown { remaining } => assert_eq!(remaining, Duration::from_secs(1)),
            other => panic!("expected cooldown, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(gate.try_acquire(), GateDecision::Admitted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_checked_before_busy() {
        let gate = Arc::new(GenerationGate::new(Duration::from_secs(30)));
        let GateDecision::Admitted(permit) = gate.try_acquire() else {
            panic!("expected admission");
        };
        gate.record_timeout();
        assert!(matches!(gate.try_acquire(), GateDecision::CoolingDown { .. }));
        assert_eq!(gate.state(), GateState::Cooldown);
        drop(permit);
        assert_eq!(gate.state(), GateState::Cooldown);
    }

    #[tokio::test]
    async fn test_zero_cooldown_never_blocks() {
        let gate = Arc::new(GenerationGate::new(Duration::ZERO));
        {
            let GateDecision::Admitted(_permit) = gate.try_acquire() else {
                panic!("expected admission");
            };
            gate.record_timeout();
        }
        assert!(matches!(gate.try_acquire(), GateDecision::Admitted(_)));
    }

    #[tokio::test]
    async fn test_permit_moves_to_worker_task() {
        let gate = Arc::new(GenerationGate::new(Duration::from_secs(60)));
        let GateDecision::Admitted(permit) = gate.try_acquire() else {
            panic!("expected admission");
        };
        let release = Arc::new(tokio::sync::Notify::new());
        let worker = {
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                let _permit = permit;
                release.notified().await;
            })
        };

        tokio::task::yield_now().await;
        assert!(matches!(gate.try_acquire(), GateDecision::Busy));

        release.notify_one();
        worker.await.unwrap();
        assert_eq!(gate.state(), GateState::Idle);
    }
}
