//! Dining philosophers over a ring of forks.
//!
//! `N` seats sit around a table with one fork between each pair of
//! neighbours. Seat `i` needs fork `i` (left) and fork `(i + 1) % N` (right)
//! to eat. The only thing that differs between the two runs is the order in
//! which a seat picks its forks up:
//!
//! - [`ResourceRing::run_naive`] takes left then right. When every seat holds
//!   its left fork at once, each waits on its neighbour and the ring deadlocks.
//!   The run reports `false` after the timeout and cleans up.
//! - [`ResourceRing::run_ordered`] takes the lower-numbered fork first. One
//!   seat (the wrap-around pair) therefore reaches right before left, which
//!   breaks the circular wait, so every seat finishes its meals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Barrier, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::{cancellable, pause};
use crate::config::RingPacing;
use crate::error::{CoordinationError, Result};

const FREE: usize = usize::MAX;

// =============================================================================
// Forks
// =============================================================================

#[derive(Debug)]
struct Fork {
    id: usize,
    permit: Arc<Semaphore>,
    holder: AtomicUsize,
    double_grants: Arc<AtomicUsize>,
}

impl Fork {
    async fn take(self: &Arc<Self>, seat: usize, cancel: &CancellationToken) -> Result<HeldFork> {
        let permit = cancellable(cancel, Arc::clone(&self.permit).acquire_owned())
            .await?
            .map_err(|_| CoordinationError::OperationCancelled)?;

        let previous = self.holder.swap(seat, Ordering::SeqCst);
        if previous != FREE {
            self.double_grants.fetch_add(1, Ordering::SeqCst);
            warn!(fork = self.id, seat, previous, "fork granted while already held");
        }
        debug!(fork = self.id, seat, "fork taken");

        Ok(HeldFork {
            fork: Arc::clone(self),
            _permit: permit,
        })
    }

    fn holder(&self) -> Option<usize> {
        match self.holder.load(Ordering::SeqCst) {
            FREE => None,
            seat => Some(seat),
        }
    }
}

/// A fork in hand. Dropping it puts the fork back on the table, which is how
/// a cancelled seat lets go of whatever it already picked up.
struct HeldFork {
    fork: Arc<Fork>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for HeldFork {
    fn drop(&mut self) {
        // Clear the holder before the permit field is dropped and the fork
        // becomes available again.
        self.fork.holder.store(FREE, Ordering::SeqCst);
    }
}

// =============================================================================
// Ring coordinator
// =============================================================================

/// ResourceRing: N forks arranged in a cycle plus one meal counter per seat.
#[derive(Debug)]
pub struct ResourceRing {
    forks: Vec<Arc<Fork>>,
    meals: Arc<Vec<AtomicUsize>>,
    double_grants: Arc<AtomicUsize>,
    pacing: RingPacing,
    run_gate: tokio::sync::Mutex<()>,
}

impl ResourceRing {
    pub fn new(seats: usize) -> Result<Self> {
        Self::with_pacing(seats, RingPacing::default())
    }

    pub fn with_pacing(seats: usize, pacing: RingPacing) -> Result<Self> {
        if seats < 2 {
            return Err(CoordinationError::invalid(
                "seats",
                format!("a ring needs at least 2 seats, got {seats}"),
            ));
        }

        let double_grants = Arc::new(AtomicUsize::new(0));
        let forks = (0..seats)
            .map(|id| {
                Arc::new(Fork {
                    id,
                    permit: Arc::new(Semaphore::new(1)),
                    holder: AtomicUsize::new(FREE),
                    double_grants: Arc::clone(&double_grants),
                })
            })
            .collect();
        let meals = Arc::new((0..seats).map(|_| AtomicUsize::new(0)).collect());

        Ok(Self {
            forks,
            meals,
            double_grants,
            pacing,
            run_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn size(&self) -> usize {
        self.forks.len()
    }

    /// Meals eaten by each seat in the current or most recent ordered run.
    pub fn meals_eaten(&self) -> Vec<usize> {
        self.meals.iter().map(|m| m.load(Ordering::SeqCst)).collect()
    }

    /// Which seat holds each fork right now.
    pub fn holders(&self) -> Vec<Option<usize>> {
        self.forks.iter().map(|fork| fork.holder()).collect()
    }

    /// How many times a fork was granted while another seat still held it.
    /// Anything but zero is a mutual exclusion bug.
    pub fn double_acquisitions(&self) -> usize {
        self.double_grants.load(Ordering::SeqCst)
    }

    fn neighbours(&self, seat: usize) -> (Arc<Fork>, Arc<Fork>) {
        let n = self.size();
        (
            Arc::clone(&self.forks[seat]),
            Arc::clone(&self.forks[(seat + 1) % n]),
        )
    }

    /// Every seat grabs left, waits `grab_gap`, then grabs right.
    ///
    /// Returns `Ok(false)` when the seats did not all finish inside
    /// `timeout`, which is the expected outcome, and `OperationCancelled`
    /// when `cancel` fires first. Either way every pending wait is cancelled
    /// and every fork is back on the table before the call returns.
    pub async fn run_naive(&self, timeout: Duration, cancel: &CancellationToken) -> Result<bool> {
        if timeout.is_zero() {
            return Err(CoordinationError::invalid("timeout", "must be greater than zero"));
        }
        let _running = self.run_gate.lock().await;

        let n = self.size();
        let stop = cancel.child_token();
        let start_line = Arc::new(Barrier::new(n));
        let mut seats = JoinSet::new();

        for seat in 0..n {
            let (left, right) = self.neighbours(seat);
            seats.spawn(naive_meal(
                seat,
                left,
                right,
                Arc::clone(&start_line),
                stop.clone(),
                self.pacing,
            ));
        }

        let finished = cancellable(cancel, tokio::time::timeout(timeout, settle(&mut seats))).await;
        stop.cancel();
        settle(&mut seats).await;

        let completed = match finished {
            Ok(Ok(done)) => done == n,
            Ok(Err(_elapsed)) => false,
            Err(err) => {
                info!(seats = n, "naive run cancelled");
                return Err(err);
            }
        };
        if completed {
            info!(seats = n, "naive run finished without deadlock");
        } else {
            warn!(seats = n, ?timeout, "naive run timed out, ring deadlocked");
        }
        Ok(completed)
    }

    /// Every seat eats `meals_per_seat` times, taking the lower-numbered fork
    /// first and releasing in the opposite order.
    ///
    /// Meal counters are reset at the start. If `cancel` fires, all seats stop
    /// promptly, release what they hold, and the call returns
    /// `OperationCancelled` with the partial counts still readable through
    /// [`meals_eaten`](Self::meals_eaten).
    pub async fn run_ordered(&self, meals_per_seat: usize, cancel: &CancellationToken) -> Result<()> {
        if meals_per_seat == 0 {
            return Err(CoordinationError::invalid(
                "meals_per_seat",
                "every seat must eat at least once",
            ));
        }
        let _running = self.run_gate.lock().await;

        for counter in self.meals.iter() {
            counter.store(0, Ordering::SeqCst);
        }

        let n = self.size();
        let mut seats = JoinSet::new();
        for seat in 0..n {
            let left = seat;
            let right = (seat + 1) % n;
            let first = Arc::clone(&self.forks[left.min(right)]);
            let second = Arc::clone(&self.forks[left.max(right)]);
            seats.spawn(ordered_meals(
                seat,
                first,
                second,
                meals_per_seat,
                Arc::clone(&self.meals),
                cancel.clone(),
                self.pacing,
            ));
        }

        let finished = settle(&mut seats).await;
        if finished < n {
            info!(finished, seats = n, meals = ?self.meals_eaten(), "ordered run cancelled");
            return Err(CoordinationError::OperationCancelled);
        }

        info!(seats = n, meals_per_seat, "ordered run finished");
        Ok(())
    }
}

/// Joins every seat and returns how many finished without error.
async fn settle(seats: &mut JoinSet<Result<()>>) -> usize {
    let mut finished = 0;
    while let Some(joined) = seats.join_next().await {
        match joined {
            Ok(Ok(())) => finished += 1,
            Ok(Err(err)) => debug!(%err, "seat stopped early"),
            Err(err) => warn!(%err, "seat task failed"),
        }
    }
    finished
}

async fn naive_meal(
    seat: usize,
    left: Arc<Fork>,
    right: Arc<Fork>,
    start_line: Arc<Barrier>,
    stop: CancellationToken,
    pacing: RingPacing,
) -> Result<()> {
    cancellable(&stop, start_line.wait()).await?;

    let left_hand = left.take(seat, &stop).await?;
    pause(&stop, pacing.grab_gap()).await?;
    let right_hand = right.take(seat, &stop).await?;

    pause(&stop, pacing.naive_eat()).await?;

    drop(right_hand);
    drop(left_hand);
    Ok(())
}

async fn ordered_meals(
    seat: usize,
    first: Arc<Fork>,
    second: Arc<Fork>,
    meals: usize,
    counters: Arc<Vec<AtomicUsize>>,
    cancel: CancellationToken,
    pacing: RingPacing,
) -> Result<()> {
    for _ in 0..meals {
        if cancel.is_cancelled() {
            return Err(CoordinationError::OperationCancelled);
        }

        pause(&cancel, pacing.think.sample()).await?;

        let low = first.take(seat, &cancel).await?;
        let high = second.take(seat, &cancel).await?;

        pause(&cancel, pacing.eat.sample()).await?;
        counters[seat].fetch_add(1, Ordering::SeqCst);

        drop(high);
        drop(low);

        pause(&cancel, pacing.pause.sample()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> RingPacing {
        RingPacing {
            think: crate::config::DelayRange::new(0, 2),
            eat: crate::config::DelayRange::new(0, 2),
            pause: crate::config::DelayRange::new(0, 2),
            ..RingPacing::default()
        }
    }

    #[test]
    fn fewer_than_two_seats_is_rejected() {
        for seats in [0, 1] {
            match ResourceRing::new(seats) {
                Err(CoordinationError::InvalidConfiguration { parameter, .. }) => {
                    assert_eq!(parameter, "seats")
                }
                other => panic!("expected invalid configuration, got {other:?}"),
            }
        }
    }

    #[test]
    fn new_ring_has_every_fork_free() {
        let ring = ResourceRing::new(4).unwrap();
        assert_eq!(ring.size(), 4);
        assert_eq!(ring.holders(), vec![None; 4]);
        assert_eq!(ring.meals_eaten(), vec![0; 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn naive_run_deadlocks_and_cleans_up() {
        let ring = ResourceRing::new(5).unwrap();

        let completed = ring.run_naive(Duration::from_millis(500), &CancellationToken::new()).await.unwrap();

        assert!(!completed);
        assert_eq!(ring.holders(), vec![None; 5]);
        assert_eq!(ring.double_acquisitions(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ring_is_reusable_after_deadlock() {
        let ring = ResourceRing::with_pacing(5, quick()).unwrap();
        assert!(!ring.run_naive(Duration::from_millis(300), &CancellationToken::new()).await.unwrap());

        let cancel = CancellationToken::new();
        ring.run_ordered(2, &cancel).await.unwrap();
        assert_eq!(ring.meals_eaten(), vec![2; 5]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancelled_naive_run_returns_early_and_releases_forks() {
        let ring = ResourceRing::new(5).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = ring.run_naive(Duration::from_secs(30), &cancel).await;

        assert_eq!(outcome, Err(CoordinationError::OperationCancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ring.holders(), vec![None; 5]);
        assert_eq!(ring.double_acquisitions(), 0);
    }

    #[tokio::test]
    async fn naive_run_rejects_zero_timeout() {
        let ring = ResourceRing::new(3).unwrap();
        assert!(matches!(
            ring.run_naive(Duration::ZERO, &CancellationToken::new()).await,
            Err(CoordinationError::InvalidConfiguration { parameter: "timeout", .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ordered_run_feeds_everyone() {
        let ring = ResourceRing::new(5).unwrap();
        let cancel = CancellationToken::new();
        let watchdog = cancel.clone();
        let guard = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            watchdog.cancel();
        });

        ring.run_ordered(3, &cancel).await.unwrap();
        guard.abort();

        assert_eq!(ring.meals_eaten(), vec![3; 5]);
        assert_eq!(ring.holders(), vec![None; 5]);
        assert_eq!(ring.double_acquisitions(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ordered_run_holds_for_every_ring_size() {
        for seats in 2..=8 {
            let ring = ResourceRing::with_pacing(seats, RingPacing::immediate()).unwrap();
            let cancel = CancellationToken::new();

            tokio::time::timeout(Duration::from_secs(10), ring.run_ordered(20, &cancel))
                .await
                .expect("ordered run must not deadlock")
                .unwrap();

            assert_eq!(ring.meals_eaten(), vec![20; seats], "ring of {seats}");
            assert_eq!(ring.holders(), vec![None; seats]);
            assert_eq!(ring.double_acquisitions(), 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sampled_forks_are_never_shared() {
        let ring = Arc::new(ResourceRing::with_pacing(5, quick()).unwrap());
        let cancel = CancellationToken::new();

        let runner = {
            let ring = Arc::clone(&ring);
            let cancel = cancel.clone();
            tokio::spawn(async move { ring.run_ordered(10, &cancel).await })
        };

        while !runner.is_finished() {
            let holders = ring.holders();
            for (fork, holder) in holders.iter().enumerate() {
                if let Some(seat) = holder {
                    let n = holders.len();
                    assert!(
                        *seat == fork || (*seat + 1) % n == fork,
                        "seat {seat} holds non-adjacent fork {fork}"
                    );
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        runner.await.unwrap().unwrap();
        assert_eq!(ring.double_acquisitions(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancelled_ordered_run_releases_everything() {
        let ring = ResourceRing::new(5).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            trigger.cancel();
        });

        let outcome = ring.run_ordered(1_000, &cancel).await;

        assert_eq!(outcome, Err(CoordinationError::OperationCancelled));
        assert!(ring.meals_eaten().iter().all(|&m| m < 1_000));
        assert_eq!(ring.holders(), vec![None; 5]);
    }

    #[tokio::test]
    async fn ordered_run_rejects_zero_meals() {
        let ring = ResourceRing::new(2).unwrap();
        let cancel = CancellationToken::new();
        assert!(matches!(
            ring.run_ordered(0, &cancel).await,
            Err(CoordinationError::InvalidConfiguration { .. })
        ));
    }
}
