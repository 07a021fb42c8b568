//! Sleeping barber: one server, a bounded row of waiting chairs.
//!
//! A customer who finds the barber idle goes straight to the barber's chair.
//! Otherwise they take a waiting chair if one is free, or leave at once. The
//! barber sleeps on the `arrivals` semaphore between customers.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cancel::cancellable;
use crate::error::{CoordinationError, Result};

pub type CustomerId = usize;

/// How a visit ended once the customer was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitOutcome {
    Served,
    Cancelled,
}

/// One admitted customer. The sender is consumed when the visit is
/// resolved, so no visit can be resolved twice.
struct Visit {
    customer: CustomerId,
    done: oneshot::Sender<VisitOutcome>,
}

impl Visit {
    fn resolve(self, outcome: VisitOutcome) -> bool {
        self.done.send(outcome).is_ok()
    }
}

#[derive(Default)]
struct Shop {
    barber_chair: Option<Visit>,
    waiting: VecDeque<Visit>,
    barber_busy: bool,
    barber_present: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct Counters {
    served: AtomicU64,
    turned_away: AtomicU64,
    cancelled: AtomicU64,
    abandoned: AtomicU64,
}

/// ShopStats: lifetime counters of a waiting room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShopStats {
    pub served: u64,
    pub turned_away: u64,
    pub cancelled: u64,
    /// Customers who gave up before the barber got to them.
    pub abandoned: u64,
}

/// WaitingRoom: a single barber with `chairs` waiting chairs.
pub struct WaitingRoom {
    chairs: usize,
    shop: Mutex<Shop>,
    arrivals: Semaphore,
    counters: Counters,
}

impl std::fmt::Debug for WaitingRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitingRoom")
            .field("chairs", &self.chairs)
            .field("waiting", &self.waiting())
            .field("barber_busy", &self.is_barber_busy())
            .field("stats", &self.stats())
            .finish()
    }
}

impl WaitingRoom {
    pub fn new(chairs: usize) -> Self {
        Self {
            chairs,
            shop: Mutex::new(Shop::default()),
            arrivals: Semaphore::new(0),
            counters: Counters::default(),
        }
    }

    pub fn chairs(&self) -> usize {
        self.chairs
    }

    /// Customers sitting in waiting chairs (not counting the barber's chair).
    pub fn waiting(&self) -> usize {
        self.shop.lock().waiting.len()
    }

    pub fn is_barber_busy(&self) -> bool {
        self.shop.lock().barber_busy
    }

    pub fn stats(&self) -> ShopStats {
        ShopStats {
            served: self.counters.served.load(Ordering::SeqCst),
            turned_away: self.counters.turned_away.load(Ordering::SeqCst),
            cancelled: self.counters.cancelled.load(Ordering::SeqCst),
            abandoned: self.counters.abandoned.load(Ordering::SeqCst),
        }
    }

    /// Walks in and either gets a haircut or leaves.
    ///
    /// Returns `Ok(false)` right away when the barber is busy and every
    /// waiting chair is taken, or the shop has closed. Otherwise waits until
    /// served and returns `Ok(true)`. If the barber shuts down first, or
    /// `cancel` fires, the visit ends with `OperationCancelled`.
    pub async fn try_enter(&self, customer: CustomerId, cancel: &CancellationToken) -> Result<bool> {
        let (done, outcome) = oneshot::channel();
        let visit = Visit { customer, done };

        {
            let mut shop = self.shop.lock();
            if shop.closed {
                drop(shop);
                return Ok(self.turn_away(customer));
            }
            if !shop.barber_busy {
                shop.barber_busy = true;
                shop.barber_chair = Some(visit);
                debug!(customer, "barber idle, straight to the chair");
            } else if shop.waiting.len() < self.chairs {
                shop.waiting.push_back(visit);
                debug!(customer, waiting = shop.waiting.len(), "took a waiting chair");
            } else {
                drop(shop);
                return Ok(self.turn_away(customer));
            }
            self.arrivals.add_permits(1);
        }

        match cancellable(cancel, outcome).await? {
            Ok(VisitOutcome::Served) => Ok(true),
            Ok(VisitOutcome::Cancelled) | Err(_) => Err(CoordinationError::OperationCancelled),
        }
    }

    fn turn_away(&self, customer: CustomerId) -> bool {
        self.counters.turned_away.fetch_add(1, Ordering::SeqCst);
        debug!(customer, "turned away");
        false
    }

    /// Runs the barber until `cancel` fires and returns how many customers
    /// were served during this shift.
    ///
    /// `service` is awaited once per customer. On shutdown the customer in
    /// the chair and everyone still waiting are sent home as cancelled and
    /// the shop closes until the next shift starts.
    pub async fn run_barber<F, Fut>(&self, mut service: F, cancel: &CancellationToken) -> Result<u64>
    where
        F: FnMut(CustomerId) -> Fut,
        Fut: Future<Output = ()>,
    {
        {
            let mut shop = self.shop.lock();
            if shop.barber_present {
                return Err(CoordinationError::invalid("barber", "the shop already has a barber"));
            }
            shop.barber_present = true;
            shop.closed = false;
        }
        info!(chairs = self.chairs, "barber started shift");

        let mut served = 0;
        loop {
            let Ok(permit) = cancellable(cancel, self.arrivals.acquire()).await else {
                break;
            };
            let Ok(permit) = permit else {
                break;
            };
            permit.forget();

            let next = {
                let mut shop = self.shop.lock();
                shop.barber_chair.take().or_else(|| shop.waiting.pop_front())
            };
            let Some(visit) = next else {
                continue;
            };

            if visit.done.is_closed() {
                self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
                debug!(customer = visit.customer, "customer left before service");
            } else if cancellable(cancel, service(visit.customer)).await.is_ok() {
                let customer = visit.customer;
                if visit.resolve(VisitOutcome::Served) {
                    served += 1;
                    self.counters.served.fetch_add(1, Ordering::SeqCst);
                    debug!(customer, "served");
                } else {
                    self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
                }
            } else {
                self.send_home(visit);
                break;
            }

            {
                let mut shop = self.shop.lock();
                shop.barber_busy = !shop.waiting.is_empty();
            }
        }

        let sent_home = self.close_shop();
        info!(served, sent_home, "barber finished shift");
        Ok(served)
    }

    fn send_home(&self, visit: Visit) {
        let customer = visit.customer;
        if visit.resolve(VisitOutcome::Cancelled) {
            self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
            debug!(customer, "sent home");
        } else {
            self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn close_shop(&self) -> usize {
        let pending: Vec<Visit> = {
            let mut shop = self.shop.lock();
            shop.closed = true;
            shop.barber_busy = false;
            shop.barber_present = false;
            while let Ok(permit) = self.arrivals.try_acquire() {
                permit.forget();
            }
            let mut pending: Vec<Visit> = shop.barber_chair.take().into_iter().collect();
            pending.extend(shop.waiting.drain(..));
            pending
        };

        let count = pending.len();
        for visit in pending {
            self.send_home(visit);
        }
        count
    }
}
