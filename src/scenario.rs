//! Ready-made scenarios for the driver binary.
//!
//! Each function builds one coordinator from validated [`Settings`], starts
//! the workers, waits for them, and returns a serializable report.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{CoordinationError, Result};
use crate::handoff::HandoffQueue;
use crate::ring::ResourceRing;
use crate::waiting_room::{ShopStats, WaitingRoom};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NaiveReport {
    pub seats: usize,
    pub timeout_ms: u128,
    pub completed: bool,
    pub forks_left_held: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderedReport {
    pub seats: usize,
    pub meals_per_seat: usize,
    pub meals_eaten: Vec<usize>,
    pub double_acquisitions: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandoffReport {
    pub capacity: usize,
    pub produced: usize,
    pub consumed: usize,
    pub drained_cleanly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarberReport {
    pub chairs: usize,
    pub arrivals: usize,
    pub served: usize,
    pub turned_away: usize,
    pub shop: ShopStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "scenario", rename_all = "kebab-case")]
pub enum Report {
    RingNaive(NaiveReport),
    RingOrdered(OrderedReport),
    Handoff(HandoffReport),
    Barber(BarberReport),
}

pub async fn ring_naive(settings: &Settings, cancel: &CancellationToken) -> Result<NaiveReport> {
    let ring = ResourceRing::with_pacing(settings.seats, settings.pacing)?;
    let completed = ring.run_naive(settings.naive_timeout, cancel).await?;
    Ok(NaiveReport {
        seats: ring.size(),
        timeout_ms: settings.naive_timeout.as_millis(),
        completed,
        forks_left_held: ring.holders().iter().flatten().count(),
    })
}

pub async fn ring_ordered(settings: &Settings, cancel: &CancellationToken) -> Result<OrderedReport> {
    let ring = ResourceRing::with_pacing(settings.seats, settings.pacing)?;
    let started = Instant::now();
    ring.run_ordered(settings.meals, cancel).await?;
    Ok(OrderedReport {
        seats: ring.size(),
        meals_per_seat: settings.meals,
        meals_eaten: ring.meals_eaten(),
        double_acquisitions: ring.double_acquisitions(),
        elapsed_ms: started.elapsed().as_millis(),
    })
}

pub async fn handoff(settings: &Settings, cancel: &CancellationToken) -> Result<HandoffReport> {
    let queue = Arc::new(HandoffQueue::new(settings.capacity)?);
    let per_consumer = settings.total_items / settings.consumers;

    let producers: Vec<_> = (0..settings.producers)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            let items = settings.items_per_producer;
            let delay = settings.produce_delay;
            tokio::spawn(async move {
                for i in 0..items {
                    queue.add(producer * 1_000 + i, &cancel).await?;
                    crate::cancel::pause(&cancel, delay.sample()).await?;
                }
                Ok::<usize, CoordinationError>(items)
            })
        })
        .collect();

    let consumers: Vec<_> = (0..settings.consumers)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            let delay = settings.consume_delay;
            tokio::spawn(async move {
                for _ in 0..per_consumer {
                    queue.take(&cancel).await?;
                    crate::cancel::pause(&cancel, delay.sample()).await?;
                }
                Ok::<usize, CoordinationError>(per_consumer)
            })
        })
        .collect();

    let mut produced = 0;
    for joined in futures::future::join_all(producers).await {
        produced += joined.map_err(|_| CoordinationError::OperationCancelled)??;
    }
    queue.complete_adding();

    let mut consumed = 0;
    for joined in futures::future::join_all(consumers).await {
        consumed += joined.map_err(|_| CoordinationError::OperationCancelled)??;
    }

    let drained_cleanly = matches!(queue.try_take(), Err(CoordinationError::QueueDrained));
    info!(produced, consumed, "handoff scenario finished");
    Ok(HandoffReport {
        capacity: queue.capacity(),
        produced,
        consumed,
        drained_cleanly,
    })
}

pub async fn barber(settings: &Settings, cancel: &CancellationToken) -> Result<BarberReport> {
    let room = Arc::new(WaitingRoom::new(settings.chairs));
    let shift = cancel.child_token();

    let barber = {
        let room = Arc::clone(&room);
        let shift = shift.clone();
        let service = settings.service;
        tokio::spawn(async move {
            room.run_barber(|_| tokio::time::sleep(service.sample()), &shift)
                .await
        })
    };

    let customers: Vec<_> = (0..settings.customers)
        .map(|id| {
            let room = Arc::clone(&room);
            let cancel = cancel.clone();
            tokio::spawn(async move { room.try_enter(id, &cancel).await })
        })
        .collect();

    let mut served = 0;
    let mut turned_away = 0;
    for joined in futures::future::join_all(customers).await {
        match joined.map_err(|_| CoordinationError::OperationCancelled)? {
            Ok(true) => served += 1,
            Ok(false) => turned_away += 1,
            Err(err) if err.is_cancelled() => turned_away += 1,
            Err(other) => return Err(other),
        }
    }

    // Leave the lights on for a moment before closing. Cancellation only
    // cuts the linger short; the shift below closes the shop either way.
    if crate::cancel::pause(cancel, settings.linger).await.is_err() {
        debug!("linger cut short");
    }
    shift.cancel();
    barber
        .await
        .map_err(|_| CoordinationError::OperationCancelled)??;

    Ok(BarberReport {
        chairs: room.chairs(),
        arrivals: settings.customers,
        served,
        turned_away,
        shop: room.stats(),
    })
}
