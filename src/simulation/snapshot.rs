use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{floating_type_mod::FT, simulation::FluidSimulation, simulation_parameters::DomainBounds, V2};

/// Positions of all particles at the end of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub positions: Vec<V2>,
    pub step_number: u64,
    pub time: FT,
    pub bounds: DomainBounds,

    // incremented by every parameter reset
    pub generation: u64,
}

impl Snapshot {
    pub fn empty(bounds: DomainBounds) -> Snapshot {
        Snapshot {
            positions: Vec::new(),
            step_number: 0,
            time: 0.,
            bounds,
            generation: 0,
        }
    }

    pub fn centroid(&self) -> Option<V2> {
        if self.positions.is_empty() {
            return None;
        }
        let sum = self.positions.iter().fold(V2::zeros(), |acc, p| acc + p);
        Some(sum / self.positions.len() as FT)
    }
}

/**
 * Hands the particle positions from the simulation thread to a renderer.
 *
 * The lock is held only while positions are copied in or out, so neither
 * side ever waits for a step or a frame.
 */
pub struct SnapshotBuffer {
    published: Mutex<Snapshot>,
}

impl SnapshotBuffer {
    pub fn new(bounds: DomainBounds) -> SnapshotBuffer {
        SnapshotBuffer {
            published: Mutex::new(Snapshot::empty(bounds)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        // a poisoned lock still holds a complete snapshot
        self.published.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, simulation: &FluidSimulation) {
        Self::copy_from(&mut self.lock(), simulation);
    }

    /// Publishes the state right after a parameter reset.
    pub fn publish_reset(&self, simulation: &FluidSimulation) {
        let mut published = self.lock();
        Self::copy_from(&mut published, simulation);
        published.generation += 1;
    }

    fn copy_from(published: &mut Snapshot, simulation: &FluidSimulation) {
        published.positions.clear();
        published.positions.extend_from_slice(simulation.positions());
        published.step_number = simulation.step_number();
        published.time = simulation.time();
        published.bounds = simulation.domain();
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }

    pub fn step_number(&self) -> u64 {
        self.lock().step_number
    }
}

/// Receives the published snapshots, e.g. once per rendered frame.
pub trait SnapshotConsumer {
    fn present(&mut self, snapshot: &Snapshot);

    /// Called before the first snapshot of a new parameter set is presented.
    fn on_parameter_reset(&mut self, bounds: DomainBounds);
}

/// Feeds `snapshot` to `consumer`, announcing a reset if its generation differs from `last_generation`.
pub fn deliver(consumer: &mut dyn SnapshotConsumer, snapshot: &Snapshot, last_generation: &mut u64) {
    if snapshot.generation != *last_generation {
        *last_generation = snapshot.generation;
        consumer.on_parameter_reset(snapshot.bounds);
    }
    consumer.present(snapshot);
}
