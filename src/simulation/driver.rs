use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{error, info, warn};

use crate::{
    boundary_handler::Boundary, error::SimulationError, simulation::FluidSimulation,
    simulation_parameters::SimulationParams, snapshot::SnapshotBuffer,
};

type StepLoopResult = (FluidSimulation, Result<(), SimulationError>);

/**
 * Runs a [`FluidSimulation`] on its own thread.
 *
 * While running, the simulation is owned by the thread, which steps it and
 * publishes every step into the shared [`SnapshotBuffer`]. The run flag is
 * only looked at between steps. Stopping joins the thread and takes the
 * simulation back, so parameters can never change during a step.
 */
pub struct SimulationDriver {
    // `None` while the thread owns the simulation
    simulation: Option<FluidSimulation>,
    thread: Option<JoinHandle<StepLoopResult>>,
    running: Arc<AtomicBool>,
    snapshots: Arc<SnapshotBuffer>,
}

impl SimulationDriver {
    pub fn new(simulation: FluidSimulation) -> SimulationDriver {
        let snapshots = Arc::new(SnapshotBuffer::new(simulation.domain()));
        snapshots.publish(&simulation);
        SimulationDriver {
            simulation: Some(simulation),
            thread: None,
            running: Arc::new(AtomicBool::new(false)),
            snapshots,
        }
    }

    pub fn snapshot_buffer(&self) -> Arc<SnapshotBuffer> {
        self.snapshots.clone()
    }

    /// False once the step loop has been stopped or has failed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The simulation, available while the driver is stopped.
    pub fn simulation(&self) -> Option<&FluidSimulation> {
        self.simulation.as_ref()
    }

    pub fn start(&mut self) -> Result<(), SimulationError> {
        if self.thread.is_some() {
            if self.is_running() {
                return Ok(());
            }
            // the previous loop ended on its own, collect it first
            self.stop()?;
        }

        let mut simulation = self.simulation.take().ok_or(SimulationError::ThreadLost)?;
        let running = self.running.clone();
        let snapshots = self.snapshots.clone();

        running.store(true, Ordering::Release);
        info!("starting simulation at step {}", simulation.step_number());
        let thread = thread::Builder::new()
            .name("sph-simulation".to_string())
            .spawn(move || {
                let mut result = Ok(());
                while running.load(Ordering::Acquire) {
                    if let Err(e) = simulation.single_step() {
                        error!("simulation step {} failed: {}", simulation.step_number(), e);
                        result = Err(e);
                        break;
                    }
                    snapshots.publish(&simulation);
                }
                running.store(false, Ordering::Release);
                (simulation, result)
            });

        match thread {
            Ok(thread) => {
                self.thread = Some(thread);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stops the step loop and waits for the step in flight. Returns the
    /// error a failed step ended the loop with.
    pub fn stop(&mut self) -> Result<(), SimulationError> {
        self.running.store(false, Ordering::Release);
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return Ok(()),
        };

        let (simulation, result) = thread.join().map_err(|_| SimulationError::ThreadLost)?;
        info!("simulation stopped at step {}", simulation.step_number());
        self.simulation = Some(simulation);
        result
    }

    /// Stops the simulation, lets `mutator` edit a copy of the current
    /// parameters and reinitializes the particles from them. The driver stays
    /// stopped; the reinitialized state is published before returning.
    pub fn reset_with_callback(
        &mut self,
        mutator: impl FnOnce(&mut SimulationParams),
    ) -> Result<(), SimulationError> {
        match self.stop() {
            Err(SimulationError::ThreadLost) => return Err(SimulationError::ThreadLost),
            Err(e) => warn!("discarding failed run before reset: {}", e),
            Ok(()) => {}
        }

        let simulation = self.simulation.as_mut().ok_or(SimulationError::ThreadLost)?;
        let mut params = *simulation.params();
        mutator(&mut params);
        simulation.reset(params)?;
        self.snapshots.publish_reset(simulation);
        Ok(())
    }

    /// Attaches a boundary, pausing the step loop if it is running.
    pub fn attach(&mut self, boundary: Boundary) -> Result<(), SimulationError> {
        let was_running = self.is_running();
        self.stop()?;
        self.simulation
            .as_mut()
            .ok_or(SimulationError::ThreadLost)?
            .attach(boundary)?;
        if was_running {
            self.start()?;
        }
        Ok(())
    }
}

impl Drop for SimulationDriver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("simulation ended with an error: {}", e);
        }
    }
}
