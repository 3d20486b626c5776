/*!
Two-dimensional SPH fluid solver.

[`FluidSimulation`] advances the particles; [`driver::SimulationDriver`] runs
it on a background thread and publishes every step into a
[`snapshot::SnapshotBuffer`] for rendering.
*/

mod platform;
mod simulation;

pub use simulation::*;

pub use platform::start;
