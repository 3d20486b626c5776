use thiserror::Error;

use crate::floating_type_mod::FT;

/// Parameter records that cannot produce a meaningful simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("kernel support radius h must be positive and finite, got {0}")]
    InvalidSupportRadius(FT),

    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(FT),

    #[error("particle count must be at least one")]
    NoParticles,

    #[error("particle mass must be positive, got {0}")]
    InvalidParticleMass(FT),

    #[error("domain is empty: left={left} right={right} bottom={bottom} top={top}")]
    EmptyDomain { left: FT, right: FT, bottom: FT, top: FT },

    #[error("edge margin {margin} does not fit into a domain of size {width}x{height}")]
    InvalidEdgeMargin { margin: FT, width: FT, height: FT },

    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("density kernel {0} has no positive peak value, densities would vanish")]
    DegenerateDensityKernel(&'static str),

    #[error("init placement cannot fit {requested} particles (room for {capacity})")]
    PlacementOverflow { requested: usize, capacity: usize },

    #[error("init placement region is invalid: {0}")]
    InvalidPlacementRegion(String),

    #[error("cannot access {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to read configuration: {0}")]
    Parse(String),
}

/// Failures that abort a simulation step. A failed step leaves the particle
/// arrays in an unspecified state and the driver stops.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("a worker task panicked during {pass}: {message}")]
    TaskPanicked { pass: &'static str, message: String },

    #[error("particle {particle} has invalid density {density} after the density pass")]
    InvalidDensity { particle: usize, density: FT },

    #[error("failed to spawn the simulation thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("simulation thread terminated abnormally")]
    ThreadLost,
}
