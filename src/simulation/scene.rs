use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    boundary_handler::{Boundary, LineBoundary, PlaneBoundary},
    error::ConfigError,
    floating_type_mod::FT,
    simulation_parameters::{DomainBounds, InitPlacement, SimulationParams},
    V2,
};

fn default_damp() -> FT {
    0.5
}

/// Static obstacle of a scene. Coordinates are in units of the domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SceneBoundary {
    Line {
        start: V2,
        end: V2,
        #[serde(default = "default_damp")]
        damp: FT,
    },
    /// Infinite wall through `point`, `normal` points into the fluid.
    Plane {
        point: V2,
        normal: V2,
        #[serde(default = "default_damp")]
        damp: FT,
    },
}

impl SceneBoundary {
    pub fn to_boundary(&self) -> Boundary {
        match *self {
            SceneBoundary::Line { start, end, damp } => LineBoundary::new(start, end, damp).into(),
            SceneBoundary::Plane { point, normal, damp } => PlaneBoundary::new(point, normal, damp).into(),
        }
    }
}

/// Scene file: boundaries plus optional overrides of the domain and the initial fluid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub domain: Option<DomainBounds>,
    #[serde(default)]
    pub init_placement: Option<InitPlacement>,
    #[serde(default)]
    pub boundaries: Vec<SceneBoundary>,
}

impl SceneConfig {
    pub fn from_yaml(yaml: &str) -> Result<SceneConfig, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(format!("scene: {}", e)))
    }

    pub fn apply_to(&self, simulation_params: &mut SimulationParams) {
        if let Some(domain) = self.domain {
            simulation_params.domain = domain;
        }
        if let Some(init_placement) = self.init_placement {
            simulation_params.init_placement = init_placement;
        }
    }

    pub fn boundaries(&self) -> Vec<Boundary> {
        self.boundaries.iter().map(SceneBoundary::to_boundary).collect()
    }
}

/**
 * Parses simulation parameters from YAML.
 *
 * Every top-level key of `overwrite_yaml` replaces the key of the same name
 * in `params_yaml`. Overwriting a key the parameter file does not contain is
 * an error.
 */
pub fn load_simulation_params(params_yaml: &str, overwrite_yaml: Option<&str>) -> Result<SimulationParams, ConfigError> {
    let mut simulation_params_serde: serde_yaml::Value =
        serde_yaml::from_str(params_yaml).map_err(|e| ConfigError::Parse(format!("simulation config: {}", e)))?;

    if let Some(overwrite_yaml) = overwrite_yaml {
        let overwrite_config: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(overwrite_yaml)
            .map_err(|e| ConfigError::Parse(format!("overwrite config: {}", e)))?;
        let mapping = simulation_params_serde
            .as_mapping_mut()
            .ok_or_else(|| ConfigError::Parse("simulation config is not a mapping".to_string()))?;
        for (k, v) in overwrite_config.into_iter() {
            let slot = mapping
                .get_mut(&serde_yaml::Value::String(k.clone()))
                .ok_or_else(|| ConfigError::Parse(format!("not able to find attribute {}", k)))?;
            *slot = v;
        }
    }

    serde_yaml::from_value(simulation_params_serde)
        .map_err(|e| ConfigError::Parse(format!("failed to unpack simulation parameters: {}", e)))
}
