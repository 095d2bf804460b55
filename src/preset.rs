//! Named parameter presets.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::GenerationParams;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Preset {
    pub width: u32,
    pub height: u32,
    pub safety_tolerance: u8,
    pub guidance: f64,
    pub steps: u32,
}

impl Preset {
    /// Overwrite the dimension and quality settings of `params`.
    pub fn apply(&self, params: &mut GenerationParams) {
        params.width = self.width;
        params.height = self.height;
        params.safety_tolerance = self.safety_tolerance;
        params.guidance = self.guidance;
        params.steps = self.steps;
    }
}

pub fn builtin() -> BTreeMap<String, Preset> {
    let mut presets = BTreeMap::new();
    presets.insert(
        "Default".to_string(),
        Preset {
            width: 1024,
            height: 768,
            safety_tolerance: 2,
            guidance: 2.5,
            steps: 40,
        },
    );
    presets.insert(
        "High Quality".to_string(),
        Preset {
            width: 1440,
            height: 1024,
            safety_tolerance: 2,
            guidance: 3.0,
            steps: 60,
        },
    );
    presets.insert(
        "Quick Draft".to_string(),
        Preset {
            width: 512,
            height: 512,
            safety_tolerance: 2,
            guidance: 2.0,
            steps: 20,
        },
    );
    presets
}

/// Built-in presets with `overrides` layered on top (same name wins).
pub fn merged(overrides: &BTreeMap<String, Preset>) -> BTreeMap<String, Preset> {
    let mut presets = builtin();
    presets.extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
    presets
}
