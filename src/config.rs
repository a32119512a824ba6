use anyhow::{ensure, Context, Result};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Configures a terrain entity.
///
/// The quadtree and the mesh variant cache are derived from this config once, when the
/// terrain is initialized. Changing it afterwards has no effect.
#[derive(Clone, Debug, Component, Serialize, Deserialize)]
pub struct TerrainConfig {
    /// The edge length of the root patch.
    pub world_size: f32,
    /// The lower bound on patch size.
    /// A patch only subdivides while its children stay strictly above this
    /// size, so the finest rendered patch is twice this value.
    pub min_patch_size: f32,
    /// The cell count per edge of the patch mesh.
    /// All patches share the same grid and are scaled to their size.
    pub grid_resolution: u32,
    /// The vertical extent of the terrain, used for the patch bounding volumes.
    pub height: f32,
    /// The split threshold multiplier.
    /// A patch subdivides once the viewer is closer than `size * split_distance`
    /// to its center.
    pub split_distance: f32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            world_size: 2048.0,
            min_patch_size: 32.0,
            grid_resolution: 32,
            height: 200.0,
            split_distance: 1.75,
        }
    }
}

impl TerrainConfig {
    /// Loads and validates a config from a RON file.
    pub fn from_ron(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read terrain config at {}", path.display()))?;
        let config: Self = ron::from_str(&contents)
            .with_context(|| format!("failed to parse terrain config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.world_size > 0.0, "world_size must be positive");
        ensure!(self.min_patch_size > 0.0, "min_patch_size must be positive");
        ensure!(
            self.min_patch_size <= self.world_size,
            "min_patch_size ({}) exceeds world_size ({})",
            self.min_patch_size,
            self.world_size
        );
        ensure!(
            self.grid_resolution >= 2 && self.grid_resolution % 2 == 0,
            "grid_resolution must be even and at least 2, got {}",
            self.grid_resolution
        );
        ensure!(self.split_distance > 0.0, "split_distance must be positive");
        Ok(())
    }

    /// The count of size levels between the root patch and the minimum patch size.
    pub fn lod_count(&self) -> u32 {
        (self.world_size / self.min_patch_size).log2() as u32 + 1
    }
}
