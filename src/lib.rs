//! This crate provides an adaptive level-of-detail terrain for the Bevy Engine.
//!
//! # Background
//! There are two questions this kind of terrain renderer has to answer:
//!
//! ## Which part of the terrain deserves how much detail?
//! Rendering the whole terrain at full resolution wastes almost all of its
//! vertices on patches far away from the viewer.
//! Therefore the terrain is subdivided by a quadtree: every patch splits into
//! four half-size patches once the viewer comes closer than a multiple of its
//! size, and collapses again once the viewer leaves.
//! The [`Quadtree`](quadtree::Quadtree) maintains this structure each frame with
//! a merge pass, a split pass and a seam pass, so the set of rendered leaf
//! patches is always settled before it is drawn.
//!
//! ## How to avoid cracks between patches of different detail?
//! Wherever a fine patch borders a coarser one, the extra vertices along the
//! shared edge would produce T-junction cracks.
//! Instead of remeshing at runtime, the [`MeshVariants`](mesh_variants::MeshVariants)
//! cache precomputes all 16 grid triangulations, one per combination of the four
//! collapsible edges, and every leaf simply looks up the variant matching its
//! [`SeamConfig`](mesh_variants::SeamConfig).
//! The flags are recomputed per frame against a neighbor index keyed by patch
//! position and size, which detects the one level of difference the split
//! policy permits between adjacent leaves.

use crate::terrain::{initialize_terrain, update_terrain};
use bevy::prelude::*;

pub mod config;
pub mod debug;
pub mod mesh_variants;
pub mod quadtree;
pub mod terrain;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        config::TerrainConfig,
        debug::TerrainDebugPlugin,
        mesh_variants::{MeshVariants, SeamConfig},
        quadtree::Quadtree,
        terrain::{Terrain, TerrainMaterial, TerrainView},
        TerrainPlugin,
    };
}

/// Adds the terrain initialization and the per-frame quadtree update.
///
/// The whole update (merge, split, seam pass) runs as one unit of work each
/// frame; nothing mutates the quadtree outside of it.
pub struct TerrainPlugin;

impl Plugin for TerrainPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, (initialize_terrain, update_terrain).chain());
    }
}
