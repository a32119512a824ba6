//! Contains a debug resource and systems controlling it to visualize the
//! quadtree and the seam flags of every terrain.
use crate::{mesh_variants::SeamConfig, quadtree::Quadtree, terrain::Terrain};
use bevy::{
    color::palettes::basic::{GREEN, RED, YELLOW},
    prelude::*,
};
use std::f32::consts::FRAC_PI_2;

/// Adds gizmo visualization of the terrain patches and control systems for it.
pub struct TerrainDebugPlugin;

impl Plugin for TerrainDebugPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<DebugTerrain>()
            .add_systems(Update, (toggle_debug, draw_patch_gizmos));
    }
}

#[derive(Clone, Resource)]
pub struct DebugTerrain {
    pub show_patches: bool,
    pub show_seams: bool,
}

impl Default for DebugTerrain {
    fn default() -> Self {
        Self {
            show_patches: true,
            show_seams: true,
        }
    }
}

pub fn toggle_debug(input: Res<ButtonInput<KeyCode>>, mut debug: ResMut<DebugTerrain>) {
    if input.just_pressed(KeyCode::KeyP) {
        debug.show_patches = !debug.show_patches;
        println!(
            "Toggled the patch view {}.",
            if debug.show_patches { "on" } else { "off" }
        )
    }
    if input.just_pressed(KeyCode::KeyO) {
        debug.show_seams = !debug.show_seams;
        println!(
            "Toggled the seam view {}.",
            if debug.show_seams { "on" } else { "off" }
        )
    }
}

/// Outlines every leaf patch and highlights the edges that are collapsed
/// against a coarser neighbor.
pub fn draw_patch_gizmos(
    mut gizmos: Gizmos,
    debug: Res<DebugTerrain>,
    terrains: Query<(&Quadtree, &GlobalTransform), With<Terrain>>,
) {
    if !debug.show_patches && !debug.show_seams {
        return;
    }

    for (quadtree, transform) in &terrains {
        for (position, size, seams) in quadtree.leaf_patches() {
            let origin = transform.transform_point(Vec3::new(position.x, 0.0, position.y));
            let center =
                transform.transform_point(Vec3::new(position.x + size * 0.5, 0.0, position.y + size * 0.5));

            if debug.show_patches {
                gizmos.line(origin, origin + Vec3::Y * 4.0, GREEN);
                gizmos.rect(
                    Isometry3d::new(center, Quat::from_rotation_x(FRAC_PI_2)),
                    Vec2::splat(size),
                    YELLOW,
                );
            }

            if debug.show_seams {
                let edges = [
                    (SeamConfig::TOP, Vec3::new(0.0, 0.0, size * 0.5), true),
                    (SeamConfig::BOTTOM, Vec3::new(0.0, 0.0, -size * 0.5), true),
                    (SeamConfig::LEFT, Vec3::new(-size * 0.5, 0.0, 0.0), false),
                    (SeamConfig::RIGHT, Vec3::new(size * 0.5, 0.0, 0.0), false),
                ];

                for (seam, offset, horizontal) in edges {
                    if !seams.contains(seam) {
                        continue;
                    }

                    let scale = if horizontal {
                        Vec3::new(size, 16.0, 1.0)
                    } else {
                        Vec3::new(1.0, 16.0, size)
                    };
                    gizmos.cuboid(
                        Transform::from_translation(center + offset + Vec3::Y).with_scale(scale),
                        RED,
                    );
                }
            }
        }
    }
}
