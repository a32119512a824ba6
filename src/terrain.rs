use crate::{
    config::TerrainConfig,
    mesh_variants::{MeshVariants, SeamConfig},
    quadtree::{PatchGeometry, Quadtree},
};
use bevy::{math::Vec3Swizzles, prelude::*, render::primitives::Aabb};

/// Marks an entity as a terrain.
///
/// The terrain requires a [`TerrainConfig`] and is initialized on the next update.
/// Patches are spawned as children of this entity, in terrain-local space.
#[derive(Clone, Copy, Component)]
#[require(Transform, Visibility)]
pub struct Terrain;

/// Marks the camera whose position drives the subdivision of every terrain.
#[derive(Clone, Copy, Component)]
pub struct TerrainView;

/// The material shared by all patches of a terrain.
///
/// A plain standard material is supplied at initialization when absent.
#[derive(Clone, Component)]
pub struct TerrainMaterial(pub Handle<StandardMaterial>);

/// Spawns, despawns and re-meshes patch entities as the quadtree changes.
pub(crate) struct RenderPatches<'a, 'w, 's> {
    commands: &'a mut Commands<'w, 's>,
    variants: &'a MeshVariants,
    material: &'a Handle<StandardMaterial>,
    terrain: Entity,
    grid_resolution: f32,
    height: f32,
}

impl PatchGeometry for RenderPatches<'_, '_, '_> {
    fn create(&mut self, position: Vec2, scale: f32) -> Entity {
        // The mesh stays flat, so the bounds have to span the height range the
        // material may displace vertices into.
        let bounds = Aabb::from_min_max(
            Vec3::new(0.0, -self.height, 0.0),
            Vec3::new(self.grid_resolution, self.height, self.grid_resolution),
        );

        self.commands
            .spawn((
                Mesh3d::default(),
                MeshMaterial3d(self.material.clone()),
                Transform::from_translation(Vec3::new(position.x, 0.0, position.y))
                    .with_scale(Vec3::new(scale, 1.0, scale)),
                bounds,
            ))
            .set_parent(self.terrain)
            .id()
    }

    fn destroy(&mut self, patch: Entity) {
        self.commands.entity(patch).despawn();
    }

    fn set_mesh(&mut self, patch: Entity, seams: SeamConfig) {
        self.commands
            .entity(patch)
            .insert(Mesh3d(self.variants.get(seams)));
    }
}

/// Builds the quadtree and the mesh variant cache of every new terrain.
pub(crate) fn initialize_terrain(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    terrains: Query<
        (Entity, &TerrainConfig, Option<&TerrainMaterial>),
        (With<Terrain>, Added<TerrainConfig>, Without<Quadtree>),
    >,
) {
    for (terrain, config, material) in &terrains {
        if let Err(error) = config.validate() {
            error!("skipping terrain with invalid config: {error:#}");
            continue;
        }

        let variants = MeshVariants::generate(config.grid_resolution, &mut meshes);

        let mut terrain = commands.entity(terrain);
        terrain.insert((Quadtree::new(config), variants));

        if material.is_none() {
            terrain.insert(TerrainMaterial(materials.add(StandardMaterial::default())));
        }

        info!(
            "initialized terrain with {} lod levels and {} cells per patch",
            config.lod_count(),
            config.grid_resolution
        );
    }
}

/// Advances the quadtree of every terrain by one frame.
///
/// Runs the merge, split and stitch passes against the active viewpoint as a
/// single unit of work, so the leaf set the renderer sees is always settled.
pub(crate) fn update_terrain(
    mut commands: Commands,
    mut terrains: Query<
        (
            Entity,
            &mut Quadtree,
            &MeshVariants,
            &TerrainMaterial,
            &TerrainConfig,
            &GlobalTransform,
        ),
        With<Terrain>,
    >,
    views: Query<&GlobalTransform, With<TerrainView>>,
) {
    let Ok(view) = views.get_single() else {
        return;
    };

    for (terrain, mut quadtree, variants, material, config, terrain_transform) in &mut terrains {
        // Split distances are measured in the terrain's local plane.
        let viewer = terrain_transform
            .affine()
            .inverse()
            .transform_point3(view.translation())
            .xz();

        let mut patches = RenderPatches {
            commands: &mut commands,
            variants,
            material: &material.0,
            terrain,
            grid_resolution: config.grid_resolution as f32,
            height: config.height,
        };

        quadtree.update(viewer, &mut patches);
    }
}
