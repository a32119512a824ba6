use crate::{config::TerrainConfig, mesh_variants::SeamConfig};
use bevy::{prelude::*, utils::HashMap};
use slab::Slab;

/// The identity of a leaf patch within the neighbor index.
///
/// Derived from the floored origin and the size of the patch. Two leaves with
/// equal keys never coexist.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeKey {
    pub x: i32,
    pub y: i32,
    pub size: i32,
}

impl NodeKey {
    fn new(position: Vec2, size: f32) -> Self {
        Self {
            x: position.x.floor() as i32,
            y: position.y.floor() as i32,
            size: size as i32,
        }
    }
}

/// Creates, destroys and assigns the renderable geometry of leaf patches.
///
/// The quadtree drives all patch side effects through this interface, so the
/// subdivision logic stays independent of how patches are rendered.
pub trait PatchGeometry {
    /// Allocates a renderable at the patch origin with the given grid scale.
    fn create(&mut self, position: Vec2, scale: f32) -> Entity;
    /// Releases the renderable of a removed leaf.
    fn destroy(&mut self, patch: Entity);
    /// Binds the mesh variant matching the seam configuration.
    fn set_mesh(&mut self, patch: Entity, seams: SeamConfig);
}

/// A node of the terrain quadtree.
///
/// Parent and children are arena indices into the [`Quadtree`] node slab; the
/// parent link is a plain back-reference, ownership always runs root to leaf.
pub(crate) struct TreeNode {
    pub(crate) position: Vec2,
    pub(crate) size: f32,
    parent: Option<usize>,
    /// Either absent or exactly four children (-x-y, +x-y, -x+y, +x+y).
    children: Option<[usize; 4]>,
    is_leaf: bool,
    pub(crate) seams: SeamConfig,
    dirty: bool,
    patch: Option<Entity>,
}

impl TreeNode {
    fn new(position: Vec2, size: f32, parent: Option<usize>) -> Self {
        Self {
            position,
            size,
            parent,
            children: None,
            is_leaf: false,
            seams: SeamConfig::empty(),
            dirty: false,
            patch: None,
        }
    }

    fn key(&self) -> NodeKey {
        NodeKey::new(self.position, self.size)
    }

    fn center(&self) -> Vec2 {
        self.position + Vec2::splat(self.size * 0.5)
    }
}

/// The quadtree of a terrain, splitting and merging patches around the viewer.
///
/// Owns the root node, the flat leaf list and the neighbor index. The leaf list
/// and the neighbor index always contain the same nodes; a node enters and
/// leaves both together. Each frame [`Quadtree::update`] runs three passes in a
/// fixed order: the merge pass collapses branches the viewer has left, the split
/// pass subdivides towards the viewer, and the stitch pass recomputes the seam
/// flags of the settled leaf set and rebinds meshes where they changed.
#[derive(Component)]
pub struct Quadtree {
    nodes: Slab<TreeNode>,
    root: usize,
    leaves: Vec<usize>,
    neighbors: HashMap<NodeKey, usize>,
    min_patch_size: f32,
    split_distance: f32,
    grid_resolution: f32,
}

impl Quadtree {
    /// Creates the quadtree for a terrain, with the root patch spanning the
    /// whole world in terrain-local space.
    pub fn new(config: &TerrainConfig) -> Self {
        let mut nodes = Slab::new();
        let root = nodes.insert(TreeNode::new(Vec2::ZERO, config.world_size, None));

        Self {
            nodes,
            root,
            leaves: default(),
            neighbors: default(),
            min_patch_size: config.min_patch_size,
            split_distance: config.split_distance,
            grid_resolution: config.grid_resolution as f32,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// The position, size and seam configuration of every current leaf patch.
    pub fn leaf_patches(&self) -> impl Iterator<Item = (Vec2, f32, SeamConfig)> + '_ {
        self.leaves.iter().map(|&index| {
            let node = &self.nodes[index];
            (node.position, node.size, node.seams)
        })
    }

    /// Advances the quadtree by one frame.
    ///
    /// The viewer position is the planar location of the active viewpoint in
    /// terrain-local space. Merging before splitting prevents transient
    /// over-subdivision, and stitching last ensures the seam flags reflect the
    /// just-stabilized leaf set.
    pub fn update(&mut self, viewer: Vec2, patches: &mut impl PatchGeometry) {
        self.merge_pass(viewer, patches);
        self.split_pass(viewer, patches);
        self.stitch_pass(patches);
    }

    /// Whether the node should subdivide: the viewer is closer to the patch
    /// center than `size * split_distance` and the children stay strictly
    /// above the minimum patch size. Vertical distance is ignored.
    fn can_split(&self, index: usize, viewer: Vec2) -> bool {
        let node = &self.nodes[index];
        viewer.distance(node.center()) < node.size * self.split_distance
            && node.size * 0.5 > self.min_patch_size
    }

    /// Walks every leaf upward and collapses all branches whose parent no
    /// longer satisfies the split condition. The root never collapses.
    fn merge_pass(&mut self, viewer: Vec2, patches: &mut impl PatchGeometry) {
        // The leaf list shrinks while collapsing, so iterate over a snapshot.
        let snapshot = self.leaves.clone();

        for mut index in snapshot {
            loop {
                // Already discarded by the collapse of a sibling branch.
                let Some(node) = self.nodes.get(index) else {
                    break;
                };
                let Some(parent) = node.parent else {
                    break;
                };
                if self.can_split(parent, viewer) {
                    break;
                }

                self.set_leaf(index, false, patches);
                self.remove_children(index, patches);
                index = parent;
            }
        }
    }

    /// Subdivides depth-first from the root, turning every node that satisfies
    /// the split condition into an internal node and everything else into a leaf.
    fn split_pass(&mut self, viewer: Vec2, patches: &mut impl PatchGeometry) {
        self.split_node(self.root, viewer, patches);
    }

    fn split_node(&mut self, index: usize, viewer: Vec2, patches: &mut impl PatchGeometry) {
        if self.can_split(index, viewer) {
            self.set_leaf(index, false, patches);

            let children = match self.nodes[index].children {
                Some(children) => children,
                None => self.add_children(index),
            };

            for child in children {
                self.split_node(child, viewer, patches);
            }
        } else {
            // A leaf owns no children.
            self.remove_children(index, patches);
            self.set_leaf(index, true, patches);
        }
    }

    /// Recomputes the seam flags of every leaf and rebinds the mesh of those
    /// whose flags changed since the last assignment.
    fn stitch_pass(&mut self, patches: &mut impl PatchGeometry) {
        for index in self.leaves.clone() {
            let node = &self.nodes[index];
            let seams = self.leaf_seams(node.position, node.size);

            let node = &mut self.nodes[index];
            if seams != node.seams {
                node.seams = seams;
                node.dirty = true;
            }

            if node.dirty {
                node.dirty = false;

                if let Some(patch) = node.patch {
                    patches.set_mesh(patch, seams);
                }
            }
        }
    }

    /// Detects the coarser neighbors of a leaf.
    ///
    /// For each edge the leaf constructs the key(s) a neighbor at twice the size
    /// would have, aligned to a grid of pitch `2 * size`, and tests them against
    /// the neighbor index. Two candidates per edge cover the alignment ambiguity,
    /// since this leaf may sit at either half of the coarser pitch. This detects
    /// exactly one level of LOD difference, which the split policy guarantees is
    /// the most adjacent leaves can diverge.
    fn leaf_seams(&self, position: Vec2, size: f32) -> SeamConfig {
        let grid = size * 2.0;
        let mut seams = SeamConfig::empty();

        let above = ((position.y + size) / grid).floor() * grid;
        if self.coarse_leaf_at(position.x, above, grid)
            || self.coarse_leaf_at(position.x - size, above, grid)
        {
            seams |= SeamConfig::TOP;
        }

        let below = ((position.y - size) / grid).floor() * grid;
        if self.coarse_leaf_at(position.x, below, grid)
            || self.coarse_leaf_at(position.x - size, below, grid)
        {
            seams |= SeamConfig::BOTTOM;
        }

        let left = ((position.x - size) / grid).floor() * grid;
        if self.coarse_leaf_at(left, position.y, grid)
            || self.coarse_leaf_at(left, position.y - size, grid)
        {
            seams |= SeamConfig::LEFT;
        }

        let right = ((position.x + size) / grid).floor() * grid;
        if self.coarse_leaf_at(right, position.y, grid)
            || self.coarse_leaf_at(right, position.y - size, grid)
        {
            seams |= SeamConfig::RIGHT;
        }

        seams
    }

    fn coarse_leaf_at(&self, x: f32, y: f32, size: f32) -> bool {
        self.neighbors
            .contains_key(&NodeKey::new(Vec2::new(x, y), size))
    }

    /// Moves a node into or out of the leaf state.
    ///
    /// Entering registers the node in the leaf list and the neighbor index,
    /// allocates its renderable and marks it dirty, so the stitch pass assigns a
    /// mesh in the same frame. Leaving unregisters and releases the renderable.
    fn set_leaf(&mut self, index: usize, is_leaf: bool, patches: &mut impl PatchGeometry) {
        let node = &self.nodes[index];
        if node.is_leaf == is_leaf {
            return;
        }

        let key = node.key();

        if is_leaf {
            let patch = patches.create(node.position, node.size / self.grid_resolution);

            let node = &mut self.nodes[index];
            node.is_leaf = true;
            node.dirty = true;
            node.patch = Some(patch);

            self.leaves.push(index);
            let previous = self.neighbors.insert(key, index);
            // A duplicate key means two leaves occupy the same patch, which the
            // split/merge logic must never produce.
            assert!(previous.is_none(), "duplicate leaf at {key:?}");
        } else {
            let node = &mut self.nodes[index];
            node.is_leaf = false;

            if let Some(patch) = node.patch.take() {
                patches.destroy(patch);
            }

            let position = self.leaves.iter().position(|&leaf| leaf == index).unwrap();
            self.leaves.remove(position);
            self.neighbors.remove(&key);
        }
    }

    /// Creates the four half-size children of a node.
    fn add_children(&mut self, index: usize) -> [usize; 4] {
        let node = &self.nodes[index];
        let position = node.position;
        let half = node.size * 0.5;

        let children = [
            Vec2::new(position.x, position.y),
            Vec2::new(position.x + half, position.y),
            Vec2::new(position.x, position.y + half),
            Vec2::new(position.x + half, position.y + half),
        ]
        .map(|origin| self.nodes.insert(TreeNode::new(origin, half, Some(index))));

        self.nodes[index].children = Some(children);
        children
    }

    /// Discards the child subtree of a node, releasing any leaf geometry in it.
    fn remove_children(&mut self, index: usize, patches: &mut impl PatchGeometry) {
        if let Some(children) = self.nodes[index].children.take() {
            for child in children {
                self.set_leaf(child, false, patches);
                self.remove_children(child, patches);
                self.nodes.remove(child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::iproduct;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[derive(Default)]
    struct RecordingPatches {
        next: u32,
        alive: HashMap<Entity, (Vec2, f32)>,
        meshes: HashMap<Entity, SeamConfig>,
        mesh_assignments: usize,
    }

    impl PatchGeometry for RecordingPatches {
        fn create(&mut self, position: Vec2, scale: f32) -> Entity {
            let patch = Entity::from_raw(self.next);
            self.next += 1;
            assert!(self.alive.insert(patch, (position, scale)).is_none());
            patch
        }

        fn destroy(&mut self, patch: Entity) {
            assert!(self.alive.remove(&patch).is_some());
            self.meshes.remove(&patch);
        }

        fn set_mesh(&mut self, patch: Entity, seams: SeamConfig) {
            assert!(self.alive.contains_key(&patch));
            self.meshes.insert(patch, seams);
            self.mesh_assignments += 1;
        }
    }

    fn config() -> TerrainConfig {
        TerrainConfig::default()
    }

    fn check_invariants(quadtree: &Quadtree) {
        for (index, node) in &quadtree.nodes {
            assert_eq!(node.is_leaf, node.children.is_none());
            assert_eq!(node.is_leaf, node.patch.is_some());
            assert!(node.size >= quadtree.min_patch_size);

            if let Some(children) = node.children {
                for child in children {
                    assert_eq!(quadtree.nodes[child].parent, Some(index));
                    assert_eq!(quadtree.nodes[child].size, node.size * 0.5);
                }
            }
        }

        assert_eq!(quadtree.leaves.len(), quadtree.neighbors.len());
        for &index in &quadtree.leaves {
            let node = &quadtree.nodes[index];
            assert!(node.is_leaf);
            assert_eq!(quadtree.neighbors.get(&node.key()), Some(&index));
        }
    }

    /// Two leaves share an edge iff they touch along one axis and overlap with
    /// positive length on the other.
    fn edge_adjacent(a: (Vec2, f32), b: (Vec2, f32)) -> bool {
        let ((a_position, a_size), (b_position, b_size)) = (a, b);

        let touch_x = a_position.x + a_size == b_position.x || b_position.x + b_size == a_position.x;
        let touch_y = a_position.y + a_size == b_position.y || b_position.y + b_size == a_position.y;
        let overlap_x =
            a_position.x < b_position.x + b_size && b_position.x < a_position.x + a_size;
        let overlap_y =
            a_position.y < b_position.y + b_size && b_position.y < a_position.y + a_size;

        (touch_x && overlap_y) || (touch_y && overlap_x)
    }

    #[test]
    fn distant_viewer_keeps_a_single_root_leaf() {
        let mut quadtree = Quadtree::new(&config());
        let mut patches = RecordingPatches::default();

        quadtree.update(Vec2::splat(1_000_000.0), &mut patches);

        assert_eq!(quadtree.leaf_count(), 1);
        assert_eq!(patches.alive.len(), 1);

        let (position, scale) = patches.alive.values().next().unwrap();
        assert_eq!(*position, Vec2::ZERO);
        assert_eq!(*scale, 2048.0 / 32.0);

        check_invariants(&quadtree);
    }

    #[test]
    fn near_viewer_subdivides_to_the_finest_level() {
        let mut quadtree = Quadtree::new(&config());
        let mut patches = RecordingPatches::default();

        quadtree.update(Vec2::splat(1024.0), &mut patches);
        check_invariants(&quadtree);

        // A patch only splits while its children stay strictly above the
        // minimum patch size, so the finest leaf is twice that size.
        let smallest = quadtree
            .leaf_patches()
            .map(|(_, size, _)| size)
            .fold(f32::INFINITY, f32::min);
        assert_eq!(smallest, 64.0);
        assert_eq!(patches.alive.len(), quadtree.leaf_count());
    }

    #[test]
    fn update_converges_for_a_fixed_viewer() {
        let mut quadtree = Quadtree::new(&config());
        let mut patches = RecordingPatches::default();
        let viewer = Vec2::new(300.0, 1700.0);

        quadtree.update(viewer, &mut patches);
        let settled: Vec<_> = quadtree.leaf_patches().collect();
        let assignments = patches.mesh_assignments;

        quadtree.update(viewer, &mut patches);
        let repeated: Vec<_> = quadtree.leaf_patches().collect();

        assert_eq!(settled, repeated);
        // No seam flag changed, so no mesh was rebound either.
        assert_eq!(patches.mesh_assignments, assignments);
        check_invariants(&quadtree);
    }

    #[test]
    fn retreating_viewer_collapses_back_to_the_root() {
        let mut quadtree = Quadtree::new(&config());
        let mut patches = RecordingPatches::default();

        quadtree.update(Vec2::splat(1024.0), &mut patches);
        assert!(quadtree.leaf_count() > 1);

        quadtree.update(Vec2::splat(1_000_000.0), &mut patches);

        assert_eq!(quadtree.leaf_count(), 1);
        assert_eq!(patches.alive.len(), 1);
        assert_eq!(quadtree.nodes.len(), 1);
        check_invariants(&quadtree);
    }

    #[test]
    fn coarser_left_neighbor_sets_the_left_seam_flag() {
        let mut quadtree = Quadtree::new(&config());

        // Register a size 128 leaf covering x in [-128, 0), adjacent to the left
        // edge of a size 64 leaf at the origin.
        let coarse = Vec2::new(-128.0, 0.0);
        let index = quadtree.nodes.insert(TreeNode::new(coarse, 128.0, None));
        quadtree.neighbors.insert(NodeKey::new(coarse, 128.0), index);

        assert_eq!(
            quadtree.leaf_seams(Vec2::ZERO, 64.0),
            SeamConfig::LEFT,
            "aligned candidate"
        );
        assert_eq!(
            quadtree.leaf_seams(Vec2::new(0.0, 64.0), 64.0),
            SeamConfig::LEFT,
            "offset candidate"
        );
        assert_eq!(
            quadtree.leaf_seams(Vec2::new(64.0, 0.0), 64.0),
            SeamConfig::empty(),
            "not adjacent"
        );
    }

    #[test]
    fn seam_flags_match_brute_force_adjacency() {
        let mut quadtree = Quadtree::new(&config());
        let mut patches = RecordingPatches::default();

        quadtree.update(Vec2::new(100.0, 100.0), &mut patches);
        let leaves: Vec<_> = quadtree.leaf_patches().collect();
        assert!(leaves.iter().any(|&(_, _, seams)| !seams.is_empty()));

        for &(position, size, seams) in &leaves {
            let mut expected = SeamConfig::empty();

            for &(other_position, other_size, _) in &leaves {
                if other_size != size * 2.0
                    || !edge_adjacent((position, size), (other_position, other_size))
                {
                    continue;
                }

                if other_position.y == position.y + size {
                    expected |= SeamConfig::TOP;
                } else if other_position.y + other_size == position.y {
                    expected |= SeamConfig::BOTTOM;
                } else if other_position.x + other_size == position.x {
                    expected |= SeamConfig::LEFT;
                } else if other_position.x == position.x + size {
                    expected |= SeamConfig::RIGHT;
                }
            }

            assert_eq!(seams, expected, "leaf at {position:?} size {size}");
        }

        // Every leaf had its variant bound to the flags it reports.
        for &index in &quadtree.leaves {
            let node = &quadtree.nodes[index];
            assert_eq!(patches.meshes[&node.patch.unwrap()], node.seams);
        }
    }

    #[test]
    fn adjacent_leaves_differ_by_at_most_one_level() {
        let mut quadtree = Quadtree::new(&config());
        let mut patches = RecordingPatches::default();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let viewer = Vec2::new(
                rng.random_range(0.0..2048.0),
                rng.random_range(0.0..2048.0),
            );

            // Settle after the jump.
            quadtree.update(viewer, &mut patches);
            quadtree.update(viewer, &mut patches);
            check_invariants(&quadtree);

            let leaves: Vec<_> = quadtree.leaf_patches().collect();
            for (a, b) in iproduct!(&leaves, &leaves) {
                if edge_adjacent((a.0, a.1), (b.0, b.1)) {
                    let ratio = a.1 / b.1;
                    assert!(
                        ratio == 0.5 || ratio == 1.0 || ratio == 2.0,
                        "leaves at {:?} ({}) and {:?} ({}) differ by more than one level",
                        a.0,
                        a.1,
                        b.0,
                        b.1
                    );
                }
            }
        }
    }

    #[test]
    fn depth_is_bounded_by_the_minimum_patch_size() {
        let mut quadtree = Quadtree::new(&config());
        let mut patches = RecordingPatches::default();

        // Parked on the center of a finest patch: the distance condition holds
        // all the way down, but a size 64 node may not split once its children
        // would no longer stay above the minimum patch size of 32.
        let viewer = Vec2::splat(32.0);

        quadtree.update(viewer, &mut patches);
        check_invariants(&quadtree);

        let settled: Vec<_> = quadtree.leaf_patches().collect();
        let smallest = settled
            .iter()
            .map(|&(_, size, _)| size)
            .fold(f32::INFINITY, f32::min);
        assert_eq!(smallest, 64.0);

        // Staying parked never subdivides past the bound.
        for _ in 0..5 {
            quadtree.update(viewer, &mut patches);
            assert_eq!(quadtree.leaf_patches().collect::<Vec<_>>(), settled);
        }
        check_invariants(&quadtree);
    }
}
