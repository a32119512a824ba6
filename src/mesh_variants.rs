use bevy::{
    prelude::*,
    render::{mesh::Indices, render_asset::RenderAssetUsages, render_resource::PrimitiveTopology},
};
use bitflags::bitflags;
use itertools::iproduct;

bitflags! {
    /// The seam configuration of a patch.
    ///
    /// A set flag means the neighboring patch across that edge is one level coarser
    /// (half resolution), so the edge has to be collapsed to avoid a crack.
    /// The bits double as the index into the [`MeshVariants`] cache:
    /// bit 0 = top, bit 1 = bottom, bit 2 = left, bit 3 = right.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct SeamConfig: u8 {
        /// The neighbor towards +y is coarser.
        const TOP = 1 << 0;
        /// The neighbor towards -y is coarser.
        const BOTTOM = 1 << 1;
        /// The neighbor towards -x is coarser.
        const LEFT = 1 << 2;
        /// The neighbor towards +x is coarser.
        const RIGHT = 1 << 3;
    }
}

/// The count of precomputed grid meshes, one per seam configuration.
pub const VARIANT_COUNT: usize = 1 << 4;

/// A flat grid triangulation on the unit grid, before it is uploaded as a mesh.
///
/// Vertices span `0..=cells` on the x and z axes at zero height. The consuming
/// patch scales the grid to its size via its transform.
#[derive(Clone, PartialEq, Debug)]
pub(crate) struct GridMesh {
    cells: u32,
    positions: Vec<[f32; 3]>,
    indices: Vec<u32>,
}

impl GridMesh {
    fn to_mesh(&self) -> Mesh {
        let uvs = self
            .positions
            .iter()
            .map(|&[x, _, z]| [x / self.cells as f32, z / self.cells as f32])
            .collect::<Vec<_>>();
        let normals = vec![[0.0, 1.0, 0.0]; self.positions.len()];

        Mesh::new(
            PrimitiveTopology::TriangleList,
            RenderAssetUsages::default(),
        )
        .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, self.positions.clone())
        .with_inserted_attribute(Mesh::ATTRIBUTE_NORMAL, normals)
        .with_inserted_attribute(Mesh::ATTRIBUTE_UV_0, uvs)
        .with_inserted_indices(Indices::U32(self.indices.clone()))
    }
}

/// Triangulates a flat grid of `cells`x`cells` cells for the given seam configuration.
///
/// Regular cells are triangulated as two triangles. Along a collapsed edge the
/// triangles are re-fanned, so that the edge only uses every other boundary vertex
/// and lines up with a neighbor at twice the cell size. Where two collapsed edges
/// meet in a corner cell, exactly one rule applies, with the precedence
/// right, left, top, bottom. This ordering has to stay bit-for-bit stable, since
/// the neighboring patches stitch against it.
pub(crate) fn generate_grid(cells: u32, seams: SeamConfig) -> GridMesh {
    let n = cells;
    let collapse_top = seams.contains(SeamConfig::TOP);
    let collapse_bottom = seams.contains(SeamConfig::BOTTOM);
    let collapse_left = seams.contains(SeamConfig::LEFT);
    let collapse_right = seams.contains(SeamConfig::RIGHT);

    let mut positions = Vec::with_capacity(((n + 1) * (n + 1)) as usize);
    for (y, x) in iproduct!(0..=n, 0..=n) {
        positions.push([x as f32, 0.0, y as f32]);
    }

    // Slots that no rule writes keep index 0 and form degenerate triangles,
    // which the rasterizer discards.
    let mut indices = vec![0u32; (n * n * 6) as usize];

    let mut ti = 0;
    let mut vi = 0u32;

    for y in 0..n {
        for x in 0..n {
            if collapse_right && x == n - 1 {
                if y % 2 != 0 {
                    indices[ti] = if y != n - 1 || !collapse_top {
                        vi + n + 1
                    } else {
                        vi + n
                    };
                    indices[ti + 1] = vi + n + 2;
                    indices[ti + 2] = vi;

                    indices[ti + 3] = vi - n;
                    indices[ti + 4] = vi;
                    indices[ti + 5] = vi + n + 2;
                } else {
                    indices[ti] = if y != 0 || !collapse_bottom {
                        vi
                    } else {
                        vi - 1
                    };
                    indices[ti + 1] = vi + n + 1;
                    indices[ti + 2] = vi + 1;
                }
            } else if collapse_left && x == 0 {
                if y % 2 != 0 {
                    if y != n - 1 || !collapse_top {
                        indices[ti] = vi + n + 1;
                        indices[ti + 1] = vi + n + 2;
                        indices[ti + 2] = vi + 1;
                    }

                    indices[ti + 3] = vi + n + 1;
                    indices[ti + 4] = vi + 1;
                    indices[ti + 5] = vi - n - 1;
                } else if y != 0 || !collapse_bottom {
                    indices[ti] = vi + n + 2;
                    indices[ti + 1] = vi + 1;
                    indices[ti + 2] = vi;
                }
            } else if collapse_top && y == n - 1 {
                if x % 2 != 0 {
                    indices[ti] = vi + n;
                    indices[ti + 1] = vi + n + 2;
                    indices[ti + 2] = vi;

                    indices[ti + 3] = vi + 1;
                    indices[ti + 4] = vi;
                    indices[ti + 5] = vi + n + 2;
                } else {
                    indices[ti] = vi;
                    indices[ti + 1] = vi + n + 1;
                    indices[ti + 2] = vi + 1;
                }
            } else if collapse_bottom && y == 0 {
                if x % 2 != 0 {
                    indices[ti] = vi + n + 1;
                    indices[ti + 1] = vi + n + 2;
                    indices[ti + 2] = vi + 1;

                    indices[ti + 3] = vi + 1;
                    indices[ti + 4] = vi - 1;
                    indices[ti + 5] = vi + n + 1;
                } else {
                    indices[ti] = vi;
                    indices[ti + 1] = vi + n + 1;
                    indices[ti + 2] = vi + n + 2;
                }
            } else {
                indices[ti] = vi;
                indices[ti + 1] = vi + n + 1;
                indices[ti + 2] = vi + 1;
                indices[ti + 3] = vi + 1;
                indices[ti + 4] = vi + n + 1;
                indices[ti + 5] = vi + n + 2;
            }

            ti += 6;
            vi += 1;
        }

        vi += 1;
    }

    GridMesh {
        cells: n,
        positions,
        indices,
    }
}

/// The precomputed grid meshes of a terrain, one per seam configuration.
///
/// Generated once at terrain initialization, so that any seam change only requires
/// an index lookup instead of remeshing. The meshes are immutable and shared by all
/// leaves with the same configuration.
#[derive(Component)]
pub struct MeshVariants {
    handles: [Handle<Mesh>; VARIANT_COUNT],
}

impl MeshVariants {
    pub(crate) fn generate(cells: u32, meshes: &mut Assets<Mesh>) -> Self {
        let handles = std::array::from_fn(|index| {
            let seams = SeamConfig::from_bits(index as u8).unwrap();
            meshes.add(generate_grid(cells, seams).to_mesh())
        });

        Self { handles }
    }

    /// Looks up the precomputed mesh for the seam configuration.
    pub fn get(&self, seams: SeamConfig) -> Handle<Mesh> {
        self.handles[seams.bits() as usize].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const CELLS: u32 = 8;

    fn referenced(grid: &GridMesh) -> HashSet<u32> {
        grid.indices.iter().copied().collect()
    }

    /// The boundary vertex indices of odd parity along one edge.
    fn odd_edge_vertices(seam: SeamConfig) -> Vec<u32> {
        let row = CELLS + 1;
        (1..CELLS)
            .step_by(2)
            .map(|i| {
                if seam == SeamConfig::TOP {
                    CELLS * row + i
                } else if seam == SeamConfig::BOTTOM {
                    i
                } else if seam == SeamConfig::LEFT {
                    i * row
                } else {
                    i * row + CELLS
                }
            })
            .collect()
    }

    #[test]
    fn counts_match_for_all_variants() {
        for index in 0..VARIANT_COUNT {
            let seams = SeamConfig::from_bits(index as u8).unwrap();
            let grid = generate_grid(CELLS, seams);

            assert_eq!(grid.positions.len() as u32, (CELLS + 1) * (CELLS + 1));
            assert_eq!(grid.indices.len() as u32, CELLS * CELLS * 6);
            assert!(grid
                .indices
                .iter()
                .all(|&index| index < (CELLS + 1) * (CELLS + 1)));
        }
    }

    #[test]
    fn generation_is_deterministic() {
        for index in 0..VARIANT_COUNT {
            let seams = SeamConfig::from_bits(index as u8).unwrap();
            assert_eq!(generate_grid(CELLS, seams), generate_grid(CELLS, seams));
        }
    }

    #[test]
    fn regular_grid_uses_every_vertex() {
        let grid = generate_grid(CELLS, SeamConfig::empty());
        assert_eq!(referenced(&grid).len() as u32, (CELLS + 1) * (CELLS + 1));
    }

    #[test]
    fn collapsed_edges_skip_odd_boundary_vertices() {
        for seam in [
            SeamConfig::TOP,
            SeamConfig::BOTTOM,
            SeamConfig::LEFT,
            SeamConfig::RIGHT,
        ] {
            let used = referenced(&generate_grid(CELLS, seam));

            for vertex in odd_edge_vertices(seam) {
                assert!(
                    !used.contains(&vertex),
                    "{seam:?} still references boundary vertex {vertex}"
                );
            }
        }
    }

    #[test]
    fn corner_cells_respect_precedence() {
        // Where two collapsed edges meet, both edges still have to end up coarse.
        for (first, second) in [
            (SeamConfig::RIGHT, SeamConfig::TOP),
            (SeamConfig::RIGHT, SeamConfig::BOTTOM),
            (SeamConfig::LEFT, SeamConfig::TOP),
            (SeamConfig::LEFT, SeamConfig::BOTTOM),
        ] {
            let used = referenced(&generate_grid(CELLS, first | second));

            for vertex in odd_edge_vertices(first)
                .into_iter()
                .chain(odd_edge_vertices(second))
            {
                assert!(
                    !used.contains(&vertex),
                    "{:?} still references boundary vertex {vertex}",
                    first | second
                );
            }
        }
    }
}
