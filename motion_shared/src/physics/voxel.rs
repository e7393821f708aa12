//! Voxel world.
//!
//! Unit blocks centred on integer coordinates. Characters collide as
//! axis-aligned boxes, swept against solid blocks with a slab test. Used by the
//! loopback harness and the tests; a game plugs its own [`Collider`] in.

use std::collections::HashMap;

use super::{BlockQuery, Collider, MovementEnvironment, SweepResult, WorldRelevance};
use crate::{
    config::CharacterConfig,
    math::{Vec3, Vec3i},
};

/// Components below this are treated as not moving along that axis.
const STATIC_AXIS: f32 = 1e-7;
/// Back-off from a contact before probing for a step.
const STEP_PROBE_PENETRATION: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Solid,
    Liquid,
    /// Climbable, non-colliding. `facing` points out of the wall it hangs on.
    Ladder { facing: Vec3i },
}

#[derive(Debug, Clone, Default)]
pub struct VoxelWorld {
    blocks: HashMap<Vec3i, Block>,
    loaded: Option<(Vec3i, Vec3i)>,
}

impl VoxelWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, at: Vec3i, block: Block) {
        self.blocks.insert(at, block);
    }

    pub fn clear(&mut self, at: Vec3i) {
        self.blocks.remove(&at);
    }

    /// Fills the inclusive box `min..=max`.
    pub fn fill(&mut self, min: Vec3i, max: Vec3i, block: Block) {
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    self.blocks.insert(Vec3i::new(x, y, z), block);
                }
            }
        }
    }

    pub fn get(&self, at: Vec3i) -> Option<Block> {
        self.blocks.get(&at).copied()
    }

    /// Restricts relevance to the inclusive box `min..=max`. Without a region
    /// everything counts as loaded.
    pub fn set_loaded_region(&mut self, min: Vec3i, max: Vec3i) {
        self.loaded = Some((min, max));
    }

    fn block_at(&self, position: Vec3) -> Option<Block> {
        self.get(Vec3i::containing(position))
    }
}

impl BlockQuery for VoxelWorld {
    fn is_liquid(&self, position: Vec3) -> bool {
        matches!(self.block_at(position), Some(Block::Liquid))
    }

    fn is_climbable(&self, position: Vec3) -> bool {
        matches!(self.block_at(position), Some(Block::Ladder { .. }))
    }

    fn climb_direction(&self, position: Vec3) -> Vec3i {
        match self.block_at(position) {
            Some(Block::Ladder { facing }) => facing,
            _ => Vec3i::ZERO,
        }
    }
}

impl WorldRelevance for VoxelWorld {
    fn is_position_loaded(&self, position: Vec3) -> bool {
        let Some((min, max)) = self.loaded else {
            return true;
        };
        let at = Vec3i::containing(position);
        (min.x..=max.x).contains(&at.x) && (min.y..=max.y).contains(&at.y) && (min.z..=max.z).contains(&at.z)
    }
}

impl MovementEnvironment for VoxelWorld {
    type Collider<'a> = VoxelCollider<'a>;

    fn character_collider(&self, character: &CharacterConfig) -> VoxelCollider<'_> {
        VoxelCollider {
            world: self,
            half_extents: Vec3::new(character.radius, character.height * 0.5, character.radius),
        }
    }
}

/// Character box swept through a [`VoxelWorld`].
#[derive(Debug, Clone, Copy)]
pub struct VoxelCollider<'a> {
    world: &'a VoxelWorld,
    half_extents: Vec3,
}

impl VoxelCollider<'_> {
    /// Solid cells the box could touch on its way from `from` to `to`.
    fn candidates(&self, from: Vec3, to: Vec3) -> impl Iterator<Item = Vec3i> + '_ {
        let h = self.half_extents;
        let lo = Vec3::new(from.x.min(to.x) - h.x, from.y.min(to.y) - h.y, from.z.min(to.z) - h.z);
        let hi = Vec3::new(from.x.max(to.x) + h.x, from.y.max(to.y) + h.y, from.z.max(to.z) + h.z);
        let min = Vec3i::containing(lo).offset(-1, -1, -1);
        let max = Vec3i::containing(hi).offset(1, 1, 1);
        (min.x..=max.x)
            .flat_map(move |x| (min.y..=max.y).flat_map(move |y| (min.z..=max.z).map(move |z| Vec3i::new(x, y, z))))
            .filter(|cell| matches!(self.world.get(*cell), Some(Block::Solid)))
    }
}

impl Collider for VoxelCollider<'_> {
    fn sweep(&self, from: Vec3, to: Vec3, penetration: f32, _slope_limit: f32) -> SweepResult {
        let delta = to - from;
        let mut result = SweepResult::miss(from, to);
        for cell in self.candidates(from, to) {
            // Minkowski sum of the block and the character box.
            let centre = cell.to_vec3();
            let reach = self.half_extents + Vec3::new(0.5, 0.5, 0.5);
            let Some((fraction, normal)) = slab_test(from, delta, centre - reach, centre + reach, penetration) else {
                continue;
            };
            if !result.has_hit || fraction < result.fraction {
                result.has_hit = true;
                result.fraction = fraction;
                result.normal = normal;
            }
        }
        result
    }

    fn check_for_step(
        &self,
        hit: &SweepResult,
        direction: Vec3,
        step_height: f32,
        slope_limit: f32,
        probe_distance: f32,
    ) -> bool {
        if !hit.has_hit || step_height <= 0.0 {
            return false;
        }
        let forward = direction.horizontal().normalize_or_zero();
        if forward == Vec3::ZERO {
            return false;
        }

        let contact = hit.contact_position();
        let lifted = contact + Vec3::UP * step_height;
        if self.sweep(contact, lifted, STEP_PROBE_PENETRATION, -1.0).has_hit {
            return false;
        }
        let ahead = lifted + forward * probe_distance;
        if self.sweep(lifted, ahead, STEP_PROBE_PENETRATION, -1.0).has_hit {
            return false;
        }
        let landing = self.sweep(ahead, ahead - Vec3::UP * step_height, STEP_PROBE_PENETRATION, -1.0);
        landing.has_hit && landing.normal.dot(Vec3::UP) >= slope_limit
    }

    fn epsilon(&self) -> f32 {
        f32::EPSILON
    }
}

/// Ray from `origin` along `delta` against the box `min..max`.
///
/// Returns the entry fraction in `[0, 1]` and the face normal. A ray that
/// starts overlapping the box counts as a hit at 0 only while the overlap is
/// within `penetration`; deeper overlaps are ignored so a stuck character can
/// move out.
fn slab_test(origin: Vec3, delta: Vec3, min: Vec3, max: Vec3, penetration: f32) -> Option<(f32, Vec3)> {
    let axes = [
        (origin.x, delta.x, min.x, max.x, Vec3::new(1.0, 0.0, 0.0)),
        (origin.y, delta.y, min.y, max.y, Vec3::new(0.0, 1.0, 0.0)),
        (origin.z, delta.z, min.z, max.z, Vec3::new(0.0, 0.0, 1.0)),
    ];

    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;
    let mut enter_speed = 0.0;
    let mut normal = Vec3::ZERO;

    for (o, d, lo, hi, axis) in axes {
        if d.abs() < STATIC_AXIS {
            // Touching or barely overlapping along a static axis is no contact.
            if o <= lo + penetration || o >= hi - penetration {
                return None;
            }
            continue;
        }
        let (near, far, face) = if d > 0.0 {
            ((lo - o) / d, (hi - o) / d, -axis)
        } else {
            ((hi - o) / d, (lo - o) / d, axis)
        };
        if near > t_enter {
            t_enter = near;
            enter_speed = d.abs();
            normal = face;
        }
        t_exit = t_exit.min(far);
    }

    if t_enter > t_exit || t_exit <= 0.0 || t_enter > 1.0 {
        return None;
    }
    if t_enter < 0.0 {
        if -t_enter * enter_speed > penetration {
            return None;
        }
        t_enter = 0.0;
    }
    Some((t_enter, normal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character() -> CharacterConfig {
        CharacterConfig::default()
    }

    #[test]
    fn falls_onto_floor() {
        let mut world = VoxelWorld::new();
        world.fill(Vec3i::new(-2, 0, -2), Vec3i::new(2, 0, 2), Block::Solid);
        let collider = world.character_collider(&character());

        let from = Vec3::new(0.0, 3.3, 0.0);
        let hit = collider.sweep(from, Vec3::new(0.0, -0.7, 0.0), 0.04, -1.0);
        assert!(hit.has_hit);
        assert_eq!(hit.normal, Vec3::UP);
        // Feet meet the floor top (y=0.5) with the centre 0.8 above it.
        assert!((hit.contact_position().y - 1.3).abs() < 1e-5);
    }

    #[test]
    fn sliding_along_floor_is_free() {
        let mut world = VoxelWorld::new();
        world.fill(Vec3i::new(-5, 0, -5), Vec3i::new(5, 0, 5), Block::Solid);
        let collider = world.character_collider(&character());
        let from = Vec3::new(0.0, 1.3, 0.0);
        assert!(!collider.sweep(from, Vec3::new(3.0, 1.3, 0.0), 0.03, 0.6).has_hit);
    }

    #[test]
    fn wall_normal_faces_mover() {
        let mut world = VoxelWorld::new();
        world.set(Vec3i::new(3, 1, 0), Block::Solid);
        let collider = world.character_collider(&character());
        let hit = collider.sweep(Vec3::new(0.0, 1.3, 0.0), Vec3::new(5.0, 1.3, 0.0), 0.03, 0.6);
        assert!(hit.has_hit);
        assert_eq!(hit.normal, Vec3::new(-1.0, 0.0, 0.0));
        assert!((hit.contact_position().x - 2.2).abs() < 1e-5);
    }

    #[test]
    fn liquids_and_ladders_do_not_collide() {
        let mut world = VoxelWorld::new();
        world.set(Vec3i::new(2, 1, 0), Block::Liquid);
        world.set(Vec3i::new(3, 1, 0), Block::Ladder { facing: Vec3i::new(-1, 0, 0) });
        let collider = world.character_collider(&character());
        assert!(!collider.sweep(Vec3::new(0.0, 1.3, 0.0), Vec3::new(5.0, 1.3, 0.0), 0.03, 0.6).has_hit);
        assert!(world.is_liquid(Vec3::new(2.2, 0.8, -0.3)));
        assert!(world.is_climbable(Vec3::new(3.0, 1.0, 0.0)));
        assert_eq!(world.climb_direction(Vec3::new(3.0, 1.0, 0.0)), Vec3i::new(-1, 0, 0));
    }

    #[test]
    fn step_check_accepts_low_ledges_only() {
        let mut world = VoxelWorld::new();
        world.fill(Vec3i::new(-5, 0, -5), Vec3i::new(5, 0, 5), Block::Solid);
        world.set(Vec3i::new(3, 1, 0), Block::Solid);
        let collider = world.character_collider(&character());
        let hit = collider.sweep(Vec3::new(0.0, 1.3, 0.0), Vec3::new(5.0, 1.3, 0.0), 0.03, 0.6);
        let forward = Vec3::new(1.0, 0.0, 0.0);

        assert!(!collider.check_for_step(&hit, forward, 0.35, 0.6, 0.05));
        assert!(collider.check_for_step(&hit, forward, 1.05, 0.6, 0.05));

        world.set(Vec3i::new(3, 2, 0), Block::Solid);
        let collider = world.character_collider(&character());
        assert!(!collider.check_for_step(&hit, forward, 1.05, 0.6, 0.05));
    }

    #[test]
    fn relevance_region() {
        let mut world = VoxelWorld::new();
        assert!(world.is_position_loaded(Vec3::new(1e4, 0.0, 0.0)));
        world.set_loaded_region(Vec3i::new(-1, -1, -1), Vec3i::new(1, 1, 1));
        assert!(world.is_position_loaded(Vec3::new(1.4, 0.0, -1.4)));
        assert!(!world.is_position_loaded(Vec3::new(1.6, 0.0, 0.0)));
    }
}
