//! Kinematic character stepper.
//!
//! One call advances one character by one input sample. The step is a pure
//! function of its arguments: the same previous state, input and world give
//! the same result bit for bit. Events are collected only on an input's first
//! application, so replays during reconciliation stay silent.

use std::f32::consts::PI;

use tracing::trace;

use super::{BlockQuery, Collider, MovementEnvironment, PhysicsConfig, WorldRelevance};
use crate::{
    config::CharacterConfig,
    event::MovementEvent,
    math::{Quat, Vec3, Vec3i},
    state::{InputSample, ModeFlags, MovementMode, PhysicalState},
};

const HORIZONTAL_PENETRATION: f32 = 0.03;
const HORIZONTAL_PENETRATION_LEEWAY: f32 = 0.04;
const VERTICAL_PENETRATION: f32 = 0.04;
const VERTICAL_PENETRATION_LEEWAY: f32 = 0.05;
const CHECK_FORWARD_DIST: f32 = 0.05;
const MAX_SWEEP_ITERATIONS: u32 = 10;

/// Upward nudge applied every step while only partly submerged.
const SWIM_BUOYANCY: f32 = 0.02;
/// Extra lift when leaving liquid while rising, so the character clears the edge.
const LIQUID_EXIT_BOOST: f32 = 4.0;
/// Squared horizontal speed above which the body turns toward its velocity.
const TURN_SPEED_SQ: f32 = 0.01;

/// Result of a single step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub state: PhysicalState,
    /// Side effects; empty unless the input was on its first application.
    pub events: Vec<MovementEvent>,
}

/// Advances `previous` by `input`.
pub fn step(
    previous: &PhysicalState,
    input: &InputSample,
    character: &CharacterConfig,
    physics: &PhysicsConfig,
    collider: &dyn Collider,
    blocks: &dyn BlockQuery,
    relevance: &dyn WorldRelevance,
) -> StepOutcome {
    let mut stepper = Stepper {
        character,
        physics,
        collider,
        blocks,
        record: input.is_first_application,
        events: Vec::new(),
    };

    let mut state = PhysicalState {
        sequence_number: input.sequence_number,
        ..*previous
    };

    if state.mode == MovementMode::None {
        trace!(seq = input.sequence_number, "movement disabled");
    } else if !relevance.is_position_loaded(previous.position) {
        trace!(seq = input.sequence_number, "position not loaded, holding still");
    } else {
        let desired = stepper.desired_velocity(&state, input);
        if state.mode.responds_to_environment() {
            stepper.check_mode(&mut state);
        }
        stepper.walk(&mut state, input, desired);
        stepper.check_block_entry(previous.position, state.position);
    }

    state.timestamp = previous.timestamp + i64::from(input.delta_ms);
    state.pitch = input.pitch;
    state.yaw = input.yaw;
    state.rotation = facing(&state, input, character);

    StepOutcome {
        state,
        events: stepper.events,
    }
}

/// [`step`] against a bundled environment.
pub fn step_in<E: MovementEnvironment>(
    env: &E,
    previous: &PhysicalState,
    input: &InputSample,
    character: &CharacterConfig,
    physics: &PhysicsConfig,
) -> StepOutcome {
    let collider = env.character_collider(character);
    step(previous, input, character, physics, &collider, env, env)
}

fn facing(state: &PhysicalState, input: &InputSample, character: &CharacterConfig) -> Quat {
    let horizontal = state.velocity.horizontal();
    if character.face_movement_direction && horizontal.len_sq() > TURN_SPEED_SQ {
        Quat::from_axis_angle(Vec3::UP, horizontal.x.atan2(horizontal.z))
    } else {
        Quat::from_yaw_degrees(input.yaw)
    }
}

struct Stepper<'a> {
    character: &'a CharacterConfig,
    physics: &'a PhysicsConfig,
    collider: &'a dyn Collider,
    blocks: &'a dyn BlockQuery,
    record: bool,
    events: Vec<MovementEvent>,
}

impl Stepper<'_> {
    fn emit(&mut self, event: MovementEvent) {
        if self.record {
            self.events.push(event);
        }
    }

    fn desired_velocity(&self, state: &PhysicalState, input: &InputSample) -> Vec3 {
        let mut desired = input.movement_direction;
        // Below 1 is allowed: the character may be walking slowly.
        if desired.len_sq() > 1.0 {
            desired = desired.normalize();
        }
        desired = desired * self.character.speed_multiplier;

        let mut max_speed = state.mode.max_speed();
        if input.running {
            max_speed *= self.character.run_factor;
        }
        if input.crouching {
            max_speed *= self.character.crouch_factor;
        }

        // Grounded characters cannot use a vertical component; keep the speed.
        if state.grounded && desired.y != 0.0 {
            let speed = desired.len();
            desired.y = 0.0;
            if desired.x != 0.0 || desired.z != 0.0 {
                desired = desired.normalize() * speed;
            }
        }
        desired * max_speed
    }

    fn check_mode(&mut self, state: &mut PhysicalState) {
        let height = self.character.height;
        let top_wet = self.blocks.is_liquid(state.position + Vec3::UP * (height * 0.5));
        let bottom_wet = self.blocks.is_liquid(state.position - Vec3::UP * (height * 0.25));
        let diving = top_wet && bottom_wet;
        let swimming = top_wet != bottom_wet;

        let climb = if diving || swimming {
            None
        } else {
            self.find_climbable(state.position)
        };

        let was = state.mode;
        let velocity = &mut state.velocity;
        let mode = if diving {
            MovementMode::Diving
        } else if swimming {
            velocity.y += SWIM_BUOYANCY;
            MovementMode::Swimming
        } else if was.is_in_liquid() {
            if climb.is_some() {
                velocity.y = 0.0;
                MovementMode::Climbing
            } else {
                if velocity.y > 0.0 {
                    velocity.y += LIQUID_EXIT_BOOST;
                }
                MovementMode::Walking
            }
        } else if climb.is_some() != (was == MovementMode::Climbing) {
            velocity.y = 0.0;
            if climb.is_some() {
                MovementMode::Climbing
            } else {
                MovementMode::Walking
            }
        } else {
            was
        };

        state.mode = mode;
        state.climb_direction = climb.filter(|_| mode == MovementMode::Climbing);

        if mode != was {
            trace!(from = ?was, to = ?mode, "movement mode changed");
            match (was.is_in_liquid(), mode.is_in_liquid()) {
                (false, true) => self.emit(MovementEvent::EnterLiquid),
                (true, false) => self.emit(MovementEvent::LeaveLiquid),
                _ => {}
            }
        }
    }

    /// Facing of the nearest climbable block touching the character's sides
    /// or feet, flipped so it points away from the character.
    fn find_climbable(&self, position: Vec3) -> Option<Vec3i> {
        let radius = self.character.radius;
        let sides = [
            position + Vec3::new(radius, 0.0, 0.0),
            position - Vec3::new(radius, 0.0, 0.0),
            position + Vec3::new(0.0, 0.0, radius),
            position - Vec3::new(0.0, 0.0, radius),
            position - Vec3::UP * self.character.height,
        ];

        let own = Vec3i::containing(position);
        let mut best = None;
        let mut best_distance = f32::MAX;
        for side in sides {
            if !self.blocks.is_climbable(side) {
                continue;
            }
            let block = Vec3i::containing(side);
            let mut dir = self.blocks.climb_direction(side);

            // Only a ladder whose wall plane is within reach counts.
            let distance = if dir.x != 0 && (position.x - block.x as f32 + dir.x as f32 * 0.5).abs() < radius + 0.1 {
                if own.x < block.x {
                    dir.x = -dir.x;
                }
                (block.z as f32 - position.z).abs()
            } else if dir.z != 0 && (position.z - block.z as f32 + dir.z as f32 * 0.5).abs() < radius + 0.1 {
                if own.z < block.z {
                    dir.z = -dir.z;
                }
                (block.x as f32 - position.x).abs()
            } else {
                continue;
            };

            if distance < best_distance {
                best_distance = distance;
                best = Some(dir);
            }
        }
        best
    }

    /// Re-expresses the desired velocity relative to the ladder.
    fn climb(&self, state: &PhysicalState, input: &InputSample, desired: &mut Vec3) {
        let Some(ladder) = state.climb_direction else {
            return;
        };
        let ladder_dir = ladder.to_vec3();
        let yaw = state.yaw.to_radians();
        let yaw_rotation = Quat::from_yxz(yaw, 0.0, 0.0);
        let forward = yaw_rotation.rotate(Vec3::new(0.0, 0.0, -1.0));
        let angle = forward.angle(ladder_dir);

        let jump_or_crouch = desired.y != 0.0;
        let swing = if state.grounded { PI / 4.0 } else { PI / 2.0 };
        let mut clear_lateral = !state.grounded;

        if angle < PI / 4.0 || input.pitch.abs() > 60.0 {
            // Facing the ladder or looking steeply: forward means up or down.
            if jump_or_crouch {
                desired.x = 0.0;
                desired.z = 0.0;
                clear_lateral = false;
            } else {
                let pitch = if input.pitch > 30.0 { swing } else { -swing };
                *desired = Quat::from_yxz(yaw, pitch, 0.0).rotate(*desired);
            }
        } else if angle < 3.0 * PI / 4.0 {
            // Side on: strafing climbs.
            let relative = yaw_rotation.rotate(ladder_dir);
            let side = if relative.x < 0.0 { -1.0 } else { 1.0 };
            let axis = if ladder.x != 0 { -1.0 } else { 1.0 };
            let rotation = if jump_or_crouch {
                yaw_rotation
            } else {
                Quat::from_yxz(input.yaw.to_radians(), 0.0, swing * side * axis)
            };
            *desired = rotation.rotate(*desired);
        } else {
            *desired = yaw_rotation.rotate(*desired);
            clear_lateral = false;
        }

        if clear_lateral {
            if ladder.x != 0 {
                desired.x = 0.0;
            }
            if ladder.z != 0 {
                desired.z = 0.0;
            }
        }
    }

    fn walk(&mut self, state: &mut PhysicalState, input: &InputSample, desired: Vec3) {
        let mode = state.mode;
        let dt = input.delta_seconds();

        let mut desired = desired;
        if mode == MovementMode::Climbing {
            self.climb(state, input, &mut desired);
        }

        let start_velocity = state.velocity;
        let diff = (desired - start_velocity) * (mode.inertia_scale() * dt).min(1.0);
        let mut end = start_velocity;
        end.x += diff.x;
        end.z += diff.z;

        let gravity = self.physics.gravity * mode.gravity_scale();
        let terminal = self.physics.terminal_velocity;
        if mode.gravity_scale() == 0.0 {
            end.y += diff.y;
        } else if mode.flags().contains(ModeFlags::VERTICAL_INERTIA) {
            end.y = (end.y + diff.y - gravity * dt).max(-terminal);
        } else {
            end.y = (start_velocity.y - gravity * dt).max(-terminal);
        }

        let move_delta = end * dt;
        let step_height = if mode != MovementMode::Climbing && state.grounded && mode.can_be_grounded() {
            self.character.step_height
        } else {
            0.0
        };

        let result = if mode.uses_collision() {
            Sweeper::new(self.collider).travel(state.position, move_delta, step_height, self.character.slope_factor)
        } else {
            MoveResult::unobstructed(state.position + move_delta)
        };

        let eps = self.collider.epsilon();
        let moved = result.position - state.position;
        state.position = result.position;
        if moved.len_sq() > 0.0 {
            self.emit(MovementEvent::Moved {
                delta: moved,
                position: state.position,
            });
        }

        if result.bottom_hit {
            if !state.grounded && mode.can_be_grounded() {
                let velocity = impact_velocity(start_velocity, end, moved, move_delta, eps);
                self.emit(MovementEvent::Landed { velocity });
                state.grounded = true;
            }
            end.y = 0.0;

            if input.jump_requested && state.grounded {
                state.grounded = false;
                end.y += self.character.jump_speed;
                self.emit(MovementEvent::Jump);
            }
        } else {
            if result.top_hit && end.y > 0.0 {
                let velocity = impact_velocity(start_velocity, end, moved, move_delta, eps);
                self.emit(MovementEvent::HitCeiling { velocity });
                end.y = -0.5 * end.y;
            }
            state.grounded = false;
        }

        if result.horizontal_hit {
            let velocity = impact_velocity(start_velocity, end, moved, move_delta, eps);
            self.emit(MovementEvent::HorizontalCollision {
                position: state.position,
                velocity,
            });
        }
        state.velocity = end;

        if state.grounded || mode.is_in_liquid() {
            let stride = if mode.is_in_liquid() {
                self.character.distance_between_swim_strokes
            } else {
                self.character.distance_between_footsteps
            };
            state.footstep_accumulator += moved.len() / stride;
            if state.footstep_accumulator >= 1.0 {
                state.footstep_accumulator = state.footstep_accumulator.fract();
                match mode {
                    MovementMode::Walking => self.emit(MovementEvent::Footstep),
                    MovementMode::Swimming | MovementMode::Diving => self.emit(MovementEvent::SwimStroke),
                    _ => {}
                }
            }
        }
    }

    /// One `EnterBlock` per body slice when the character's block changed.
    fn check_block_entry(&mut self, from: Vec3, to: Vec3) {
        let old = Vec3i::containing(from);
        let new = Vec3i::containing(to);
        if old == new {
            return;
        }
        let slices = self.character.height.ceil().max(1.0) as i32;
        for offset in 0..slices {
            self.emit(MovementEvent::EnterBlock {
                from: old.offset(0, offset, 0),
                to: new.offset(0, offset, 0),
                offset,
            });
        }
    }
}

/// Velocity at the moment of contact, interpolated per axis by how much of
/// the intended move was completed.
fn impact_velocity(start: Vec3, end: Vec3, moved: Vec3, intended: Vec3, eps: f32) -> Vec3 {
    let axis = |s: f32, e: f32, m: f32, i: f32| {
        if i.abs() > eps {
            s + (m / i) * (e - s)
        } else {
            e
        }
    };
    Vec3::new(
        axis(start.x, end.x, moved.x, intended.x),
        axis(start.y, end.y, moved.y, intended.y),
        axis(start.z, end.z, moved.z, intended.z),
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MoveResult {
    position: Vec3,
    horizontal_hit: bool,
    bottom_hit: bool,
    top_hit: bool,
}

impl MoveResult {
    fn unobstructed(position: Vec3) -> Self {
        Self {
            position,
            horizontal_hit: false,
            bottom_hit: false,
            top_hit: false,
        }
    }
}

/// Collision-resolving motion for one step.
struct Sweeper<'a> {
    collider: &'a dyn Collider,
    eps: f32,
    stepped: bool,
    stepped_up: f32,
}

impl<'a> Sweeper<'a> {
    fn new(collider: &'a dyn Collider) -> Self {
        Self {
            collider,
            eps: collider.epsilon(),
            stepped: false,
            stepped_up: 0.0,
        }
    }

    /// Up, then horizontal with sliding and stepping, then down.
    fn travel(&mut self, start: Vec3, delta: Vec3, step_height: f32, slope_factor: f32) -> MoveResult {
        let mut position = start;
        let mut top_hit = false;
        let mut bottom_hit = false;

        if delta.y > 0.0 {
            top_hit = delta.y - self.move_up(delta.y, &mut position) > self.eps;
        }

        let horizontal_hit = self.move_horizontal(delta.horizontal(), &mut position, slope_factor, step_height);

        if delta.y < 0.0 || self.stepped_up > 0.0 {
            let fall = if delta.y < 0.0 { delta.y } else { 0.0 };
            bottom_hit = self.move_down(fall - self.stepped_up, slope_factor, &mut position);
        }

        // Stick to ground just below us, e.g. walking down a step.
        if !bottom_hit && step_height > 0.0 {
            let mut below = position;
            if self.move_down(-step_height, slope_factor, &mut below) {
                bottom_hit = true;
                position = below;
            }
        }

        MoveResult {
            position,
            horizontal_hit,
            bottom_hit,
            top_hit,
        }
    }

    /// Returns the distance actually risen.
    fn move_up(&mut self, rise: f32, position: &mut Vec3) -> f32 {
        let reach = rise + VERTICAL_PENETRATION_LEEWAY;
        let to = *position + Vec3::UP * reach;
        let hit = self.collider.sweep(*position, to, VERTICAL_PENETRATION_LEEWAY, -1.0);
        let risen = if hit.has_hit {
            (reach * hit.fraction - VERTICAL_PENETRATION_LEEWAY).max(0.0)
        } else {
            rise
        };
        position.y += risen;
        risen
    }

    /// `dist` is negative. Returns whether the character came to rest on
    /// something walkable.
    fn move_down(&mut self, dist: f32, slope_factor: f32, position: &mut Vec3) -> bool {
        let mut remaining = -dist;
        let mut target = *position - Vec3::UP * (remaining + VERTICAL_PENETRATION_LEEWAY);
        let mut direction = Vec3::new(0.0, -1.0, 0.0);
        let mut hit = false;
        let mut iteration = 0;

        while remaining > self.eps {
            if iteration == MAX_SWEEP_ITERATIONS {
                hit = true;
                break;
            }
            iteration += 1;

            let sweep = self.collider.sweep(*position, target, VERTICAL_PENETRATION, -1.0);
            let actual = ((remaining + VERTICAL_PENETRATION_LEEWAY) * sweep.fraction - VERTICAL_PENETRATION_LEEWAY).max(0.0);
            let expected = target - *position;
            if expected.len_sq() > self.eps {
                *position += expected.normalize() * actual;
            }
            remaining -= actual;
            if remaining < self.eps {
                break;
            }
            if !sweep.has_hit {
                break;
            }

            let original_slope = sweep.normal.dot(Vec3::UP);
            if original_slope >= slope_factor {
                hit = true;
                break;
            }
            let slope = self.collider.average_slope(&sweep, original_slope, CHECK_FORWARD_DIST);
            if slope >= slope_factor {
                hit = true;
                break;
            }

            // Too steep to stand on: slide down along it.
            let residual = extract_residual_movement(sweep.normal, target - *position, self.eps);
            if residual.len_sq() <= self.eps {
                hit = true;
                break;
            }
            let slide = residual.normalize();
            if slide.dot(direction) <= 0.0 || slide.y > -self.eps {
                hit = true;
                break;
            }
            direction = slide;
            target = *position + slide * (-remaining / slide.y + HORIZONTAL_PENETRATION_LEEWAY);
        }
        hit
    }

    fn move_horizontal(&mut self, horizontal: Vec3, position: &mut Vec3, slope_factor: f32, step_height: f32) -> bool {
        let mut dist = horizontal.len();
        if dist < self.eps {
            return false;
        }
        let mut direction = horizontal.normalize_or_zero();
        let mut target = *position + direction * (dist + HORIZONTAL_PENETRATION_LEEWAY);
        let mut remaining_fraction = 1.0;
        let mut last_hit_normal = Vec3::UP;
        let mut horizontal_hit = false;
        let mut iteration = 0;

        while remaining_fraction >= 0.01 && iteration < MAX_SWEEP_ITERATIONS {
            iteration += 1;
            let sweep = self.collider.sweep(*position, target, HORIZONTAL_PENETRATION, slope_factor);

            // After the first slide the fraction only covers part of the move;
            // close enough in practice.
            let actual = ((dist + HORIZONTAL_PENETRATION_LEEWAY) * sweep.fraction - HORIZONTAL_PENETRATION_LEEWAY).max(0.0);
            if actual != 0.0 {
                remaining_fraction -= actual / dist;
            }

            if !sweep.has_hit {
                *position += direction * dist;
                break;
            }

            if actual > self.eps {
                *position += direction * actual;
            }
            dist -= actual;
            let mut next = direction * dist;
            let slope = sweep.normal.dot(Vec3::UP);

            // Step up onto steep obstacles or when grazing the ground;
            // otherwise ride up the shallow slope.
            if slope < slope_factor || 1.0 - slope < self.eps {
                if !self.check_step(&sweep, next, slope_factor, step_height, position) {
                    horizontal_hit = true;
                    let mut next_horizontal = next.horizontal();
                    let wall = sweep.normal.horizontal();
                    if wall.len_sq() > self.eps {
                        let wall = wall.normalize();
                        if last_hit_normal.dot(wall) > self.eps {
                            break;
                        }
                        last_hit_normal = wall;
                        next_horizontal = extract_residual_movement(wall, next_horizontal, self.eps);
                    }
                    next = next_horizontal;
                }
            } else {
                let flat_len = next.horizontal().len();
                next = extract_residual_movement(sweep.normal, next, self.eps);
                let modified_len = next.horizontal().len();
                if modified_len > self.eps {
                    next = next * (flat_len / modified_len);
                }
            }

            let sq = next.len_sq();
            if sq <= self.eps {
                break;
            }
            let next_direction = next.normalize();
            if next_direction.dot(direction) <= 0.0 {
                break;
            }
            dist = sq.sqrt();
            direction = next_direction;
            target = *position + direction * (dist + HORIZONTAL_PENETRATION_LEEWAY);
        }
        horizontal_hit
    }

    /// At most one step-up per move.
    fn check_step(
        &mut self,
        sweep: &super::SweepResult,
        direction: Vec3,
        slope_factor: f32,
        step_height: f32,
        position: &mut Vec3,
    ) -> bool {
        if self.stepped {
            return false;
        }
        self.stepped = true;
        if self
            .collider
            .check_for_step(sweep, direction, step_height, slope_factor, CHECK_FORWARD_DIST)
        {
            self.stepped_up = self.move_up(step_height, position);
            return true;
        }
        false
    }
}

/// The part of `direction` that survives hitting a surface with `normal`,
/// keeping the original length.
fn extract_residual_movement(normal: Vec3, direction: Vec3, eps: f32) -> Vec3 {
    let length = direction.len();
    if length <= eps {
        return direction;
    }
    let reflected = direction.normalize().reflect(normal).normalize();
    let along_surface = reflected - normal * reflected.dot(normal);
    along_surface * length
}
