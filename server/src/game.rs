//! Authoritative per-session simulation
//!
//! One [`GameState`] drives one client's world: a single player, a patrolling
//! enemy and the bullets it fires. Everything advances in whole ticks; there
//! is no delta time. Bullet patterns are keyed off a repeating 360-tick cycle.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    apply_player_input, deg_to_rad, detect_collision, direction_from_arrows, outside,
    velocity_angle, BulletName, BulletSnapshot, EnemyName, EnemySnapshot, EntityState,
    FlightPattern, FrameSnapshot, GameStateFlags, InputDirection, PlayerName, PlayerSnapshot,
    Stage, Vector2, GAME_HEIGHT_HALF, GAME_WIDTH_HALF,
};

pub const PLAYER_SPEED: f32 = 4.0;
pub const PLAYER_RADIUS: f32 = 2.0;
pub const PLAYER_SPAWN: Vector2 = Vector2 { x: 0.0, y: -160.0 };

pub const ENEMY_ID: u32 = 1000;
pub const ENEMY_RADIUS: f32 = 16.0;
pub const ENEMY_SPAWN: Vector2 = Vector2 { x: 0.0, y: 160.0 };
pub const ENEMY_VELOCITY: Vector2 = Vector2 { x: 1.5, y: 0.5 };
/// Enemies turn back upward once they drop below this height
pub const ENEMY_LOWER_BOUND: f32 = 96.0;

pub const PATTERN_CYCLE: u64 = 360;
pub const ENEMY_MOVE_WINDOW: u64 = 120;

pub const CIRCLE_BULLETS: usize = 8;
pub const CIRCLE_SPEED: f32 = 3.0;
pub const CIRCLE_RADIUS: f32 = 8.0;

pub const HOMING_SPEED: f32 = 4.0;
pub const HOMING_RADIUS: f32 = 4.0;

pub const SPIRAL_BULLETS: usize = 7;
pub const SPIRAL_SPEED: f32 = 1.5;
pub const SPIRAL_RADIUS: f32 = 6.0;
pub const SPIRAL_STEP_DEG: f64 = 7.0;

pub const RANDOM_BULLETS: usize = 7;
pub const RANDOM_SPEED: f32 = 2.0;
pub const RANDOM_RADIUS: f32 = 5.0;
pub const RANDOM_NAMES: [BulletName; 3] = [BulletName::Red, BulletName::Green, BulletName::Blue];

pub const BULLET_DAMAGE: u32 = 1;

/// Directional keys currently held by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrowState {
    held: u8,
}

impl ArrowState {
    pub fn apply(&mut self, pressed: u8, released: u8) {
        self.held |= pressed;
        self.held &= !released;
    }

    pub fn held(&self) -> u8 {
        self.held
    }

    pub fn direction(&self) -> InputDirection {
        direction_from_arrows(self.held)
    }
}

/// Which bullet patterns fire on a given tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternSchedule {
    pub circle: bool,
    pub homing: bool,
    pub spiral: bool,
    pub random: bool,
}

impl PatternSchedule {
    pub fn for_tick(tick: u64) -> Self {
        let phase = tick % PATTERN_CYCLE;
        Self {
            circle: phase > 120 && tick % 60 == 0,
            homing: phase > 240 && tick % 8 == 0,
            spiral: phase > 120 && tick % 6 == 0,
            random: tick > 120 && tick % 60 == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub spawned: usize,
    pub culled: usize,
    pub player_hit: bool,
}

pub struct GameState {
    snapshot: FrameSnapshot,
    arrows: ArrowState,
    next_tick: u64,
    next_bullet_id: u64,
    spiral_index: u64,
    rng: StdRng,
}

impl GameState {
    pub fn new(player_id: u32, stage: Stage) -> Self {
        Self::with_rng(player_id, stage, StdRng::from_entropy())
    }

    pub fn with_seed(player_id: u32, stage: Stage, seed: u64) -> Self {
        Self::with_rng(player_id, stage, StdRng::seed_from_u64(seed))
    }

    fn with_rng(player_id: u32, stage: Stage, rng: StdRng) -> Self {
        let mut snapshot = FrameSnapshot::new(stage);
        snapshot.push_player(PlayerSnapshot::new(
            player_id,
            PlayerName::Reimu,
            PLAYER_SPAWN,
            PLAYER_RADIUS,
        ));
        snapshot.push_enemy(EnemySnapshot::new(
            ENEMY_ID,
            EnemyName::Boss,
            ENEMY_SPAWN,
            ENEMY_VELOCITY,
            ENEMY_RADIUS,
        ));

        Self {
            snapshot,
            arrows: ArrowState::default(),
            next_tick: 0,
            next_bullet_id: 0,
            spiral_index: 0,
            rng,
        }
    }

    pub fn apply_input(&mut self, pressed: u8, released: u8) {
        self.arrows.apply(pressed, released);
    }

    pub fn arrows(&self) -> ArrowState {
        self.arrows
    }

    pub fn snapshot(&self) -> &FrameSnapshot {
        &self.snapshot
    }

    pub fn player(&self) -> Option<&PlayerSnapshot> {
        self.snapshot.players().first()
    }

    pub fn is_game_over(&self) -> bool {
        self.snapshot.is_game_over()
    }

    /// Number of ticks simulated so far
    pub fn ticks(&self) -> u64 {
        self.next_tick
    }

    /// Simulates one tick: player, enemies, pattern emission, bullet
    /// integration with collision, then culling.
    pub fn update(&mut self) -> TickSummary {
        let tick = self.next_tick;
        let phase = tick % PATTERN_CYCLE;
        let mut summary = TickSummary::default();

        self.update_player();
        self.update_enemies(phase < ENEMY_MOVE_WINDOW);

        let before = self.snapshot.bullet_count() as usize;
        self.emit_patterns(tick);
        summary.spawned = self.snapshot.bullet_count() as usize - before;

        summary.player_hit = self.integrate_bullets();
        summary.culled = self.cull_bullets();

        self.snapshot.tick = tick;
        self.next_tick += 1;
        summary
    }

    fn update_player(&mut self) {
        let direction = self.arrows.direction();
        for player in self.snapshot.players_mut() {
            if player.lives == 0 {
                continue;
            }
            player.vel = direction.unit_vector() * PLAYER_SPEED;
            apply_player_input(player, direction, PLAYER_SPEED);
        }
    }

    fn update_enemies(&mut self, moving: bool) {
        for enemy in self.snapshot.enemies_mut() {
            if enemy.pos.x > GAME_WIDTH_HALF {
                enemy.vel.x = -enemy.vel.x.abs();
            } else if enemy.pos.x < -GAME_WIDTH_HALF {
                enemy.vel.x = enemy.vel.x.abs();
            }

            if enemy.pos.y > GAME_HEIGHT_HALF {
                enemy.vel.y = -enemy.vel.y.abs();
            } else if enemy.pos.y < ENEMY_LOWER_BOUND {
                enemy.vel.y = enemy.vel.y.abs();
            }

            if moving {
                enemy.pos += enemy.vel;
            }
        }
    }

    fn emit_patterns(&mut self, tick: u64) {
        let schedule = PatternSchedule::for_tick(tick);
        if schedule == PatternSchedule::default() {
            return;
        }

        let origins: Vec<(u32, Vector2)> = self
            .snapshot
            .enemies()
            .iter()
            .filter(|e| e.state == EntityState::Alive)
            .map(|e| (e.id, e.pos))
            .collect();
        let target = self.player().map(|p| p.pos).unwrap_or(Vector2::ZERO);

        for (owner, origin) in origins {
            if schedule.circle {
                self.emit_circle_shot(owner, origin, tick);
            }
            if schedule.homing {
                self.emit_homing_shot(owner, origin, target);
            }
            if schedule.spiral {
                self.emit_spiral_shot(owner, origin, tick);
            }
            if schedule.random {
                self.emit_random_shot(owner, origin);
            }
        }
    }

    fn emit_circle_shot(&mut self, owner: u32, origin: Vector2, tick: u64) {
        let offset = (tick % PATTERN_CYCLE) as f64;
        let step = 360.0 / CIRCLE_BULLETS as f64;

        for i in 0..CIRCLE_BULLETS {
            let rad = deg_to_rad(offset + i as f64 * step);
            let vel = Vector2::new(rad.cos() as f32, rad.sin() as f32) * CIRCLE_SPEED;
            self.spawn_bullet(
                owner,
                origin,
                vel,
                CIRCLE_RADIUS,
                BulletName::White,
                FlightPattern::Circle,
            );
        }
    }

    fn emit_homing_shot(&mut self, owner: u32, origin: Vector2, target: Vector2) {
        let to_target = target - origin;
        let length = to_target.length();
        let direction = if length > 0.0 {
            to_target * (1.0 / length)
        } else {
            InputDirection::DownRight.unit_vector()
        };

        self.spawn_bullet(
            owner,
            origin,
            direction * HOMING_SPEED,
            HOMING_RADIUS,
            BulletName::Red,
            FlightPattern::Homing,
        );
    }

    fn emit_spiral_shot(&mut self, owner: u32, origin: Vector2, tick: u64) {
        let offset = (tick as f64 * SPIRAL_STEP_DEG) % 360.0;
        let step = 360.0 / SPIRAL_BULLETS as f64;

        for i in 0..SPIRAL_BULLETS {
            let rad = deg_to_rad(offset + i as f64 * step);
            let vel = Vector2::new(rad.cos() as f32, rad.sin() as f32) * SPIRAL_SPEED;
            let name = BulletName::from_index(self.spiral_index);
            self.spiral_index += 1;
            self.spawn_bullet(
                owner,
                origin,
                vel,
                SPIRAL_RADIUS,
                name,
                FlightPattern::Spiral,
            );
        }
    }

    fn emit_random_shot(&mut self, owner: u32, origin: Vector2) {
        for i in 0..RANDOM_BULLETS {
            // x and y come from independent angle draws
            let angle_x = deg_to_rad(self.rng.gen_range(0..=359) as f64);
            let angle_y = deg_to_rad(self.rng.gen_range(0..=359) as f64);
            let vel = Vector2::new(angle_x.cos() as f32, angle_y.sin() as f32) * RANDOM_SPEED;
            self.spawn_bullet(
                owner,
                origin,
                vel,
                RANDOM_RADIUS,
                RANDOM_NAMES[i % RANDOM_NAMES.len()],
                FlightPattern::Random,
            );
        }
    }

    fn spawn_bullet(
        &mut self,
        owner: u32,
        pos: Vector2,
        vel: Vector2,
        radius: f32,
        name: BulletName,
        flight_pattern: FlightPattern,
    ) {
        let id = self.next_bullet_id;
        self.next_bullet_id += 1;

        self.snapshot.push_bullet(BulletSnapshot {
            id,
            name,
            state: EntityState::Alive,
            pos,
            vel,
            radius,
            angle: velocity_angle(vel),
            damage: BULLET_DAMAGE,
            owner,
            flight_pattern,
        });
    }

    /// Moves every bullet; returns true if any of them touched the player
    fn integrate_bullets(&mut self) -> bool {
        let player = self.snapshot.players().first().cloned();
        let mut hit = false;

        for bullet in self.snapshot.bullets_mut() {
            bullet.pos += bullet.vel;
            if let Some(player) = &player {
                if detect_collision(player, bullet) {
                    hit = true;
                }
            }
        }

        if hit {
            for player in self.snapshot.players_mut() {
                player.lives = 0;
                player.state = EntityState::Dead;
                player.vel = Vector2::ZERO;
            }
            if !self.snapshot.is_game_over() {
                debug!("Player hit on tick {}", self.next_tick);
            }
            self.snapshot.state.remove(GameStateFlags::IN_PROGRESS);
            self.snapshot.state.insert(GameStateFlags::GAME_OVER);
        }

        hit
    }

    fn cull_bullets(&mut self) -> usize {
        let mut culled = 0;
        let mut i = 0;

        while i < self.snapshot.bullets().len() {
            let pos = self.snapshot.bullets()[i].pos;
            if outside(pos.x, pos.y) {
                self.snapshot.swap_remove_bullet(i);
                culled += 1;
            } else {
                i += 1;
            }
        }

        culled
    }
}
