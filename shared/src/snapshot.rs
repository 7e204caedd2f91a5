//! World state value types streamed to clients every tick
//!
//! Entities are plain data: they are copied into the snapshot each tick and
//! never reference each other. The snapshot keeps an explicit count next to
//! every entity sequence, and the only way to grow or shrink a sequence is
//! through the methods here, so count and length cannot drift apart.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vector2 {
    fn add_assign(&mut self, rhs: Vector2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vector2 {
    type Output = Vector2;

    fn mul(self, rhs: f32) -> Vector2 {
        Vector2::new(self.x * rhs, self.y * rhs)
    }
}

/// Game-wide state bits carried by every snapshot
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct GameStateFlags(u8);

impl GameStateFlags {
    pub const IN_PROGRESS: GameStateFlags = GameStateFlags(0b0000_0001);
    pub const GAME_OVER: GameStateFlags = GameStateFlags(0b0000_0010);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: GameStateFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: GameStateFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: GameStateFlags) {
        self.0 &= !other.0;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Stage1,
    Stage2,
    Stage3,
    Extra,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Alive,
    Dead,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PlayerName {
    Reimu,
    Marisa,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EnemyName {
    Fairy,
    Boss,
}

/// Visual variant of a bullet; purely cosmetic on the server
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum BulletName {
    Red,
    Orange,
    Yellow,
    Green,
    Cyan,
    Blue,
    Purple,
    White,
}

impl BulletName {
    pub const ALL: [BulletName; 8] = [
        BulletName::Red,
        BulletName::Orange,
        BulletName::Yellow,
        BulletName::Green,
        BulletName::Cyan,
        BulletName::Blue,
        BulletName::Purple,
        BulletName::White,
    ];

    /// Maps any index onto the eight variants
    pub fn from_index(index: u64) -> Self {
        Self::ALL[(index % Self::ALL.len() as u64) as usize]
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum FlightPattern {
    Circle,
    Homing,
    Spiral,
    Random,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AttackPattern {
    Straight,
    Spread,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub id: u32,
    pub name: PlayerName,
    pub state: EntityState,
    pub attack_pattern: AttackPattern,
    pub pos: Vector2,
    pub vel: Vector2,
    pub radius: f32,
    pub angle: f32,
    pub current_spell: u32,
    pub lives: u32,
    pub bombs: u32,
    pub power: u32,
}

impl PlayerSnapshot {
    pub fn new(id: u32, name: PlayerName, pos: Vector2, radius: f32) -> Self {
        Self {
            id,
            name,
            state: EntityState::Alive,
            attack_pattern: AttackPattern::Straight,
            pos,
            vel: Vector2::ZERO,
            radius,
            angle: 0.0,
            current_spell: 0,
            lives: 3,
            bombs: 3,
            power: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.lives > 0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnemySnapshot {
    pub id: u32,
    pub name: EnemyName,
    pub state: EntityState,
    pub pos: Vector2,
    pub vel: Vector2,
    pub radius: f32,
    pub angle: f32,
}

impl EnemySnapshot {
    pub fn new(id: u32, name: EnemyName, pos: Vector2, vel: Vector2, radius: f32) -> Self {
        Self {
            id,
            name,
            state: EntityState::Alive,
            pos,
            vel,
            radius,
            angle: 0.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BulletSnapshot {
    pub id: u64,
    pub name: BulletName,
    pub state: EntityState,
    pub pos: Vector2,
    pub vel: Vector2,
    pub radius: f32,
    pub angle: f32,
    pub damage: u32,
    pub owner: u32,
    pub flight_pattern: FlightPattern,
}

/// Full authoritative world state for one tick
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub tick: u64,
    pub state: GameStateFlags,
    pub stage: Stage,
    player_count: u32,
    players: Vec<PlayerSnapshot>,
    enemy_count: u32,
    enemies: Vec<EnemySnapshot>,
    bullet_count: u32,
    bullets: Vec<BulletSnapshot>,
}

impl FrameSnapshot {
    pub fn new(stage: Stage) -> Self {
        Self {
            tick: 0,
            state: GameStateFlags::IN_PROGRESS,
            stage,
            player_count: 0,
            players: Vec::new(),
            enemy_count: 0,
            enemies: Vec::new(),
            bullet_count: 0,
            bullets: Vec::new(),
        }
    }

    pub fn push_player(&mut self, player: PlayerSnapshot) {
        self.players.push(player);
        self.player_count = self.players.len() as u32;
    }

    pub fn push_enemy(&mut self, enemy: EnemySnapshot) {
        self.enemies.push(enemy);
        self.enemy_count = self.enemies.len() as u32;
    }

    pub fn push_bullet(&mut self, bullet: BulletSnapshot) {
        self.bullets.push(bullet);
        self.bullet_count = self.bullets.len() as u32;
    }

    /// Removes a bullet by moving the last one into its slot
    pub fn swap_remove_bullet(&mut self, index: usize) -> BulletSnapshot {
        let removed = self.bullets.swap_remove(index);
        self.bullet_count = self.bullets.len() as u32;
        removed
    }

    pub fn players(&self) -> &[PlayerSnapshot] {
        &self.players
    }

    pub fn players_mut(&mut self) -> &mut [PlayerSnapshot] {
        &mut self.players
    }

    pub fn enemies(&self) -> &[EnemySnapshot] {
        &self.enemies
    }

    pub fn enemies_mut(&mut self) -> &mut [EnemySnapshot] {
        &mut self.enemies
    }

    pub fn bullets(&self) -> &[BulletSnapshot] {
        &self.bullets
    }

    pub fn bullets_mut(&mut self) -> &mut [BulletSnapshot] {
        &mut self.bullets
    }

    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    pub fn enemy_count(&self) -> u32 {
        self.enemy_count
    }

    pub fn bullet_count(&self) -> u32 {
        self.bullet_count
    }

    /// True when every count field agrees with its sequence
    pub fn counts_consistent(&self) -> bool {
        self.player_count as usize == self.players.len()
            && self.enemy_count as usize == self.enemies.len()
            && self.bullet_count as usize == self.bullets.len()
    }

    pub fn is_game_over(&self) -> bool {
        self.state.contains(GameStateFlags::GAME_OVER)
    }
}
