//! Wire protocol and arena geometry shared by the server and the client
//!
//! The arena is centred on the origin with +y pointing up. Players are kept
//! inside a slightly smaller rectangle than the one used to cull bullets.

pub mod channel;
pub mod codec;
pub mod packet;
pub mod snapshot;

pub use channel::PacketChannel;
pub use codec::ChannelError;
pub use packet::{Packet, PacketKind};
pub use snapshot::{
    AttackPattern, BulletName, BulletSnapshot, EnemyName, EnemySnapshot, EntityState,
    FlightPattern, FrameSnapshot, GameStateFlags, PlayerName, PlayerSnapshot, Stage, Vector2,
};

pub const PROTOCOL_VERSION: u32 = 1;

pub const GAME_WIDTH_HALF: f32 = 196.0;
pub const GAME_HEIGHT_HALF: f32 = 228.0;
pub const PLAYER_BOUND_HALF_WIDTH: f32 = 192.0;
pub const PLAYER_BOUND_HALF_HEIGHT: f32 = 224.0;

pub const ARROW_UP: u8 = 0b0001;
pub const ARROW_DOWN: u8 = 0b0010;
pub const ARROW_LEFT: u8 = 0b0100;
pub const ARROW_RIGHT: u8 = 0b1000;

const INV_SQRT2: f32 = std::f32::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDirection {
    Stop,
    Up,
    Down,
    Left,
    Right,
    UpRight,
    DownRight,
    UpLeft,
    DownLeft,
}

impl InputDirection {
    /// Unit vector for this direction; diagonals are normalized
    pub fn unit_vector(&self) -> Vector2 {
        match self {
            InputDirection::Stop => Vector2::ZERO,
            InputDirection::Up => Vector2::new(0.0, 1.0),
            InputDirection::Down => Vector2::new(0.0, -1.0),
            InputDirection::Left => Vector2::new(-1.0, 0.0),
            InputDirection::Right => Vector2::new(1.0, 0.0),
            InputDirection::UpRight => Vector2::new(INV_SQRT2, INV_SQRT2),
            InputDirection::DownRight => Vector2::new(INV_SQRT2, -INV_SQRT2),
            InputDirection::UpLeft => Vector2::new(-INV_SQRT2, INV_SQRT2),
            InputDirection::DownLeft => Vector2::new(-INV_SQRT2, -INV_SQRT2),
        }
    }
}

/// Collapses held arrow bits into one direction. Opposite keys cancel.
pub fn direction_from_arrows(held: u8) -> InputDirection {
    let vertical = (held & ARROW_UP != 0) as i8 - (held & ARROW_DOWN != 0) as i8;
    let horizontal = (held & ARROW_RIGHT != 0) as i8 - (held & ARROW_LEFT != 0) as i8;

    match (horizontal, vertical) {
        (0, 1) => InputDirection::Up,
        (0, -1) => InputDirection::Down,
        (-1, 0) => InputDirection::Left,
        (1, 0) => InputDirection::Right,
        (1, 1) => InputDirection::UpRight,
        (1, -1) => InputDirection::DownRight,
        (-1, 1) => InputDirection::UpLeft,
        (-1, -1) => InputDirection::DownLeft,
        _ => InputDirection::Stop,
    }
}

/// Moves the player one step and clamps it to the player rectangle
pub fn apply_player_input(player: &mut PlayerSnapshot, input: InputDirection, speed: f32) {
    if input == InputDirection::Stop {
        return;
    }

    let step = input.unit_vector() * speed;
    player.pos.x = (player.pos.x + step.x).clamp(-PLAYER_BOUND_HALF_WIDTH, PLAYER_BOUND_HALF_WIDTH);
    player.pos.y =
        (player.pos.y + step.y).clamp(-PLAYER_BOUND_HALF_HEIGHT, PLAYER_BOUND_HALF_HEIGHT);
}

/// True when the point is strictly beyond the arena; the edge is inside
pub fn outside(x: f32, y: f32) -> bool {
    x > GAME_WIDTH_HALF || x < -GAME_WIDTH_HALF || y > GAME_HEIGHT_HALF || y < -GAME_HEIGHT_HALF
}

pub fn deg_to_rad(deg: f64) -> f64 {
    deg * std::f64::consts::PI / 180.0
}

/// Circle overlap test, inclusive of touching
pub fn detect_collision(player: &PlayerSnapshot, bullet: &BulletSnapshot) -> bool {
    let dx = bullet.pos.x - player.pos.x;
    let dy = bullet.pos.y - player.pos.y;

    let dist_squared = dx * dx + dy * dy;
    let radius_sum = player.radius + bullet.radius;

    dist_squared <= radius_sum * radius_sum
}

/// Facing angle in degrees for a velocity, with "up" as 0
pub fn velocity_angle(vel: Vector2) -> f32 {
    vel.y.atan2(vel.x).to_degrees() - 90.0
}
