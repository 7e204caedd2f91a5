//! Arrow-key state tracking with change detection
//!
//! The protocol only carries edges: bits that became pressed and bits that
//! were released since the last input packet. [`InputManager`] turns a
//! sampled "held right now" mask into those edges. [`Autopilot`] stands in
//! for a keyboard in the headless client.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ARROW_DOWN, ARROW_LEFT, ARROW_RIGHT, ARROW_UP};

const ARROW_MASK: u8 = ARROW_UP | ARROW_DOWN | ARROW_LEFT | ARROW_RIGHT;

/// Every non-contradictory arrow combination, "none" included
pub const ARROW_COMBINATIONS: [u8; 9] = [
    0,
    ARROW_UP,
    ARROW_DOWN,
    ARROW_LEFT,
    ARROW_RIGHT,
    ARROW_UP | ARROW_LEFT,
    ARROW_UP | ARROW_RIGHT,
    ARROW_DOWN | ARROW_LEFT,
    ARROW_DOWN | ARROW_RIGHT,
];

/// Input edges to send to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputChange {
    pub pressed: u8,
    pub released: u8,
}

#[derive(Debug, Default)]
pub struct InputManager {
    held: u8,
}

impl InputManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the arrows held this frame; `None` when nothing changed
    pub fn update(&mut self, held_now: u8) -> Option<InputChange> {
        let held_now = held_now & ARROW_MASK;
        let pressed = held_now & !self.held;
        let released = self.held & !held_now;
        self.held = held_now;

        if pressed == 0 && released == 0 {
            None
        } else {
            Some(InputChange { pressed, released })
        }
    }

    /// Releases everything currently held
    pub fn release_all(&mut self) -> Option<InputChange> {
        self.update(0)
    }

    pub fn held(&self) -> u8 {
        self.held
    }
}

/// Random walk over arrow combinations, changing every `hold_frames` frames
pub struct Autopilot {
    rng: StdRng,
    hold_frames: u32,
    remaining: u32,
    current: u8,
}

impl Autopilot {
    pub fn new(seed: Option<u64>, hold_frames: u32) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            hold_frames: hold_frames.max(1),
            remaining: 0,
            current: 0,
        }
    }

    pub fn next_arrows(&mut self) -> u8 {
        if self.remaining == 0 {
            let index = self.rng.gen_range(0..ARROW_COMBINATIONS.len());
            self.current = ARROW_COMBINATIONS[index];
            self.remaining = self.hold_frames;
        }
        self.remaining -= 1;
        self.current
    }
}
