use log::{debug, info};
use shared::{FrameSnapshot, PlayerSnapshot};

/// Client view of the server's world, built only from received snapshots
#[derive(Debug, Default)]
pub struct ClientGameState {
    latest: Option<FrameSnapshot>,
    frames_received: u64,
    skipped_ticks: u64,
    max_bullets: u32,
    game_over_tick: Option<u64>,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_snapshot(&mut self, frame: FrameSnapshot) {
        if let Some(previous) = &self.latest {
            if frame.tick <= previous.tick {
                debug!(
                    "Ignoring stale snapshot {} (have {})",
                    frame.tick, previous.tick
                );
                return;
            }
            self.skipped_ticks += frame.tick - previous.tick - 1;
        }

        if frame.is_game_over() && self.game_over_tick.is_none() {
            info!("Game over at tick {}", frame.tick);
            self.game_over_tick = Some(frame.tick);
        }

        self.frames_received += 1;
        self.max_bullets = self.max_bullets.max(frame.bullet_count());
        self.latest = Some(frame);
    }

    pub fn latest(&self) -> Option<&FrameSnapshot> {
        self.latest.as_ref()
    }

    pub fn player(&self) -> Option<&PlayerSnapshot> {
        self.latest.as_ref()?.players().first()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Ticks the server simulated that never reached us as snapshots
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks
    }

    pub fn max_bullets(&self) -> u32 {
        self.max_bullets
    }

    pub fn game_over_tick(&self) -> Option<u64> {
        self.game_over_tick
    }
}
