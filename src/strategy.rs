use std::time::Duration;

/// Pacing for successive respawns of the same slot.
///
/// The first respawn after a clean run waits `first`; every consecutive one
/// multiplies the previous delay by `factor`, capped at `max`. A slot that
/// reaches `running` resets the sequence.
#[derive(Clone, Copy, Debug)]
pub struct RespawnBackoff {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for RespawnBackoff {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(200),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl RespawnBackoff {
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        match prev {
            None => self.first.min(self.max),
            Some(d) => {
                let scaled = d.as_secs_f64() * self.factor;
                Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
            }
        }
    }
}
