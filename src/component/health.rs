use std::time::SystemTime;

/// Health states ordered from best to worst; `least_healthy` picks the
/// worst of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthType {
    Healthy,
    Unknown,
    Unhealthy,
    Exited,
}

impl HealthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthType::Healthy => "healthy",
            HealthType::Unknown => "unknown",
            HealthType::Unhealthy => "unhealthy",
            HealthType::Exited => "exited",
        }
    }
}

/// A point-in-time health report with a human-readable message.
#[derive(Debug, Clone, PartialEq)]
pub struct Health {
    pub health: HealthType,
    pub message: String,
    pub update_time: SystemTime,
}

impl Health {
    pub fn new(
        health: HealthType,
        message: impl Into<String>,
    ) -> Self {
        Health {
            health,
            message: message.into(),
            update_time: SystemTime::now(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Health::new(HealthType::Unknown, message)
    }
}

/// Returns the least healthy of the given reports. Ties keep the first,
/// so callers should pass reports in dominance order.
pub fn least_healthy<'a>(
    first: &'a Health,
    rest: impl IntoIterator<Item = &'a Health>,
) -> &'a Health {
    let mut worst = first;
    for candidate in rest {
        if candidate.health > worst.health {
            worst = candidate;
        }
    }
    worst
}
