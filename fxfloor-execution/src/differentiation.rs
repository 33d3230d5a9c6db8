use serde::{Deserialize, Serialize};

/// Position-differentiation policy.
///
/// Rewrites requested order units so they do not collide with an existing open
/// position of the same size on the same instrument, stepping by `increment` within
/// `[min_units, max_units]`. Lets downstream reconciliation tell apart positions
/// that would otherwise be identical.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PositionDifferentiation {
    pub enabled: bool,
    pub increment: i64,
}

impl Default for PositionDifferentiation {
    fn default() -> Self {
        Self {
            enabled: false,
            increment: 1,
        }
    }
}

impl PositionDifferentiation {
    pub fn enabled(increment: i64) -> Self {
        Self {
            enabled: true,
            increment: increment.max(1),
        }
    }

    /// Adjust `requested` (a magnitude) against existing open sizes on the same
    /// instrument. Returns the adjusted units and whether anything changed.
    pub fn adjust_units(
        &self,
        existing_sizes: &[i64],
        requested: i64,
        min_units: Option<i64>,
        max_units: Option<i64>,
    ) -> (i64, bool) {
        let floor = min_units.unwrap_or(1).max(1);
        let mut units = requested.max(floor);

        if !self.enabled {
            return (units, units != requested);
        }

        while existing_sizes.contains(&units) {
            units += self.increment;
            if let Some(ceiling) = max_units
                && units > ceiling
            {
                // Walk back down below the floor of the collision run instead of
                // exceeding the ceiling.
                units = ceiling;
                while existing_sizes.contains(&units) && units > floor {
                    units -= self.increment;
                }
                break;
            }
        }

        (units, units != requested)
    }
}
