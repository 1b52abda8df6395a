use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Viewing angle of a character rotation shot. Each variant names a
/// `rotations` entry in the catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RotationAngle {
    Front,
    FrontLeft,
    Left,
    BackLeft,
    Back,
    BackRight,
    Right,
    FrontRight,
    ThreeQuarterLeft,
    ThreeQuarterRight,
    ProfileLeft,
    ProfileRight,
}

impl RotationAngle {
    pub const MIN_STEPS: usize = 4;
    pub const MAX_STEPS: usize = 12;

    /// Angles for a turn-around in `steps` shots, or `None` outside 4..=12.
    ///
    /// Short sequences pick a spread around the character; from eight steps
    /// on the full circle is walked in order and the extra views appended.
    pub fn sequence(steps: usize) -> Option<Vec<RotationAngle>> {
        use RotationAngle::*;

        let angles = match steps {
            4 => vec![Front, Left, Back, Right],
            5 => vec![Front, FrontLeft, Left, Back, Right],
            6 => vec![Front, FrontLeft, Left, BackLeft, Back, Right],
            7 => vec![Front, FrontLeft, Left, BackLeft, Back, Right, FrontRight],
            8..=Self::MAX_STEPS => Self::iter().take(steps).collect(),
            _ => return None,
        };
        Some(angles)
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}
