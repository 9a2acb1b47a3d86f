//! Directions, lane types and neighbour slots.

use serde::{Deserialize, Serialize};

/// A direction along the lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Longitudinal {
    /// Against the direction of travel.
    Up,
    /// With the direction of travel.
    Down,
}

/// A direction across lanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lateral {
    Left,
    Right,
}

impl Lateral {
    /// The opposite direction.
    pub fn flip(self) -> Self {
        match self {
            Lateral::Left => Lateral::Right,
            Lateral::Right => Lateral::Left,
        }
    }

    /// +1 for left, -1 for right; the sign of a lateral offset in world space.
    pub fn sign(self) -> f64 {
        match self {
            Lateral::Left => 1.0,
            Lateral::Right => -1.0,
        }
    }
}

/// The role a lane plays in the cross-section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaneType {
    #[default]
    Normal,
    /// A lane that starts at this cross-section.
    Added,
    /// A lane that ends at this cross-section.
    Subtracted,
    /// A lane narrowing to nothing, whose traffic must merge into a neighbour.
    MergeTaper,
    /// A lane widening from nothing, fed from a neighbour.
    DivergeTaper,
}

impl LaneType {
    /// Whether this is a merge or diverge taper.
    pub fn is_taper(self) -> bool {
        matches!(self, LaneType::MergeTaper | LaneType::DivergeTaper)
    }
}

/// A slot relative to a vehicle in which another vehicle may be found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Enclosure {
    /// The vehicle itself.
    Current,
    Up,
    Down,
    /// Alongside on the left lane.
    Left,
    LeftUp,
    LeftDown,
    /// Alongside on the right lane.
    Right,
    RightUp,
    RightDown,
}

impl Enclosure {
    /// The slots cached for every vehicle, in slot order.
    pub const NEIGHBOURS: [Enclosure; 8] = [
        Enclosure::Up,
        Enclosure::Down,
        Enclosure::Left,
        Enclosure::LeftUp,
        Enclosure::LeftDown,
        Enclosure::Right,
        Enclosure::RightUp,
        Enclosure::RightDown,
    ];

    /// Builds a slot from its lateral and longitudinal parts.
    pub fn new(lat: Option<Lateral>, lon: Option<Longitudinal>) -> Self {
        use Enclosure::*;
        match (lat, lon) {
            (None, None) => Current,
            (None, Some(Longitudinal::Up)) => Up,
            (None, Some(Longitudinal::Down)) => Down,
            (Some(Lateral::Left), None) => Left,
            (Some(Lateral::Left), Some(Longitudinal::Up)) => LeftUp,
            (Some(Lateral::Left), Some(Longitudinal::Down)) => LeftDown,
            (Some(Lateral::Right), None) => Right,
            (Some(Lateral::Right), Some(Longitudinal::Up)) => RightUp,
            (Some(Lateral::Right), Some(Longitudinal::Down)) => RightDown,
        }
    }

    /// The lateral part of the slot.
    pub fn lateral(self) -> Option<Lateral> {
        use Enclosure::*;
        match self {
            Left | LeftUp | LeftDown => Some(Lateral::Left),
            Right | RightUp | RightDown => Some(Lateral::Right),
            Current | Up | Down => None,
        }
    }

    /// The longitudinal part of the slot.
    pub fn longitudinal(self) -> Option<Longitudinal> {
        use Enclosure::*;
        match self {
            Up | LeftUp | RightUp => Some(Longitudinal::Up),
            Down | LeftDown | RightDown => Some(Longitudinal::Down),
            Current | Left | Right => None,
        }
    }

    /// Index into a vehicle's neighbour cache. `Current` is not cached.
    pub(crate) fn slot(self) -> Option<usize> {
        Self::NEIGHBOURS.iter().position(|e| *e == self)
    }
}
