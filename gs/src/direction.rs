//! Move directions
//!
//! Direction codes 0-7 name the 8 compass directions clockwise starting
//! from up. Any other code maps to a zero offset, which never reaches a
//! free cell and therefore always counts as an invalid move.

/// One of the 8 compass directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    Up = 0,
    UpRight = 1,
    Right = 2,
    DownRight = 3,
    Down = 4,
    DownLeft = 5,
    Left = 6,
    UpLeft = 7,
}

/// All directions in code order
pub const DIRECTIONS: [Direction; 8] = [
    Direction::Up,
    Direction::UpRight,
    Direction::Right,
    Direction::DownRight,
    Direction::Down,
    Direction::DownLeft,
    Direction::Left,
    Direction::UpLeft,
];

impl Direction {
    pub fn from_code(code: u8) -> Option<Self> {
        DIRECTIONS.get(code as usize).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// (dx, dy) with y growing downwards
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::UpRight => (1, -1),
            Direction::Right => (1, 0),
            Direction::DownRight => (1, 1),
            Direction::Down => (0, 1),
            Direction::DownLeft => (-1, 1),
            Direction::Left => (-1, 0),
            Direction::UpLeft => (-1, -1),
        }
    }
}

/// Offset for a raw intent byte; (0, 0) for unknown codes
pub fn direction_offset(code: u8) -> (i32, i32) {
    Direction::from_code(code).map(Direction::offset).unwrap_or((0, 0))
}
