//! GameState - shared world store and synchronization protocol for ChompChamps
//!
//! Every ChompChamps process (the master, each player and the optional view)
//! maps two POSIX shared-memory objects:
//!
//! ```text
//! /game_state   WorldHeader | cells[width * height]      (master writes, others read)
//! /game_sync    SyncState: rendezvous pair, RwGate, move gates
//! ```
//!
//! The master is the only writer of the world. Readers and the writer are
//! serialized through [`RwGate`], a turnstile-gated readers/writer lock built
//! from process-shared semaphores.
//!
//! # Example
//!
//! ```ignore
//! use gamestate::{Access, SharedSync, SharedWorld, WorldLayout};
//!
//! let layout = WorldLayout::new(10, 10)?;
//! let world = SharedWorld::attach("/game_state", layout, Access::ReadOnly)?;
//! let sync = SharedSync::attach("/game_sync")?;
//!
//! let section = sync.gate().read()?;
//! let view = world.read(&section);
//! println!("finished: {}", view.finished());
//! ```

pub mod direction;
pub mod error;
pub mod gate;
pub mod ranking;
pub mod region;
pub mod semaphore;
pub mod sync;
pub mod world;

pub use direction::{DIRECTIONS, Direction, direction_offset};
pub use error::{SemError, SemResult, StoreError, StoreResult};
pub use gate::{ReadSection, RwGate, WriteSection};
pub use ranking::{Standing, standings, winner};
pub use region::{Access, SharedRegion};
pub use semaphore::Semaphore;
pub use sync::{SharedSync, SyncState};
pub use world::{AgentRecord, Board, SharedWorld, WorldHeader, WorldLayout, WorldMut, WorldRef, WorldSnapshot};

/// Maximum number of agents a game can host
pub const MAX_AGENTS: usize = 9;

/// Smallest accepted board side
pub const MIN_BOARD_SIZE: u16 = 10;

/// Smallest reward a cell can hold
pub const MIN_REWARD: i32 = 1;

/// Largest reward a cell can hold
pub const MAX_REWARD: i32 = 9;

/// Size of the NUL-padded agent name field
pub const NAME_LEN: usize = 16;

/// Value returned when a cell outside the board is queried
pub const OUT_OF_BOUNDS: i32 = -999;

/// Well-known name of the world region
pub const DEFAULT_STATE_NAME: &str = "/game_state";

/// Well-known name of the synchronization region
pub const DEFAULT_SYNC_NAME: &str = "/game_sync";

/// Environment variable that overrides the world region name
pub const STATE_NAME_ENV: &str = "CHOMP_STATE_SHM";

/// Environment variable that overrides the synchronization region name
pub const SYNC_NAME_ENV: &str = "CHOMP_SYNC_SHM";

/// Marker stored in a cell occupied by agent `idx`
pub fn occupied_marker(idx: usize) -> i32 {
    -(idx as i32 + 1)
}

/// Agent index encoded by an occupied marker, if `cell` is one
pub fn marker_owner(cell: i32) -> Option<usize> {
    if (-(MAX_AGENTS as i32)..=-1).contains(&cell) {
        Some((-cell - 1) as usize)
    } else {
        None
    }
}

/// Whether `cell` holds a collectable reward
pub fn is_reward(cell: i32) -> bool {
    (MIN_REWARD..=MAX_REWARD).contains(&cell)
}

/// Region names resolved from the environment, falling back to the well-known names
pub fn names_from_env() -> (String, String) {
    let state = std::env::var(STATE_NAME_ENV).unwrap_or_else(|_| DEFAULT_STATE_NAME.to_string());
    let sync = std::env::var(SYNC_NAME_ENV).unwrap_or_else(|_| DEFAULT_SYNC_NAME.to_string());
    (state, sync)
}
