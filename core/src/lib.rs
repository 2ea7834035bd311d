// Mandelbrot Tile Coordinator — shared types
// Coordinates, leases, and the index-entry shape that every other crate builds on.

pub mod clock;
pub mod coord;
pub mod lease;
pub mod tile;

pub use clock::monotonic_millis;
pub use coord::Coord;
pub use lease::Lease;
pub use tile::{TileCategory, TilePayload, TILE_PAYLOAD_LEN, TILE_SIDE};

/// Lease time-to-live, in milliseconds, unless overridden by configuration.
pub const DEFAULT_LEASE_TTL_MS: u64 = 3_600_000;

/// How often the Leaseboard sweeper reclaims expired leases, in milliseconds.
pub const DEFAULT_SWEEP_PERIOD_MS: u64 = 300_000;

/// Per-read socket timeout applied by both TCP listeners, in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Dispatcher listener backlog.
pub const DISPATCHER_BACKLOG: i32 = 16;

/// TileServer listener backlog.
pub const TILESERVER_BACKLOG: i32 = 32;

/// One entry in the on-disk index: the coord it describes, its derived
/// category, and (for `Regular` tiles only) the data file that holds the
/// encoded payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub coord: Coord,
    pub category: TileCategory,
    pub filename: Option<String>,
}

impl IndexEntry {
    pub fn new(coord: Coord, category: TileCategory, filename: Option<String>) -> Self {
        debug_assert!(
            (category == TileCategory::Regular) == filename.is_some(),
            "filename is meaningful only for Regular tiles"
        );
        IndexEntry {
            coord,
            category,
            filename,
        }
    }
}
