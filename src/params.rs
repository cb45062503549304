/// sweepnet service parameters
/// All protocol- and game-critical constants are defined here.
use std::time::Duration;

/// Every wire record is exactly this many bytes; parsing stops at EOT.
pub const FRAME_LEN: usize = 512;

/// End-of-transmission terminator byte. Bytes after it are don't-care.
pub const EOT: u8 = 0x7f;

/// Fixed width of username and password fields on the wire.
pub const NAME_LEN: usize = 26;

/// Maximum credential rows / leaderboard rows.
pub const NUM_ACCOUNTS: usize = 64;

/// Board geometry: 9x9 grid, row-major, 10 mines.
pub const NUM_ROWS: usize = 9;
pub const NUM_COLS: usize = 9;
pub const NUM_TILES: usize = NUM_ROWS * NUM_COLS;
pub const NUM_MINES: usize = 10;

/// Rows per leaderboard page.
pub const LEADERBOARD_ENTRIES: usize = 10;

/// Admission queue: sockets are stored in fixed-size chunks.
pub const QUEUE_CHUNK: usize = 32;
pub const QUEUE_BUFFERS: usize = 160;

/// Size of the session worker pool.
pub const NUM_WORKERS: usize = 10;

/// Default TCP port for both server and client.
pub const DEFAULT_PORT: u16 = 12345;

/// Seed that reproduces the fixed mine layout in test mode (`--seed 42`).
pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// Time poller tick: ~75 Hz, chosen to not flood small clients.
pub const TIME_TICK: Duration = Duration::from_micros(13_333);

/// How long a worker waits for a queue signal before re-checking anyway.
pub const POP_FALLBACK: Duration = Duration::from_secs(1);

/// Client-side connection retry budget, spaced 1 s apart.
pub const NUM_CONNECT_RETRIES: u32 = 64;

/// Tie window for leaderboard best-time comparison, in seconds.
pub const TIME_EPSILON: f64 = 1e-4;

/// Credential file read from the server working directory.
pub const AUTH_FILE: &str = "Authentication.txt";
