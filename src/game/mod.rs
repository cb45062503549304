//! Board engine: mine placement, flood-fill reveal, flag bookkeeping.
//!
//! The board is a 9x9 grid indexed 0..80 row-major. Cell values 0..=8
//! are revealed adjacency counts; UNKNOWN, FLAG and MINE are sentinels
//! above the numeric range. MINE never appears in a player-visible map.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::params::*;

pub const GAME_REVEAL_8: u8 = 8;
pub const GAME_UNKNOWN: u8 = 9;
pub const GAME_FLAG: u8 = 10;
pub const GAME_MINE: u8 = 11;

// ─── Mine Placement ─────────────────────────────────────────────────

/// Draws mine layouts. With a fixed seed the generator is reseeded on
/// every placement, so all games share one layout (test mode). Without
/// one, a process-wide entropy-seeded generator keeps advancing and
/// every game differs.
pub struct MinePlacer {
    seed: Option<u64>,
    rng: Mutex<StdRng>,
}

impl MinePlacer {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        MinePlacer {
            seed,
            rng: Mutex::new(rng),
        }
    }

    /// Draw ten distinct cells by rejection sampling: keep drawing
    /// (x, y) pairs until an unused cell comes up.
    pub fn place(&self) -> [u8; NUM_MINES] {
        let mut rng = self.rng.lock().expect("placement rng poisoned");
        if let Some(s) = self.seed {
            *rng = StdRng::seed_from_u64(s);
        }
        let mut taken = [false; NUM_TILES];
        let mut mines = [0u8; NUM_MINES];
        for slot in mines.iter_mut() {
            loop {
                let x = rng.gen_range(0..NUM_COLS);
                let y = rng.gen_range(0..NUM_ROWS);
                let cell = y * NUM_COLS + x;
                if !taken[cell] {
                    taken[cell] = true;
                    *slot = cell as u8;
                    break;
                }
            }
        }
        mines
    }
}

// ─── Board ──────────────────────────────────────────────────────────

/// Outcome of a reveal request.
#[derive(Debug, PartialEq, Eq)]
pub enum Reveal {
    /// The target was a mine; the caller resets the game.
    Hit,
    /// Flood-fill ran; the map changed.
    Revealed,
    /// Target already numeric or flagged; nothing happened.
    Blocked,
}

/// Outcome of a flag request.
#[derive(Debug, PartialEq, Eq)]
pub enum FlagToggle {
    /// Toggled a mine cell; carries the updated counter.
    Mine { mines_left: u8 },
    /// Toggled a non-mine cell; the counter is untouched.
    Plain,
    /// Target cell already numeric; nothing happened.
    Ignored,
}

pub struct Board {
    map: [u8; NUM_TILES],
    mines: [u8; NUM_MINES],
    mines_left: u8,
}

impl Board {
    pub fn new() -> Self {
        Board {
            map: [GAME_UNKNOWN; NUM_TILES],
            mines: [0; NUM_MINES],
            mines_left: NUM_MINES as u8,
        }
    }

    /// Start a fresh game on this board with the given layout.
    pub fn start(&mut self, mines: [u8; NUM_MINES]) {
        self.map = [GAME_UNKNOWN; NUM_TILES];
        self.mines = mines;
        self.mines_left = NUM_MINES as u8;
    }

    /// Clear back to the idle state (STOP, mine hit, or win cleanup).
    pub fn reset(&mut self) {
        self.start([0; NUM_MINES]);
    }

    pub fn map(&self) -> &[u8; NUM_TILES] {
        &self.map
    }

    pub fn mines_left(&self) -> u8 {
        self.mines_left
    }

    pub fn is_won(&self) -> bool {
        self.mines_left == 0
    }

    fn is_mine(&self, cell: u8) -> bool {
        self.mines.contains(&cell)
    }

    /// All mines flagged wins the game: only flags that cover a mine
    /// ever decrement the counter.
    pub fn toggle_flag(&mut self, cell: u8) -> FlagToggle {
        let at = cell as usize;
        if at >= NUM_TILES || self.map[at] <= GAME_REVEAL_8 {
            return FlagToggle::Ignored;
        }
        if self.is_mine(cell) {
            if self.map[at] == GAME_FLAG {
                self.map[at] = GAME_UNKNOWN;
                self.mines_left += 1;
            } else {
                self.map[at] = GAME_FLAG;
                self.mines_left -= 1;
            }
            FlagToggle::Mine { mines_left: self.mines_left }
        } else {
            self.map[at] = if self.map[at] == GAME_FLAG {
                GAME_UNKNOWN
            } else {
                GAME_FLAG
            };
            FlagToggle::Plain
        }
    }

    /// Flood-fill reveal. Only an UNKNOWN cell reveals: numeric cells
    /// are already open, and a flag shields whatever sits under it.
    /// Iterative on an explicit queue rather than recursive.
    pub fn reveal(&mut self, cell: u8) -> Reveal {
        let at = cell as usize;
        if at >= NUM_TILES || self.map[at] != GAME_UNKNOWN {
            return Reveal::Blocked;
        }
        if self.is_mine(cell) {
            return Reveal::Hit;
        }

        let mut pending = vec![at];
        while let Some(c) = pending.pop() {
            if self.map[c] != GAME_UNKNOWN {
                continue;
            }
            let count = neighbours(c)
                .filter(|&n| self.is_mine(n as u8))
                .count() as u8;
            self.map[c] = count;
            if count == 0 {
                pending.extend(neighbours(c).filter(|&n| self.map[n] == GAME_UNKNOWN));
            }
        }
        Reveal::Revealed
    }
}

/// In-bounds 8-neighbourhood of a cell, row-major.
fn neighbours(cell: usize) -> impl Iterator<Item = usize> {
    let row = (cell / NUM_COLS) as isize;
    let col = (cell % NUM_COLS) as isize;
    (-1isize..=1)
        .flat_map(move |dr| (-1isize..=1).map(move |dc| (row + dr, col + dc)))
        .filter(move |&(r, c)| {
            (r, c) != (row, col)
                && (0..NUM_ROWS as isize).contains(&r)
                && (0..NUM_COLS as isize).contains(&c)
        })
        .map(|(r, c)| (r * NUM_COLS as isize + c) as usize)
}
