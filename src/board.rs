//! The 3x3 grid and the line checks that decide a match.

use std::fmt;

use crate::error::GameError;

/// Width and height of the board.
pub const BOARD_SIZE: usize = 3;

/// Symbol a player places on the board. Cross always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mark {
    /// `X`, player A.
    Cross,
    /// `O`, player B.
    Circle,
}

impl Mark {
    /// The other mark.
    pub fn opponent(self) -> Mark {
        match self {
            Mark::Cross => Mark::Circle,
            Mark::Circle => Mark::Cross,
        }
    }

    /// Seat of the player holding this mark: 0 for cross, 1 for circle.
    pub fn index(self) -> usize {
        match self {
            Mark::Cross => 0,
            Mark::Circle => 1,
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mark::Cross => write!(f, "X"),
            Mark::Circle => write!(f, "O"),
        }
    }
}

/// What happened after a mark was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The game goes on.
    Continue,
    /// The move completed a line.
    Win,
    /// The move filled the last empty cell without completing a line.
    Draw,
}

/// A square grid of optional marks plus the number of marks placed so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Board {
    cells: [[Option<Mark>; BOARD_SIZE]; BOARD_SIZE],
    moves: usize,
}

impl Board {
    /// An empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Content of a cell, `None` if empty or out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<Mark> {
        self.cells.get(row)?.get(col).copied().flatten()
    }

    /// Number of marks on the board.
    pub fn move_count(&self) -> usize {
        self.moves
    }

    /// Checks that a mark could be placed at (`row`, `col`) without changing anything.
    pub fn check(&self, row: usize, col: usize) -> Result<(), GameError> {
        if row >= BOARD_SIZE || col >= BOARD_SIZE {
            return Err(GameError::OutOfBounds { row, col });
        }
        if self.cells[row][col].is_some() {
            return Err(GameError::Occupied { row, col });
        }
        Ok(())
    }

    /// Places `mark` and reports whether the game ended.
    ///
    /// Only the lines through the played cell are inspected.
    pub fn place(&mut self, row: usize, col: usize, mark: Mark) -> Result<Placement, GameError> {
        self.check(row, col)?;
        self.cells[row][col] = Some(mark);
        self.moves += 1;

        if self.completes_line(row, col, mark) {
            Ok(Placement::Win)
        } else if self.moves == BOARD_SIZE * BOARD_SIZE {
            Ok(Placement::Draw)
        } else {
            Ok(Placement::Continue)
        }
    }

    fn completes_line(&self, row: usize, col: usize, mark: Mark) -> bool {
        let n = BOARD_SIZE;
        let owned = |r: usize, c: usize| self.cells[r][c] == Some(mark);

        (0..n).all(|c| owned(row, c))
            || (0..n).all(|r| owned(r, col))
            || (row == col && (0..n).all(|i| owned(i, i)))
            || (row + col == n - 1 && (0..n).all(|i| owned(i, n - 1 - i)))
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..BOARD_SIZE {
            if row > 0 {
                writeln!(f)?;
            }
            for col in 0..BOARD_SIZE {
                match self.get(row, col) {
                    Some(mark) => write!(f, "{mark}")?,
                    None => write!(f, ".")?,
                }
            }
        }
        Ok(())
    }
}
