use crate::error::{AppError, AppResult};

pub const SEATS_PER_ROW: u32 = 4;

/// Row/column layout of a bus: rows `A`, `B`, ... (then `AA`), columns 1-4,
/// filled row by row up to the seat capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatMap {
    capacity: u32,
}

impl SeatMap {
    pub fn new(capacity: u32) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn rows(&self) -> u32 {
        self.capacity.div_ceil(SEATS_PER_ROW)
    }

    /// Every seat number in layout order
    pub fn seats(&self) -> Vec<String> {
        (0..self.capacity).map(seat_label).collect()
    }

    /// Canonical form of `seat` (`b2` -> `B2`), or `InvalidSeat` when the
    /// seat is not part of this layout
    pub fn normalize(&self, seat: &str) -> AppResult<String> {
        match self.index_of(seat) {
            Some(index) => Ok(seat_label(index)),
            None => Err(AppError::InvalidSeat(seat.to_string())),
        }
    }

    fn index_of(&self, seat: &str) -> Option<u32> {
        let seat = seat.trim();
        let split = seat.find(|c: char| !c.is_ascii_alphabetic())?;
        let (letters, digits) = seat.split_at(split);
        if letters.is_empty() || letters.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let row = parse_row(letters)?;
        let column: u32 = digits.parse().ok()?;
        if !(1..=SEATS_PER_ROW).contains(&column) {
            return None;
        }

        let index = row.checked_mul(SEATS_PER_ROW)?.checked_add(column - 1)?;
        (index < self.capacity).then_some(index)
    }
}

fn seat_label(index: u32) -> String {
    let row = index / SEATS_PER_ROW;
    let column = index % SEATS_PER_ROW + 1;
    format!("{}{}", row_label(row), column)
}

fn row_label(row: u32) -> String {
    let mut n = row + 1;
    let mut label = Vec::new();
    while n > 0 {
        n -= 1;
        label.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    label.reverse();
    String::from_utf8(label).unwrap_or_default()
}

fn parse_row(letters: &str) -> Option<u32> {
    let mut n: u32 = 0;
    for c in letters.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        n = n * 26 + (c as u32 - 'A' as u32 + 1);
    }
    n.checked_sub(1)
}
