//! Cell identity for the evaluation cache.
//!
//! A `Location` uniquely identifies a cell across all workbooks and sheets
//! that share one cache. It is the sole key into the cache store and the
//! only thing graph edges ever point at.

use serde::{Deserialize, Serialize};

use crate::error::LocationError;

const BOOK_BITS: u32 = 14;
const SHEET_BITS: u32 = 16;
const ROW_BITS: u32 = 20;
const COL_BITS: u32 = 14;

const SHEET_SHIFT: u32 = ROW_BITS + COL_BITS;
const BOOK_SHIFT: u32 = SHEET_BITS + SHEET_SHIFT;

/// Largest book index that fits in a location.
pub const MAX_BOOK: u32 = (1 << BOOK_BITS) - 1;
/// Largest sheet index that fits in a location.
pub const MAX_SHEET: u32 = (1 << SHEET_BITS) - 1;
/// Largest row index (0-based) that fits in a location: 1,048,576 rows.
pub const MAX_ROW: u32 = (1 << ROW_BITS) - 1;
/// Largest column index (0-based) that fits in a location: 16,384 columns.
pub const MAX_COL: u32 = (1 << COL_BITS) - 1;

/// Packed `(book, sheet, row, col)` address.
///
/// Fields are packed most-significant first, so the derived ordering is
/// book, then sheet, then row, then column. Invalidation uses that ordering
/// to visit siblings deterministically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "LocationParts", into = "LocationParts")]
pub struct Location(u64);

impl Location {
    /// Create a new location.
    ///
    /// # Panics
    ///
    /// If any coordinate exceeds its packed width. Use [`Location::try_new`]
    /// for untrusted input.
    #[inline]
    pub fn new(book: u32, sheet: u32, row: u32, col: u32) -> Self {
        match Self::try_new(book, sheet, row, col) {
            Ok(loc) => loc,
            Err(e) => panic!("{e}"),
        }
    }

    /// Create a location, rejecting coordinates that do not fit.
    pub fn try_new(book: u32, sheet: u32, row: u32, col: u32) -> Result<Self, LocationError> {
        if book > MAX_BOOK || sheet > MAX_SHEET || row > MAX_ROW || col > MAX_COL {
            return Err(LocationError::OutOfRange { book, sheet, row, col });
        }
        Ok(Self(
            (u64::from(book) << BOOK_SHIFT)
                | (u64::from(sheet) << SHEET_SHIFT)
                | (u64::from(row) << COL_BITS)
                | u64::from(col),
        ))
    }

    /// Location in book 0.
    #[inline]
    pub fn on_sheet(sheet: u32, row: u32, col: u32) -> Self {
        Self::new(0, sheet, row, col)
    }

    /// Parse an A1-style reference (`"C12"`, `"$AA$3"`) on the given book/sheet.
    pub fn parse_a1(book: u32, sheet: u32, text: &str) -> Result<Self, LocationError> {
        let (row, col) = parse_a1(text).ok_or_else(|| LocationError::BadReference(text.to_string()))?;
        Self::try_new(book, sheet, row, col)
    }

    pub fn book(self) -> u32 {
        (self.0 >> BOOK_SHIFT) as u32 & MAX_BOOK
    }

    pub fn sheet(self) -> u32 {
        (self.0 >> SHEET_SHIFT) as u32 & MAX_SHEET
    }

    pub fn row(self) -> u32 {
        (self.0 >> COL_BITS) as u32 & MAX_ROW
    }

    pub fn col(self) -> u32 {
        self.0 as u32 & MAX_COL
    }

    /// Same book and sheet, different cell.
    pub fn with_cell(self, row: u32, col: u32) -> Self {
        Self::new(self.book(), self.sheet(), row, col)
    }

    /// Sheet-local reference without book/sheet prefix, e.g. `B7`.
    pub fn a1(self) -> String {
        format!("{}{}", col_to_letters(self.col()), self.row() + 1)
    }

    /// Raw packed key.
    pub fn packed(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.book() != 0 {
            write!(f, "[{}]", self.book())?;
        }
        write!(f, "Sheet{}!{}", self.sheet() + 1, self.a1())
    }
}

/// Serialized form: the four coordinates spelled out.
#[derive(Serialize, Deserialize)]
struct LocationParts {
    book: u32,
    sheet: u32,
    row: u32,
    col: u32,
}

impl From<Location> for LocationParts {
    fn from(loc: Location) -> Self {
        Self {
            book: loc.book(),
            sheet: loc.sheet(),
            row: loc.row(),
            col: loc.col(),
        }
    }
}

impl TryFrom<LocationParts> for Location {
    type Error = LocationError;

    fn try_from(p: LocationParts) -> Result<Self, Self::Error> {
        Location::try_new(p.book, p.sheet, p.row, p.col)
    }
}

/// Convert 0-based column index to Excel-style letter(s).
pub fn col_to_letters(col: u32) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Parse `A1` / `$A$1` into 0-based `(row, col)`.
fn parse_a1(text: &str) -> Option<(u32, u32)> {
    let s = text.trim().to_ascii_uppercase();
    let s = s.strip_prefix('$').unwrap_or(&s);
    let letters_end = s.find(|c: char| !c.is_ascii_uppercase())?;
    if letters_end == 0 {
        return None;
    }
    let (letters, rest) = s.split_at(letters_end);
    let digits = rest.strip_prefix('$').unwrap_or(rest);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    // A=0, B=1, ..., Z=25, AA=26
    let col = letters
        .bytes()
        .try_fold(0u32, |acc, b| acc.checked_mul(26)?.checked_add(u32::from(b - b'A') + 1))?
        - 1;
    Some((row - 1, col))
}
