use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Column count of the submissions sheet (A..I).
pub const COLUMN_COUNT: usize = 9;

/// Zero-based index of the user-id column (B).
pub const USER_ID_COLUMN: usize = 1;

/// One row of the submissions sheet, in column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub timestamp: String,
    pub user_id: String,
    pub username: String,
    pub gender: String,
    pub name: String,
    pub policy_number: String,
    pub document: String,
    pub phone: String,
    pub bot_label: String,
}

impl SubmissionRow {
    pub fn into_cells(self) -> Vec<String> {
        vec![
            self.timestamp,
            self.user_id,
            self.username,
            self.gender,
            self.name,
            self.policy_number,
            self.document,
            self.phone,
            self.bot_label,
        ]
    }
}

/// `"<docType> <docNumber>"` as stored in the document column.
pub fn document_cell(document_type: &str, document_number: &str) -> String {
    format!("{} {}", document_type, document_number)
}

/// Background color used to tag rows by originating bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl RowColor {
    /// Channels scaled to the 0.0..=1.0 range Sheets expects.
    pub fn as_fractions(&self) -> (f64, f64, f64) {
        (
            f64::from(self.red) / 255.0,
            f64::from(self.green) / 255.0,
            f64::from(self.blue) / 255.0,
        )
    }
}

impl FromStr for RowColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("expected rrggbb hex, got '{}'", s));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|e| e.to_string())
        };
        Ok(RowColor {
            red: channel(0..2)?,
            green: channel(2..4)?,
            blue: channel(4..6)?,
        })
    }
}
