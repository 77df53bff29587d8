//! Loosely-typed spreadsheet rows produced by the parser

use std::fmt;

/// One spreadsheet cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Empty,
}

impl CellValue {
    /// Blank cells and whitespace-only text count as missing
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// Text form used by the mapper. Whole numbers render without a decimal
    /// point so a numeric NIM cell like `21051201.0` becomes `21051201`.
    pub fn as_text(&self) -> String {
        self.to_string()
    }

    /// Numeric interpretation of the cell, if any
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            CellValue::Empty => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Empty => Ok(()),
        }
    }
}

/// Ordered header → cell mapping for one data row
///
/// Every header of the sheet is present; cells missing from short rows are
/// `CellValue::Empty`, never absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, CellValue)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, header: impl Into<String>, value: CellValue) {
        self.cells.push((header.into(), value));
    }

    /// First cell whose header equals `header` exactly
    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(key, _)| key == header)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Copy with every header trimmed and lower-cased
    pub fn with_normalized_headers(&self) -> RawRow {
        RawRow {
            cells: self
                .cells
                .iter()
                .map(|(key, value)| (key.trim().to_lowercase(), value.clone()))
                .collect(),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, CellValue)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, CellValue)>>(iter: I) -> Self {
        RawRow {
            cells: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_number_renders_without_decimals() {
        assert_eq!(CellValue::Number(21051201.0).as_text(), "21051201");
        assert_eq!(CellValue::Number(3.5).as_text(), "3.5");
        assert_eq!(CellValue::Empty.as_text(), "");
    }

    #[test]
    fn test_blank_detection() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::Text("   ".to_string()).is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
    }

    #[test]
    fn test_normalized_headers() {
        let row: RawRow = [
            ("  SKS ", CellValue::Number(3.0)),
            ("Nilai Huruf", CellValue::Text("A".to_string())),
        ]
        .into_iter()
        .collect();

        let normalized = row.with_normalized_headers();
        assert_eq!(normalized.get("sks"), Some(&CellValue::Number(3.0)));
        assert_eq!(normalized.get("nilai huruf"), Some(&CellValue::Text("A".to_string())));
        assert_eq!(normalized.get("SKS"), None);
    }
}
