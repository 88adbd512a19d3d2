use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell's user-entered content.
///
/// JSON form is untagged: `null`, `true`, `42.5`, `"text"`. Text starting with
/// `=` is a formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn formula(expr: &str) -> Self {
        let expr = expr.strip_prefix('=').unwrap_or(expr);
        Self::Text(format!("={expr}"))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, Self::Text(s) if s.starts_with('=') && s.len() > 1)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Stable byte encoding used for checksums. Distinguishes types so that
    /// `1` and `"1"` never collide.
    pub fn canonical_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Self::Empty => out.push(0),
            Self::Bool(b) => {
                out.push(1);
                out.push(u8::from(*b));
            }
            Self::Number(n) => {
                out.push(2);
                // Normalize -0.0 so equal numbers hash equally.
                let n = if *n == 0.0 { 0.0 } else { *n };
                out.extend_from_slice(&n.to_bits().to_le_bytes());
            }
            Self::Text(s) if s.is_empty() => out.push(0),
            Self::Text(s) => {
                out.push(3);
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Content equality that treats `""` and empty as the same cell.
    pub fn same_content(&self, other: &CellValue) -> bool {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => true,
            (false, false) => self == other,
            _ => false,
        }
    }

    pub(crate) fn sort_rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Text(s) if !s.is_empty() => 1,
            Self::Bool(_) => 2,
            _ => 3,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// RGBA color, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

fn default_alpha() -> f32 {
    1.0
}

impl Color {
    pub fn rgb(red: f32, green: f32, blue: f32) -> Self {
        Self {
            red,
            green,
            blue,
            alpha: 1.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.red, self.green, self.blue, self.alpha]
            .iter()
            .all(|c| (0.0..=1.0).contains(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_json_shapes() {
        let values: Vec<CellValue> =
            serde_json::from_str(r#"[null, true, 3.5, "x", "=SUM(A1:A2)"]"#).unwrap();
        assert_eq!(values[0], CellValue::Empty);
        assert_eq!(values[1], CellValue::Bool(true));
        assert_eq!(values[2], CellValue::Number(3.5));
        assert_eq!(values[3], CellValue::text("x"));
        assert!(values[4].is_formula());
    }

    #[test]
    fn canonical_bytes_distinguish_types() {
        let mut a = Vec::new();
        CellValue::Number(1.0).canonical_bytes(&mut a);
        let mut b = Vec::new();
        CellValue::text("1").canonical_bytes(&mut b);
        assert_ne!(a, b);

        let mut empty = Vec::new();
        CellValue::Empty.canonical_bytes(&mut empty);
        let mut blank = Vec::new();
        CellValue::text("").canonical_bytes(&mut blank);
        assert_eq!(empty, blank);
    }
}
