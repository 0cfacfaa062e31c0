//! Identifiers accepted from callers and echoed back to them.
//!
//! Agents send database and question ids either as JSON numbers (`2`) or as
//! strings (`"2"`).  Both shapes are accepted and kept as given so responses
//! echo exactly what the caller sent; comparisons go through the string form.
//! Integral floats (`2.0`) take the integer string form (`"2"`).

use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;

/// Largest magnitude at which every integer is exactly representable in f64.
const MAX_EXACT_F64_INTEGER: f64 = 9_007_199_254_740_992.0;

fn integral_form(n: &Number) -> Option<String> {
    if n.is_u64() || n.is_i64() {
        return Some(n.to_string());
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_EXACT_F64_INTEGER)
        .map(|f| format!("{}", f as i64))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Number(Number),
    Text(String),
}

impl Identifier {
    /// True for strings that are empty after trimming.  Numbers are never blank.
    pub fn is_blank(&self) -> bool {
        match self {
            Identifier::Number(_) => false,
            Identifier::Text(s) => s.trim().is_empty(),
        }
    }

    /// Whether the string form can be placed in a URL path segment verbatim.
    pub fn is_path_safe(&self) -> bool {
        match self {
            Identifier::Number(n) => integral_form(n).is_some(),
            Identifier::Text(s) => {
                let s = s.trim();
                !s.is_empty()
                    && s
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            }
        }
    }

    pub fn as_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Number(n) => match integral_form(n) {
                Some(int) => f.write_str(&int),
                None => write!(f, "{}", n),
            },
            Identifier::Text(s) => f.write_str(s.trim()),
        }
    }
}

impl From<u64> for Identifier {
    fn from(value: u64) -> Self {
        Identifier::Number(value.into())
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::Text(value.to_string())
    }
}

/// Treat `None` and blank identifiers alike.
pub(crate) fn present(id: Option<&Identifier>) -> Option<&Identifier> {
    id.filter(|id| !id.is_blank())
}
