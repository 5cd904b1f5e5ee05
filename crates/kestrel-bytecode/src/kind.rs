//! Runtime value kinds
//!
//! A [`Kind`] names the concrete runtime type of a value. It is shared by the
//! bytecode format (declared parameter kinds, constant kinds), the analysis
//! lattice and the runtime profiler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete runtime value kind
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Integer = 0,
    Float = 1,
    Boolean = 2,
    None = 3,
    String = 4,
    List = 5,
    Tuple = 6,
    Dict = 7,
    Function = 8,
    Iterator = 9,
    Object = 10,
}

impl Kind {
    /// All kinds, in tag order
    pub const ALL: [Kind; 11] = [
        Kind::Integer,
        Kind::Float,
        Kind::Boolean,
        Kind::None,
        Kind::String,
        Kind::List,
        Kind::Tuple,
        Kind::Dict,
        Kind::Function,
        Kind::Iterator,
        Kind::Object,
    ];

    /// Decode a kind tag
    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Encode as a kind tag
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Kinds with a native machine representation
    pub fn is_unboxable(self) -> bool {
        matches!(self, Kind::Integer | Kind::Float | Kind::Boolean)
    }

    /// Integer or Float
    pub fn is_numeric(self) -> bool {
        matches!(self, Kind::Integer | Kind::Float)
    }

    /// List or Tuple
    pub fn is_sequence(self) -> bool {
        matches!(self, Kind::List | Kind::Tuple)
    }

    /// Lowercase display name
    pub fn name(self) -> &'static str {
        match self {
            Kind::Integer => "integer",
            Kind::Float => "float",
            Kind::Boolean => "boolean",
            Kind::None => "none",
            Kind::String => "string",
            Kind::List => "list",
            Kind::Tuple => "tuple",
            Kind::Dict => "dict",
            Kind::Function => "function",
            Kind::Iterator => "iterator",
            Kind::Object => "object",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
