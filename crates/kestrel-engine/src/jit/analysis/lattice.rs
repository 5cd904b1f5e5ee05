//! Value lattice for type inference
//!
//! ```text
//!            Top
//!     /   /   |   \   \
//!  Known(Integer) ... Known(Object)
//!     \   \   |   /   /
//!         Undefined
//!             |
//!          Bottom
//! ```
//!
//! `Bottom` marks unreachable program points. `Undefined` is the value of a
//! local that has never been assigned. Two different known kinds join to
//! `Top`. The lattice has height four, which bounds the fixpoint solver.

use kestrel_bytecode::Kind;
use std::fmt;

/// Abstract approximation of the runtime kinds a slot may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbstractValue {
    /// No value reaches this point
    Bottom,
    /// Never-assigned local
    Undefined,
    /// Exactly one runtime kind
    Known(Kind),
    /// Any kind
    Top,
}

impl AbstractValue {
    /// Least upper bound
    pub fn join(self, other: AbstractValue) -> AbstractValue {
        use AbstractValue::*;
        match (self, other) {
            (Bottom, x) | (x, Bottom) => x,
            (Top, _) | (_, Top) => Top,
            (Undefined, x) | (x, Undefined) => x,
            (Known(a), Known(b)) if a == b => Known(a),
            (Known(_), Known(_)) => Top,
        }
    }

    /// Greatest lower bound
    pub fn meet(self, other: AbstractValue) -> AbstractValue {
        use AbstractValue::*;
        match (self, other) {
            (Top, x) | (x, Top) => x,
            (Bottom, _) | (_, Bottom) => Bottom,
            (Undefined, _) | (_, Undefined) => Undefined,
            (Known(a), Known(b)) if a == b => Known(a),
            (Known(_), Known(_)) => Bottom,
        }
    }

    /// Lattice order: `self <= other`
    pub fn leq(self, other: AbstractValue) -> bool {
        self.join(other) == other
    }

    /// The single kind this value denotes, if any
    pub fn concrete_kind(self) -> Option<Kind> {
        match self {
            AbstractValue::Known(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether this value has a native unboxed representation
    pub fn is_unboxable(self) -> bool {
        self.concrete_kind().is_some_and(Kind::is_unboxable)
    }

    pub fn is_top(self) -> bool {
        self == AbstractValue::Top
    }

    pub fn is_bottom(self) -> bool {
        self == AbstractValue::Bottom
    }

    /// Join over an iterator of kinds (`Bottom` when empty)
    pub fn from_kinds(kinds: impl IntoIterator<Item = Kind>) -> AbstractValue {
        kinds
            .into_iter()
            .fold(AbstractValue::Bottom, |acc, kind| acc.join(AbstractValue::Known(kind)))
    }
}

impl From<Kind> for AbstractValue {
    fn from(kind: Kind) -> Self {
        AbstractValue::Known(kind)
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractValue::Bottom => f.write_str("bottom"),
            AbstractValue::Undefined => f.write_str("undefined"),
            AbstractValue::Known(kind) => write!(f, "{}", kind),
            AbstractValue::Top => f.write_str("any"),
        }
    }
}

/// Local-variable lattice element
///
/// Joining with a path on which the local is unassigned keeps the kind seen
/// on the other paths and sets `maybe_undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalInfo {
    pub value: AbstractValue,
    pub maybe_undefined: bool,
}

impl LocalInfo {
    /// Unreachable
    pub const BOTTOM: LocalInfo = LocalInfo {
        value: AbstractValue::Bottom,
        maybe_undefined: false,
    };

    /// A local that has not been assigned on any path
    pub fn undefined() -> Self {
        LocalInfo {
            value: AbstractValue::Undefined,
            maybe_undefined: true,
        }
    }

    /// A local assigned on every path
    pub fn defined(value: AbstractValue) -> Self {
        LocalInfo {
            value,
            maybe_undefined: false,
        }
    }

    pub fn join(self, other: LocalInfo) -> LocalInfo {
        if self.value.is_bottom() {
            return other;
        }
        if other.value.is_bottom() {
            return self;
        }
        LocalInfo {
            value: self.value.join(other.value),
            maybe_undefined: self.maybe_undefined || other.maybe_undefined,
        }
    }

    /// Whether the local is definitely unassigned
    pub fn is_unassigned(self) -> bool {
        self.value == AbstractValue::Undefined
    }
}

impl fmt::Display for LocalInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.maybe_undefined && !self.is_unassigned() {
            write!(f, "{}?", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}
