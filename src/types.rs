//! Element Type Descriptor
//!
//! Describes the scalar (or vector) element type stored in a buffer.

use std::fmt;
use std::str::FromStr;

/// Broad category of an element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    /// Signed integer
    Int,
    /// Unsigned integer (1-bit unsigned is a boolean)
    UInt,
    /// IEEE floating point
    Float,
    /// Opaque pointer-sized handle
    Handle,
}

/// Element type: code, bit width and lane count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    /// Type category
    pub code: TypeCode,
    /// Bits per lane
    pub bits: u8,
    /// Number of vector lanes (1 for scalars)
    pub lanes: u16,
}

impl Type {
    /// Create a type from its parts
    pub const fn new(code: TypeCode, bits: u8, lanes: u16) -> Self {
        Self { code, bits, lanes }
    }

    /// Signed integer of the given width
    pub const fn int(bits: u8) -> Self {
        Self::new(TypeCode::Int, bits, 1)
    }

    /// Unsigned integer of the given width
    pub const fn uint(bits: u8) -> Self {
        Self::new(TypeCode::UInt, bits, 1)
    }

    /// Floating point of the given width
    pub const fn float(bits: u8) -> Self {
        Self::new(TypeCode::Float, bits, 1)
    }

    /// Boolean (1-bit unsigned)
    pub const fn bool() -> Self {
        Self::new(TypeCode::UInt, 1, 1)
    }

    /// Opaque 64-bit handle
    pub const fn handle() -> Self {
        Self::new(TypeCode::Handle, 64, 1)
    }

    /// Same element type with a different lane count
    pub const fn with_lanes(self, lanes: u16) -> Self {
        Self::new(self.code, self.bits, lanes)
    }

    /// Bytes occupied by one lane, rounded up
    pub const fn bytes(&self) -> u32 {
        (self.bits as u32 + 7) / 8
    }

    /// True if this is a single-lane type
    pub const fn is_scalar(&self) -> bool {
        self.lanes == 1
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.bits) {
            (TypeCode::UInt, 1) => write!(f, "bool")?,
            (TypeCode::Int, bits) => write!(f, "int{}", bits)?,
            (TypeCode::UInt, bits) => write!(f, "uint{}", bits)?,
            (TypeCode::Float, bits) => write!(f, "float{}", bits)?,
            (TypeCode::Handle, _) => write!(f, "handle")?,
        }
        if self.lanes != 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

/// Error returned when a type name cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid type name: {0}")]
pub struct ParseTypeError(pub String);

impl FromStr for Type {
    type Err = ParseTypeError;

    /// Parse names such as `uint8`, `float32`, `int16x8`, `bool`, `handle`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTypeError(s.to_string());
        let s_lower = s.trim().to_lowercase();

        let (scalar, lanes) = match s_lower.split_once('x') {
            Some((scalar, lanes)) => (scalar, lanes.parse::<u16>().map_err(|_| err())?),
            None => (s_lower.as_str(), 1),
        };
        if lanes == 0 {
            return Err(err());
        }

        let base = if scalar == "bool" {
            Type::bool()
        } else if scalar == "handle" {
            Type::handle()
        } else if let Some(bits) = scalar.strip_prefix("uint") {
            Type::uint(bits.parse().map_err(|_| err())?)
        } else if let Some(bits) = scalar.strip_prefix("int") {
            Type::int(bits.parse().map_err(|_| err())?)
        } else if let Some(bits) = scalar.strip_prefix("float") {
            Type::float(bits.parse().map_err(|_| err())?)
        } else {
            return Err(err());
        };

        if base.bits == 0 {
            return Err(err());
        }
        Ok(base.with_lanes(lanes))
    }
}
