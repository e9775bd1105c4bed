//! Pipeline arguments
//!
//! The calling-convention layer describes every parameter of a compiled
//! pipeline by name, kind and element type.

use std::fmt;

use crate::types::Type;

/// Whether an argument is passed by value or as a buffer descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentKind {
    Scalar,
    Buffer,
}

/// A named pipeline argument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Argument {
    pub name: String,
    pub kind: ArgumentKind,
    pub ty: Type,
}

impl Argument {
    pub fn new(name: impl Into<String>, kind: ArgumentKind, ty: Type) -> Self {
        Self {
            name: name.into(),
            kind,
            ty,
        }
    }

    /// A buffer argument; passed as a pointer to a raw descriptor
    pub fn buffer(name: impl Into<String>, ty: Type) -> Self {
        Self::new(name, ArgumentKind::Buffer, ty)
    }

    /// A scalar argument passed by value
    pub fn scalar(name: impl Into<String>, ty: Type) -> Self {
        Self::new(name, ArgumentKind::Scalar, ty)
    }

    pub fn is_buffer(&self) -> bool {
        self.kind == ArgumentKind::Buffer
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ArgumentKind::Buffer => write!(f, "{}: buffer<{}>", self.name, self.ty),
            ArgumentKind::Scalar => write!(f, "{}: {}", self.name, self.ty),
        }
    }
}
