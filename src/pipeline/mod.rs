//! Pipeline stages
//!
//! A minimal model of a pipeline's stage definitions, keyed by name, and
//! the analysis that finds stages which do nothing but copy another stage
//! point for point. Such copies are candidates for elision: the consumer
//! can alias the producer's buffer instead of owning its own.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Pipeline analysis errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Stage {0} is not defined in the environment")]
    UnknownStage(String),
}

/// Result type for pipeline analysis
pub type PipelineResult<T> = Result<T, PipelineError>;

/// What a call expression refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Another stage of the pipeline
    Stage,
    /// An input image
    Image,
    /// An external function
    Extern,
    /// A compiler intrinsic
    Intrinsic,
}

/// Expression tree for stage values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Var(String),
    IntImm(i64),
    Call {
        name: String,
        args: Vec<Expr>,
        kind: CallKind,
        /// Which element of a tuple-valued callee is read
        value_index: usize,
    },
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    /// Call element `value_index` of `name` at `args`
    pub fn call(name: impl Into<String>, kind: CallKind, args: Vec<Expr>, value_index: usize) -> Self {
        Expr::Call {
            name: name.into(),
            args,
            kind,
            value_index,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(a: Expr, b: Expr) -> Self {
        Expr::Add(Box::new(a), Box::new(b))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(a: Expr, b: Expr) -> Self {
        Expr::Mul(Box::new(a), Box::new(b))
    }

    /// Whether this is exactly the variable `name`
    fn is_var(&self, name: &str) -> bool {
        matches!(self, Expr::Var(v) if v == name)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, "{}", name),
            Expr::IntImm(v) => write!(f, "{}", v),
            Expr::Call {
                name,
                args,
                value_index,
                ..
            } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")?;
                if *value_index > 0 {
                    write!(f, "[{}]", value_index)?;
                }
                Ok(())
            }
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Mul(a, b) => write!(f, "({} * {})", a, b),
        }
    }
}

/// Pure definition of one pipeline stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDef {
    pub name: String,
    /// Pure variables, outermost last
    pub args: Vec<String>,
    /// One expression per tuple element
    pub values: Vec<Expr>,
    pub has_update: bool,
    pub is_extern: bool,
}

impl StageDef {
    /// A pure stage with no update and no extern definition
    pub fn new(name: impl Into<String>, args: &[&str], values: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            values,
            has_update: false,
            is_extern: false,
        }
    }

    pub fn with_update(mut self) -> Self {
        self.has_update = true;
        self
    }

    pub fn as_extern(mut self) -> Self {
        self.is_extern = true;
        self
    }
}

/// All stages of a pipeline by name
pub type Environment = BTreeMap<String, StageDef>;

/// A consumer that only copies its producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPair {
    /// Copied from
    pub producer: String,
    /// Stored into
    pub consumer: String,
}

/// If `stage` is a pure pointwise copy of another stage or image, return
/// the name it copies from.
///
/// Stages with an update or an extern definition never qualify. When the
/// producer is a tuple, the stage must copy every element in order;
/// copying only some of them does not count.
pub fn pointwise_copy_producer(stage: &StageDef, env: &Environment) -> Option<String> {
    if stage.has_update || stage.is_extern || stage.values.is_empty() {
        return None;
    }

    let mut producer: Option<&str> = None;
    for (i, value) in stage.values.iter().enumerate() {
        let Expr::Call {
            name,
            args,
            kind,
            value_index,
        } = value
        else {
            return None;
        };
        if !matches!(kind, CallKind::Stage | CallKind::Image) {
            return None;
        }
        if *value_index != i {
            return None;
        }
        if args.len() != stage.args.len()
            || !args.iter().zip(&stage.args).all(|(a, v)| a.is_var(v))
        {
            return None;
        }
        match producer {
            None => producer = Some(name.as_str()),
            Some(p) if p == name => {}
            Some(_) => return None,
        }
    }

    let producer = producer?;
    if producer == stage.name {
        return None;
    }
    // A stage producer must match element for element; images are scalar
    // valued from the pipeline's point of view
    if let Some(def) = env.get(producer) {
        if def.values.len() != stage.values.len() {
            return None;
        }
    } else if stage.values.len() != 1 {
        return None;
    }
    Some(producer.to_string())
}

/// Collect every pointwise copy among the stages in `order`
pub fn pointwise_copies(order: &[String], env: &Environment) -> PipelineResult<Vec<CopyPair>> {
    let mut copies = Vec::new();
    for name in order {
        let stage = env
            .get(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.clone()))?;
        if let Some(producer) = pointwise_copy_producer(stage, env) {
            tracing::trace!(producer = %producer, consumer = %name, "pointwise copy");
            copies.push(CopyPair {
                producer,
                consumer: name.clone(),
            });
        }
    }
    Ok(copies)
}
