//! # Transforms
//!
//! The single capability a node wraps: something that accepts a Bag's values
//! and returns zero or more results.
//!
//! ## Return Shapes
//!
//! A transform returns an [`Emit`], which the node normalises into output
//! Bags:
//!
//! - [`Emit::Nothing`]: no output
//! - [`Emit::NotModified`]: forward the input Bag unchanged
//! - [`Emit::Value`]: one Bag with one positional value
//! - [`Emit::Group`]: one Bag carrying an ordered group of values
//! - [`Emit::Bag`]: one Bag with positional and keyword values
//! - [`Emit::Stream`]: a lazy sequence of further `Emit`s, forwarded one by
//!   one as they are produced
//!
//! Plain Rust return types convert through [`IntoEmit`], so most transforms
//! are ordinary closures.
//!
//! ## Arity
//!
//! Closures taking `()`, one, two or three [`Value`]s get their arity from
//! their signature (see [`Callable`]). Transforms that need keyword values or
//! a variable number of arguments take the whole `&Bag` and declare an
//! [`Arity`] explicitly; that declaration is validated when the node is built.

use crate::bag::{Bag, Value};
use crate::error::TransformError;
use std::fmt;
use std::marker::PhantomData;

/// Lazy sequence of results produced by one invocation.
pub type EmitStream = Box<dyn Iterator<Item = Result<Emit, TransformError>> + Send>;

/// The result shape of one transform invocation.
pub enum Emit {
  /// No output for this input.
  Nothing,
  /// Forward the input Bag as is.
  NotModified,
  /// One output Bag holding a single value.
  Value(Value),
  /// One output Bag holding an ordered group of values.
  Group(Vec<Value>),
  /// One output Bag built by the transform.
  Bag(Bag),
  /// Zero or more outputs produced lazily.
  Stream(EmitStream),
}

impl Emit {
  /// Builds a lazy stream from any iterator of convertible items.
  ///
  /// Items are converted as they are pulled, so nothing is materialised
  /// ahead of the consumer.
  pub fn stream<I>(items: I) -> Self
  where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: IntoEmit + 'static,
  {
    Emit::Stream(Box::new(items.into_iter().map(IntoEmit::into_emit)))
  }
}

impl fmt::Debug for Emit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Emit::Nothing => write!(f, "Emit::Nothing"),
      Emit::NotModified => write!(f, "Emit::NotModified"),
      Emit::Value(value) => write!(f, "Emit::Value({})", value),
      Emit::Group(values) => write!(f, "Emit::Group({:?})", values),
      Emit::Bag(bag) => write!(f, "Emit::Bag({})", bag),
      Emit::Stream(_) => write!(f, "Emit::Stream(..)"),
    }
  }
}

/// Conversion of transform return values into an [`Emit`].
pub trait IntoEmit {
  /// Performs the conversion.
  fn into_emit(self) -> Result<Emit, TransformError>;
}

impl IntoEmit for Emit {
  fn into_emit(self) -> Result<Emit, TransformError> {
    Ok(self)
  }
}

impl IntoEmit for () {
  fn into_emit(self) -> Result<Emit, TransformError> {
    Ok(Emit::Nothing)
  }
}

impl IntoEmit for Value {
  fn into_emit(self) -> Result<Emit, TransformError> {
    Ok(Emit::Value(self))
  }
}

impl IntoEmit for Bag {
  fn into_emit(self) -> Result<Emit, TransformError> {
    Ok(Emit::Bag(self))
  }
}

macro_rules! into_emit_value {
  ($($ty:ty),*) => {
    $(
      impl IntoEmit for $ty {
        fn into_emit(self) -> Result<Emit, TransformError> {
          Ok(Emit::Value(Value::from(self)))
        }
      }
    )*
  };
}

into_emit_value!(String, &str, bool, i32, i64, u32, u64, f64);

impl<T: IntoEmit> IntoEmit for Option<T> {
  fn into_emit(self) -> Result<Emit, TransformError> {
    match self {
      Some(inner) => inner.into_emit(),
      None => Ok(Emit::Nothing),
    }
  }
}

impl<T, E> IntoEmit for Result<T, E>
where
  T: IntoEmit,
  E: Into<TransformError>,
{
  fn into_emit(self) -> Result<Emit, TransformError> {
    self.map_err(Into::into).and_then(IntoEmit::into_emit)
  }
}

impl<A: Into<Value>, B: Into<Value>> IntoEmit for (A, B) {
  fn into_emit(self) -> Result<Emit, TransformError> {
    Ok(Emit::Group(vec![self.0.into(), self.1.into()]))
  }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> IntoEmit for (A, B, C) {
  fn into_emit(self) -> Result<Emit, TransformError> {
    Ok(Emit::Group(vec![self.0.into(), self.1.into(), self.2.into()]))
  }
}

/// Accepted number of positional values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arity {
  min: usize,
  max: Option<usize>,
}

impl Arity {
  /// Exactly `n` positional values.
  pub const fn exact(n: usize) -> Self {
    Self { min: n, max: Some(n) }
  }

  /// At least `n` positional values.
  pub const fn at_least(n: usize) -> Self {
    Self { min: n, max: None }
  }

  /// Between `min` and `max` positional values, inclusive.
  pub const fn between(min: usize, max: usize) -> Self {
    Self { min, max: Some(max) }
  }

  /// Any number of positional values.
  pub const fn any() -> Self {
    Self::at_least(0)
  }

  /// Lower bound.
  pub fn min(&self) -> usize {
    self.min
  }

  /// Upper bound, if any.
  pub fn max(&self) -> Option<usize> {
    self.max
  }

  /// Whether a Bag with `count` positional values can be accepted.
  pub fn accepts(&self, count: usize) -> bool {
    count >= self.min && self.max.map_or(true, |max| count <= max)
  }

  /// Checks that the bounds can be satisfied at all.
  pub(crate) fn check(&self) -> Result<(), String> {
    match self.max {
      Some(max) if max < self.min => Err(format!(
        "upper bound {} is below lower bound {}",
        max, self.min
      )),
      _ => Ok(()),
    }
  }
}

impl fmt::Display for Arity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.min, self.max) {
      (0, None) => write!(f, "any number of arguments"),
      (min, None) => write!(f, "at least {} argument(s)", min),
      (min, Some(max)) if min == max => write!(f, "exactly {} argument(s)", min),
      (min, Some(max)) => write!(f, "between {} and {} arguments", min, max),
    }
  }
}

/// A transformation step.
///
/// Implementations must be shareable between threads: the threaded strategy
/// calls a node's transform from that node's worker thread while other nodes
/// run elsewhere.
pub trait Transform: Send + Sync + 'static {
  /// Positional values this transform accepts.
  fn arity(&self) -> Arity;

  /// Processes one Bag.
  fn call(&self, bag: &Bag) -> Result<Emit, TransformError>;
}

/// Closures whose arity follows from their signature.
///
/// `Marker` only disambiguates the implementations; it is one of
/// `fn() -> R`, `fn(Value) -> R`, `fn(Value, Value) -> R` or
/// `fn(Value, Value, Value) -> R`.
pub trait Callable<Marker>: Send + Sync + 'static {
  /// Arity implied by the signature.
  fn arity(&self) -> Arity;

  /// Calls the closure with already arity-checked positional values.
  fn invoke(&self, args: &[Value]) -> Result<Emit, TransformError>;
}

impl<F, R> Callable<fn() -> R> for F
where
  F: Fn() -> R + Send + Sync + 'static,
  R: IntoEmit,
{
  fn arity(&self) -> Arity {
    Arity::exact(0)
  }

  fn invoke(&self, _args: &[Value]) -> Result<Emit, TransformError> {
    self().into_emit()
  }
}

impl<F, R> Callable<fn(Value) -> R> for F
where
  F: Fn(Value) -> R + Send + Sync + 'static,
  R: IntoEmit,
{
  fn arity(&self) -> Arity {
    Arity::exact(1)
  }

  fn invoke(&self, args: &[Value]) -> Result<Emit, TransformError> {
    self(args[0].clone()).into_emit()
  }
}

impl<F, R> Callable<fn(Value, Value) -> R> for F
where
  F: Fn(Value, Value) -> R + Send + Sync + 'static,
  R: IntoEmit,
{
  fn arity(&self) -> Arity {
    Arity::exact(2)
  }

  fn invoke(&self, args: &[Value]) -> Result<Emit, TransformError> {
    self(args[0].clone(), args[1].clone()).into_emit()
  }
}

impl<F, R> Callable<fn(Value, Value, Value) -> R> for F
where
  F: Fn(Value, Value, Value) -> R + Send + Sync + 'static,
  R: IntoEmit,
{
  fn arity(&self) -> Arity {
    Arity::exact(3)
  }

  fn invoke(&self, args: &[Value]) -> Result<Emit, TransformError> {
    self(args[0].clone(), args[1].clone(), args[2].clone()).into_emit()
  }
}

/// [`Transform`] adapter for a [`Callable`] closure.
pub struct FnTransform<F, M> {
  f: F,
  _marker: PhantomData<fn() -> M>,
}

impl<F, M> FnTransform<F, M>
where
  F: Callable<M>,
{
  /// Wraps the closure.
  pub fn new(f: F) -> Self {
    Self {
      f,
      _marker: PhantomData,
    }
  }
}

impl<F, M> Transform for FnTransform<F, M>
where
  F: Callable<M>,
  M: 'static,
{
  fn arity(&self) -> Arity {
    self.f.arity()
  }

  fn call(&self, bag: &Bag) -> Result<Emit, TransformError> {
    self.f.invoke(bag.args())
  }
}

/// [`Transform`] adapter for closures receiving the whole Bag.
pub struct BagTransform<F, R> {
  arity: Arity,
  f: F,
  _marker: PhantomData<fn() -> R>,
}

impl<F, R> BagTransform<F, R>
where
  F: Fn(&Bag) -> R + Send + Sync + 'static,
  R: IntoEmit + 'static,
{
  /// Wraps the closure with an explicit arity.
  pub fn new(arity: Arity, f: F) -> Self {
    Self {
      arity,
      f,
      _marker: PhantomData,
    }
  }
}

impl<F, R> Transform for BagTransform<F, R>
where
  F: Fn(&Bag) -> R + Send + Sync + 'static,
  R: IntoEmit + 'static,
{
  fn arity(&self) -> Arity {
    self.arity
  }

  fn call(&self, bag: &Bag) -> Result<Emit, TransformError> {
    (self.f)(bag).into_emit()
  }
}
