//! Tagged union over a closed list of alternatives

use crate::schema::{FieldType, WireType};
use crate::value::{FromValue, Value};
use crate::{Error, Result};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Maximum number of alternatives addressable by the one byte discriminant
pub const MAX_ALTERNATIVES: usize = 256;

/// Holds at most one value, typed as one of its alternatives.
///
/// The discriminant written on the wire equals [`which`](Variant::which).
#[derive(Debug, Clone)]
pub struct Variant {
    alternatives: Arc<[FieldType]>,
    held: Option<(usize, Box<Value>)>,
}

impl Variant {
    /// Empty variant over `alternatives`
    pub fn new<I, T>(alternatives: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<FieldType>,
    {
        let alternatives: Arc<[FieldType]> = alternatives.into_iter().map(Into::into).collect();
        if alternatives.len() > MAX_ALTERNATIVES {
            return Err(Error::TooManyAlternatives(alternatives.len()));
        }
        Ok(Self::empty(alternatives))
    }

    /// Empty variant matching a [`WireType::Variant`]
    pub fn for_wire(wire: &WireType) -> Result<Self> {
        match wire {
            WireType::Variant(alternatives) => Ok(Self::empty(alternatives.clone())),
            _ => Err(Error::TypeMismatch {
                expected: "variant",
                found: wire.name(),
            }),
        }
    }

    pub(crate) fn empty(alternatives: Arc<[FieldType]>) -> Self {
        Self {
            alternatives,
            held: None,
        }
    }

    pub(crate) fn from_parts(alternatives: Arc<[FieldType]>, index: usize, value: Value) -> Self {
        Self {
            alternatives,
            held: Some((index, Box::new(value))),
        }
    }

    pub fn alternatives(&self) -> &[FieldType] {
        &self.alternatives
    }

    /// Index of the held alternative
    pub fn which(&self) -> Result<usize> {
        self.held
            .as_ref()
            .map(|(index, _)| *index)
            .ok_or(Error::VariantEmpty)
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_none()
    }

    /// Store `value` as the first alternative it conforms to
    pub fn set(&mut self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        let index = self
            .alternatives
            .iter()
            .position(|alternative| value.conforms(alternative))
            .ok_or(Error::NotAnAlternative)?;
        self.held = Some((index, Box::new(value)));
        Ok(index)
    }

    /// Store `value` as alternative `index`
    pub fn set_at(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        match self.alternatives.get(index) {
            Some(alternative) if value.conforms(alternative) => {
                self.held = Some((index, Box::new(value)));
                Ok(())
            }
            _ => Err(Error::NotAnAlternative),
        }
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, value: impl Into<Value>) -> Result<Self> {
        self.set(value)?;
        Ok(self)
    }

    /// Copy of the held value as `T`
    pub fn get<T: FromValue>(&self) -> Result<T> {
        let (_, value) = self.held.as_ref().ok_or(Error::VariantEmpty)?;
        T::from_value(value.as_ref().clone())
    }

    pub fn value(&self) -> Option<&Value> {
        self.held.as_ref().map(|(_, value)| value.as_ref())
    }

    pub fn held(&self) -> Option<(usize, &Value)> {
        self.held.as_ref().map(|(index, value)| (*index, value.as_ref()))
    }

    /// Drop the held value
    pub fn reset(&mut self) -> Option<Value> {
        self.held.take().map(|(_, value)| *value)
    }

    /// Move the held value out as `T`, leaving the variant empty on success
    pub fn take<T: FromValue>(&mut self) -> Result<T> {
        let value = self.value().cloned().ok_or(Error::VariantEmpty)?;
        let typed = T::from_value(value)?;
        self.held = None;
        Ok(typed)
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.held() == other.held()
    }
}

impl Eq for Variant {}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.held().hash(state);
    }
}
