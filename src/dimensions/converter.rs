//! Event conversion into canonical key/value form
//!
//! The engine does not interpret raw events. A converter projects one raw
//! event onto the key and value descriptors named by the active
//! [`ConversionContext`] and reports a [`FieldResolutionError`] when it
//! cannot. [`RecordConverter`] handles map-shaped records; [`FnConverter`]
//! wraps a closure for any other input type.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use super::context::ConversionContext;
use crate::error::FieldResolutionError;
use crate::types::{FieldDescriptor, FieldSpec, FieldValue, KeyTuple};

/// Map-shaped raw event: field name → value
pub type Record = HashMap<String, FieldValue>;

/// Normalized event for one (raw event, combination, aggregator) triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    /// One value per key descriptor field
    pub key: KeyTuple,
    /// One value per value descriptor field
    pub values: Vec<FieldValue>,
}

/// Pure conversion from a raw event to a [`CanonicalEvent`]
pub trait EventConverter {
    /// Raw event type
    type Input: ?Sized;

    /// Project `input` onto the descriptors bound in `context`
    fn convert(
        &self,
        input: &Self::Input,
        context: &ConversionContext<'_>,
    ) -> Result<CanonicalEvent, FieldResolutionError>;
}

/// Project an event through a field lookup function
///
/// Applies type checks, nullability and integer-to-float coercion, and
/// truncates the combination's time field to its bucket. Custom converters
/// can reuse this once they can look fields up by name.
pub fn project<F>(
    context: &ConversionContext<'_>,
    mut lookup: F,
) -> Result<CanonicalEvent, FieldResolutionError>
where
    F: FnMut(&str) -> Option<FieldValue>,
{
    let key = project_descriptor(context, context.key_descriptor(), &mut lookup)?;
    let values = project_descriptor(context, context.value_descriptor(), &mut lookup)?;
    Ok(CanonicalEvent { key, values })
}

fn project_descriptor<F>(
    context: &ConversionContext<'_>,
    descriptor: &FieldDescriptor,
    lookup: &mut F,
) -> Result<Vec<FieldValue>, FieldResolutionError>
where
    F: FnMut(&str) -> Option<FieldValue>,
{
    let mut out = Vec::with_capacity(descriptor.len());
    for spec in descriptor.fields() {
        let value = resolve_field(spec, lookup(&spec.name))?;
        let value = match (context.bucket_for(&spec.name), value) {
            (Some(bucket), FieldValue::Integer(ts)) => FieldValue::Integer(bucket.truncate(ts)),
            (_, value) => value,
        };
        out.push(value);
    }
    Ok(out)
}

fn resolve_field(
    spec: &FieldSpec,
    value: Option<FieldValue>,
) -> Result<FieldValue, FieldResolutionError> {
    match value {
        None if spec.nullable => Ok(FieldValue::Null),
        None => Err(FieldResolutionError::MissingField {
            field: spec.name.clone(),
        }),
        Some(value) => {
            check_field(spec, &value)?;
            Ok(value.coerce_to(spec.field_type))
        }
    }
}

fn check_field(spec: &FieldSpec, value: &FieldValue) -> Result<(), FieldResolutionError> {
    match value {
        FieldValue::Null if spec.nullable => Ok(()),
        FieldValue::Null => Err(FieldResolutionError::NullNotAllowed {
            field: spec.name.clone(),
        }),
        FieldValue::Float(v) if v.is_nan() => Err(FieldResolutionError::NotANumber {
            field: spec.name.clone(),
        }),
        value if spec.field_type.matches(value) => Ok(()),
        value => Err(FieldResolutionError::TypeMismatch {
            field: spec.name.clone(),
            expected: spec.field_type,
            actual: value.type_name(),
        }),
    }
}

fn check_tuple(
    tuple: &'static str,
    descriptor: &FieldDescriptor,
    values: &[FieldValue],
) -> Result<(), FieldResolutionError> {
    if values.len() != descriptor.len() {
        return Err(FieldResolutionError::ArityMismatch {
            tuple,
            expected: descriptor.len(),
            actual: values.len(),
        });
    }
    descriptor
        .fields()
        .iter()
        .zip(values)
        .try_for_each(|(spec, value)| check_field(spec, value))
}

/// Check a converter's output against the descriptors bound in `context`
///
/// Tuple lengths must match the key and value descriptors, and every field
/// must satisfy its declared type and nullability. The dispatcher applies
/// this to every converter, so a misbehaving converter is handled by the
/// failure policy like any other resolution error.
pub fn validate_event(
    context: &ConversionContext<'_>,
    event: &CanonicalEvent,
) -> Result<(), FieldResolutionError> {
    check_tuple("key", context.key_descriptor(), &event.key)?;
    check_tuple("value", context.value_descriptor(), &event.values)
}

/// Converter for [`Record`] inputs
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordConverter;

impl EventConverter for RecordConverter {
    type Input = Record;

    fn convert(
        &self,
        input: &Record,
        context: &ConversionContext<'_>,
    ) -> Result<CanonicalEvent, FieldResolutionError> {
        project(context, |name| input.get(name).cloned())
    }
}

/// Converter backed by a closure
pub struct FnConverter<I: ?Sized, F> {
    convert: F,
    _input: PhantomData<fn(&I)>,
}

impl<I: ?Sized, F> FnConverter<I, F>
where
    F: Fn(&I, &ConversionContext<'_>) -> Result<CanonicalEvent, FieldResolutionError>,
{
    /// Wrap a conversion closure
    pub fn new(convert: F) -> Self {
        Self {
            convert,
            _input: PhantomData,
        }
    }
}

impl<I: ?Sized, F> EventConverter for FnConverter<I, F>
where
    F: Fn(&I, &ConversionContext<'_>) -> Result<CanonicalEvent, FieldResolutionError>,
{
    type Input = I;

    fn convert(
        &self,
        input: &I,
        context: &ConversionContext<'_>,
    ) -> Result<CanonicalEvent, FieldResolutionError> {
        (self.convert)(input, context)
    }
}

impl<I: ?Sized, F> fmt::Debug for FnConverter<I, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnConverter").finish_non_exhaustive()
    }
}
