//! Helpers for building JSON patches against a single snapshot of an object.
//!
//! Every patch produced here is an `add`. Array-valued adds carry the original
//! elements followed by the new ones, so indices in later operations keep
//! referring to the object as it was received.
use json_patch::{AddOperation, PatchOperation};
use jsonptr::Pointer;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, LocalObjectReference, ObjectReference, Volume, VolumeMount,
};
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

/// An element of a Kubernetes list that is keyed by its `name`.
pub trait Named {
    fn name(&self) -> Option<&str>;
}

/// Some reference types carry an optional name, the rest a plain string.
trait NameField {
    fn as_name(&self) -> Option<&str>;
}

impl NameField for String {
    fn as_name(&self) -> Option<&str> {
        Some(self)
    }
}

impl NameField for Option<String> {
    fn as_name(&self) -> Option<&str> {
        self.as_deref()
    }
}

macro_rules! impl_named {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Named for $ty {
                fn name(&self) -> Option<&str> {
                    self.name.as_name()
                }
            }
        )*
    };
}

impl_named!(
    Container,
    EnvVar,
    Volume,
    VolumeMount,
    ObjectReference,
    LocalObjectReference,
);

/// Check whether a (possibly absent) list holds an element with the given name.
pub fn contains_named<T: Named>(items: Option<&[T]>, name: &str) -> bool {
    items
        .unwrap_or_default()
        .iter()
        .any(|item| item.name() == Some(name))
}

/// A container lacks an env var unless one with that exact name is declared.
/// A missing container lacks everything.
pub fn needs_env_var(container: Option<&Container>, name: &str) -> bool {
    container.map_or(true, |c| !contains_named(c.env.as_deref(), name))
}

/// The full value of a list after appending `new` to `existing`.
pub fn append<T: Serialize, U: Serialize>(existing: Option<&[T]>, new: &[U]) -> Result<Value> {
    let mut items = existing
        .unwrap_or_default()
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(Error::PatchValue)?;
    for item in new {
        items.push(serde_json::to_value(item).map_err(Error::PatchValue)?);
    }
    Ok(Value::Array(items))
}

/// Like [`append`], but yields nothing when an element of the same name is already present.
pub fn append_unique<T: Named + Serialize>(
    existing: Option<&[T]>,
    item: &T,
) -> Result<Option<Value>> {
    match item.name() {
        Some(name) if contains_named(existing, name) => Ok(None),
        _ => append(existing, std::slice::from_ref(item)).map(Some),
    }
}

/// `/spec/<field>/<index>/<leaf>`, where `field` is `containers` or `initContainers`.
pub fn container_pointer(field: &str, index: usize, leaf: &str) -> Pointer {
    let index = index.to_string();
    Pointer::new(["spec", field, index.as_str(), leaf])
}

pub fn add(path: Pointer, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}
