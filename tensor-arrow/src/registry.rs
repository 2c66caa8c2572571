//! Explicit extension registry.
//!
//! Maps a (base storage kind, extension name) pair to a factory that produces
//! a typed tensor view from an untyped Arrow column. Registration is an
//! explicit call performed during deterministic setup; there is no load-time
//! self-registration.

use arrow::array::{Array, ArrayRef};
use arrow_schema::{DataType, Field};

use crate::error::TensorArrayError;
use crate::extension::{
    EXTENSION_NAME_KEY, FIXED_SHAPE_TENSOR_NAME, VARIABLE_SHAPE_TENSOR_NAME,
};
use crate::fixed_shape::FixedShapeTensorArray;
use crate::variable_shape::VariableShapeTensorArray;

/// The base storage kinds tensor extensions are layered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    FixedSizeList,
    Struct,
}

impl StorageKind {
    /// Classify an Arrow type into a registry key, if it is a supported base
    /// storage kind.
    pub fn of(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::FixedSizeList(_, _) => Some(Self::FixedSizeList),
            DataType::Struct(_) => Some(Self::Struct),
            _ => None,
        }
    }
}

/// A typed tensor view produced by the registry.
#[derive(Debug, Clone)]
pub enum TensorExtensionArray {
    FixedShape(FixedShapeTensorArray),
    VariableShape(VariableShapeTensorArray),
}

/// Produces a typed view from an untyped column and its declaring field.
pub type ExtensionFactory =
    fn(&Field, &ArrayRef) -> Result<TensorExtensionArray, TensorArrayError>;

#[derive(Debug)]
struct RegistryEntry {
    storage: StorageKind,
    extension_name: String,
    factory: ExtensionFactory,
}

/// Registry of extension factories keyed by (storage kind, extension name).
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    entries: Vec<RegistryEntry>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for an extension. Registering the same
    /// (storage kind, extension name) pair twice is an error.
    pub fn register(
        &mut self,
        storage: StorageKind,
        extension_name: impl Into<String>,
        factory: ExtensionFactory,
    ) -> Result<(), TensorArrayError> {
        let extension_name = extension_name.into();
        let duplicate = self
            .entries
            .iter()
            .any(|entry| entry.storage == storage && entry.extension_name == extension_name);
        if duplicate {
            return Err(TensorArrayError::AlreadyRegistered(extension_name));
        }

        tracing::debug!(extension = %extension_name, ?storage, "registered extension factory");
        self.entries.push(RegistryEntry {
            storage,
            extension_name,
            factory,
        });
        Ok(())
    }

    /// Look up a registered factory.
    pub fn get(&self, storage: StorageKind, extension_name: &str) -> Option<ExtensionFactory> {
        self.entries
            .iter()
            .find(|entry| entry.storage == storage && entry.extension_name == extension_name)
            .map(|entry| entry.factory)
    }

    /// Wrap an untyped column into a typed tensor view.
    ///
    /// Returns `Ok(None)` when the field declares no extension name, the
    /// storage kind is unsupported, or the name is not registered: the
    /// column simply isn't one of ours. Factory failures are surfaced as-is.
    pub fn wrap(
        &self,
        field: &Field,
        array: &ArrayRef,
    ) -> Result<Option<TensorExtensionArray>, TensorArrayError> {
        let Some(extension_name) = field.metadata().get(EXTENSION_NAME_KEY) else {
            return Ok(None);
        };
        let Some(storage) = StorageKind::of(array.data_type()) else {
            return Ok(None);
        };

        match self.get(storage, extension_name) {
            Some(factory) => {
                tracing::debug!(extension = %extension_name, rows = array.len(), "wrapping extension array");
                factory(field, array).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Register the two canonical tensor extension factories.
///
/// Call once while setting up the registry; a second call reports
/// [`TensorArrayError::AlreadyRegistered`].
pub fn register_tensor_extensions(
    registry: &mut ExtensionRegistry,
) -> Result<(), TensorArrayError> {
    registry.register(
        StorageKind::FixedSizeList,
        FIXED_SHAPE_TENSOR_NAME,
        |field, array| {
            FixedShapeTensorArray::try_from_arrow(field, array)
                .map(TensorExtensionArray::FixedShape)
        },
    )?;
    registry.register(
        StorageKind::Struct,
        VARIABLE_SHAPE_TENSOR_NAME,
        |field, array| {
            VariableShapeTensorArray::try_from_arrow(field, array)
                .map(TensorExtensionArray::VariableShape)
        },
    )?;
    Ok(())
}
