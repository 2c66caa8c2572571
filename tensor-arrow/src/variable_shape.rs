//! Variable shape tensor extension arrays.
//!
//! Implements the Arrow canonical extension type `arrow.variable_shape_tensor`:
//! every element may have a different shape. Storage is a struct with exactly
//! two children:
//! - `"data"`: a List holding each tensor's values in row-major order for that
//!   tensor's own shape
//! - `"shape"`: a FixedSizeList of Int32 with per-element list size == ndim
//!
//! All metadata fields are optional; an empty payload (`{}`) means "no
//! declared constraints". Example payloads:
//! - `{"dim_names":["C","H","W"]}`
//! - `{"dim_names":["H","W","C"],"uniform_shape":[400,null,3]}`
//! - `{"permutation":[2,0,1]}`

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, FixedSizeListArray, Int32Array, ListArray, StructArray};
use arrow::buffer::NullBuffer;
use arrow_schema::{DataType, Field, Fields};
use serde::{Deserialize, Serialize};

use crate::error::TensorArrayError;
use crate::extension::{
    extension_metadata_json, from_field_metadata, init_extension_metadata, to_field_metadata,
    MetadataPair, VARIABLE_SHAPE_TENSOR_NAME,
};
use crate::fixed_shape::validate_permutation;

/// Name of the struct child holding the flattened tensor values.
pub const DATA_FIELD_NAME: &str = "data";
/// Name of the struct child holding the per-element shapes.
pub const SHAPE_FIELD_NAME: &str = "shape";

/// Metadata for the variable shape tensor extension.
///
/// Field order doubles as the JSON key order of the wire format. The default
/// value (all fields absent) is valid and serializes to `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableShapeTensorMetadata {
    /// Explicit dimension names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim_names: Option<Vec<String>>,
    /// Desired ordering of the original dimensions; a non-empty permutation of
    /// `0..rank` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permutation: Option<Vec<i64>>,
    /// Per-dimension sizes guaranteed constant across elements; `None` entries
    /// mark dimensions that may vary per element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform_shape: Option<Vec<Option<i32>>>,
}

impl VariableShapeTensorMetadata {
    /// Number of dimensions, when it can be inferred.
    ///
    /// The first present field, in priority order `dim_names` > `permutation`
    /// > `uniform_shape`, fixes the rank; `None` when all three are absent.
    pub fn ndim(&self) -> Option<usize> {
        if let Some(names) = &self.dim_names {
            return Some(names.len());
        }
        if let Some(permutation) = &self.permutation {
            return Some(permutation.len());
        }
        self.uniform_shape.as_ref().map(|shape| shape.len())
    }

    /// Validate the metadata invariants.
    ///
    /// Rules:
    /// - whichever optional fields are present must all share the inferred rank
    /// - `permutation`, when present, must be non-empty and contain exactly
    ///   the values `0..len`
    /// - non-null `uniform_shape` entries must be positive
    pub fn validate(&self) -> Result<(), TensorArrayError> {
        if let Some(ndim) = self.ndim() {
            let mismatched = self.dim_names.as_ref().is_some_and(|v| v.len() != ndim)
                || self.permutation.as_ref().is_some_and(|v| v.len() != ndim)
                || self.uniform_shape.as_ref().is_some_and(|v| v.len() != ndim);
            if mismatched {
                return Err(TensorArrayError::InvalidMetadata(format!(
                    "dim_names, permutation and uniform_shape must all have length {ndim} when present"
                )));
            }
        }

        if let Some(permutation) = &self.permutation {
            if permutation.is_empty() {
                return Err(TensorArrayError::InvalidMetadata(
                    "permutation must not be empty".to_string(),
                ));
            }
            validate_permutation(permutation)?;
        }

        if let Some(uniform_shape) = &self.uniform_shape {
            if let Some(dim) = uniform_shape.iter().flatten().find(|dim| **dim <= 0) {
                return Err(TensorArrayError::InvalidMetadata(format!(
                    "uniform dimensions must be positive, got {dim}"
                )));
            }
        }

        Ok(())
    }

    /// Returns `true` when [`validate`](Self::validate) succeeds.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Serialize to the canonical JSON wire form (`{}` when all fields are
    /// absent).
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .expect("variable shape tensor metadata serialization cannot fail")
    }

    /// Parse and validate the canonical JSON wire form.
    ///
    /// Empty text and `{}` short-circuit to the all-absent default without
    /// touching the parser; every field is optional and independently decoded.
    pub fn from_json(json: &str) -> Result<Self, TensorArrayError> {
        if json.is_empty() || json == "{}" {
            return Ok(Self::default());
        }
        let metadata: Self = serde_json::from_str(json)?;
        metadata.validate()?;
        Ok(metadata)
    }
}

/// One element of a [`VariableShapeTensorArray`]: the flat row-major values
/// together with the element's own shape.
#[derive(Debug, Clone)]
pub struct VariableShapeTensor {
    values: ArrayRef,
    shape: Vec<i32>,
}

impl VariableShapeTensor {
    /// Flat values in row-major order for this element's shape.
    pub fn values(&self) -> &ArrayRef {
        &self.values
    }

    /// This element's shape.
    pub fn shape(&self) -> &[i32] {
        &self.shape
    }

    /// Number of values implied by the shape.
    pub fn element_count(&self) -> i64 {
        self.shape.iter().map(|dim| i64::from(*dim)).product()
    }
}

/// A variable shape tensor extension array.
///
/// Wraps a two-child [`StructArray`] (`"data"`, `"shape"`) together with the
/// validated metadata and the side-channel entries declaring the extension.
#[derive(Debug, Clone)]
pub struct VariableShapeTensorArray {
    storage: StructArray,
    metadata: VariableShapeTensorMetadata,
    name: Option<String>,
    field_metadata: Vec<MetadataPair>,
}

impl VariableShapeTensorArray {
    /// Build a variable shape tensor array from per-element data and shapes.
    ///
    /// `data` holds one variable-length list of values per tensor; `shapes`
    /// holds one fixed-size list of Int32 per tensor with list size `ndim`.
    /// When the metadata's inferred rank is known it must equal `ndim`.
    pub fn try_new(
        ndim: usize,
        data: ListArray,
        shapes: FixedSizeListArray,
        metadata: VariableShapeTensorMetadata,
    ) -> Result<Self, TensorArrayError> {
        Self::try_new_with_options(ndim, data, shapes, metadata, None, None, None)
    }

    /// Like [`try_new`](Self::try_new), with a validity bitmap (one bit per
    /// tensor).
    pub fn try_new_with_validity(
        ndim: usize,
        data: ListArray,
        shapes: FixedSizeListArray,
        metadata: VariableShapeTensorMetadata,
        validity: NullBuffer,
    ) -> Result<Self, TensorArrayError> {
        Self::try_new_with_options(ndim, data, shapes, metadata, Some(validity), None, None)
    }

    /// Full constructor: optional validity bitmap, display name, and extra
    /// caller key-value metadata. The extension entries are embedded last.
    pub fn try_new_with_options(
        ndim: usize,
        data: ListArray,
        shapes: FixedSizeListArray,
        metadata: VariableShapeTensorMetadata,
        validity: Option<NullBuffer>,
        name: Option<&str>,
        arrow_metadata: Option<Vec<MetadataPair>>,
    ) -> Result<Self, TensorArrayError> {
        metadata.validate()?;

        if let Some(expected) = metadata.ndim() {
            if expected != ndim {
                return Err(TensorArrayError::InvalidArgument(format!(
                    "ndim {ndim} does not match the rank {expected} inferred from metadata"
                )));
            }
        }
        let size = i32::try_from(ndim).map_err(|_| {
            TensorArrayError::InvalidArgument(format!(
                "ndim overflows Arrow's i32 representation: {ndim}"
            ))
        })?;
        if shapes.value_length() != size {
            return Err(TensorArrayError::InvalidArgument(format!(
                "shape child list size {} does not match ndim {ndim}",
                shapes.value_length()
            )));
        }
        if shapes.value_type() != DataType::Int32 {
            return Err(TensorArrayError::InvalidArgument(format!(
                "shape child must hold Int32 values, got {:?}",
                shapes.value_type()
            )));
        }
        if data.len() != shapes.len() {
            return Err(TensorArrayError::InvalidArgument(format!(
                "data and shape children must have equal element counts: {} != {}",
                data.len(),
                shapes.len()
            )));
        }

        let fields = Fields::from(vec![
            Field::new(DATA_FIELD_NAME, data.data_type().clone(), true),
            Field::new(SHAPE_FIELD_NAME, shapes.data_type().clone(), true),
        ]);
        let children: Vec<ArrayRef> = vec![Arc::new(data), Arc::new(shapes)];
        let storage = StructArray::try_new(fields, children, validity)?;

        let field_metadata = init_extension_metadata(
            arrow_metadata.unwrap_or_default(),
            VARIABLE_SHAPE_TENSOR_NAME,
            &metadata.to_json(),
        );

        Ok(Self {
            storage,
            metadata,
            name: name.map(str::to_string),
            field_metadata,
        })
    }

    /// Interpret an existing Arrow column as a variable shape tensor array.
    ///
    /// An absent extension payload is not an error here: it yields the
    /// all-absent default metadata ("no declared constraints"), unlike the
    /// fixed shape load path, which cannot exist without a shape.
    pub fn try_from_arrow(field: &Field, array: &ArrayRef) -> Result<Self, TensorArrayError> {
        let storage = array
            .as_any()
            .downcast_ref::<StructArray>()
            .ok_or_else(|| {
                TensorArrayError::InvalidStorage(format!(
                    "expected StructArray storage, got {:?}",
                    array.data_type()
                ))
            })?
            .clone();

        let field_metadata = from_field_metadata(field);
        let metadata = match extension_metadata_json(&field_metadata) {
            Some(json) => VariableShapeTensorMetadata::from_json(json)?,
            None => VariableShapeTensorMetadata::default(),
        };

        Self::validate_storage(&storage, &metadata)?;

        tracing::debug!(
            extension = VARIABLE_SHAPE_TENSOR_NAME,
            rows = storage.len(),
            "loaded variable shape tensor array"
        );

        Ok(Self {
            storage,
            metadata,
            name: Some(field.name().clone()),
            field_metadata,
        })
    }

    fn validate_storage(
        storage: &StructArray,
        metadata: &VariableShapeTensorMetadata,
    ) -> Result<(), TensorArrayError> {
        if storage.num_columns() != 2 {
            return Err(TensorArrayError::InvalidStorage(format!(
                "expected exactly 2 struct children, got {}",
                storage.num_columns()
            )));
        }
        let names = storage.column_names();
        if names != [DATA_FIELD_NAME, SHAPE_FIELD_NAME] {
            return Err(TensorArrayError::InvalidStorage(format!(
                "expected struct children named \"{DATA_FIELD_NAME}\" and \"{SHAPE_FIELD_NAME}\", got {names:?}"
            )));
        }

        storage
            .column(0)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| {
                TensorArrayError::InvalidStorage(format!(
                    "data child must be a ListArray, got {:?}",
                    storage.column(0).data_type()
                ))
            })?;
        let shapes = storage
            .column(1)
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .ok_or_else(|| {
                TensorArrayError::InvalidStorage(format!(
                    "shape child must be a FixedSizeListArray, got {:?}",
                    storage.column(1).data_type()
                ))
            })?;
        if shapes.value_type() != DataType::Int32 {
            return Err(TensorArrayError::InvalidStorage(format!(
                "shape child must hold Int32 values, got {:?}",
                shapes.value_type()
            )));
        }
        if let Some(ndim) = metadata.ndim() {
            if shapes.value_length() as usize != ndim {
                return Err(TensorArrayError::InvalidStorage(format!(
                    "shape child list size {} does not cohere with the metadata rank {ndim}",
                    shapes.value_length()
                )));
            }
        }
        Ok(())
    }

    /// Number of tensors in the array.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Returns `true` if the array holds zero tensors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of dimensions, when the metadata can infer it.
    pub fn ndim(&self) -> Option<usize> {
        self.metadata.ndim()
    }

    /// The validated extension metadata.
    pub fn metadata(&self) -> &VariableShapeTensorMetadata {
        &self.metadata
    }

    /// The underlying struct storage.
    pub fn storage(&self) -> &StructArray {
        &self.storage
    }

    /// The `"data"` child (index 0).
    pub fn data_child(&self) -> &ArrayRef {
        self.storage.column(0)
    }

    /// The `"shape"` child (index 1).
    pub fn shape_child(&self) -> &ArrayRef {
        self.storage.column(1)
    }

    /// Per-tensor validity bitmap, if any.
    pub fn nulls(&self) -> Option<&NullBuffer> {
        self.storage.nulls()
    }

    /// Display name, if one was set or loaded.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The ordered side-channel key-value metadata, reserved entries included.
    pub fn field_metadata(&self) -> &[MetadataPair] {
        &self.field_metadata
    }

    /// The physical Arrow type of the storage.
    pub fn storage_type(&self) -> &DataType {
        self.storage.data_type()
    }

    /// Build the Arrow field declaring this column, extension metadata
    /// embedded.
    pub fn to_field(&self) -> Field {
        Field::new(
            self.name.as_deref().unwrap_or("variable_shape_tensor"),
            self.storage.data_type().clone(),
            true,
        )
        .with_metadata(to_field_metadata(&self.field_metadata))
    }

    /// Convert into the physical Arrow representation.
    pub fn into_array_ref(self) -> ArrayRef {
        Arc::new(self.storage)
    }

    /// Bounds-checked access to tensor `i`: its flat values and its own shape.
    pub fn at(&self, i: usize) -> Result<VariableShapeTensor, TensorArrayError> {
        if i >= self.len() {
            return Err(TensorArrayError::IndexOutOfBounds {
                index: i,
                len: self.len(),
            });
        }

        let data = self
            .storage
            .column(0)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| {
                TensorArrayError::InvalidStorage("data child must be a ListArray".to_string())
            })?;
        let shapes = self
            .storage
            .column(1)
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .ok_or_else(|| {
                TensorArrayError::InvalidStorage(
                    "shape child must be a FixedSizeListArray".to_string(),
                )
            })?;

        let values = data.value(i);
        let shape = shapes.value(i);
        let shape = shape
            .as_any()
            .downcast_ref::<Int32Array>()
            .ok_or_else(|| {
                TensorArrayError::InvalidStorage(
                    "shape child must hold Int32 values".to_string(),
                )
            })?
            .values()
            .to_vec();

        Ok(VariableShapeTensor { values, shape })
    }

    /// Iterate over tensors in index order.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = Result<VariableShapeTensor, TensorArrayError>> + '_ {
        (0..self.len()).map(move |i| self.at(i))
    }

    /// Structural validity: exactly two struct children and valid metadata.
    pub fn is_valid(&self) -> bool {
        self.storage.num_columns() == 2 && self.metadata.is_valid()
    }
}
