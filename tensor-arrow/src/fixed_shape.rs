//! Fixed shape tensor extension arrays.
//!
//! Implements the Arrow canonical extension type `arrow.fixed_shape_tensor`:
//! every element is a tensor of the same shape, stored as a FixedSizeList
//! whose per-element list size is the product of the shape dimensions, with
//! values in row-major order.
//!
//! Example metadata payloads:
//! - `{"shape":[2,5]}`
//! - `{"shape":[100,200,500],"dim_names":["C","H","W"]}`
//! - `{"shape":[100,200,500],"permutation":[2,0,1]}`

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, FixedSizeListArray};
use arrow::buffer::NullBuffer;
use arrow_schema::{DataType, Field};
use serde::{Deserialize, Serialize};

use crate::error::TensorArrayError;
use crate::extension::{
    extension_metadata_json, from_field_metadata, init_extension_metadata, to_field_metadata,
    MetadataPair, FIXED_SHAPE_TENSOR_NAME,
};

/// Metadata for the fixed shape tensor extension.
///
/// Field order doubles as the JSON key order of the wire format, which is
/// fixed (not alphabetical) so serialization stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixedShapeTensorMetadata {
    /// Physical shape of every tensor element. Never empty, every entry > 0.
    pub shape: Vec<i64>,
    /// Explicit dimension names; length must equal the rank when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim_names: Option<Vec<String>>,
    /// Desired ordering of the original dimensions; a permutation of
    /// `0..rank` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permutation: Option<Vec<i64>>,
}

impl FixedShapeTensorMetadata {
    /// Metadata with the given shape and no optional fields.
    pub fn new(shape: Vec<i64>) -> Self {
        Self {
            shape,
            dim_names: None,
            permutation: None,
        }
    }

    /// Validate the metadata invariants.
    ///
    /// Rules:
    /// - `shape` must be non-empty and all-positive
    /// - `dim_names`, when present, must have the same length as `shape`
    /// - `permutation`, when present, must have the same length as `shape`
    ///   and contain exactly the values `0..rank`
    pub fn validate(&self) -> Result<(), TensorArrayError> {
        if self.shape.is_empty() {
            return Err(TensorArrayError::InvalidMetadata(
                "shape must not be empty".to_string(),
            ));
        }
        if let Some(dim) = self.shape.iter().find(|dim| **dim <= 0) {
            return Err(TensorArrayError::InvalidMetadata(format!(
                "shape dimensions must be positive, got {dim}"
            )));
        }

        if let Some(names) = &self.dim_names {
            if names.len() != self.shape.len() {
                return Err(TensorArrayError::InvalidMetadata(format!(
                    "dim_names has length {} but shape has rank {}",
                    names.len(),
                    self.shape.len()
                )));
            }
        }

        if let Some(permutation) = &self.permutation {
            if permutation.len() != self.shape.len() {
                return Err(TensorArrayError::InvalidMetadata(format!(
                    "permutation has length {} but shape has rank {}",
                    permutation.len(),
                    self.shape.len()
                )));
            }
            validate_permutation(permutation)?;
        }

        Ok(())
    }

    /// Returns `true` when [`validate`](Self::validate) succeeds.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Total number of values per tensor element (product of `shape`).
    ///
    /// This is a plain product fold; validation is a separate, explicit step
    /// and the result is meaningless for metadata that does not validate.
    pub fn compute_size(&self) -> i64 {
        self.shape.iter().product()
    }

    /// Serialize to the canonical JSON wire form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("fixed shape tensor metadata serialization cannot fail")
    }

    /// Parse and validate the canonical JSON wire form.
    ///
    /// `shape` is required; unknown keys are rejected; the parsed value is
    /// validated before it is handed back.
    pub fn from_json(json: &str) -> Result<Self, TensorArrayError> {
        let metadata: Self = serde_json::from_str(json)?;
        metadata.validate()?;
        Ok(metadata)
    }
}

/// Check that `permutation` contains exactly the values `0..len` in some
/// order, in a single pass over a seen-table.
pub(crate) fn validate_permutation(permutation: &[i64]) -> Result<(), TensorArrayError> {
    let mut seen = vec![false; permutation.len()];
    for &index in permutation {
        let slot = usize::try_from(index)
            .ok()
            .filter(|slot| *slot < permutation.len())
            .ok_or_else(|| {
                TensorArrayError::InvalidMetadata(format!(
                    "permutation index {index} is out of range for rank {}",
                    permutation.len()
                ))
            })?;
        if seen[slot] {
            return Err(TensorArrayError::InvalidMetadata(format!(
                "duplicate permutation index {index}"
            )));
        }
        seen[slot] = true;
    }
    Ok(())
}

/// A fixed shape tensor extension array.
///
/// Wraps a [`FixedSizeListArray`] whose per-element list size equals
/// `metadata.compute_size()`, together with the validated metadata and the
/// side-channel key-value entries that declare the extension.
#[derive(Debug, Clone)]
pub struct FixedShapeTensorArray {
    storage: FixedSizeListArray,
    metadata: FixedShapeTensorMetadata,
    name: Option<String>,
    field_metadata: Vec<MetadataPair>,
}

impl FixedShapeTensorArray {
    /// Build a fixed shape tensor array from a flat row-major value buffer.
    ///
    /// `list_size` is the number of values per tensor and must equal
    /// `metadata.compute_size()`; `flat_values.len()` must be divisible by it.
    pub fn try_new(
        list_size: usize,
        flat_values: ArrayRef,
        metadata: FixedShapeTensorMetadata,
    ) -> Result<Self, TensorArrayError> {
        Self::try_new_with_options(list_size, flat_values, metadata, None, None, None)
    }

    /// Like [`try_new`](Self::try_new), with a validity bitmap (one bit per
    /// tensor).
    pub fn try_new_with_validity(
        list_size: usize,
        flat_values: ArrayRef,
        metadata: FixedShapeTensorMetadata,
        validity: NullBuffer,
    ) -> Result<Self, TensorArrayError> {
        Self::try_new_with_options(list_size, flat_values, metadata, Some(validity), None, None)
    }

    /// Full constructor: optional validity bitmap, display name, and extra
    /// caller key-value metadata.
    ///
    /// The extension entries are embedded after the caller's pairs so the
    /// reserved keys are present even if the caller supplied colliding keys.
    pub fn try_new_with_options(
        list_size: usize,
        flat_values: ArrayRef,
        metadata: FixedShapeTensorMetadata,
        validity: Option<NullBuffer>,
        name: Option<&str>,
        arrow_metadata: Option<Vec<MetadataPair>>,
    ) -> Result<Self, TensorArrayError> {
        metadata.validate()?;

        if list_size as i64 != metadata.compute_size() {
            return Err(TensorArrayError::InvalidArgument(format!(
                "list size {} does not match the metadata element count {}",
                list_size,
                metadata.compute_size()
            )));
        }
        if flat_values.len() % list_size != 0 {
            return Err(TensorArrayError::InvalidArgument(format!(
                "flat value length {} is not divisible by list size {list_size}",
                flat_values.len()
            )));
        }
        let size = i32::try_from(list_size).map_err(|_| {
            TensorArrayError::InvalidArgument(format!(
                "list size overflows Arrow's i32 representation: {list_size}"
            ))
        })?;

        let item = Arc::new(Field::new("item", flat_values.data_type().clone(), true));
        let storage = FixedSizeListArray::try_new(item, size, flat_values, validity)?;

        let field_metadata = init_extension_metadata(
            arrow_metadata.unwrap_or_default(),
            FIXED_SHAPE_TENSOR_NAME,
            &metadata.to_json(),
        );

        Ok(Self {
            storage,
            metadata,
            name: name.map(str::to_string),
            field_metadata,
        })
    }

    /// Interpret an existing Arrow column as a fixed shape tensor array.
    ///
    /// The field metadata must carry the extension JSON payload; fixed shape
    /// tensors cannot exist without a declared shape. The storage's own
    /// per-element list size must cohere with the decoded metadata.
    pub fn try_from_arrow(field: &Field, array: &ArrayRef) -> Result<Self, TensorArrayError> {
        let storage = array
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .ok_or_else(|| {
                TensorArrayError::InvalidStorage(format!(
                    "expected FixedSizeListArray storage, got {:?}",
                    array.data_type()
                ))
            })?
            .clone();

        let field_metadata = from_field_metadata(field);
        let json = extension_metadata_json(&field_metadata)
            .ok_or(TensorArrayError::MissingExtensionMetadata)?;
        let metadata = FixedShapeTensorMetadata::from_json(json)?;

        if storage.value_length() as i64 != metadata.compute_size() {
            return Err(TensorArrayError::InvalidStorage(format!(
                "storage list size {} does not cohere with the metadata element count {}",
                storage.value_length(),
                metadata.compute_size()
            )));
        }

        tracing::debug!(
            extension = FIXED_SHAPE_TENSOR_NAME,
            rows = storage.len(),
            "loaded fixed shape tensor array"
        );

        Ok(Self {
            storage,
            metadata,
            name: Some(field.name().clone()),
            field_metadata,
        })
    }

    /// Number of tensors in the array.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Returns `true` if the array holds zero tensors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The validated extension metadata.
    pub fn metadata(&self) -> &FixedShapeTensorMetadata {
        &self.metadata
    }

    /// Shape shared by every tensor element.
    pub fn shape(&self) -> &[i64] {
        &self.metadata.shape
    }

    /// The underlying FixedSizeList storage.
    pub fn storage(&self) -> &FixedSizeListArray {
        &self.storage
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
            self.name.as_deref().unwrap_or("fixed_shape_tensor"),
            self.storage.data_type().clone(),
            true,
        )
        .with_metadata(to_field_metadata(&self.field_metadata))
    }

    /// Convert into the physical Arrow representation.
    pub fn into_array_ref(self) -> ArrayRef {
        Arc::new(self.storage)
    }

    /// Bounds-checked access to the flat row-major values of tensor `i`.
    pub fn at(&self, i: usize) -> Result<ArrayRef, TensorArrayError> {
        if i >= self.len() {
            return Err(TensorArrayError::IndexOutOfBounds {
                index: i,
                len: self.len(),
            });
        }
        Ok(self.storage.value(i))
    }

    /// Unchecked-style access to the flat values of tensor `i`.
    ///
    /// # Panics
    /// Panics when `i >= len()`, per the underlying storage's contract. Use
    /// [`at`](Self::at) for a recoverable bounds check.
    pub fn value(&self, i: usize) -> ArrayRef {
        self.storage.value(i)
    }

    /// Iterate over tensors; `None` entries are null tensors.
    pub fn iter(&self) -> impl Iterator<Item = Option<ArrayRef>> + '_ {
        self.storage.iter()
    }

    /// Structural soundness of the physical container is the array engine's
    /// job; validity here means metadata validity.
    pub fn is_valid(&self) -> bool {
        self.metadata.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Float32Array, Int32Array};
    use arrow::buffer::NullBuffer;

    use crate::extension::{extension_name, EXTENSION_METADATA_KEY, EXTENSION_NAME_KEY};

    use super::*;

    fn metadata(shape: &[i64]) -> FixedShapeTensorMetadata {
        FixedShapeTensorMetadata::new(shape.to_vec())
    }

    #[test]
    fn compute_size_is_the_product_of_the_shape() {
        assert_eq!(metadata(&[100, 200, 500]).compute_size(), 10_000_000);
        assert_eq!(metadata(&[42]).compute_size(), 42);
        assert_eq!(metadata(&[2, 3]).compute_size(), 6);
    }

    #[test]
    fn validates_shape() {
        assert!(metadata(&[2, 5]).is_valid());
        assert!(!metadata(&[]).is_valid());
        assert!(!metadata(&[2, 0]).is_valid());
        assert!(!metadata(&[2, -3]).is_valid());
    }

    #[test]
    fn validates_dim_names_length() {
        let mut md = metadata(&[2, 3, 4]);
        md.dim_names = Some(vec!["C".into(), "H".into(), "W".into()]);
        assert!(md.is_valid());

        md.dim_names = Some(vec!["C".into(), "H".into()]);
        assert!(!md.is_valid());
    }

    #[test]
    fn validates_permutation() {
        let mut md = metadata(&[2, 3, 4]);
        md.permutation = Some(vec![2, 0, 1]);
        assert!(md.is_valid());

        // Wrong length.
        md.permutation = Some(vec![0, 1]);
        assert!(!md.is_valid());
        // Duplicate index.
        md.permutation = Some(vec![0, 0, 1]);
        assert!(!md.is_valid());
        // Out-of-range index.
        md.permutation = Some(vec![0, 1, 3]);
        assert!(!md.is_valid());
        // Negative index.
        md.permutation = Some(vec![-1, 0, 1]);
        assert!(!md.is_valid());
    }

    #[test]
    fn json_wire_format_is_deterministic() {
        let mut md = metadata(&[100, 200, 500]);
        assert_eq!(md.to_json(), r#"{"shape":[100,200,500]}"#);

        md.dim_names = Some(vec!["C".into(), "H".into(), "W".into()]);
        assert_eq!(
            md.to_json(),
            r#"{"shape":[100,200,500],"dim_names":["C","H","W"]}"#
        );

        md.permutation = Some(vec![2, 0, 1]);
        assert_eq!(
            md.to_json(),
            r#"{"shape":[100,200,500],"dim_names":["C","H","W"],"permutation":[2,0,1]}"#
        );
    }

    #[test]
    fn json_roundtrip() {
        let md = FixedShapeTensorMetadata {
            shape: vec![2, 5],
            dim_names: Some(vec!["y".into(), "x".into()]),
            permutation: Some(vec![1, 0]),
        };
        assert_eq!(
            FixedShapeTensorMetadata::from_json(&md.to_json()).unwrap(),
            md
        );

        let plain = metadata(&[42]);
        assert_eq!(
            FixedShapeTensorMetadata::from_json(&plain.to_json()).unwrap(),
            plain
        );
    }

    #[test]
    fn from_json_rejects_bad_input() {
        // Missing required shape.
        assert!(matches!(
            FixedShapeTensorMetadata::from_json(r#"{"dim_names":["x"]}"#),
            Err(TensorArrayError::MetadataDecode(_))
        ));
        // Unknown key.
        assert!(matches!(
            FixedShapeTensorMetadata::from_json(r#"{"shape":[2],"stride":[1]}"#),
            Err(TensorArrayError::MetadataDecode(_))
        ));
        // Malformed JSON.
        assert!(matches!(
            FixedShapeTensorMetadata::from_json(r#"{"shape":[2"#),
            Err(TensorArrayError::MetadataDecode(_))
        ));
        // Non-integer token where an integer is expected.
        assert!(matches!(
            FixedShapeTensorMetadata::from_json(r#"{"shape":["a"]}"#),
            Err(TensorArrayError::MetadataDecode(_))
        ));
        // Parses, but structurally invalid: never handed back.
        assert!(matches!(
            FixedShapeTensorMetadata::from_json(r#"{"shape":[]}"#),
            Err(TensorArrayError::InvalidMetadata(_))
        ));
        assert!(matches!(
            FixedShapeTensorMetadata::from_json(r#"{"shape":[2,3],"permutation":[0,0]}"#),
            Err(TensorArrayError::InvalidMetadata(_))
        ));
    }

    fn three_tensors_2x3() -> FixedShapeTensorArray {
        let flat = Arc::new(Float32Array::from(
            (0..18).map(|v| v as f32).collect::<Vec<_>>(),
        ));
        FixedShapeTensorArray::try_new(6, flat, metadata(&[2, 3])).unwrap()
    }

    #[test]
    fn builds_from_flat_values() {
        let tensors = three_tensors_2x3();
        assert_eq!(tensors.len(), 3);
        assert!(!tensors.is_empty());
        assert_eq!(tensors.shape(), [2, 3]);
        assert!(tensors.is_valid());

        let first = tensors.at(0).unwrap();
        let first = first.as_any().downcast_ref::<Float32Array>().unwrap();
        assert_eq!(first.values(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        assert!(matches!(
            tensors.at(3),
            Err(TensorArrayError::IndexOutOfBounds { index: 3, len: 3 })
        ));
    }

    #[test]
    fn embeds_extension_entries_at_construction() {
        let tensors = three_tensors_2x3();
        assert_eq!(
            extension_name(tensors.field_metadata()),
            Some(FIXED_SHAPE_TENSOR_NAME)
        );
        assert_eq!(
            extension_metadata_json(tensors.field_metadata()),
            Some(r#"{"shape":[2,3]}"#)
        );
    }

    #[test]
    fn rejects_mismatched_list_size() {
        let flat = Arc::new(Int32Array::from(vec![1, 2, 3, 4]));
        let result = FixedShapeTensorArray::try_new(4, flat, metadata(&[2, 3]));
        assert!(matches!(result, Err(TensorArrayError::InvalidArgument(_))));
    }

    #[test]
    fn rejects_non_divisible_value_buffer() {
        let flat = Arc::new(Int32Array::from(vec![1, 2, 3, 4, 5, 6, 7]));
        let result = FixedShapeTensorArray::try_new(6, flat, metadata(&[2, 3]));
        assert!(matches!(result, Err(TensorArrayError::InvalidArgument(_))));
    }

    #[test]
    fn carries_validity_name_and_extra_metadata() {
        let flat = Arc::new(Int32Array::from(vec![1, 2, 3, 4, 5, 6]));
        let tensors = FixedShapeTensorArray::try_new_with_options(
            3,
            flat,
            metadata(&[3]),
            Some(NullBuffer::from(vec![true, false])),
            Some("image"),
            Some(vec![("unit".to_string(), "kelvin".to_string())]),
        )
        .unwrap();

        assert_eq!(tensors.len(), 2);
        assert_eq!(tensors.name(), Some("image"));
        assert_eq!(tensors.nulls().unwrap().null_count(), 1);
        // Caller pairs come first, reserved entries are appended last.
        assert_eq!(tensors.field_metadata()[0].0, "unit");
        assert_eq!(tensors.field_metadata()[1].0, EXTENSION_NAME_KEY);
        assert_eq!(tensors.field_metadata()[2].0, EXTENSION_METADATA_KEY);
    }

    #[test]
    fn roundtrips_through_field_and_array() {
        let tensors = three_tensors_2x3();
        let field = tensors.to_field();
        let array = tensors.into_array_ref();

        let loaded = FixedShapeTensorArray::try_from_arrow(&field, &array).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.shape(), [2, 3]);
        assert_eq!(loaded.name(), Some("fixed_shape_tensor"));
    }

    #[test]
    fn load_requires_extension_metadata() {
        let tensors = three_tensors_2x3();
        let array = tensors.into_array_ref();
        let bare_field = Field::new("t", array.data_type().clone(), true);

        assert!(matches!(
            FixedShapeTensorArray::try_from_arrow(&bare_field, &array),
            Err(TensorArrayError::MissingExtensionMetadata)
        ));
    }

    #[test]
    fn load_rejects_incoherent_list_size() {
        let tensors = three_tensors_2x3();
        let mut field = tensors.to_field();
        let array = tensors.into_array_ref();

        // Declare a different shape than the storage actually uses.
        let mut map = field.metadata().clone();
        map.insert(
            EXTENSION_METADATA_KEY.to_string(),
            r#"{"shape":[2,2]}"#.to_string(),
        );
        field = field.with_metadata(map);

        assert!(matches!(
            FixedShapeTensorArray::try_from_arrow(&field, &array),
            Err(TensorArrayError::InvalidStorage(_))
        ));
    }

    #[test]
    fn load_rejects_wrong_storage_kind() {
        let array: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3]));
        let field = Field::new("t", array.data_type().clone(), true);
        assert!(matches!(
            FixedShapeTensorArray::try_from_arrow(&field, &array),
            Err(TensorArrayError::InvalidStorage(_))
        ));
    }
}
