//! Arrow canonical tensor extension arrays.
//!
//! This crate implements the two canonical tensor extension types of the
//! Arrow format on top of the `arrow` crate's columnar containers:
//!
//! - `arrow.fixed_shape_tensor`: every element shares one shape; storage is a
//!   `FixedSizeList` whose per-element list size is the product of the shape.
//! - `arrow.variable_shape_tensor`: each element carries its own shape;
//!   storage is a `Struct{ data: List<T>, shape: FixedSizeList<Int32> }`.
//!
//! Both kinds pair a validated metadata value with the physical storage and
//! declare themselves through the `ARROW:extension:name` /
//! `ARROW:extension:metadata` field entries, so the typed interpretation
//! survives Arrow IPC round-trips.
//!
//! ## Quick start
//!
//! Three 2x3 tensors stored as one flat row-major buffer:
//!
//! ```
//! use std::sync::Arc;
//! use arrow::array::Float32Array;
//! use tensor_arrow::{FixedShapeTensorArray, FixedShapeTensorMetadata};
//!
//! let flat = Arc::new(Float32Array::from(vec![0.0f32; 18]));
//! let tensors = FixedShapeTensorArray::try_new(
//!     6,
//!     flat,
//!     FixedShapeTensorMetadata::new(vec![2, 3]),
//! )?;
//! assert_eq!(tensors.len(), 3);
//! assert_eq!(tensors.shape(), [2, 3]);
//! # Ok::<(), tensor_arrow::TensorArrayError>(())
//! ```
//!
//! Two tensors of different shapes, then a typed view recovered through the
//! registry:
//!
//! ```
//! use std::sync::Arc;
//! use arrow::array::{FixedSizeListArray, Int32Array, ListArray};
//! use arrow::buffer::OffsetBuffer;
//! use arrow_schema::{DataType, Field};
//!
//! use tensor_arrow::{
//!     register_tensor_extensions, ExtensionRegistry, TensorExtensionArray,
//!     VariableShapeTensorArray, VariableShapeTensorMetadata,
//! };
//!
//! let item = Arc::new(Field::new("item", DataType::Int32, true));
//! let data = ListArray::try_new(
//!     item,
//!     OffsetBuffer::new(vec![0, 6, 10].into()),
//!     Arc::new(Int32Array::from((0..10).collect::<Vec<i32>>())),
//!     None,
//! )?;
//! let shape_item = Arc::new(Field::new("item", DataType::Int32, true));
//! let shapes = FixedSizeListArray::try_new(
//!     shape_item,
//!     2,
//!     Arc::new(Int32Array::from(vec![2, 3, 1, 4])),
//!     None,
//! )?;
//!
//! let tensors = VariableShapeTensorArray::try_new(
//!     2,
//!     data,
//!     shapes,
//!     VariableShapeTensorMetadata::default(),
//! )?;
//! let field = tensors.to_field();
//! let array = tensors.into_array_ref();
//!
//! let mut registry = ExtensionRegistry::new();
//! register_tensor_extensions(&mut registry)?;
//! match registry.wrap(&field, &array)? {
//!     Some(TensorExtensionArray::VariableShape(view)) => {
//!         assert_eq!(view.len(), 2);
//!         assert_eq!(view.at(0)?.shape(), [2, 3]);
//!     }
//!     _ => unreachable!("the column declares arrow.variable_shape_tensor"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod extension;
pub mod fixed_shape;
pub mod registry;
pub mod variable_shape;

pub use error::TensorArrayError;
pub use fixed_shape::{FixedShapeTensorArray, FixedShapeTensorMetadata};
pub use registry::{
    register_tensor_extensions, ExtensionRegistry, StorageKind, TensorExtensionArray,
};
pub use variable_shape::{
    VariableShapeTensor, VariableShapeTensorArray, VariableShapeTensorMetadata,
};
