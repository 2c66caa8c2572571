//! End-to-end wire test: both tensor extension kinds survive an Arrow IPC
//! file round-trip and come back as typed views through the registry.

use std::sync::Arc;

use arrow::array::{Array, FixedSizeListArray, Float32Array, Int32Array, ListArray};
use arrow::buffer::OffsetBuffer;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use tempfile::NamedTempFile;

use tensor_arrow::{
    register_tensor_extensions, ExtensionRegistry, FixedShapeTensorArray,
    FixedShapeTensorMetadata, TensorExtensionArray, VariableShapeTensorArray,
    VariableShapeTensorMetadata,
};

/// Three 2x3 tensors over one flat buffer of 18 values.
fn fixed_column() -> FixedShapeTensorArray {
    let flat = Arc::new(Float32Array::from(
        (0..18).map(|v| v as f32).collect::<Vec<_>>(),
    ));
    let metadata = FixedShapeTensorMetadata {
        shape: vec![2, 3],
        dim_names: None,
        permutation: Some(vec![1, 0]),
    };
    FixedShapeTensorArray::try_new_with_options(6, flat, metadata, None, Some("image"), None)
        .unwrap()
}

/// Three tensors of shapes [2,3], [1,4] and [2,1].
fn variable_column() -> VariableShapeTensorArray {
    let item = Arc::new(Field::new("item", DataType::Int32, true));
    let data = ListArray::try_new(
        item,
        OffsetBuffer::new(vec![0, 6, 10, 12].into()),
        Arc::new(Int32Array::from((0..12).collect::<Vec<i32>>())),
        None,
    )
    .unwrap();

    let shape_item = Arc::new(Field::new("item", DataType::Int32, true));
    let shapes = FixedSizeListArray::try_new(
        shape_item,
        2,
        Arc::new(Int32Array::from(vec![2, 3, 1, 4, 2, 1])),
        None,
    )
    .unwrap();

    let metadata = VariableShapeTensorMetadata {
        dim_names: Some(vec!["y".to_string(), "x".to_string()]),
        ..Default::default()
    };
    VariableShapeTensorArray::try_new_with_options(
        2,
        data,
        shapes,
        metadata,
        None,
        Some("patches"),
        None,
    )
    .unwrap()
}

#[test]
fn ipc_roundtrip_preserves_tensor_extension_columns() {
    let fixed = fixed_column();
    let variable = variable_column();

    let schema = Arc::new(Schema::new(vec![fixed.to_field(), variable.to_field()]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![fixed.into_array_ref(), variable.into_array_ref()],
    )
    .unwrap();
    assert_eq!(batch.num_rows(), 3);

    // Write IPC file
    let tmp = NamedTempFile::new().unwrap();
    {
        let mut writer = FileWriter::try_new(tmp.reopen().unwrap(), &schema).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
    }

    // Read IPC file
    let mut reader =
        FileReader::try_new(std::fs::File::open(tmp.path()).unwrap(), None).unwrap();
    let read_schema = reader.schema();
    let read_batch = reader.next().unwrap().unwrap();
    assert_eq!(read_batch.num_rows(), 3);

    let mut registry = ExtensionRegistry::new();
    register_tensor_extensions(&mut registry).unwrap();

    match registry
        .wrap(read_schema.field(0), read_batch.column(0))
        .unwrap()
    {
        Some(TensorExtensionArray::FixedShape(view)) => {
            assert_eq!(view.len(), 3);
            assert_eq!(view.name(), Some("image"));
            assert_eq!(view.shape(), [2, 3]);
            assert_eq!(view.metadata().permutation, Some(vec![1, 0]));

            let first = view.at(0).unwrap();
            let first = first.as_any().downcast_ref::<Float32Array>().unwrap();
            assert_eq!(first.values(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        }
        other => panic!("expected a fixed shape tensor column, got {other:?}"),
    }

    match registry
        .wrap(read_schema.field(1), read_batch.column(1))
        .unwrap()
    {
        Some(TensorExtensionArray::VariableShape(view)) => {
            assert_eq!(view.len(), 3);
            assert_eq!(view.name(), Some("patches"));
            assert_eq!(view.ndim(), Some(2));

            let second = view.at(1).unwrap();
            assert_eq!(second.shape(), [1, 4]);
            let values = second
                .values()
                .as_any()
                .downcast_ref::<Int32Array>()
                .unwrap();
            assert_eq!(values.values(), &[6, 7, 8, 9]);

            let third = view.at(2).unwrap();
            assert_eq!(third.shape(), [2, 1]);
            assert_eq!(third.element_count(), 2);
        }
        other => panic!("expected a variable shape tensor column, got {other:?}"),
    }
}
