//! The side-channel metadata protocol shared by both tensor extension kinds.
//!
//! Arrow extension types are declared through two reserved keys in a field's
//! key-value metadata. The protocol here treats the metadata as an *ordered*
//! list of string pairs: insertion order is preserved and duplicate keys are
//! tolerated in general, but the two reserved keys are handled as singletons.

use std::collections::HashMap;

use arrow_schema::Field;

/// Arrow spec key carrying the extension name.
pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";
/// Arrow spec key carrying the extension's JSON metadata payload.
pub const EXTENSION_METADATA_KEY: &str = "ARROW:extension:metadata";

/// Canonical extension name for fixed shape tensor arrays.
pub const FIXED_SHAPE_TENSOR_NAME: &str = "arrow.fixed_shape_tensor";
/// Canonical extension name for variable shape tensor arrays.
pub const VARIABLE_SHAPE_TENSOR_NAME: &str = "arrow.variable_shape_tensor";

/// One entry of the ordered key-value side-channel metadata.
pub type MetadataPair = (String, String);

/// Embed the reserved extension entries into an ordered key-value list.
///
/// If the list already declares `extension_name` under the reserved name key,
/// the list is returned untouched: a payload attached by an earlier step is
/// never clobbered. Otherwise the name and payload entries are appended after
/// all existing entries.
pub fn init_extension_metadata(
    mut pairs: Vec<MetadataPair>,
    extension_name: &str,
    metadata_json: &str,
) -> Vec<MetadataPair> {
    let already_declared = pairs
        .iter()
        .any(|(key, value)| key == EXTENSION_NAME_KEY && value == extension_name);
    if already_declared {
        return pairs;
    }

    pairs.reserve(2);
    pairs.push((EXTENSION_NAME_KEY.to_string(), extension_name.to_string()));
    pairs.push((EXTENSION_METADATA_KEY.to_string(), metadata_json.to_string()));
    pairs
}

/// Look up the declared extension name, if any.
pub fn extension_name(pairs: &[MetadataPair]) -> Option<&str> {
    pairs
        .iter()
        .find(|(key, _)| key == EXTENSION_NAME_KEY)
        .map(|(_, value)| value.as_str())
}

/// Look up the extension's JSON metadata payload, if any.
///
/// Whether an absent payload is an error is the caller's decision: fixed shape
/// tensors cannot exist without one, variable shape tensors default to "no
/// declared constraints".
pub fn extension_metadata_json(pairs: &[MetadataPair]) -> Option<&str> {
    pairs
        .iter()
        .find(|(key, _)| key == EXTENSION_METADATA_KEY)
        .map(|(_, value)| value.as_str())
}

/// Convert the ordered list into the map type Arrow fields carry.
pub fn to_field_metadata(pairs: &[MetadataPair]) -> HashMap<String, String> {
    pairs.iter().cloned().collect()
}

/// Rebuild an ordered list from a field's metadata map.
///
/// Arrow's field metadata is an unordered map, so the original insertion order
/// is gone; entries are re-ordered deterministically with the reserved keys
/// last, matching the order a fresh embedding would produce.
pub fn from_field_metadata(field: &Field) -> Vec<MetadataPair> {
    let mut pairs: Vec<MetadataPair> = field
        .metadata()
        .iter()
        .filter(|(key, _)| key.as_str() != EXTENSION_NAME_KEY && key.as_str() != EXTENSION_METADATA_KEY)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    pairs.sort();

    if let Some(name) = field.metadata().get(EXTENSION_NAME_KEY) {
        pairs.push((EXTENSION_NAME_KEY.to_string(), name.clone()));
    }
    if let Some(payload) = field.metadata().get(EXTENSION_METADATA_KEY) {
        pairs.push((EXTENSION_METADATA_KEY.to_string(), payload.clone()));
    }
    pairs
}

/// Returns `true` when `field` declares the given extension name.
pub fn is_extension_field(field: &Field, extension_name: &str) -> bool {
    field
        .metadata()
        .get(EXTENSION_NAME_KEY)
        .map(|name| name == extension_name)
        .unwrap_or(false)
}
