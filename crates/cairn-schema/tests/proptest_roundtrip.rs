//! Property tests for store/restore round trips.
//!
//! These tests generate random objects (leaf values, arrays, nested aggregates
//! and nested objects), store them, and verify that restoring into a blank
//! object of the same layout reproduces the original exactly on both restore
//! paths.

use cairn_schema::prelude::*;
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy that generates finite doubles.
fn finite_f64() -> impl Strategy<Value = f64> {
    (-1_000_000i64..1_000_000i64).prop_map(|v| v as f64 * 0.25)
}

fn leaf_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<bool>().prop_map(FieldValue::Bool),
        any::<u8>().prop_map(FieldValue::U8),
        any::<u16>().prop_map(FieldValue::Enum),
        any::<u32>().prop_map(FieldValue::U32),
        any::<i16>().prop_map(FieldValue::I16),
        any::<i64>().prop_map(FieldValue::I64),
        (-1_000_000i32..1_000_000i32).prop_map(|v| FieldValue::F32(v as f32 * 0.5)),
        finite_f64().prop_map(FieldValue::F64),
        "[a-z ]{0,12}".prop_map(FieldValue::String),
        "[A-Za-z_]{1,8}".prop_map(FieldValue::Name),
        (finite_f64(), finite_f64(), finite_f64())
            .prop_map(|(x, y, z)| FieldValue::Vector(Vec3::new(x, y, z))),
        (finite_f64(), finite_f64(), finite_f64())
            .prop_map(|(p, y, r)| FieldValue::Rotator(Rotator::new(p, y, r))),
        finite_f64().prop_map(|x| FieldValue::Transform(Transform::from_translation(Vec3::new(x, 0.0, 1.0)))),
        any::<u128>().prop_map(|v| FieldValue::Guid(Uuid::from_u128(v))),
        proptest::option::of("[a-z/]{1,10}").prop_map(FieldValue::AssetPath),
    ]
}

#[derive(Debug, Clone)]
struct Shape {
    leaves: Vec<FieldValue>,
    weights: Vec<u32>,
    inner: Option<Vec<FieldValue>>,
    nested: Option<Vec<FieldValue>>,
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    (
        prop::collection::vec(leaf_value(), 0..12),
        prop::collection::vec(any::<u32>(), 0..6),
        proptest::option::of(prop::collection::vec(leaf_value(), 0..4)),
        proptest::option::of(prop::collection::vec(leaf_value(), 0..4)),
    )
        .prop_map(|(leaves, weights, inner, nested)| Shape {
            leaves,
            weights,
            inner,
            nested,
        })
}

fn blank(value: &FieldValue) -> FieldValue {
    value.kind().map(FieldValue::default_for).unwrap_or(FieldValue::Array(Vec::new()))
}

/// Build an object from a shape. `filled` selects the generated values or the
/// per-kind defaults; the layout is identical either way.
fn build(shape: &Shape, filled: bool) -> DynamicObject {
    let pick = |v: &FieldValue| if filled { v.clone() } else { blank(v) };

    let inner = shape.inner.as_ref().map(|fields| {
        let mut inner = DynamicObject::new("Inner");
        for (i, v) in fields.iter().enumerate() {
            inner = inner.with_value(format!("i{i}"), pick(v));
        }
        inner
    });

    let mut obj = DynamicObject::new("Thing");
    for (i, v) in shape.leaves.iter().enumerate() {
        obj = obj.with_value(format!("f{i}"), pick(v));
    }
    let weights = if filled {
        shape.weights.iter().map(|&w| FieldValue::U32(w)).collect()
    } else {
        Vec::new()
    };
    obj = obj
        .with_array("weights", DataKind::U32, weights)
        .with_optional_struct("inner", inner);

    let nested = shape.nested.as_ref().map(|fields| {
        let mut n = DynamicObject::new("Part");
        for (i, v) in fields.iter().enumerate() {
            n = n.with_value(format!("p{i}"), pick(v));
        }
        n
    });
    // A blank target starts with the right class in its slot so the restore
    // path can fill it; a stored null clears it.
    obj.with_object("part", nested)
}

fn store(obj: &DynamicObject) -> (ClassMetadata, PropertyData) {
    let mut meta = ClassMetadata::new();
    let data = store_properties(obj, &mut meta, &NullReferences).unwrap();
    (meta, data)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn unchanged_layout_round_trips_exactly(shape in shape_strategy()) {
        let original = build(&shape, true);
        let (meta, data) = store(&original);

        let mut target = build(&shape, false);
        let stats = restore_properties(&mut target, &data, &meta, &NullReferences, RestorePath::Auto)
            .unwrap();

        prop_assert_eq!(&target, &original);
        prop_assert_eq!(stats.slow_objects, 0);
        prop_assert_eq!(stats.skipped_fields, 0);
    }

    #[test]
    fn fast_and_forced_slow_paths_agree(shape in shape_strategy()) {
        let original = build(&shape, true);
        let (meta, data) = store(&original);

        let mut fast = build(&shape, false);
        let mut slow = build(&shape, false);
        restore_properties(&mut fast, &data, &meta, &NullReferences, RestorePath::Auto).unwrap();
        let stats = restore_properties(&mut slow, &data, &meta, &NullReferences, RestorePath::ForceSlow)
            .unwrap();

        prop_assert_eq!(&fast, &slow);
        prop_assert_eq!(&slow, &original);
        prop_assert_eq!(stats.fast_objects, 0);
    }

    #[test]
    fn aggregate_presence_may_differ_per_instance(
        shape in shape_strategy(),
        stored_with in prop::collection::vec(any::<bool>(), 1..4),
        restored_with in any::<bool>(),
    ) {
        let inner = shape.inner.clone().unwrap_or_default();
        let variant = |present: bool| Shape {
            inner: present.then(|| inner.clone()),
            ..shape.clone()
        };
        let mut meta = ClassMetadata::new();
        let stored: Vec<_> = stored_with
            .iter()
            .map(|&present| {
                store_properties(&build(&variant(present), true), &mut meta, &NullReferences).unwrap()
            })
            .collect();

        for (data, &present) in stored.iter().zip(&stored_with) {
            let mut auto = build(&variant(restored_with), false);
            let mut slow = auto.clone();
            restore_properties(&mut auto, data, &meta, &NullReferences, RestorePath::Auto).unwrap();
            restore_properties(&mut slow, data, &meta, &NullReferences, RestorePath::ForceSlow)
                .unwrap();
            prop_assert_eq!(&auto, &slow);
            if present == restored_with {
                prop_assert_eq!(&auto, &build(&variant(present), true));
            }
        }
    }

    #[test]
    fn stored_metadata_survives_its_chunk_encoding(shape in shape_strategy()) {
        use std::io::Cursor;
        use cairn_archive::chunk::{ChunkReader, ChunkWriter};

        let original = build(&shape, true);
        let (meta, data) = store(&original);

        let mut w = ChunkWriter::new(Cursor::new(Vec::new()));
        meta.write_to(&mut w).unwrap();
        let bytes = w.into_inner().unwrap().into_inner();
        let reloaded = ClassMetadata::read_from(&mut ChunkReader::new(Cursor::new(bytes)).unwrap()).unwrap();

        let mut target = build(&shape, false);
        restore_properties(&mut target, &data, &reloaded, &NullReferences, RestorePath::Auto).unwrap();
        prop_assert_eq!(&target, &original);
    }
}
