//! Property-based tests over the storage codec and the packet converter.

use std::path::Path;

use packset::array::{ArrayValue, Dtype};
use packset::convert::convert_packet;
use packset::schema::{ItemType, ItemTypeSet};
use packset::storage::{DenseStorage, ItemArray, ItemStorage};
use tempfile::tempdir;

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn save_load(path: &Path, value: &ArrayValue) -> ArrayValue {
        DenseStorage
            .save(path, &ItemArray::Owned(value.clone()))
            .unwrap();
        DenseStorage
            .load(path, None)
            .unwrap()
            .materialize()
            .unwrap()
    }

    proptest! {
        /// Any dense array survives the self-describing file format.
        #[test]
        fn dense_file_round_trip(
            values in prop::collection::vec(any::<u16>(), 1..256),
            rows in 1usize..8,
        ) {
            let total = values.len() - values.len() % rows;
            prop_assume!(total > 0);
            let shape = [total / rows, rows];
            let value = ArrayValue::from_vec(&shape, values[..total].to_vec()).unwrap();

            let dir = tempdir().unwrap();
            let loaded = save_load(&dir.path().join("prop.pkd"), &value);
            prop_assert_eq!(loaded, value);
        }

        /// Float arrays keep exact bit patterns through the codec.
        #[test]
        fn dense_round_trip_preserves_floats(
            values in prop::collection::vec(any::<f32>().prop_filter("finite", |v| v.is_finite()), 1..64),
        ) {
            let shape = [values.len(), 1];
            let value = ArrayValue::from_vec(&shape, values).unwrap();

            let dir = tempdir().unwrap();
            let loaded = save_load(&dir.path().join("prop.pkd"), &value);
            prop_assert_eq!(loaded, value);
        }

        /// The yx projection of any packet is the per-cell maximum over
        /// frames, computed here by hand for comparison.
        #[test]
        fn yx_projection_is_the_frame_maximum(
            values in prop::collection::vec(any::<u8>(), 2 * 3 * 4..=2 * 3 * 4),
        ) {
            let packet = ArrayValue::from_vec(&[2, 3, 4], values.clone()).unwrap();
            let items = convert_packet(
                &packet,
                &ItemTypeSet::new([ItemType::Yx]),
                0,
                None,
                Dtype::U8,
            )
            .unwrap();

            let mut expected = vec![0u8; 3 * 4];
            for frame in 0..2 {
                for cell in 0..3 * 4 {
                    let v = values[frame * 3 * 4 + cell];
                    if v > expected[cell] {
                        expected[cell] = v;
                    }
                }
            }
            let expected = ArrayValue::from_vec(&[3, 4], expected).unwrap();
            prop_assert_eq!(&items[&ItemType::Yx], &expected);
        }
    }
}
