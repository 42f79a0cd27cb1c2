use ledgerbatch::batch::{chunk_count, chunk_data};
use proptest::prelude::*;

proptest! {
    /// Property: Concatenating chunk data in id order reproduces the input
    #[test]
    fn chunks_partition_the_input(data in prop::collection::vec(any::<u32>(), 0..500), size in 1usize..64) {
        let chunks = chunk_data(&data, size).unwrap();

        let rebuilt: Vec<u32> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
        prop_assert_eq!(&rebuilt, &data);
        prop_assert_eq!(chunks.len(), chunk_count(data.len(), size));
    }

    /// Property: Every chunk but the last is full and index ranges are contiguous
    #[test]
    fn chunk_bounds_are_contiguous(len in 1usize..500, size in 1usize..64) {
        let data: Vec<usize> = (0..len).collect();
        let chunks = chunk_data(&data, size).unwrap();

        let mut next_start = 0;
        for (position, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.id, position);
            prop_assert_eq!(chunk.start_index, next_start);
            prop_assert_eq!(chunk.end_index, chunk.start_index + chunk.len() - 1);
            prop_assert_eq!(chunk.data[0], chunk.start_index);
            if position + 1 < chunks.len() {
                prop_assert_eq!(chunk.len(), size);
            } else {
                prop_assert!(chunk.len() >= 1 && chunk.len() <= size);
            }
            next_start = chunk.end_index + 1;
        }
        prop_assert_eq!(next_start, len);
    }
}

#[test]
fn zero_chunk_size_is_rejected() {
    assert!(chunk_data(&[1, 2, 3], 0).is_err());
}
