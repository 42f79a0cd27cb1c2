//! Splitting datasets into fixed-size, id-addressable chunks.
//!
//! Chunk ids and boundaries depend only on the dataset length and the chunk
//! size, so re-chunking the same input always yields the same chunks.

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};

/// Contiguous slice of a dataset; `end_index` is inclusive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk<T> {
    pub id: usize,
    pub data: Vec<T>,
    pub start_index: usize,
    pub end_index: usize,
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Split `dataset` into `ceil(len / chunk_size)` chunks in index order
pub fn chunk_data<T: Clone>(dataset: &[T], chunk_size: usize) -> Result<Vec<Chunk<T>>> {
    if chunk_size == 0 {
        return Err(BatchError::validation("chunk size must be greater than 0"));
    }

    Ok(dataset
        .chunks(chunk_size)
        .enumerate()
        .map(|(id, slice)| {
            let start_index = id * chunk_size;
            Chunk {
                id,
                data: slice.to_vec(),
                start_index,
                end_index: start_index + slice.len() - 1,
            }
        })
        .collect())
}

/// Number of chunks `chunk_data` produces for `len` items
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        0
    } else {
        len.div_ceil(chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concrete_boundaries() {
        let dataset: Vec<u32> = (0..250).collect();
        let chunks = chunk_data(&dataset, 100).unwrap();

        let bounds: Vec<_> = chunks
            .iter()
            .map(|c| (c.id, c.start_index, c.end_index, c.len()))
            .collect();
        assert_eq!(
            bounds,
            vec![(0, 0, 99, 100), (1, 100, 199, 100), (2, 200, 249, 50)]
        );
        assert_eq!(chunks[2].data.first(), Some(&200));
    }

    #[test]
    fn test_empty_dataset_and_zero_size() {
        assert!(chunk_data::<u8>(&[], 10).unwrap().is_empty());
        assert!(matches!(
            chunk_data(&[1, 2, 3], 0),
            Err(BatchError::Validation { .. })
        ));
        assert_eq!(chunk_count(0, 10), 0);
        assert_eq!(chunk_count(11, 10), 2);
    }
}
