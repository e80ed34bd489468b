//! Property tests for how the binding splits host chunks across reads.

#[path = "common/mod.rs"]
mod common;

use proptest::prelude::*;
use serial_binding::{Binding, BindingError};

/// Read until end of stream, returning each non-empty read.
async fn read_all(
    chunks: &[Vec<u8>],
    buffer_size: usize,
) -> Result<(Vec<Vec<u8>>, usize), BindingError> {
    let (binding, mock) = common::open_binding("PROP0").await;
    for chunk in chunks {
        mock.enqueue_chunk(chunk);
    }
    mock.end_stream();

    let mut reads = Vec::new();
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let n = binding.read(&mut buffer, 0, buffer_size).await?;
        if n == 0 {
            break;
        }
        reads.push(buffer[..n].to_vec());
    }
    let host_reads = mock.read_calls();
    binding.close().await?;
    Ok((reads, host_reads))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Each chunk is delivered in order, cut into buffer-sized pieces, and a
    /// piece never mixes bytes from two chunks.
    #[test]
    fn reads_follow_chunk_boundaries(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..48), 0..8),
        buffer_size in 1usize..32,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (reads, host_reads) = runtime.block_on(read_all(&chunks, buffer_size)).unwrap();

        let expected: Vec<Vec<u8>> = chunks
            .iter()
            .flat_map(|chunk| chunk.chunks(buffer_size).map(<[u8]>::to_vec))
            .collect();
        prop_assert_eq!(reads, expected);

        // One host read per chunk plus the final end of stream.
        prop_assert_eq!(host_reads, chunks.len() + 1);
    }
}
