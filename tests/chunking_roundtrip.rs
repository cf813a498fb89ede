//! `chunking_stream(n)` followed by concatenating every delivered chunk
//! must reconstruct the original byte sequence, for arbitrarily shaped
//! input chunking.

use std::cell::RefCell;
use std::rc::Rc;

use streamloop::stream::{chunking_stream, drain, PushStream};

#[test]
fn concatenated_output_equals_input_regardless_of_input_chunking() {
    let input: Vec<u8> = (0..500u32).map(|i| (i % 256) as u8).collect();

    // Feed the input through in irregularly sized pieces to exercise the
    // accumulator across many boundary shapes, not just one chunk size.
    let piece_sizes = [1usize, 7, 13, 64, 200, 1, 2, 3, 210];
    assert_eq!(piece_sizes.iter().sum::<usize>(), input.len());

    let source = PushStream::new();
    let chunked = chunking_stream(source.source(), 64);

    let collected = Rc::new(RefCell::new(Vec::new()));
    let collected_cb = collected.clone();
    drain(chunked, move |chunk: Vec<u8>| collected_cb.borrow_mut().extend_from_slice(&chunk));

    let mut offset = 0;
    for size in piece_sizes {
        source.push(input[offset..offset + size].to_vec());
        offset += size;
    }
    source.close();

    assert_eq!(*collected.borrow(), input);
}
