//! Splits a stream of byte chunks on a delimiter byte, emitting one item
//! per delimited segment (delimiter stripped). Built on [`translate`].

use std::cell::RefCell;
use std::rc::Rc;

use super::translate::{translate_with_flush, Translation};
use super::SourceRef;

/// Splits incoming `Vec<u8>` items on `delimiter`, emitting one item per
/// delimited segment (delimiter stripped). A trailing segment with no
/// terminating delimiter before stream close is still emitted, as a final
/// short segment.
pub fn split(upstream: SourceRef<Vec<u8>>, delimiter: u8) -> SourceRef<Vec<u8>> {
    let buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let flush_buffer = buffer.clone();
    translate_with_flush(
        upstream,
        move |item: Vec<u8>| {
            buffer.borrow_mut().extend_from_slice(&item);
            let mut buf = buffer.borrow_mut();
            match buf.iter().position(|&b| b == delimiter) {
                Some(pos) => {
                    let segment: Vec<u8> = buf.drain(..=pos).collect();
                    let segment = segment[..segment.len() - 1].to_vec();
                    if buf.iter().any(|&b| b == delimiter) {
                        Translation::Excess(segment, Vec::new())
                    } else {
                        Translation::Sufficient(segment)
                    }
                }
                None => Translation::Insufficient,
            }
        },
        move || {
            let mut buf = flush_buffer.borrow_mut();
            if buf.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut *buf))
            }
        },
    )
}
