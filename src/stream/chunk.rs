//! Regroups a stream of variable-size byte chunks into fixed-size chunks,
//! built on [`translate`].

use std::cell::RefCell;
use std::rc::Rc;

use super::translate::{translate_with_flush, Translation};
use super::SourceRef;

/// Splits/merges incoming `Vec<u8>` items so every item delivered
/// downstream is exactly `size` bytes, except a final short chunk at
/// stream close.
pub fn chunking_stream(upstream: SourceRef<Vec<u8>>, size: usize) -> SourceRef<Vec<u8>> {
    assert!(size > 0, "chunk size must be nonzero");
    let buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let flush_buffer = buffer.clone();
    translate_with_flush(
        upstream,
        move |item: Vec<u8>| {
            buffer.borrow_mut().extend_from_slice(&item);
            if buffer.borrow().len() >= size {
                let chunk: Vec<u8> = buffer.borrow_mut().drain(..size).collect();
                if buffer.borrow().len() >= size {
                    Translation::Excess(chunk, Vec::new())
                } else {
                    Translation::Sufficient(chunk)
                }
            } else {
                Translation::Insufficient
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
