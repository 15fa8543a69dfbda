#![allow(dead_code)]

pub mod builder;

use std::{cell::RefCell, rc::Rc};

use udfstream::{error::TransportError, RangeSource, ReadOutcome, Volume};

pub type ReadLog = Rc<RefCell<Vec<(u64, usize)>>>;

/// Records every read made against the wrapped source.
pub struct CountingSource<S> {
    inner: S,
    reads: ReadLog,
}

impl<S> CountingSource<S> {
    pub fn new(inner: S) -> (Self, ReadLog) {
        let reads = ReadLog::default();
        let source = CountingSource {
            inner,
            reads: Rc::clone(&reads),
        };
        (source, reads)
    }
}

impl<S: RangeSource> RangeSource for CountingSource<S> {
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(usize, ReadOutcome), TransportError> {
        self.reads.borrow_mut().push((offset, buf.len()));
        self.inner.read_at(buf, offset)
    }
}

/// Opens the sample image from memory.
pub fn sample_volume() -> Volume<Vec<u8>> {
    Volume::open(builder::sample().build()).unwrap()
}
