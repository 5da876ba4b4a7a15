//! Fixed-size chunking of a record table.

use textsift_shared::{Result, Table, TextsiftError};

use crate::progress::ProgressSink;

/// Lazy, finite sequence of consecutive sub-tables of a [`Table`].
///
/// Every chunk holds `size` rows except possibly the last. Progress, when
/// wired, advances only once a yielded chunk has been handed back, i.e. on
/// the following pull, so it tracks completed consumption.
pub struct Batches<'a> {
    table: &'a Table,
    size: usize,
    pos: usize,
    reported: usize,
    progress: Option<&'a dyn ProgressSink>,
}

/// Split `table` into chunks of `size` rows.
///
/// Fails with an invalid-argument error when `size` is zero.
pub fn batches<'a>(
    table: &'a Table,
    size: usize,
    progress: Option<&'a dyn ProgressSink>,
) -> Result<Batches<'a>> {
    if size == 0 {
        return Err(TextsiftError::invalid_argument(
            "batch size must be a positive number of rows",
        ));
    }
    if let Some(p) = progress {
        p.update(0, table.len());
    }
    Ok(Batches {
        table,
        size,
        pos: 0,
        reported: 0,
        progress,
    })
}

impl Batches<'_> {
    /// Number of chunks not yet yielded.
    pub fn remaining(&self) -> usize {
        (self.table.len() - self.pos).div_ceil(self.size)
    }
}

impl Iterator for Batches<'_> {
    type Item = Table;

    fn next(&mut self) -> Option<Table> {
        if self.pos > self.reported {
            if let Some(p) = self.progress {
                p.update(self.pos, self.table.len());
            }
            self.reported = self.pos;
        }
        if self.pos >= self.table.len() {
            return None;
        }
        let end = (self.pos + self.size).min(self.table.len());
        let chunk = self.table.slice(self.pos, end);
        self.pos = end;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Batches<'_> {}

impl std::iter::FusedIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use textsift_shared::{Column, Value};

    use super::*;

    fn table(n: usize) -> Table {
        Table::from_columns(vec![Column::new(
            "i",
            (0..n).map(|i| Value::Number(i as f64)).collect(),
        )])
        .unwrap()
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<(usize, usize)>>);

    impl ProgressSink for Recorder {
        fn update(&self, current: usize, total: usize) {
            self.0.borrow_mut().push((current, total));
        }
    }

    #[test]
    fn chunks_concatenate_back_to_input() {
        let t = table(10);
        for size in 1..=12 {
            let chunks: Vec<Table> = batches(&t, size, None).unwrap().collect();
            assert_eq!(chunks.len(), 10usize.div_ceil(size));
            assert!(chunks.iter().rev().skip(1).all(|c| c.len() == size));
            assert_eq!(Table::concat(&chunks), t, "size {size}");
        }
    }

    #[test]
    fn oversized_chunk_yields_one() {
        let t = table(3);
        let chunks: Vec<Table> = batches(&t, 1000, None).unwrap().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 3);
    }

    #[test]
    fn empty_table_yields_nothing() {
        let t = table(0);
        assert_eq!(batches(&t, 5, None).unwrap().count(), 0);
    }

    #[test]
    fn zero_size_is_invalid() {
        let t = table(3);
        let err = batches(&t, 0, None).err().unwrap();
        assert!(matches!(err, TextsiftError::InvalidArgument { .. }));
    }

    #[test]
    fn progress_advances_after_consumption() {
        let t = table(5);
        let rec = Recorder::default();
        let mut it = batches(&t, 2, Some(&rec as &dyn ProgressSink)).unwrap();
        assert_eq!(*rec.0.borrow(), vec![(0, 5)]);

        let first = it.next().unwrap();
        assert_eq!(first.len(), 2);
        // Not reported until the caller comes back for more.
        assert_eq!(rec.0.borrow().len(), 1);

        it.next().unwrap();
        assert_eq!(rec.0.borrow().last(), Some(&(2, 5)));

        it.next().unwrap();
        assert!(it.next().is_none());
        assert_eq!(*rec.0.borrow(), vec![(0, 5), (2, 5), (4, 5), (5, 5)]);
        assert!(it.next().is_none());
        assert_eq!(rec.0.borrow().len(), 4);
    }
}
