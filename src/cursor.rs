use std::marker::PhantomData;

use tokio::sync::mpsc;

use crate::error::SqlBatcherError;
use crate::results::DbRow;
use crate::store::HandleLease;

/// Lazy, forward-only, single-pass sequence of rows.
///
/// A background worker produces rows into a bounded channel sized by the statement's fetch size.
/// The cursor owns the execution handle's lease: it is released as soon as the last row (or an
/// error) has been read, or when the cursor is dropped early. The lifetime ties the cursor to the
/// executor that opened it, so nothing else can run on the same connection while it is live.
#[derive(Debug)]
pub struct RowCursor<'a> {
    rows: mpsc::Receiver<Result<DbRow, SqlBatcherError>>,
    lease: Option<HandleLease>,
    exhausted: bool,
    _borrow: PhantomData<&'a mut ()>,
}

impl RowCursor<'static> {
    pub(crate) fn new(
        rows: mpsc::Receiver<Result<DbRow, SqlBatcherError>>,
        lease: HandleLease,
    ) -> Self {
        Self {
            rows,
            lease: Some(lease),
            exhausted: false,
            _borrow: PhantomData,
        }
    }
}

impl<'a> RowCursor<'a> {
    /// Narrow the cursor's lifetime to a borrow held by the caller.
    pub(crate) fn scoped<'b>(self) -> RowCursor<'b> {
        RowCursor {
            rows: self.rows,
            lease: self.lease,
            exhausted: self.exhausted,
            _borrow: PhantomData,
        }
    }

    /// Next row, or `None` once the result is exhausted.
    ///
    /// # Errors
    /// Store errors raised while producing rows are returned once; the cursor is exhausted
    /// afterwards.
    pub async fn next(&mut self) -> Option<Result<DbRow, SqlBatcherError>> {
        if self.exhausted {
            return None;
        }
        match self.rows.recv().await {
            Some(Ok(row)) => Some(Ok(row)),
            Some(Err(err)) => {
                self.finish();
                Some(Err(err))
            }
            None => {
                self.finish();
                None
            }
        }
    }

    /// Drain the remaining rows.
    ///
    /// # Errors
    /// Returns the first error produced by the store.
    pub async fn try_collect(mut self) -> Result<Vec<DbRow>, SqlBatcherError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Stop reading and release the handle now.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.exhausted = true;
        self.rows.close();
        if let Some(mut lease) = self.lease.take() {
            lease.release();
        }
    }
}
