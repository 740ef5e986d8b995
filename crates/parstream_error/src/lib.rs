use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Broad category of an error.
///
/// Callers should match on the kind instead of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid configuration value, e.g. a partition count of zero.
    InvalidArgument,
    /// An operation that the receiver doesn't support, e.g. indexed access
    /// on a non-indexible producer.
    InvalidOperation,
    /// Indexed access outside of the valid range.
    IndexOutOfRange,
    /// A worker failed while processing an element.
    WorkerFault,
    /// Execution observed a cancellation request.
    Cancelled,
    /// Multiple worker faults combined into one error.
    Aggregate,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "invalid argument",
            Self::InvalidOperation => "invalid operation",
            Self::IndexOutOfRange => "index out of range",
            Self::WorkerFault => "worker fault",
            Self::Cancelled => "cancelled",
            Self::Aggregate => "aggregate",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

struct DbErrorInner {
    kind: ErrorKind,
    msg: String,
    source: Option<Box<dyn Error + Send + Sync>>,
    /// Extra key/value pairs providing context for the error.
    fields: Vec<(Cow<'static, str>, String)>,
    /// Underlying errors for aggregate errors.
    causes: Vec<DbError>,
    backtrace: Backtrace,
}

impl fmt::Debug for DbErrorInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbErrorInner")
            .field("kind", &self.kind)
            .field("msg", &self.msg)
            .field("source", &self.source)
            .field("fields", &self.fields)
            .field("causes", &self.causes)
            .finish_non_exhaustive()
    }
}

impl DbError {
    /// Create a new internal error with the given message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                kind,
                msg: msg.into(),
                source: None,
                fields: Vec::new(),
                causes: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::InvalidArgument, msg)
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::InvalidOperation, msg)
    }

    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Self::with_kind(ErrorKind::IndexOutOfRange, "Index out of range")
            .with_field("index", index)
            .with_field("len", len)
    }

    /// Wrap an error that happened while a worker processed an element of a
    /// partition.
    pub fn worker_fault(partition: usize, cause: DbError) -> Self {
        let msg = format!("Worker for partition {partition} failed");
        let mut err = Self::with_kind(ErrorKind::WorkerFault, msg).with_field("partition", partition);
        err.inner.causes.push(cause);
        err
    }

    pub fn cancelled() -> Self {
        Self::with_kind(ErrorKind::Cancelled, "Query canceled")
    }

    /// Combine multiple errors into a single error.
    ///
    /// A single error is returned as-is.
    pub fn aggregate(mut errors: Vec<DbError>) -> Self {
        if errors.len() == 1 {
            return errors.remove(0);
        }
        let msg = format!("{} errors occurred during execution", errors.len());
        let mut err = Self::with_kind(ErrorKind::Aggregate, msg);
        err.inner.causes = errors;
        err
    }

    /// Add a field to the error for additional context.
    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: fmt::Display,
    {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn get_msg(&self) -> &str {
        &self.inner.msg
    }

    /// Errors wrapped by this error.
    ///
    /// For aggregate errors, this is every combined error. For worker faults,
    /// this is the error raised by the worker.
    pub fn causes(&self) -> &[DbError] {
        &self.inner.causes
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.inner
            .fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;

        for (key, val) in &self.inner.fields {
            write!(f, "\n{key}: {val}")?;
        }

        for cause in &self.inner.causes {
            write!(f, "\nCaused by: {cause}")?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        if self.inner.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\nBacktrace: {}", self.inner.backtrace)?;
        }

        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// An extension trait for adding context to the Error variant of a result.
pub trait ResultExt<T, E> {
    /// Wrap an error with a static context string.
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(msg, Box::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_keeps_all_causes() {
        let errs = (0..3)
            .map(|p| DbError::worker_fault(p, DbError::new("boom")))
            .collect();
        let err = DbError::aggregate(errs);

        assert_eq!(ErrorKind::Aggregate, err.kind());
        assert_eq!(3, err.causes().len());
        for (idx, cause) in err.causes().iter().enumerate() {
            assert_eq!(ErrorKind::WorkerFault, cause.kind());
            assert_eq!(Some(idx.to_string().as_str()), cause.get_field("partition"));
        }
    }

    #[test]
    fn aggregate_single_is_unwrapped() {
        let err = DbError::aggregate(vec![DbError::cancelled()]);
        assert_eq!(ErrorKind::Cancelled, err.kind());
        assert!(err.causes().is_empty());
    }

    #[test]
    fn index_out_of_range_fields() {
        let err = DbError::index_out_of_range(12, 10);
        assert_eq!(ErrorKind::IndexOutOfRange, err.kind());
        assert_eq!(Some("12"), err.get_field("index"));
        assert_eq!(Some("10"), err.get_field("len"));
    }

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = res.context("Failed to format").unwrap_err();
        assert_eq!("Failed to format", err.get_msg());
        assert!(err.source().is_some());
    }
}
