use {
    std::{error::Error as StdError, fmt},
    thiserror::Error,
};

/// Why a [`Context`](crate::Context) was cancelled.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cancelled {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Returned by [`Pool::process`](crate::Pool::process) when an item
/// could not be handed to a worker.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was stopped, or every worker has already exited.
    #[error("pool closed")]
    Closed,

    /// The submission context was cancelled while waiting for a worker.
    #[error("submission abandoned: {0}")]
    Cancelled(#[from] Cancelled),
}

/// Every mapping failure of one reduction run, in completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeError<E> {
    errors: Vec<E>,
}

impl<E> CompositeError<E> {
    pub(crate) fn new(errors: Vec<E>) -> CompositeError<E> {
        CompositeError { errors }
    }

    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E> fmt::Display for CompositeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors while reducing", self.errors.len())
    }
}

impl<E: fmt::Debug> StdError for CompositeError<E> {}

/// Why a reduction did not produce a clean result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReduceError<E> {
    /// The run was cut short. Mapping errors collected so far are dropped.
    Cancelled(Cancelled),
    /// The run completed but some items failed to map.
    Composite(CompositeError<E>),
}

impl<E> ReduceError<E> {
    pub fn cancelled(&self) -> Option<Cancelled> {
        match self {
            ReduceError::Cancelled(reason) => Some(*reason),
            ReduceError::Composite(_) => None,
        }
    }

    pub fn composite(&self) -> Option<&CompositeError<E>> {
        match self {
            ReduceError::Cancelled(_) => None,
            ReduceError::Composite(composite) => Some(composite),
        }
    }
}

impl<E> fmt::Display for ReduceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceError::Cancelled(reason) => fmt::Display::fmt(reason, f),
            ReduceError::Composite(composite) => fmt::Display::fmt(composite, f),
        }
    }
}

impl<E: fmt::Debug> StdError for ReduceError<E> {}

/// A failed reduction together with the accumulator folded so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialReduce<R, E> {
    pub acc: R,
    pub error: ReduceError<E>,
}

impl<R, E> PartialReduce<R, E> {
    pub fn into_parts(self) -> (R, ReduceError<E>) {
        (self.acc, self.error)
    }

    pub fn cancelled(&self) -> Option<Cancelled> {
        self.error.cancelled()
    }

    /// The mapping errors of a completed run. Empty if the run was cancelled.
    pub fn errors(&self) -> &[E] {
        match &self.error {
            ReduceError::Composite(composite) => composite.errors(),
            ReduceError::Cancelled(_) => &[],
        }
    }
}

impl<R, E> fmt::Display for PartialReduce<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reduction failed: {}", self.error)
    }
}

impl<R, E> StdError for PartialReduce<R, E>
where
    R: fmt::Debug,
    E: fmt::Debug + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}
