use {
    super::{
        context::Context,
        error::{Cancelled, CompositeError, PartialReduce, ReduceError},
        mapper::Mapper,
        pool::Pool,
    },
    crossbeam_channel::select,
    std::thread,
    tracing::debug,
};

enum Event<O, E> {
    Output(O),
    Error(E),
    OutputsClosed,
    ErrorsClosed,
    Cancelled,
}

/// Fold the outputs of `pool` into `seed` with `reducer` until the pool's
/// streams are closed by [`Pool::stop`], collecting every mapping error.
///
/// Cancellation of `ctx` ends the run at once with the accumulator folded
/// so far and [`ReduceError::Cancelled`]; mapping errors collected up to
/// that point are discarded. Otherwise any mapping error turns the result
/// into [`ReduceError::Composite`], still carrying the full accumulator.
///
/// Outputs are folded in completion order, so `reducer` should not depend
/// on the order of items.
pub fn reduce<I, M, R, F>(
    ctx: &Context,
    pool: &Pool<I, M>,
    mut reducer: F,
    seed: R,
) -> Result<R, PartialReduce<R, M::Err>>
where
    M: Mapper<I>,
    F: FnMut(R, M::Out) -> R,
{
    let closed_outputs = crossbeam_channel::never();
    let closed_errors = crossbeam_channel::never();
    let mut outputs = pool.outputs();
    let mut errors_rx = pool.errors();
    let (mut outputs_open, mut errors_open) = (true, true);

    let mut acc = seed;
    let mut folded = 0usize;
    let mut errors = Vec::new();

    while outputs_open || errors_open {
        let event = select! {
            recv(outputs) -> msg => msg.map_or(Event::OutputsClosed, Event::Output),
            recv(errors_rx) -> msg => msg.map_or(Event::ErrorsClosed, Event::Error),
            recv(ctx.done()) -> _ => Event::Cancelled,
        };
        match event {
            Event::Output(out) => {
                acc = reducer(acc, out);
                folded += 1;
            }
            Event::Error(err) => errors.push(err),
            Event::OutputsClosed => {
                outputs_open = false;
                outputs = &closed_outputs;
            }
            Event::ErrorsClosed => {
                errors_open = false;
                errors_rx = &closed_errors;
            }
            Event::Cancelled => break,
        }
    }

    // A cancelled run reports the cancellation even if the streams
    // happened to close first.
    if let Some(reason) = ctx.err() {
        debug!(%reason, folded, dropped_errors = errors.len(), "reduction cancelled");
        return Err(cancelled(acc, reason));
    }

    debug!(folded, errors = errors.len(), "reduction finished");
    if errors.is_empty() {
        Ok(acc)
    } else {
        Err(PartialReduce {
            acc,
            error: ReduceError::Composite(CompositeError::new(errors)),
        })
    }
}

fn cancelled<R, E>(acc: R, reason: Cancelled) -> PartialReduce<R, E> {
    PartialReduce {
        acc,
        error: ReduceError::Cancelled(reason),
    }
}

/// Map every item with a pool of `concurrency` workers and fold the
/// outputs into `seed`.
///
/// Items are submitted from a separate thread while the calling thread
/// reduces. Submission stops early when `ctx` is cancelled, and the pool
/// is always stopped once submission ends. The call returns only after
/// every worker has exited. See [`reduce`] for the shape of the result.
///
/// Panics if `concurrency` is zero.
pub fn map_reduce<T, M, R, F>(
    ctx: &Context,
    concurrency: usize,
    items: T,
    mapper: M,
    reducer: F,
    seed: R,
) -> Result<R, PartialReduce<R, M::Err>>
where
    T: IntoIterator,
    T::IntoIter: Send,
    T::Item: Send + 'static,
    M: Mapper<T::Item> + Clone + Send + 'static,
    M::Out: Send + 'static,
    M::Err: Send + 'static,
    F: FnMut(R, M::Out) -> R,
{
    let pool: Pool<T::Item, M> = Pool::new(concurrency, mapper);
    pool.start(ctx);
    let items = items.into_iter();

    thread::scope(|s| {
        s.spawn(|| submit(ctx, &pool, items));
        reduce(ctx, &pool, reducer, seed)
    })
}

fn submit<I, M, It>(ctx: &Context, pool: &Pool<I, M>, items: It)
where
    M: Mapper<I>,
    It: Iterator<Item = I>,
{
    let mut submitted = 0usize;
    for item in items {
        if ctx.is_done() {
            break;
        }
        if let Err(err) = pool.process(ctx, item) {
            debug!(%err, submitted, "submission stopped early");
            break;
        }
        submitted += 1;
    }
    pool.stop();
}

/// MapReduce can be imported to add the map_reduce function to anything
/// that can be iterated, such as a `Vec` of inputs.
pub trait MapReduce<M, R, F>
where
    Self: IntoIterator,
    Self::IntoIter: Send,
    Self::Item: Send + 'static,
    M: Mapper<Self::Item> + Clone + Send + 'static,
    M::Out: Send + 'static,
    M::Err: Send + 'static,
    F: FnMut(R, M::Out) -> R,
{
    /// Panics if `concurrency` is zero.
    fn map_reduce(
        self,
        ctx: &Context,
        mapper: M,
        reducer: F,
        seed: R,
        concurrency: usize,
    ) -> Result<R, PartialReduce<R, M::Err>>;
}

impl<T, M, R, F> MapReduce<M, R, F> for T
where
    T: IntoIterator,
    T::IntoIter: Send,
    T::Item: Send + 'static,
    M: Mapper<T::Item> + Clone + Send + 'static,
    M::Out: Send + 'static,
    M::Err: Send + 'static,
    F: FnMut(R, M::Out) -> R,
{
    fn map_reduce(
        self,
        ctx: &Context,
        mapper: M,
        reducer: F,
        seed: R,
        concurrency: usize,
    ) -> Result<R, PartialReduce<R, M::Err>> {
        assert!(concurrency > 0, "concurrency must be greater than 0");
        map_reduce(ctx, concurrency, self, mapper, reducer, seed)
    }
}
