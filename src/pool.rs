use {
    super::{
        context::Context,
        error::{Cancelled, PoolError},
        mapper::Mapper,
    },
    crossbeam_channel::{select, Receiver, Sender},
    crossbeam_utils::sync::WaitGroup,
    parking_lot::Mutex,
    std::{fmt, num::NonZeroUsize, thread},
    tracing::{debug, error, trace},
};

/// Lifecycle state of a [`Pool`]. Transitions only move forward:
/// `New -> Started -> Stopped`, and `New -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    New,
    Started,
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::New => write!(f, "New"),
            Status::Started => write!(f, "Started"),
            Status::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Settings for building a [`Pool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    workers: usize,
    thread_name: String,
}

impl PoolConfig {
    /// Panics if `workers` is zero.
    pub fn new(workers: usize) -> PoolConfig {
        assert!(workers > 0, "worker count must be greater than 0");
        PoolConfig {
            workers,
            thread_name: "workpool".to_string(),
        }
    }

    /// Worker threads are named `{name}-{index}`.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> PoolConfig {
        self.thread_name = name.into();
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

impl Default for PoolConfig {
    /// One worker per available CPU.
    fn default() -> PoolConfig {
        PoolConfig::new(thread::available_parallelism().map_or(1, NonZeroUsize::get))
    }
}

// An item paired with the context it was submitted under.
struct Submission<I> {
    item: I,
    ctx: Context,
}

// Everything a worker needs, handed out once by `start`.
struct WorkerEnds<I, M: Mapper<I>> {
    mapper: M,
    input: Receiver<Submission<I>>,
    outputs: Sender<M::Out>,
    errors: Sender<M::Err>,
    drained: WaitGroup,
}

struct Lifecycle<I, M: Mapper<I>> {
    status: Status,
    input: Option<Sender<Submission<I>>>,
    ends: Option<WorkerEnds<I, M>>,
    // The pool's own output senders. Dropping them after the drain
    // barrier is what closes the output and error streams.
    sinks: Option<(Sender<M::Out>, Sender<M::Err>)>,
    drained: Option<WaitGroup>,
    // Held by the first `stop` until the streams are closed. Repeated
    // stops wait on `quiesced` for it to disconnect.
    quiesce: Option<Sender<()>>,
    quiesced: Receiver<()>,
}

/// Pool is a fixed set of worker threads applying a mapper to submitted
/// items. Successful outputs and mapping errors are published on two
/// separate streams, see [`Pool::outputs`] and [`Pool::errors`], in
/// completion order.
///
/// All channels have zero capacity: [`Pool::process`] blocks until a
/// worker takes the item, and a worker blocks until its result is taken.
/// A pool is single use, once stopped it accepts nothing.
pub struct Pool<I, M>
where
    M: Mapper<I>,
{
    workers: usize,
    thread_name: String,
    outputs: Receiver<M::Out>,
    errors: Receiver<M::Err>,
    lifecycle: Mutex<Lifecycle<I, M>>,
}

impl<I, M> Pool<I, M>
where
    M: Mapper<I>,
{
    /// Create a pool of `workers` threads. No thread is spawned until
    /// [`Pool::start`]. Panics if `workers` is zero.
    pub fn new(workers: usize, mapper: M) -> Pool<I, M> {
        Pool::with_config(PoolConfig::new(workers), mapper)
    }

    pub fn with_config(config: PoolConfig, mapper: M) -> Pool<I, M> {
        let (input, input_rx) = crossbeam_channel::bounded(0);
        let (outputs_tx, outputs) = crossbeam_channel::bounded(0);
        let (errors_tx, errors) = crossbeam_channel::bounded(0);
        let drained = WaitGroup::new();
        let (quiesce, quiesced) = crossbeam_channel::bounded(0);

        let ends = WorkerEnds {
            mapper,
            input: input_rx,
            outputs: outputs_tx.clone(),
            errors: errors_tx.clone(),
            drained: drained.clone(),
        };

        Pool {
            workers: config.workers,
            thread_name: config.thread_name,
            outputs,
            errors,
            lifecycle: Mutex::new(Lifecycle {
                status: Status::New,
                input: Some(input),
                ends: Some(ends),
                sinks: Some((outputs_tx, errors_tx)),
                drained: Some(drained),
                quiesce: Some(quiesce),
                quiesced,
            }),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn status(&self) -> Status {
        self.lifecycle.lock().status
    }

    /// Stream of successful outputs. Disconnects once the pool is stopped
    /// and every worker has exited.
    pub fn outputs(&self) -> &Receiver<M::Out> {
        &self.outputs
    }

    /// Stream of mapping errors, closed together with [`Pool::outputs`].
    pub fn errors(&self) -> &Receiver<M::Err> {
        &self.errors
    }

    /// Hand one item to the first available worker, blocking until one
    /// takes it. Before [`Pool::start`] this waits for the pool to start.
    ///
    /// Fails with [`PoolError::Closed`] once the pool is stopped or all of
    /// its workers have exited, and with [`PoolError::Cancelled`] if `ctx`
    /// is cancelled while waiting.
    pub fn process(&self, ctx: &Context, item: I) -> Result<(), PoolError> {
        let input = self.lifecycle.lock().input.clone().ok_or(PoolError::Closed)?;
        let submission = Submission {
            item,
            ctx: ctx.clone(),
        };
        select! {
            send(input, submission) -> res => res.map_err(|_| PoolError::Closed),
            recv(ctx.done()) -> _ => Err(PoolError::Cancelled(
                ctx.err().unwrap_or(Cancelled::Canceled),
            )),
        }
    }

    /// Stop the pool: close the input, wait for every worker to exit, then
    /// close the output and error streams. Blocks until the workers are
    /// gone, so results still in flight must be drained concurrently.
    ///
    /// Calling stop before start is allowed. Calling it again does nothing
    /// more, but still blocks until the first call has finished.
    pub fn stop(&self) {
        let taken = {
            let mut lc = self.lifecycle.lock();
            if lc.status == Status::Stopped {
                Err(lc.quiesced.clone())
            } else {
                lc.status = Status::Stopped;
                Ok((
                    lc.input.take(),
                    lc.ends.take(),
                    lc.sinks.take(),
                    lc.drained.take(),
                    lc.quiesce.take(),
                ))
            }
        };
        let (input, ends, sinks, drained, quiesce) = match taken {
            Ok(taken) => taken,
            Err(quiesced) => {
                // Nothing is ever sent, this returns once it disconnects.
                let _ = quiesced.recv();
                return;
            }
        };

        drop(input);
        drop(ends);
        if let Some(drained) = drained {
            drained.wait();
        }
        drop(sinks);
        drop(quiesce);
        debug!(workers = self.workers, "pool stopped");
    }
}

impl<I, M> Pool<I, M>
where
    I: Send + 'static,
    M: Mapper<I> + Clone + Send + 'static,
    M::Out: Send + 'static,
    M::Err: Send + 'static,
{
    /// Spawn the workers. They run until the input is closed by
    /// [`Pool::stop`] or `ctx` is cancelled.
    ///
    /// Starting a started or stopped pool does nothing.
    pub fn start(&self, ctx: &Context) {
        let ends = {
            let mut lc = self.lifecycle.lock();
            if lc.status != Status::New {
                return;
            }
            lc.status = Status::Started;
            lc.ends.take()
        };
        let ends = match ends {
            Some(ends) => ends,
            None => return,
        };

        for index in 0..self.workers {
            let worker = Worker {
                index,
                mapper: ends.mapper.clone(),
                ctx: ctx.clone(),
                input: ends.input.clone(),
                outputs: ends.outputs.clone(),
                errors: ends.errors.clone(),
                _drained: ends.drained.clone(),
            };
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.thread_name, index))
                .spawn(move || worker.run());
            if let Err(err) = spawned {
                error!(worker = index, %err, "failed to spawn pool worker");
            }
        }
        debug!(workers = self.workers, "pool started");
    }
}

impl<I, M> Drop for Pool<I, M>
where
    M: Mapper<I>,
{
    fn drop(&mut self) {
        let (input, ends, sinks, drained, quiesce) = {
            let lc = self.lifecycle.get_mut();
            lc.status = Status::Stopped;
            (
                lc.input.take(),
                lc.ends.take(),
                lc.sinks.take(),
                lc.drained.take(),
                lc.quiesce.take(),
            )
        };
        drop(input);
        drop(ends);
        drop(sinks);

        // Nobody else can read the streams anymore, discard what the
        // remaining workers publish until they are all gone.
        let closed_outputs = crossbeam_channel::never();
        let closed_errors = crossbeam_channel::never();
        let mut outputs = &self.outputs;
        let mut errors = &self.errors;
        let (mut outputs_open, mut errors_open) = (true, true);
        while outputs_open || errors_open {
            select! {
                recv(outputs) -> msg => {
                    if msg.is_err() {
                        outputs_open = false;
                        outputs = &closed_outputs;
                    }
                },
                recv(errors) -> msg => {
                    if msg.is_err() {
                        errors_open = false;
                        errors = &closed_errors;
                    }
                },
            }
        }
        if let Some(drained) = drained {
            drained.wait();
        }
        drop(quiesce);
    }
}

#[derive(Debug)]
enum Exit {
    InputClosed,
    Cancelled,
    Disconnected,
}

struct Worker<I, M: Mapper<I>> {
    index: usize,
    mapper: M,
    ctx: Context,
    input: Receiver<Submission<I>>,
    outputs: Sender<M::Out>,
    errors: Sender<M::Err>,
    // Released on drop, whichever way run returns.
    _drained: WaitGroup,
}

impl<I, M: Mapper<I>> Worker<I, M> {
    fn run(mut self) {
        let exit = self.work();
        trace!(worker = self.index, ?exit, "worker exited");
    }

    fn work(&mut self) -> Exit {
        loop {
            let next = select! {
                recv(self.input) -> msg => msg.map_err(|_| Exit::InputClosed),
                recv(self.ctx.done()) -> _ => Err(Exit::Cancelled),
            };
            let submission = match next {
                Ok(submission) => submission,
                Err(exit) => return exit,
            };

            match self.mapper.apply(&submission.ctx, submission.item) {
                Ok(out) => {
                    if let Err(exit) = publish(&self.ctx, &self.outputs, out) {
                        return exit;
                    }
                }
                Err(err) => {
                    // Once cancelled no consumer is guaranteed to be
                    // draining errors.
                    if self.ctx.is_done() {
                        return Exit::Cancelled;
                    }
                    if let Err(exit) = publish(&self.ctx, &self.errors, err) {
                        return exit;
                    }
                }
            }
        }
    }
}

// Blocking handoff of one result, abandoned only if `ctx` is cancelled
// or the stream has no reader left.
fn publish<T>(ctx: &Context, tx: &Sender<T>, value: T) -> Result<(), Exit> {
    select! {
        send(tx, value) -> res => res.map_err(|_| Exit::Disconnected),
        recv(ctx.done()) -> _ => Err(Exit::Cancelled),
    }
}
