use super::context::Context;

/// Mapper is a type that can map values from In to Out, or fail with Err.
/// You can implement this trait to run a pool over types other than closures.
///
/// Mapper is essentially `FnMut(&Context, In) -> Result<Out, Err>`,
/// but users can implement it without experimental features.
/// Each worker thread owns its own clone of the mapper.
pub trait Mapper<In> {
    /// The output type.
    type Out;
    /// The error type of a failed mapping.
    type Err;
    /// Run the mapping function converting In to Out. The context is the
    /// one the item was submitted with.
    fn apply(&mut self, ctx: &Context, v: In) -> Result<Self::Out, Self::Err>;
}

impl<A, B, E, F> Mapper<A> for F
where
    F: FnMut(&Context, A) -> Result<B, E>,
{
    type Out = B;
    type Err = E;

    fn apply(&mut self, ctx: &Context, x: A) -> Result<B, E> {
        self(ctx, x)
    }
}

/// Adapts a closure that does not look at the submission context.
/// Created with [`plain`].
#[derive(Clone, Copy, Debug)]
pub struct Plain<F>(F);

/// Wrap `f` so it can be used as a [`Mapper`] without taking a context.
pub fn plain<F>(f: F) -> Plain<F> {
    Plain(f)
}

impl<A, B, E, F> Mapper<A> for Plain<F>
where
    F: FnMut(A) -> Result<B, E>,
{
    type Out = B;
    type Err = E;

    fn apply(&mut self, _ctx: &Context, x: A) -> Result<B, E> {
        (self.0)(x)
    }
}
