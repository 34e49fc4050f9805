//! Bounded worker pool with a cancellable map-reduce over its results.
//!
//! A [`Pool`] runs a fixed number of worker threads that apply a
//! [`Mapper`] to submitted items. Successful outputs and mapping errors
//! come out on two separate streams in completion order. [`reduce`] folds
//! those streams into a single accumulator while collecting every error,
//! and [`map_reduce`] wires submission and reduction together.
//!
//! Every run is governed by a [`Context`]: cancelling it, or letting its
//! deadline pass, stops the workers and ends the reduction with the
//! accumulator folded so far.
//!
//! # Examples
//!
//! Summing numbers parsed from strings, keeping track of failures:
//! ```
//! use workpool::{map_reduce, Context};
//!
//! let items: Vec<String> = (0..10).map(|i| i.to_string()).chain(Some("x".into())).collect();
//! let res = map_reduce(
//!     &Context::background(),
//!     4,
//!     items,
//!     |_: &Context, s: String| s.parse::<i64>(),
//!     |acc: i64, n: i64| acc + n,
//!     0,
//! );
//!
//! let failed = res.unwrap_err();
//! assert_eq!(failed.acc, 45);
//! assert_eq!(failed.errors().len(), 1);
//! assert_eq!(failed.error.to_string(), "1 errors while reducing");
//! ```
//!
//! Driving a pool by hand:
//! ```
//! use std::{convert::Infallible, thread};
//! use workpool::{reduce, Context, Pool, Status};
//!
//! let ctx = Context::background();
//! let pool = Pool::new(3, |_: &Context, x: u64| Ok::<_, Infallible>(x * x));
//! pool.start(&ctx);
//!
//! let sum = thread::scope(|s| {
//!     s.spawn(|| {
//!         for i in 0..10 {
//!             pool.process(&ctx, i).unwrap();
//!         }
//!         pool.stop();
//!     });
//!     reduce(&ctx, &pool, |acc: u64, x: u64| acc + x, 0)
//! });
//!
//! assert_eq!(sum, Ok(285));
//! assert_eq!(pool.status(), Status::Stopped);
//! ```
//!
//! Reducing a collection with the extension trait, under a deadline:
//! ```
//! use std::{convert::Infallible, time::Duration};
//! use workpool::{Context, MapReduce};
//!
//! let ctx = Context::background().with_timeout(Duration::from_secs(30));
//! let longest = vec!["a", "abc", "ab"].map_reduce(
//!     &ctx,
//!     |_: &Context, w: &'static str| Ok::<_, Infallible>(w.len()),
//!     |acc: usize, n: usize| acc.max(n),
//!     0,
//!     2,
//! );
//! assert_eq!(longest, Ok(3));
//! ```

mod context;
mod error;
mod mapper;
mod pool;
mod reduce;

pub use context::*;
pub use error::*;
pub use mapper::*;
pub use pool::*;
pub use reduce::*;
