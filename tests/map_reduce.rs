use {
    crossbeam_channel::select,
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    },
    thiserror::Error,
    workpool::{map_reduce, plain, Cancelled, Context, MapReduce},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot convert {0:?}")]
struct ConversionError(String);

fn strings(n: usize) -> Vec<String> {
    (0..n).map(|i| i.to_string()).collect()
}

fn sum(acc: i64, n: i64) -> i64 {
    acc + n
}

// Fails on the value `bad`, and on anything that is not a number.
fn parse_except(bad: i64) -> impl Fn(&Context, String) -> Result<i64, ConversionError> + Clone {
    move |_: &Context, s: String| match s.parse::<i64>() {
        Ok(n) if n != bad => Ok(n),
        _ => Err(ConversionError(s)),
    }
}

#[test]
fn test_sum_with_one_failure() {
    let res = map_reduce(
        &Context::background(),
        1,
        strings(10),
        parse_except(5),
        sum,
        0,
    );

    let failed = res.unwrap_err();
    assert_eq!(failed.cancelled(), None);
    assert_eq!(failed.errors(), &[ConversionError("5".to_string())]);
    assert_eq!(failed.acc, 40);
}

#[test]
fn test_all_items_fail() {
    let items = vec![String::new(); 100_000];
    let reducer_called = AtomicBool::new(false);

    let res = map_reduce(
        &Context::background(),
        100,
        items,
        parse_except(-1),
        |acc: i64, n: i64| {
            reducer_called.store(true, Ordering::SeqCst);
            acc + n
        },
        0,
    );

    let failed = res.unwrap_err();
    assert_eq!(failed.errors().len(), 100_000);
    assert_eq!(failed.acc, 0);
    assert!(!reducer_called.load(Ordering::SeqCst));
}

#[test]
fn test_all_items_fail_single_worker() {
    let items = vec![String::new(); 1000];
    let failed = items
        .map_reduce(&Context::background(), parse_except(-1), sum, 0, 1)
        .unwrap_err();
    assert_eq!(failed.errors().len(), 1000);
    assert_eq!(failed.error.to_string(), "1000 errors while reducing");
}

#[test]
fn test_many_items_many_workers() {
    let items: Vec<i64> = (0..100_000).collect();
    let res = map_reduce(
        &Context::background(),
        64,
        items,
        plain(|n: i64| if n == 1 { Err(n) } else { Ok(n.to_string()) }),
        |acc: usize, s: String| acc + s.len(),
        0,
    );

    let failed = res.unwrap_err();
    assert_eq!(failed.errors(), &[1]);
    let digits: usize = (0..100_000i64)
        .filter(|n| *n != 1)
        .map(|n| n.to_string().len())
        .sum();
    assert_eq!(failed.acc, digits);
}

#[test]
fn test_timeout_stops_unfinished_work() {
    let work = Duration::from_millis(10);
    let completed = Arc::new(AtomicBool::new(false));

    let mapper = {
        let completed = completed.clone();
        move |ctx: &Context, n: i64| {
            select! {
                recv(crossbeam_channel::after(work)) -> _ => {
                    completed.store(true, Ordering::SeqCst);
                    Ok(n * 10)
                },
                recv(ctx.done()) -> _ => Err(ctx.err()),
            }
        }
    };

    let ctx = Context::background().with_timeout(work / 10);
    let res = map_reduce(&ctx, 3, vec![0, 1, 2, 3, 4, 5, 6], mapper, sum, 0);

    // Give any worker that escaped cancellation time to finish.
    thread::sleep(work * 10);

    assert_eq!(res.unwrap_err().cancelled(), Some(Cancelled::DeadlineExceeded));
    assert!(!completed.load(Ordering::SeqCst));
}

#[test]
fn test_cancel_after_work_started() {
    let (started_tx, started) = crossbeam_channel::unbounded();
    let completed = Arc::new(AtomicBool::new(false));

    let mapper = {
        let completed = completed.clone();
        move |ctx: &Context, n: i64| {
            let _ = started_tx.send(n);
            select! {
                recv(crossbeam_channel::after(Duration::from_secs(10))) -> _ => {
                    completed.store(true, Ordering::SeqCst);
                    Ok(n)
                },
                recv(ctx.done()) -> _ => Err(ctx.err()),
            }
        }
    };

    let ctx = Context::background();
    let canceller = ctx.clone();
    let res = thread::scope(|s| {
        s.spawn(move || {
            // Cancel only once some worker has picked up an item.
            if started.recv().is_ok() {
                canceller.cancel();
            }
        });
        map_reduce(&ctx, 3, 0..7i64, mapper, sum, 0)
    });

    assert_eq!(res.unwrap_err().cancelled(), Some(Cancelled::Canceled));
    assert!(!completed.load(Ordering::SeqCst));
}

#[test]
fn test_cancellation_wins_over_collected_errors() {
    // The first items fail at once, the rest wait for the deadline.
    let mapper = |ctx: &Context, n: i64| {
        if n >= 10 {
            let _ = ctx.done().recv();
        }
        Err::<i64, _>(n)
    };

    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let failed = map_reduce(&ctx, 4, 0..20i64, mapper, sum, 0).unwrap_err();

    assert_eq!(failed.cancelled(), Some(Cancelled::DeadlineExceeded));
    assert!(failed.errors().is_empty());
    assert_eq!(failed.error.to_string(), "context deadline exceeded");
}

#[test]
fn test_explicit_cancel_mid_run() {
    let ctx = Context::background();
    let canceller = ctx.clone();

    let mapper = move |item_ctx: &Context, n: i64| {
        if n == 100 {
            canceller.cancel();
        }
        if item_ctx.is_done() {
            return Err(n);
        }
        Ok(n)
    };

    let failed = map_reduce(&ctx, 4, 0..10_000i64, mapper, sum, 0).unwrap_err();
    assert_eq!(failed.cancelled(), Some(Cancelled::Canceled));
    assert!(failed.acc < (0..10_000i64).sum::<i64>());
}

#[test]
fn test_already_cancelled_context() {
    let ctx = Context::background();
    ctx.cancel();
    let failed = map_reduce(&ctx, 2, strings(100), parse_except(-1), sum, 7).unwrap_err();
    assert_eq!(failed.cancelled(), Some(Cancelled::Canceled));
    assert!(failed.acc >= 7);
}

#[test]
fn test_empty_input() {
    let res = map_reduce(
        &Context::background(),
        8,
        Vec::<String>::new(),
        parse_except(-1),
        sum,
        42,
    );
    assert_eq!(res, Ok(42));
}
