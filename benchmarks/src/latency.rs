use std::time::Instant;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LatencyOptions {
    pub iterations: usize,
    pub skip: usize,
    #[serde(default)]
    pub warmup_validation: usize,
    pub min_size: usize,
    pub max_size: usize,
}

/// Generic latency benchmark function.
///
/// The `prepare` callback is used to prepare data for an iteration. The
/// `body0` and `body1` callbacks are called on rank 0 and 1 of the
/// communicator respectively. Only rank 0 reports results, as pairs of
/// message size and one-way latency in microseconds.
pub fn latency<T, P, B0, B1, E>(
    opts: &LatencyOptions,
    rank: i32,
    prepare: P,
    body0: B0,
    body1: B1,
) -> Result<Vec<(usize, f32)>, E>
where
    P: Fn(usize) -> T,
    B0: Fn(&T) -> Result<(), E>,
    B1: Fn(&T) -> Result<(), E>,
{
    let mut results = vec![];
    let mut size = opts.min_size.max(1);
    while size <= opts.max_size {
        let mut total_time = 0.0;
        let data = prepare(size);
        for i in 0..opts.iterations + opts.skip {
            for j in 0..=opts.warmup_validation {
                if rank == 0 {
                    let start = Instant::now();
                    body0(&data)?;
                    if i >= opts.skip && j == opts.warmup_validation {
                        total_time += start.elapsed().as_secs_f32();
                    }
                } else {
                    body1(&data)?;
                }
            }
        }
        if rank == 0 && opts.iterations > 0 {
            let latency = (total_time * 1.0e6) / (2.0 * opts.iterations as f32);
            results.push((size, latency));
        }
        size *= 2;
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use super::*;

    fn opts() -> LatencyOptions {
        LatencyOptions {
            iterations: 3,
            skip: 1,
            warmup_validation: 1,
            min_size: 2,
            max_size: 16,
        }
    }

    #[test]
    fn sizes_double_and_only_rank_zero_reports() {
        let calls = Cell::new(0);
        let body = |_: &usize| -> Result<(), ()> {
            calls.set(calls.get() + 1);
            Ok(())
        };
        let results = latency(&opts(), 0, |size| size, body, body).unwrap();
        let sizes: Vec<usize> = results.iter().map(|(size, _)| *size).collect();
        assert_eq!(sizes, vec![2, 4, 8, 16]);
        // 4 sizes, 4 iterations each, 2 round trips per iteration
        assert_eq!(calls.get(), 32);

        let results = latency(&opts(), 1, |size| size, body, body).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn body_errors_stop_the_run() {
        let failing = |_: &usize| Err("peer went away");
        let result = latency(&opts(), 0, |size| size, failing, failing);
        assert_eq!(result, Err("peer went away"));
    }
}
