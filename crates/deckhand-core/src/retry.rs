//! Bounded retry for transiently-retryable operations.
//!
//! Used for SQLite lock contention during backups. `max_retries` counts
//! retries after the first attempt: `0` means one attempt total, `2` means
//! up to three. Delay grows linearly from the base.

use std::time::Duration;

pub fn with_retry<T, E>(
    max_retries: u32,
    base_delay: Duration,
    is_transient: impl Fn(&E) -> bool,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && is_transient(&e) => {
                attempt += 1;
                tracing::warn!("transient failure, retry {attempt}/{max_retries}");
                std::thread::sleep(base_delay * attempt);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result: Result<i32, &str> = with_retry(
            3,
            Duration::from_millis(1),
            |_| true,
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err("busy")
                } else {
                    Ok(42)
                }
            },
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = with_retry(
            0,
            Duration::from_millis(1),
            |_| true,
            || {
                calls.set(calls.get() + 1);
                Err("busy")
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn non_transient_errors_fail_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = with_retry(
            5,
            Duration::from_millis(1),
            |e| *e == "busy",
            || {
                calls.set(calls.get() + 1);
                Err("corrupt")
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn gives_up_after_budget() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = with_retry(
            2,
            Duration::from_millis(1),
            |_| true,
            || {
                calls.set(calls.get() + 1);
                Err("busy")
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }
}
