//! Fixed-size pool for inference engines that are not thread-safe
//!
//! Engines are checked out under a semaphore and run on the blocking
//! thread pool; the semaphore size bounds concurrent inference globally.
//! Panics inside an engine call are caught so the engine returns to the
//! pool and the caller sees an error instead of a shrinking pool.

use crate::error::{Error, Result};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

pub struct EnginePool<T: ?Sized + Send + 'static> {
    slots: Arc<Mutex<Vec<Box<T>>>>,
    semaphore: Arc<Semaphore>,
}

impl<T: ?Sized + Send + 'static> EnginePool<T> {
    pub fn new(engines: Vec<Box<T>>) -> Self {
        let size = engines.len();
        Self {
            slots: Arc::new(Mutex::new(engines)),
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }

    /// Check out an engine, run `f` on a blocking thread, return it
    pub async fn run<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let permit = self.semaphore.acquire().await.unwrap();

        let mut engine = {
            let mut slots = self.slots.lock().await;
            // The permit guarantees a free slot
            slots.pop().unwrap()
        };

        let slots = self.slots.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            // Catch engine panics so the engine itself survives the call
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(&mut *engine)));
            (engine, result)
        })
        .await;

        match outcome {
            Ok((engine, result)) => {
                // Return the slot before the permit is released
                slots.lock().await.push(engine);
                result.unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(message, "Inference call panicked");
                    Err(Error::Internal(format!("inference panicked: {message}")))
                })
            }
            Err(e) => {
                // The closure never completed and the engine is gone;
                // retire the permit so the pool cannot over-draw its slots
                permit.forget();
                Err(Error::Internal(format!("inference task failed: {e}")))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Counter: Send {
        fn bump(&mut self) -> u32;
    }

    struct SimpleCounter(u32);

    impl Counter for SimpleCounter {
        fn bump(&mut self) -> u32 {
            self.0 += 1;
            self.0
        }
    }

    #[tokio::test]
    async fn test_engine_state_persists_across_checkouts() {
        let pool: EnginePool<dyn Counter> = EnginePool::new(vec![Box::new(SimpleCounter(0))]);
        let first = pool.run(|c| Ok(c.bump())).await.unwrap();
        let second = pool.run(|c| Ok(c.bump())).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_panicking_call_surfaces_error_and_keeps_engine() {
        let pool: EnginePool<dyn Counter> = EnginePool::new(vec![Box::new(SimpleCounter(0))]);

        let result = pool
            .run(|_c| -> Result<u32> { panic!("tensor index out of range") })
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("tensor index out of range"));

        // The single engine came back; later calls still run on it
        let value = pool.run(|c| Ok(c.bump())).await.unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_repeated_panics_do_not_shrink_pool() {
        let engines: Vec<Box<dyn Counter>> =
            vec![Box::new(SimpleCounter(0)), Box::new(SimpleCounter(100))];
        let pool = Arc::new(EnginePool::new(engines));

        for _ in 0..5 {
            let _ = pool
                .run(|_c| -> Result<u32> { panic!("boom") })
                .await;
        }

        // Both slots still serve concurrent callers
        let (a, b) = tokio::join!(
            pool.run(|c| {
                std::thread::sleep(std::time::Duration::from_millis(50));
                Ok(c.bump())
            }),
            pool.run(|c| {
                std::thread::sleep(std::time::Duration::from_millis(50));
                Ok(c.bump())
            })
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_runs_bounded_by_pool_size() {
        let engines: Vec<Box<dyn Counter>> =
            vec![Box::new(SimpleCounter(0)), Box::new(SimpleCounter(100))];
        let pool = Arc::new(EnginePool::new(engines));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.run(|c| Ok(c.bump())).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Hold both engines concurrently; the sleep forces the two calls
        // onto distinct slots, so their counts cover all 10 bumps.
        let (a, b) = tokio::join!(
            pool.run(|c| {
                std::thread::sleep(std::time::Duration::from_millis(50));
                Ok(c.bump())
            }),
            pool.run(|c| {
                std::thread::sleep(std::time::Duration::from_millis(50));
                Ok(c.bump())
            })
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a % 100 + b % 100, 10);
    }
}
