//! Per-task execution boundary.
//!
//! Handler panics are caught here and turned into a [`Fault`] carrying the
//! panic message and the backtrace captured at the panic site, so the worker
//! loop can report a failure and carry on.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use futures::FutureExt;

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Chain a panic hook that stores the backtrace of the panicking thread.
///
/// The previously installed hook still runs afterwards.
fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

/// A panic caught at the execution boundary.
#[derive(Debug, Clone)]
pub struct Fault {
    pub message: String,
    pub backtrace: String,
}

impl Fault {
    /// Error message reported to the engine.
    pub fn failure_message(&self) -> String {
        format!("fatal error in task: {}", self.message)
    }

    /// Error details reported to the engine.
    pub fn failure_details(&self) -> String {
        format!(
            "fatal error in task: {}\nStack trace:\n{}",
            self.message, self.backtrace
        )
    }
}

/// Drive `future` to completion, converting a panic into a [`Fault`].
pub async fn contain<F, T>(future: F) -> Result<T, Fault>
where
    F: Future<Output = T>,
{
    install_hook();

    // A poll can run on any runtime thread, so the slot is cleared before
    // each one. Whatever it holds after a panic then belongs to that poll.
    let mut future = std::pin::pin!(future);
    let polled = futures::future::poll_fn(move |cx| {
        LAST_BACKTRACE.with(|slot| slot.borrow_mut().take());
        future.as_mut().poll(cx)
    });

    match AssertUnwindSafe(polled).catch_unwind().await {
        Ok(value) => Ok(value),
        Err(payload) => {
            // empty when the unwind skipped the hook, e.g. resume_unwind
            let backtrace = LAST_BACKTRACE
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| Backtrace::force_capture().to_string());
            Err(Fault {
                message: panic_message(payload.as_ref()),
                backtrace,
            })
        }
    }
}

/// Text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
