//! Ambient reentrancy context: tracks the canonical resource form currently
//! held by the logical caller, so nested acquisitions of the *same*
//! resources can bypass the store entirely.
//!
//! Built on [`tokio::task_local`], which shadows the outer value for the
//! duration of a scope and restores it on every exit path -- return,
//! unwind, or cancellation -- without leaking across sibling tasks that
//! happen to share an OS thread.

tokio::task_local! {
    static FRAME: String;
}

/// Returns `true` iff the current task is running inside a held lock's
/// body (at any nesting depth).
pub fn is_inside_lock() -> bool {
    FRAME.try_with(|_| ()).is_ok()
}

/// Returns the canonical resource form of the innermost held frame, or
/// `None` if the current task holds no lock.
pub fn current_resources() -> Option<String> {
    FRAME.try_with(|frame| frame.clone()).ok()
}

/// Pushes a new frame naming `canonical_form`, runs `body` to completion,
/// and pops the frame on every exit path.
pub async fn run_with_frame<F, T>(canonical_form: String, body: F) -> T
where
    F: std::future::Future<Output = T>,
{
    FRAME.scope(canonical_form, body).await
}
