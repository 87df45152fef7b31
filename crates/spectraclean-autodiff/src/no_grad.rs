use std::cell::Cell;

thread_local! {
    /// Whether ops on this thread record nodes on the graph.
    static IS_GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Run `f` without recording any graph nodes.
///
/// Used for validation passes and inference, where no backward pass follows.
/// The previous state is restored afterwards, so calls nest.
pub fn with_no_grad<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = NoGradGuard {
        prev: IS_GRAD_ENABLED.with(|flag| flag.replace(false)),
    };
    f()
}

/// Puts the previous flag back on drop, including during unwinding.
struct NoGradGuard {
    prev: bool,
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        IS_GRAD_ENABLED.with(|flag| flag.set(self.prev));
    }
}

/// Returns whether gradient tracking is active on this thread.
pub fn is_grad_enabled() -> bool {
    IS_GRAD_ENABLED.with(|flag| flag.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_grad_restores_flag() {
        assert!(is_grad_enabled());
        with_no_grad(|| {
            assert!(!is_grad_enabled());
            with_no_grad(|| assert!(!is_grad_enabled()));
            assert!(!is_grad_enabled());
        });
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_panic_inside_no_grad_restores_flag() {
        let result = std::panic::catch_unwind(|| with_no_grad(|| panic!("forward failed")));
        assert!(result.is_err());
        assert!(is_grad_enabled());
    }
}
