use std::cell::Cell;

thread_local! {
    static GRAD_MODE: Cell<bool> = const { Cell::new(true) };
}

/// Per-thread switch for recording backward functions.
pub struct GradMode;

impl GradMode {
    pub fn is_enabled() -> bool {
        GRAD_MODE.with(|m| m.get())
    }

    pub fn set_enabled(enabled: bool) {
        GRAD_MODE.with(|m| m.set(enabled));
    }
}

/// Sets the grad mode for the current thread and restores the previous value on drop.
pub struct AutoGradMode {
    prev_enabled: bool,
}

impl AutoGradMode {
    pub fn new(enabled: bool) -> Self {
        let prev_enabled = GradMode::is_enabled();
        GradMode::set_enabled(enabled);
        Self { prev_enabled }
    }
}

impl Drop for AutoGradMode {
    fn drop(&mut self) {
        GradMode::set_enabled(self.prev_enabled);
    }
}

pub fn no_grad() -> AutoGradMode {
    AutoGradMode::new(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_mode() {
        assert!(GradMode::is_enabled());
        {
            let _outer = no_grad();
            assert!(!GradMode::is_enabled());
            {
                let _inner = AutoGradMode::new(true);
                assert!(GradMode::is_enabled());
            }
            assert!(!GradMode::is_enabled());
        }
        assert!(GradMode::is_enabled());
    }

    #[test]
    fn mode_is_thread_local() {
        let _guard = no_grad();
        let other = std::thread::spawn(GradMode::is_enabled).join().unwrap();
        assert!(other);
        assert!(!GradMode::is_enabled());
    }
}
