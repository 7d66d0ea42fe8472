//! Cooperative handling of SIGINT around blocking control utility calls.
//!
//! While a guarded unit of work runs, SIGINT does not terminate this process.
//! The signal is recorded instead and reported once the work returns. The
//! child process is never killed from here; it receives the terminal's
//! SIGINT on its own and decides how to exit. Outside guarded work SIGINT
//! keeps its default action.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use signal_hook::consts::SIGINT;
use signal_hook::SigId;
use tracing::warn;

/// Set while no guard is active. Unregistering our flag does not restore the
/// default SIGINT action, so a conditional default handler stands in for it.
fn default_action_enabled() -> Option<&'static Arc<AtomicBool>> {
    static ENABLED: OnceLock<Option<Arc<AtomicBool>>> = OnceLock::new();
    ENABLED
        .get_or_init(|| {
            let enabled = Arc::new(AtomicBool::new(true));
            match signal_hook::flag::register_conditional_default(SIGINT, Arc::clone(&enabled)) {
                Ok(_) => Some(enabled),
                Err(e) => {
                    warn!("Failed to install default SIGINT handler: {}", e);
                    None
                }
            }
        })
        .as_ref()
}

/// SIGINT registration that lives exactly as long as the guarded work.
struct Registration {
    id: Option<SigId>,
    default_action: Option<&'static Arc<AtomicBool>>,
}

impl Registration {
    /// Without the default handler in place, the flag handler is not
    /// installed either: its registration would outlive the guard and leave
    /// SIGINT ignored for the rest of the process.
    fn install(
        tripped: &Arc<AtomicBool>,
        default_action: Option<&'static Arc<AtomicBool>>,
    ) -> Self {
        let Some(enabled) = default_action else {
            warn!("SIGINT handling unavailable, interrupts will not be observed");
            return Self {
                id: None,
                default_action: None,
            };
        };

        enabled.store(false, Ordering::SeqCst);
        match signal_hook::flag::register(SIGINT, Arc::clone(tripped)) {
            Ok(id) => Self {
                id: Some(id),
                default_action,
            },
            Err(e) => {
                warn!(
                    "Failed to register SIGINT handler, interrupts will not be observed: {}",
                    e
                );
                enabled.store(true, Ordering::SeqCst);
                Self {
                    id: None,
                    default_action: None,
                }
            }
        }
    }

    #[cfg(test)]
    fn is_active(&self) -> bool {
        self.id.is_some()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            signal_hook::low_level::unregister(id);
        }
        if let Some(enabled) = self.default_action.take() {
            enabled.store(true, Ordering::SeqCst);
        }
    }
}

/// Run `work` with SIGINT observation enabled.
///
/// `on_interrupt` fires after `work` returns if SIGINT was delivered while
/// it was in flight. The signal registration is removed on every exit path,
/// unwinding included.
pub fn guard<T, W, F>(work: W, on_interrupt: F) -> T
where
    W: FnOnce() -> T,
    F: FnOnce(),
{
    let tripped = Arc::new(AtomicBool::new(false));
    let registration = Registration::install(&tripped, default_action_enabled());
    let result = work();
    drop(registration);

    if tripped.load(Ordering::SeqCst) {
        on_interrupt();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_guard_returns_work_result() {
        let fired = Cell::new(false);
        let value = guard(|| 42, || fired.set(true));
        assert_eq!(value, 42);
        assert!(!fired.get());
    }

    #[test]
    fn test_no_flag_handler_without_default_handler() {
        let tripped = Arc::new(AtomicBool::new(false));
        let registration = Registration::install(&tripped, None);
        assert!(!registration.is_active());
    }

    #[test]
    fn test_default_action_restored_after_registration() {
        static ENABLED: OnceLock<Arc<AtomicBool>> = OnceLock::new();
        let enabled = ENABLED.get_or_init(|| Arc::new(AtomicBool::new(true)));
        let tripped = Arc::new(AtomicBool::new(false));

        let registration = Registration::install(&tripped, Some(enabled));
        assert!(registration.is_active());
        assert!(!enabled.load(Ordering::SeqCst));

        drop(registration);
        assert!(enabled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_guard_removes_registration_on_panic() {
        let result = std::panic::catch_unwind(|| guard(|| panic!("boom"), || {}));
        assert!(result.is_err());
        // A second guard must still be installable after unwinding.
        assert_eq!(guard(|| "ok", || {}), "ok");
    }
}
