//! Global panic hook.
//!
//! Logs panic payload and location to stderr before the default hook runs,
//! so container logs carry the failure even when backtraces are disabled.

use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};

static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the panic hook once; later calls are no-ops.
pub(crate) fn install() {
    if HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        eprintln!("{}", format_panic_message(panic_info));
        original_hook(panic_info);
    }));
}

fn format_panic_message(panic_info: &PanicHookInfo<'_>) -> String {
    let mut message = String::from("PANIC: ");

    if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        message.push_str(s);
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        message.push_str(s);
    } else {
        message.push_str("(non-string payload)");
    }

    if let Some(location) = panic_info.location() {
        message.push_str(&format!(
            " at {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        ));
    }
    message
}
