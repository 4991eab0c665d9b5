use std::sync::Once;

use interp_config::{init_tracing, AdapterConfig};

use crate::dap::codec::sanitize_json_error_message;

static PANIC_HOOK: Once = Once::new();

/// Initialize structured logging and install a process-wide panic hook.
///
/// The hook records the panic through `tracing` (the client owns stdout, so nothing else
/// would see it) and then hands over to the previously installed hook.
pub fn init(config: &AdapterConfig) {
    init_tracing(&config.logging);
    install_panic_hook(config.logging.include_backtrace);
}

fn install_panic_hook(include_backtrace: bool) {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            // Payloads often carry debug-formatted serde errors with user values in them.
            let message = sanitize_json_error_message(&panic_message(info));
            let location = info
                .location()
                .map(|loc| loc.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());

            let backtrace = include_backtrace
                .then(|| std::backtrace::Backtrace::force_capture().to_string());
            record_panic(&message, &location, backtrace.as_deref());

            previous(info);
        }));
    });
}

fn record_panic(message: &str, location: &str, backtrace: Option<&str>) {
    match backtrace {
        Some(backtrace) => tracing::error!(
            target: "interp.panic",
            panic_message = %message,
            panic_location = %location,
            panic_backtrace = %backtrace,
            "panic captured"
        ),
        None => tracing::error!(
            target: "interp.panic",
            panic_message = %message,
            panic_location = %location,
            "panic captured"
        ),
    }
}

fn panic_message(info: &std::panic::PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "panic payload (non-string)".to_owned()
    }
}
