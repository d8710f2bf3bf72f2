use std::panic;

/// Install readable backtraces and make sure panics reach the log file.
///
/// Worker panics would otherwise only show up on stderr, which the log
/// does not capture.
pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        log::error!(
            "panic in thread '{}': {panic_info}",
            thread.name().unwrap_or("<unnamed>")
        );
        log::logger().flush();

        default_hook(panic_info);
    }));
}
