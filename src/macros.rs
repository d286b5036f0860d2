/// Logs a structured line tagged with the originating component.
/// Usage:
/// ```rust
/// use log::Level;
/// volmgr::volmgr_log!(Level::Info, "volume", "protector added");
/// volmgr::volmgr_log!(Level::Error, "config", "load failed: {}", 7);
/// ```
/// Timestamp, pid and tid come from the dispatch format (see `logging`);
/// the macro only contributes the component tag.
#[macro_export]
macro_rules! volmgr_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(
            $level,
            "[{}] {}",
            $component,
            format_args!($fmt $(, $($arg)+)?)
        );
    };
}
