/// Abort on a broken contract: log the diagnostic, then panic.
///
/// Release builds set `panic = "abort"`, so this takes the whole daemon down
/// rather than letting a worker continue on corrupted shared state.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}
