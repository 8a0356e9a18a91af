pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

/// Builds the default terminal logger used by executables embedding the stack.
pub fn init() -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Default logging configuration must parse");

    config
        .build_logger()
        .expect("Default logging configuration must build")
}

/// Logger for unit tests. Discards everything.
pub fn test() -> Logger {
    Logger::root(Discard, o!())
}
