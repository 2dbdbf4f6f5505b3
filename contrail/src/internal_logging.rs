#![allow(unused_macros)]
//! Self-diagnostics macros for contrail internals.
//!
//! These macros (`contrail_info!`, `contrail_warn!`, `contrail_debug!`,
//! `contrail_error!`) are for use inside contrail code and by custom
//! reporters/samplers, not for application logging. They emit `tracing`
//! events when the `internal-logs` feature is enabled and compile to nothing
//! otherwise; under `cargo test --nocapture` they print to stdout so scope
//! misuse shows up in test output.

/// Log an informational self-diagnostic event.
///
/// # Fields:
/// - `name`: the operation being logged.
/// - Additional key-value pairs become event attributes.
#[macro_export]
macro_rules! contrail_info {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }
        #[cfg(test)]
        {
            print!("contrail_info: name={}\n", $name);
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }
        #[cfg(test)]
        {
            print!("contrail_info: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+);
        }
    };
}

/// Log a warning self-diagnostic event.
#[macro_export]
macro_rules! contrail_warn {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }
        #[cfg(test)]
        {
            print!("contrail_warn: name={}\n", $name);
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }
        #[cfg(test)]
        {
            print!("contrail_warn: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+);
        }
    };
}

/// Log a debug self-diagnostic event.
#[macro_export]
macro_rules! contrail_debug {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }
        #[cfg(test)]
        {
            print!("contrail_debug: name={}\n", $name);
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }
        #[cfg(test)]
        {
            print!("contrail_debug: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+);
        }
    };
}

/// Log an error self-diagnostic event.
#[macro_export]
macro_rules! contrail_error {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }
        #[cfg(test)]
        {
            print!("contrail_error: name={}\n", $name);
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+);
        }
        #[cfg(test)]
        {
            print!("contrail_error: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }
        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+);
        }
    };
}
