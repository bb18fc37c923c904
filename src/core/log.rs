//! Thin wrappers around `tracing` so selector code never imports `::tracing`
//! directly, matching the teacher's macro-wrapping convention.

pub use tracing::Level;

#[macro_export]
macro_rules! event {
	( $level:expr, $($x:tt)+ ) => { ::tracing::event!( $level, $($x)+ ) };
}

#[macro_export]
macro_rules! error {
	( $($x:tt)+ ) => { ::tracing::error!( $($x)+ ) };
}

#[macro_export]
macro_rules! warn {
	( $($x:tt)+ ) => { ::tracing::warn!( $($x)+ ) };
}

#[macro_export]
macro_rules! info {
	( $($x:tt)+ ) => { ::tracing::info!( $($x)+ ) };
}

#[macro_export]
macro_rules! debug {
	( $($x:tt)+ ) => { ::tracing::debug!( $($x)+ ) };
}

#[macro_export]
macro_rules! trace {
	( $($x:tt)+ ) => { ::tracing::trace!( $($x)+ ) };
}

/// Installs a process-wide `tracing` subscriber reading its filter from
/// `filter` (an `EnvFilter` directive string, e.g. `"info"` or
/// `"cr_select=debug"`). Intended to be called once by a CLI front-end;
/// the selector library itself never calls this.
pub fn init(filter: &str) {
	let filter_layer = tracing_subscriber::EnvFilter::try_new(filter)
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	let subscriber = tracing_subscriber::fmt()
		.with_env_filter(filter_layer)
		.with_target(false)
		.finish();

	if tracing::subscriber::set_global_default(subscriber).is_err() {
		tracing::debug!("tracing subscriber already installed");
	}
}
