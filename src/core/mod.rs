pub mod config;
pub mod error;
pub mod log;

pub use config::Config;
pub use error::Error;
pub use result::Result;

pub mod result {
	pub type Result<T = (), E = crate::Error> = std::result::Result<T, E>;
}
