pub mod config;
pub mod error;
pub mod frame;
pub mod types;

pub use error::{TcshareError, TcshareResult};
pub use frame::FrameLayout;
