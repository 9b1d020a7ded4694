pub mod audit;
pub mod capture;
pub mod config;
pub mod control;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod feedback;
pub mod gate;
pub mod lock;
pub mod pipeline;
pub mod rfid;
pub mod session;

pub use controller::{AccessController, Backends, StatusReport};
pub use error::{AccessError, Result};
