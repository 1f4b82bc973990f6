pub mod access;
pub mod error;
pub mod quota;
pub mod registration;
pub mod token;
pub mod verify;

pub use error::GateError;
