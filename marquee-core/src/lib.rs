pub mod error;
pub mod payment;
pub mod repository;
pub mod status;

pub use error::{CoreError, CoreResult};
