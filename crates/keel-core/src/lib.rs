#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]

pub mod constants;
pub mod context;
pub mod error;
pub mod models;
pub mod secret;
pub mod services;
pub mod storage;

pub use crate::constants::*;
pub use crate::context::*;
pub use crate::error::*;
pub use crate::models::*;
pub use crate::secret::*;
pub use crate::services::*;
pub use crate::storage::*;
