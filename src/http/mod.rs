//! Read-only HTTP query API over the relational and array stores, plus the
//! in-process admin trigger. Feature `http-server`.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::{ApiError, AppError};
pub use router::create_router;
pub use state::AppState;
