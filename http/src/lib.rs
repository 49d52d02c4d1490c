#[macro_use]
extern crate tracing;

pub mod error;
pub mod handlers;
pub mod router;

pub use error::AppError;
pub use router::{
    create_router,
    AppState,
};
