pub mod dto;
mod media;
mod pages;
pub mod response;
mod router;
mod tags;
mod tokens;
mod users;
pub mod validation;

pub use router::{AppState, create_router};
