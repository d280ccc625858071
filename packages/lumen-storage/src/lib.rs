pub mod db;
pub mod feedback;
pub mod fragments;
pub mod models;
pub mod qdrant;
pub mod schema;
pub mod spans;
pub mod turns;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
