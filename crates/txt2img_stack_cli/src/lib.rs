pub mod adapters;
pub mod handlers;
