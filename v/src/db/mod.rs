pub mod condition;
pub mod connection;
pub mod error;
pub mod ident;
pub mod model;
pub mod query;
