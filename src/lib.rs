pub mod redis_conn;

pub use crate::redis_conn::*;
