//! Domain services. Route handlers stay thin and call into these.

pub mod board;
pub mod room;
pub mod session;
pub mod share;
