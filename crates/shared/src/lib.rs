//! Wire types shared between the alertdesk console and its event backend.

pub mod error;
pub mod protocol;

pub use error::*;
pub use protocol::*;
