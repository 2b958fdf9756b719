//! Message and feed types shared by the bridge components

pub mod feeds;
pub mod messages;

pub use feeds::*;
pub use messages::*;
