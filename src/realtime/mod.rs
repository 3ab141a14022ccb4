//! The subscription fabric: feed message formats, the route-partitioned
//! subscriber registry and the broadcaster that feeds it.

pub mod broadcaster;
pub mod messages;
pub mod registry;
