pub mod events;
pub mod model;
pub mod policy;
pub mod session;
pub mod tracker;
