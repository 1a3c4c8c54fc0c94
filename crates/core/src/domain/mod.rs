pub mod reservation;
pub mod resource;
pub mod slot;
pub mod user;
pub mod workflow;
