//! Background services

pub mod announcer;

pub use announcer::{Announcer, AnnouncerHandle};
