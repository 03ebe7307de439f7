//! Background side of FocusOn: the authoritative focus timer, site blocking
//! decisions, and the socket the popup and page agents talk to.

pub mod badge;
pub mod config;
pub mod coordinator;
pub mod ipc;
pub mod matcher;
pub mod notify;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod timer;
