pub mod lifecycle;

pub use lifecycle::{dispatch, handle_event, handle_request};
