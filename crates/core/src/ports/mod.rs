mod event_source;
mod repository;

pub use event_source::*;
pub use repository::*;
