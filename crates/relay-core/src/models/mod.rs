pub mod envelope;
pub mod event;
pub mod request;

pub use envelope::*;
pub use event::*;
pub use request::*;
