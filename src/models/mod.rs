//! Data models

mod binding;
mod certificate;
mod event;

pub use binding::*;
pub use certificate::*;
pub use event::*;
