mod bounded;
mod buffer;
mod pane_cache;

pub use bounded::BoundedCache;
pub use buffer::OutputBuffer;
pub use pane_cache::PaneCache;
