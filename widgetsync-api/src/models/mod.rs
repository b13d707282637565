mod schedule;
mod widget;

pub mod timestamp;

pub use schedule::*;
pub use widget::*;

/// Opaque identifier assigned by the platform.
pub type Id = String;

/// Prefix carried by records that exist only locally until the server confirms them.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Whether an id belongs to a not-yet-confirmed local record.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}
