mod event;
mod parser;

pub use event::{
    EventKind, ScheduleNotice, StreamEvent, TelemetryUpdate, WidgetDeleted, WidgetUpdate,
};
pub use parser::{ParseError, encode_event, parse_frame, parse_text};
