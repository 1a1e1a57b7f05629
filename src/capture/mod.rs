pub mod device;
pub mod event;
pub mod frame;
pub mod naming;
pub mod scheduler;
pub mod stream;

pub use device::{Device, SyntheticDevice};
pub use event::{CaptureEvent, CaptureInstant, EventSink};
pub use frame::{FrameSet, Notification, PixelFormat};
pub use naming::FileNamer;
pub use scheduler::CaptureScheduler;
pub use stream::{StreamKind, StreamPolicy};
