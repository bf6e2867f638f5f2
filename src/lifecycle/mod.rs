//! # Component lifecycle: attachments and app status.
//!
//! - [`Attachment`] drives one mounted component through enter, ticks and destroy.
//! - [`AppStatus`] is the host-reported foreground state that feeds
//!   `onAppActive`/`onAppInactive`.

mod app_state;
mod attachment;

pub use app_state::AppStatus;
pub use attachment::{Attachment, AttachmentState, MountOptions};
