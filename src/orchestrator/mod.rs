//! Process lifecycle orchestration.
//!
//! This module owns the launch sequence (prior cleanup, weight fetch, model then bot), the
//! shutdown of recorded processes, and status reporting. The CLI layer calls into it and
//! renders the [`HarnessEvent`](crate::model::HarnessEvent)s it emits.

mod launcher;
mod status;
mod terminator;

pub(crate) use launcher::launch;
pub(crate) use status::collect_status;
pub(crate) use terminator::{stop, StopOptions};
