// SPDX-License-Identifier: GPL-3.0-only

//! Engine callback adapter
//!
//! The backend owns this adapter for as long as the engine lives. It only
//! holds a weak reference to the session, so a backend thread can never keep
//! a destroyed session alive, and callbacks arriving after destruction are
//! dropped.

use super::SessionInner;
use crate::backends::camera::types::{EngineEvent, PropertyKey};
use crate::backends::camera::{CaptureSample, EngineCallbacks};
use std::sync::Weak;
use tracing::trace;

pub(crate) struct SessionCallbacks {
    session: Weak<SessionInner>,
}

impl SessionCallbacks {
    pub(crate) fn new(session: Weak<SessionInner>) -> Self {
        Self { session }
    }
}

impl EngineCallbacks for SessionCallbacks {
    fn on_event(&self, event: EngineEvent) {
        match self.session.upgrade() {
            Some(session) => session.handle_event(event),
            None => trace!(?event, "Event for a destroyed session"),
        }
    }

    fn on_sample(&self, sample: &dyn CaptureSample) {
        if let Some(session) = self.session.upgrade() {
            session.handle_sample(sample);
        }
    }

    fn on_control_changed(&self, key: PropertyKey) {
        if let Some(session) = self.session.upgrade() {
            session.handle_control_changed(key);
        }
    }

    fn on_control_error(&self, status: i32) {
        if let Some(session) = self.session.upgrade() {
            session.handle_control_error(status);
        }
    }
}
