// SPDX-License-Identifier: GPL-3.0-only

//! Camera property controls
//!
//! Exposes the image-processing and lens properties of an opened device as
//! named [`Control`]s. Each control is probed once when the session opens
//! the device; properties the device does not support are dropped.

use super::DeviceHandle;
use super::types::{PropertyKey, PropertySet};
use crate::errors::BackendResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, warn};

// ===== Video Processing Amplifier Property IDs =====

pub const VIDEOPROCAMP_BRIGHTNESS: u32 = 0;
pub const VIDEOPROCAMP_CONTRAST: u32 = 1;
pub const VIDEOPROCAMP_HUE: u32 = 2;
pub const VIDEOPROCAMP_SATURATION: u32 = 3;
pub const VIDEOPROCAMP_SHARPNESS: u32 = 4;
pub const VIDEOPROCAMP_GAMMA: u32 = 5;
pub const VIDEOPROCAMP_COLORENABLE: u32 = 6;
pub const VIDEOPROCAMP_WHITEBALANCE: u32 = 7;
/// Helps with backlit subjects
pub const VIDEOPROCAMP_BACKLIGHT_COMPENSATION: u32 = 8;
pub const VIDEOPROCAMP_GAIN: u32 = 9;

// ===== Camera Control Property IDs =====

pub const CAMERACONTROL_ZOOM: u32 = 3;
pub const CAMERACONTROL_FOCUS: u32 = 6;

/// The properties exposed as controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Brightness,
    Contrast,
    Hue,
    Saturation,
    Sharpness,
    Gamma,
    ColorEnable,
    WhiteBalance,
    BacklightCompensation,
    Gain,
    Zoom,
    Focus,
}

impl ControlKind {
    /// Every control kind, in the order sessions probe them
    pub const ALL: [ControlKind; 12] = [
        ControlKind::Brightness,
        ControlKind::Contrast,
        ControlKind::Hue,
        ControlKind::Saturation,
        ControlKind::Sharpness,
        ControlKind::Gamma,
        ControlKind::ColorEnable,
        ControlKind::WhiteBalance,
        ControlKind::BacklightCompensation,
        ControlKind::Gain,
        ControlKind::Zoom,
        ControlKind::Focus,
    ];

    /// Display name, also used for lookups by name
    pub fn name(&self) -> &'static str {
        match self {
            ControlKind::Brightness => "Brightness",
            ControlKind::Contrast => "Contrast",
            ControlKind::Hue => "Hue",
            ControlKind::Saturation => "Saturation",
            ControlKind::Sharpness => "Sharpness",
            ControlKind::Gamma => "Gamma",
            ControlKind::ColorEnable => "Color Enable",
            ControlKind::WhiteBalance => "White Balance",
            ControlKind::BacklightCompensation => "Backlight Compensation",
            ControlKind::Gain => "Gain",
            ControlKind::Zoom => "Zoom",
            ControlKind::Focus => "Focus",
        }
    }

    pub fn key(&self) -> PropertyKey {
        let (set, id) = match self {
            ControlKind::Brightness => (PropertySet::VideoProcAmp, VIDEOPROCAMP_BRIGHTNESS),
            ControlKind::Contrast => (PropertySet::VideoProcAmp, VIDEOPROCAMP_CONTRAST),
            ControlKind::Hue => (PropertySet::VideoProcAmp, VIDEOPROCAMP_HUE),
            ControlKind::Saturation => (PropertySet::VideoProcAmp, VIDEOPROCAMP_SATURATION),
            ControlKind::Sharpness => (PropertySet::VideoProcAmp, VIDEOPROCAMP_SHARPNESS),
            ControlKind::Gamma => (PropertySet::VideoProcAmp, VIDEOPROCAMP_GAMMA),
            ControlKind::ColorEnable => (PropertySet::VideoProcAmp, VIDEOPROCAMP_COLORENABLE),
            ControlKind::WhiteBalance => (PropertySet::VideoProcAmp, VIDEOPROCAMP_WHITEBALANCE),
            ControlKind::BacklightCompensation => {
                (PropertySet::VideoProcAmp, VIDEOPROCAMP_BACKLIGHT_COMPENSATION)
            }
            ControlKind::Gain => (PropertySet::VideoProcAmp, VIDEOPROCAMP_GAIN),
            ControlKind::Zoom => (PropertySet::CameraControl, CAMERACONTROL_ZOOM),
            ControlKind::Focus => (PropertySet::CameraControl, CAMERACONTROL_FOCUS),
        };
        PropertyKey::new(set, id)
    }

    pub fn from_key(key: PropertyKey) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A device property with its bounds and a cached live value
///
/// Bounds, step and default are fixed once probed. The cached value is
/// updated by [`set_value`](Self::set_value) and
/// [`load_value`](Self::load_value), which may race harmlessly with the
/// session's control-change handling.
pub struct Control {
    kind: ControlKind,
    min: i32,
    max: i32,
    step: i32,
    default: i32,
    value: AtomicI32,
    device: Arc<dyn DeviceHandle>,
}

impl Control {
    /// Query the device for `kind`. Returns `None` if it is not supported.
    pub fn probe(device: &Arc<dyn DeviceHandle>, kind: ControlKind) -> Option<Self> {
        let key = kind.key();
        let range = match device.property_range(key) {
            Ok(range) => range,
            Err(e) => {
                debug!(control = %kind, error = %e, "Control not supported");
                return None;
            }
        };
        let default = match device.property_default(key) {
            Ok(default) => default,
            Err(e) => {
                debug!(control = %kind, error = %e, "Control has no default");
                return None;
            }
        };

        let control = Self {
            kind,
            min: range.min,
            max: range.max,
            step: range.step,
            default,
            value: AtomicI32::new(default),
            device: Arc::clone(device),
        };
        control.load_value();

        debug!(
            control = %kind,
            min = control.min,
            max = control.max,
            step = control.step,
            default = control.default,
            value = control.value(),
            "Control discovered"
        );
        Some(control)
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn key(&self) -> PropertyKey {
        self.kind.key()
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn default_value(&self) -> i32 {
        self.default
    }

    /// Last known value
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    /// Re-read the live value from the device.
    ///
    /// On failure the cached value is kept and returned.
    pub fn load_value(&self) -> i32 {
        match self.device.get_property(self.key()) {
            Ok(value) => {
                self.value.store(value, Ordering::Release);
                value
            }
            Err(e) => {
                warn!(control = %self.kind, error = %e, "Failed to read control value");
                self.value()
            }
        }
    }

    /// Write `value` to the device and cache what the device reports back.
    ///
    /// The value is passed through as given; devices clamp or round it
    /// themselves. Returns the new cached value. A failed write leaves the
    /// cached value unchanged.
    pub fn set_value(&self, value: i32) -> BackendResult<i32> {
        if let Err(e) = self.device.set_property(self.key(), value) {
            warn!(control = %self.kind, value, error = %e, "Failed to set control");
            return Err(e);
        }

        let applied = self.device.get_property(self.key()).unwrap_or(value);
        if applied != value {
            debug!(
                control = %self.kind,
                requested = value,
                actual = applied,
                "Control value was clamped"
            );
        }
        self.value.store(applied, Ordering::Release);
        Ok(applied)
    }

    /// Restore the device default
    pub fn reset(&self) -> BackendResult<i32> {
        self.set_value(self.default)
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Control")
            .field("name", &self.name())
            .field("min", &self.min)
            .field("max", &self.max)
            .field("step", &self.step)
            .field("default", &self.default)
            .field("value", &self.value())
            .finish()
    }
}

/// Probe every [`ControlKind`] and keep the supported ones
pub fn discover_controls(device: &Arc<dyn DeviceHandle>) -> Vec<Arc<Control>> {
    ControlKind::ALL
        .into_iter()
        .filter_map(|kind| Control::probe(device, kind))
        .map(Arc::new)
        .collect()
}
