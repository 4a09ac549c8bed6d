// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer
//!
//! - [`camera`]: capture devices, properties and engines, plus the
//!   in-process virtual backend
//!
//! GPU interop lives in [`crate::gpu`].

pub mod camera;
