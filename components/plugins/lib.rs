/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! Placeholder shown in place of a plugin embed whose loading is deferred,
//! for power saving, background tabs or prerendering. Owns the decision of
//! *when* to swap the placeholder for the real plugin and performs the
//! swap against the host-owned container.

mod placeholder;

pub use crate::placeholder::LoadablePluginPlaceholder;
