/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! Types and traits shared between the plugin placeholder and the engine
//! hosting it.
//!
//! The placeholder never owns any part of the page. The plugin container,
//! the element it hangs off, the plugins themselves and the power-saver
//! throttler all belong to the host and can disappear underneath the
//! placeholder whenever a call re-enters host code, so everything here is
//! handed out as an `Rc` handle that must be re-fetched rather than cached
//! across calls into the host.

use std::path::PathBuf;
use std::rc::Rc;

use euclid::{Rect, Scale, Size2D};
use serde::{Deserialize, Serialize};
use url::{Origin, Url};

/// One hardware pixel of the display the page is rendered on.
#[derive(Clone, Copy, Debug)]
pub enum DevicePixel {}

/// One CSS "px": a device pixel divided by the page zoom factor.
#[derive(Clone, Copy, Debug)]
pub enum CssPixel {}

pub type DeviceIntRect = Rect<i32, DevicePixel>;
pub type CssIntRect = Rect<i32, CssPixel>;
pub type CssIntSize = Size2D<i32, CssPixel>;

/// Converts CSS pixels to device pixels; divide to go the other way.
pub type PageZoom = Scale<f32, CssPixel, DevicePixel>;

/// The host's classification of a plugin embed, from its size and whether
/// its content origin matches the top frame's.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PeripheralContentStatus {
    /// Essential content, never throttled.
    NotPeripheral,
    /// Small or cross-origin content eligible for power-saver throttling.
    Peripheral,
    /// Cross-origin content large enough that the whole origin should be
    /// allow-listed for this page.
    EssentialCrossOriginLarge,
}

/// How a throttled plugin became essential. Recorded as a metric by the
/// host, except for [`UnthrottleMethod::DoNotRecord`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum UnthrottleMethod {
    /// An informational marking that should not show up in metrics, used
    /// for the very first pass of the size heuristic.
    DoNotRecord,
    /// The user clicked the placeholder.
    ByClick,
    /// A later size change moved the content out of the peripheral bucket.
    BySizeChange,
    /// The content's origin was already on the allow-list.
    ByAllowList,
    /// The plugin was torn down without ever becoming essential.
    Never,
}

/// The parameters a plugin embed was declared with.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PluginParams {
    pub url: Url,
    pub mime_type: String,
    pub attribute_names: Vec<String>,
    pub attribute_values: Vec<String>,
}

impl PluginParams {
    pub fn content_origin(&self) -> Origin {
        self.url.origin()
    }
}

/// Metadata about the plugin implementation backing an embed.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WebPluginInfo {
    pub name: String,
    pub path: PathBuf,
    pub mime_types: Vec<String>,
}

/// The render frame hosting the placeholder: peripheral-content policy and
/// metric recording live behind this seam.
pub trait RenderFrame {
    /// Registers interest in `content_origin` becoming allow-listed;
    /// `on_essential` fires when it does.
    fn register_peripheral_plugin(&self, content_origin: Origin, on_essential: Box<dyn Fn()>);

    /// Classifies a plugin embed of the given zoom-adjusted size.
    fn peripheral_content_status(
        &self,
        top_frame_origin: &Origin,
        content_origin: &Origin,
        unobscured_size: CssIntSize,
    ) -> PeripheralContentStatus;

    /// Permanently allow-lists `content_origin` for this top-level page.
    fn allowlist_content_origin(&self, content_origin: &Origin);

    fn top_frame_origin(&self) -> Origin;

    fn record_unthrottle_method(&self, method: UnthrottleMethod);

    /// Records a named user action.
    fn record_action(&self, action: &'static str);
}

/// The host-owned container a plugin renders into. A container can be torn
/// down (navigation, element removal) at any point that host code runs.
pub trait PluginContainer {
    fn set_plugin(&self, plugin: Rc<dyn WebPlugin>);
    fn plugin(&self) -> Option<Rc<dyn WebPlugin>>;
    fn element(&self) -> Rc<dyn PluginElement>;
    /// Forces a repaint of the container's area.
    fn invalidate(&self);
    /// Forces the host to recompute and re-report the container's geometry.
    fn report_geometry(&self);
    fn page_zoom_factor(&self) -> PageZoom;
}

/// The DOM element a plugin container belongs to. Outlives the container
/// itself, which is why the swap procedure re-validates through it.
pub trait PluginElement {
    /// The element's current plugin container, if it still has one.
    fn plugin_container(&self) -> Option<Rc<dyn PluginContainer>>;
    fn set_attribute(&self, name: &str, value: &str);
}

/// A plugin instance as seen by the placeholder.
pub trait WebPlugin {
    /// Attaches the plugin to `container`. Returns false on failure, in
    /// which case the caller decides whether to destroy the plugin.
    fn initialize(&self, container: &Rc<dyn PluginContainer>) -> bool;
    fn destroy(&self);
    fn container(&self) -> Option<Rc<dyn PluginContainer>>;
}

/// The placeholder's own rendered view. It is itself a plugin installed in
/// the container, and is what the real plugin eventually replaces.
pub trait PlaceholderPlugin: WebPlugin {
    /// Puts the element's original title text back after the swap.
    fn restore_title_text(&self);
    /// Replays data the placeholder buffered while it stood in.
    fn replay_received_data(&self, new_plugin: &Rc<dyn WebPlugin>);
    fn set_status_message(&self, message: &str);
    /// Repositions the poster UI to the unobscured part of the embed.
    fn resize_poster(&self, unobscured_rect: CssIntRect);
}

/// Power-saver state for a plugin that was instantiated ahead of the
/// placeholder and is being kept hidden behind it.
pub trait PluginThrottler {
    fn mark_essential(&self, method: UnthrottleMethod);
    fn web_plugin(&self) -> Rc<dyn WebPlugin>;
    fn set_hidden_for_placeholder(&self, hidden: bool);
}

/// Deferred instantiation of the real plugin. May decline.
pub trait PluginCreator {
    fn create_plugin(&self) -> Option<Rc<dyn WebPlugin>>;
}
