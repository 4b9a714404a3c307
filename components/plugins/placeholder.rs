/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use log::{debug, warn};
use plugins_traits::{
    CssIntRect, DeviceIntRect, PeripheralContentStatus, PlaceholderPlugin, PluginCreator,
    PluginParams, PluginThrottler, RenderFrame, UnthrottleMethod, WebPlugin, WebPluginInfo,
};

bitflags! {
    /// The independent reasons a placeholder is not yet allowed to load the
    /// real plugin. Loading requires the whole set to be empty.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LoadBlockers: u8 {
        /// The tab is in the background.
        const BACKGROUND_TAB = 1 << 0;
        /// The page is still prerendering.
        const PRERENDERING = 1 << 1;
        /// Power saver classified the embed as peripheral content.
        const POWER_SAVER_POSTER = 1 << 2;
    }
}

/// A placeholder standing in for a plugin embed until every load blocker
/// has cleared, at which point it swaps itself for the real plugin.
///
/// The swap runs at most once per instance: once it completes the
/// placeholder view is destroyed and every further event is a no-op. The
/// container, element and plugins are host-owned and may be torn down by
/// any call that re-enters host code, so each step of the swap re-validates
/// their presence instead of trusting a handle across such a call.
pub struct LoadablePluginPlaceholder {
    frame: Rc<dyn RenderFrame>,
    creator: Box<dyn PluginCreator>,
    params: PluginParams,
    /// Our own rendered view, installed in the container until the swap.
    /// Cleared when the view is destroyed, from either side.
    placeholder: RefCell<Option<Rc<dyn PlaceholderPlugin>>>,
    weak_self: Weak<LoadablePluginPlaceholder>,
    blockers: Cell<LoadBlockers>,
    /// False once essential-marking has been finalized; later calls to
    /// [`Self::mark_essential`] must not record a second metric.
    power_saver_enabled: Cell<bool>,
    /// A plugin created ahead of time and kept hidden behind the
    /// placeholder. Consumed at most once, at the swap.
    premade_throttler: RefCell<Option<Rc<dyn PluginThrottler>>>,
    allow_loading: Cell<bool>,
    finished_loading: Cell<bool>,
    /// Whether the essential-size heuristic has fired at least once. The
    /// first pass is never attributed to a size change in metrics.
    heuristic_run_before: Cell<bool>,
    hidden: Cell<bool>,
    identifier: RefCell<String>,
    message: RefCell<String>,
    unobscured_rect: Cell<DeviceIntRect>,
    plugin_info: RefCell<WebPluginInfo>,
}

impl LoadablePluginPlaceholder {
    pub fn new(
        frame: Rc<dyn RenderFrame>,
        params: PluginParams,
        placeholder: Rc<dyn PlaceholderPlugin>,
        creator: Box<dyn PluginCreator>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| LoadablePluginPlaceholder {
            frame,
            creator,
            params,
            placeholder: RefCell::new(Some(placeholder)),
            weak_self: weak_self.clone(),
            blockers: Cell::new(LoadBlockers::empty()),
            power_saver_enabled: Cell::new(false),
            premade_throttler: RefCell::new(None),
            allow_loading: Cell::new(false),
            finished_loading: Cell::new(false),
            heuristic_run_before: Cell::new(false),
            hidden: Cell::new(false),
            identifier: RefCell::new(String::new()),
            message: RefCell::new(String::new()),
            unobscured_rect: Cell::new(DeviceIntRect::zero()),
            plugin_info: RefCell::new(WebPluginInfo::default()),
        })
    }

    pub fn block_for_background_tab(&self) {
        self.insert_blocker(LoadBlockers::BACKGROUND_TAB);
    }

    pub fn block_for_prerendering(&self) {
        self.insert_blocker(LoadBlockers::PRERENDERING);
    }

    /// Blocks loading behind the power-saver poster and registers for the
    /// notification that the content origin got allow-listed. The callback
    /// holds only a weak reference, so it goes inert with the placeholder.
    pub fn block_for_power_saver_poster(&self) {
        debug_assert!(
            !self
                .blockers
                .get()
                .contains(LoadBlockers::POWER_SAVER_POSTER)
        );
        self.insert_blocker(LoadBlockers::POWER_SAVER_POSTER);

        let weak_self = self.weak_self.clone();
        self.frame.register_peripheral_plugin(
            self.params.content_origin(),
            Box::new(move || {
                if let Some(placeholder) = weak_self.upgrade() {
                    placeholder.mark_essential(UnthrottleMethod::ByAllowList);
                }
            }),
        );
    }

    /// Hands the placeholder a plugin that was instantiated before the
    /// placeholder was shown. Implies the size heuristic already ran once.
    pub fn set_premade_throttler(&self, throttler: Rc<dyn PluginThrottler>) {
        debug_assert!(self.premade_throttler.borrow().is_none());
        self.heuristic_run_before.set(true);
        *self.premade_throttler.borrow_mut() = Some(throttler);
    }

    pub fn set_power_saver_enabled(&self, enabled: bool) {
        self.power_saver_enabled.set(enabled);
    }

    /// Marks construction as complete. Attempting the load transition
    /// before this is a programming error.
    pub fn set_allow_loading(&self, allow: bool) {
        self.allow_loading.set(allow);
    }

    /// Removes this instance from power-saver throttling. A no-op once the
    /// power-saver state has been finalized, so double marking never
    /// records a second metric. Clearing the poster blocker here may
    /// complete the load transition.
    pub fn mark_essential(&self, method: UnthrottleMethod) {
        if !self.power_saver_enabled.get() {
            return;
        }
        self.power_saver_enabled.set(false);

        let throttler = self.premade_throttler.borrow().clone();
        if let Some(throttler) = throttler {
            throttler.mark_essential(method);
        } else if method != UnthrottleMethod::DoNotRecord {
            self.frame.record_unthrottle_method(method);
        }

        let mut blockers = self.blockers.get();
        if blockers.contains(LoadBlockers::POWER_SAVER_POSTER) {
            blockers.remove(LoadBlockers::POWER_SAVER_POSTER);
            self.blockers.set(blockers);
            if blockers.is_empty() {
                self.load_plugin();
            }
        }
    }

    /// The tab came to the foreground.
    pub fn was_shown(&self) {
        self.clear_blocker(LoadBlockers::BACKGROUND_TAB);
    }

    /// The page's prerendering state changed. Prerendering can only be
    /// enabled before the first navigation, so a live placeholder must
    /// never observe it being turned on.
    pub fn set_prerendering(&self, is_prerendering: bool) {
        assert!(
            !is_prerendering,
            "a live placeholder cannot observe prerendering being enabled"
        );
        self.clear_blocker(LoadBlockers::PRERENDERING);
    }

    /// The user clicked the placeholder: unthrottle this instance and try
    /// to load. Only the poster blocker yields to a click; a background
    /// tab or prerendering still gates the transition.
    pub fn clicked(&self) {
        self.frame.record_action("Plugin_Load_Click");
        self.mark_essential(UnthrottleMethod::ByClick);
        self.load_plugin();
    }

    /// A "load blocked plugins" broadcast. An empty identifier addresses
    /// every placeholder; otherwise only the matching one.
    pub fn load_blocked_plugins(&self, identifier: &str) {
        if !identifier.is_empty() && identifier != *self.identifier.borrow() {
            return;
        }
        self.frame.record_action("Plugin_Load_UI");
        self.load_plugin();
    }

    /// The host reported a new unobscured rect for the embed, in device
    /// pixels. While the poster blocker is up this is where the essential
    /// size heuristic runs.
    pub fn update_unobscured_rect(&self, unobscured_rect: DeviceIntRect) {
        let Some(placeholder) = self.placeholder.borrow().clone() else {
            return;
        };
        if !self.finished_loading.get() {
            return;
        }
        if self.unobscured_rect.get() == unobscured_rect {
            return;
        }
        self.unobscured_rect.set(unobscured_rect);

        if !self
            .blockers
            .get()
            .contains(LoadBlockers::POWER_SAVER_POSTER)
        {
            return;
        }
        let Some(container) = placeholder.container() else {
            return;
        };
        let zoom = container.page_zoom_factor();
        let css_rect: CssIntRect = (unobscured_rect.to_f32() / zoom).round().to_i32();

        // Recenter the poster play button when the embed's top or left
        // portion is obscured.
        placeholder.resize_poster(css_rect);

        let content_origin = self.params.content_origin();
        let status = self.frame.peripheral_content_status(
            &self.frame.top_frame_origin(),
            &content_origin,
            css_rect.size,
        );
        if status != PeripheralContentStatus::Peripheral {
            self.mark_essential(if self.heuristic_run_before.get() {
                UnthrottleMethod::BySizeChange
            } else {
                UnthrottleMethod::DoNotRecord
            });

            if !self.heuristic_run_before.get() &&
                status == PeripheralContentStatus::EssentialCrossOriginLarge
            {
                self.frame.allowlist_content_origin(&content_origin);
            }
        }

        self.heuristic_run_before.set(true);
    }

    /// The placeholder's own UI finished rendering.
    pub fn did_finish_loading(&self) {
        self.finished_loading.set(true);
        if !self.message.borrow().is_empty() {
            self.update_message();
        }

        // Only hide the premade plugin once the placeholder has rendered,
        // to avoid a flicker.
        if self.power_saver_enabled.get() {
            if let Some(throttler) = self.premade_throttler.borrow().clone() {
                throttler.set_hidden_for_placeholder(true);
            }
        }

        // The initial geometry may have been reported before we finished
        // loading; request another pass so large posters still unthrottle.
        if let Some(placeholder) = self.placeholder.borrow().clone() {
            let container = placeholder
                .container()
                .expect("a loaded placeholder must have a container");
            container.report_geometry();
        }
    }

    /// Marks the placeholder element ready to receive simulated input, so
    /// browser tests can wait for it.
    pub fn did_finish_icon_reposition_for_testing(&self) {
        let Some(placeholder) = self.placeholder.borrow().clone() else {
            return;
        };
        let Some(container) = placeholder.container() else {
            return;
        };
        container.element().set_attribute("placeholderReady", "true");
    }

    /// The host destroyed the placeholder view (navigation, element
    /// removal). A premade plugin still held here was detached from the
    /// container, so page teardown will not reach it and it has to be
    /// destroyed explicitly.
    pub fn plugin_destroyed(&self) {
        if self.power_saver_enabled.get() {
            if let Some(throttler) = self.premade_throttler.borrow_mut().take() {
                throttler.web_plugin().destroy();
            } else if self
                .blockers
                .get()
                .contains(LoadBlockers::POWER_SAVER_POSTER)
            {
                // The poster never unthrottled and there is no throttler
                // to account for it.
                self.frame
                    .record_unthrottle_method(UnthrottleMethod::Never);
            }

            // Prevent later mark_essential calls from recording anything.
            self.power_saver_enabled.set(false);
        }

        self.placeholder.borrow_mut().take();
    }

    /// Dismisses the placeholder. A hidden placeholder never loads, even
    /// if every blocker clears afterwards.
    pub fn hide(&self) {
        self.hidden.set(true);
    }

    pub fn set_status_message(&self, message: &str) {
        *self.message.borrow_mut() = message.to_owned();
        if self.finished_loading.get() {
            self.update_message();
        }
    }

    pub fn set_identifier(&self, identifier: String) {
        *self.identifier.borrow_mut() = identifier;
    }

    pub fn identifier(&self) -> String {
        self.identifier.borrow().clone()
    }

    pub fn set_plugin_info(&self, plugin_info: WebPluginInfo) {
        *self.plugin_info.borrow_mut() = plugin_info;
    }

    pub fn plugin_info(&self) -> WebPluginInfo {
        self.plugin_info.borrow().clone()
    }

    pub fn params(&self) -> &PluginParams {
        &self.params
    }

    pub fn is_loading_blocked(&self) -> bool {
        debug_assert!(self.allow_loading.get());
        !self.blockers.get().is_empty()
    }

    fn insert_blocker(&self, blocker: LoadBlockers) {
        self.blockers.set(self.blockers.get() | blocker);
    }

    fn clear_blocker(&self, blocker: LoadBlockers) {
        let mut blockers = self.blockers.get();
        if !blockers.contains(blocker) {
            return;
        }
        blockers.remove(blocker);
        self.blockers.set(blockers);
        debug!("cleared {:?}, remaining blockers {:?}", blocker, blockers);
        if blockers.is_empty() {
            self.load_plugin();
        }
    }

    fn update_message(&self) {
        let Some(placeholder) = self.placeholder.borrow().clone() else {
            return;
        };
        let message = self.message.borrow().clone();
        placeholder.set_status_message(&message);
    }

    /// The single load-transition entry point. Silently a no-op while any
    /// blocker remains, the placeholder is hidden, or the swap has already
    /// run; attempting it before loading was ever allowed is fatal.
    pub fn load_plugin(&self) {
        if self.hidden.get() {
            return;
        }
        if self.placeholder.borrow().is_none() {
            return;
        }
        assert!(
            self.allow_loading.get(),
            "load transition attempted before loading was allowed"
        );
        if !self.blockers.get().is_empty() {
            debug!("plugin load still blocked by {:?}", self.blockers.get());
            return;
        }

        let premade = self.premade_throttler.borrow_mut().take();
        match premade {
            Some(throttler) => {
                throttler.set_hidden_for_placeholder(false);
                self.replace_plugin(Some(throttler.web_plugin()), Some(&throttler));
            },
            None => self.replace_plugin(self.creator.create_plugin(), None),
        }
    }

    /// Swaps the placeholder view for `new_plugin` inside the host-owned
    /// container. Initialization can run arbitrary script, so container
    /// and element presence are re-checked after every call into the host;
    /// any absence is an expected teardown race and aborts quietly.
    fn replace_plugin(
        &self,
        new_plugin: Option<Rc<dyn WebPlugin>>,
        premade: Option<&Rc<dyn PluginThrottler>>,
    ) {
        let placeholder = self
            .placeholder
            .borrow()
            .clone()
            .expect("swap attempted after the placeholder view was destroyed");
        let Some(new_plugin) = new_plugin else {
            return;
        };
        let Some(container) = placeholder.container() else {
            warn!("plugin container torn down before the swap; dropping the new plugin");
            new_plugin.destroy();
            return;
        };

        container.set_plugin(new_plugin.clone());
        // The element is needed to detect removal from the page during
        // initialization, after which the container is gone.
        let element = container.element();

        let needs_initialization =
            premade.is_none_or(|throttler| !Rc::ptr_eq(&throttler.web_plugin(), &new_plugin));
        if needs_initialization && !new_plugin.initialize(&container) {
            if new_plugin.container().is_some() {
                // The new plugin would not come up but the container is
                // still alive: reinstall the placeholder and drop it.
                warn!("plugin initialization failed; restoring the placeholder");
                container.set_plugin(Rc::clone(&placeholder) as Rc<dyn WebPlugin>);
                new_plugin.destroy();
            }
            return;
        }

        if element.plugin_container().is_none() {
            // Removed from the page during initialization.
            placeholder.destroy();
            self.plugin_destroyed();
            return;
        }

        // Initialization may have swapped in yet another plugin. Never use
        // the plugin passed in past this point.
        let Some(new_plugin) = container.plugin() else {
            return;
        };

        placeholder.restore_title_text();
        container.invalidate();
        container.report_geometry();
        placeholder.replay_received_data(&new_plugin);
        placeholder.destroy();
        self.plugin_destroyed();
    }
}
