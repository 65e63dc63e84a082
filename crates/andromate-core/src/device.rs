//! High-level device automation.
//!
//! [`Device`] wraps a [`DeviceChannel`] and the [`AndromateConfig`] it was
//! built with, and implements every operation a UI test needs: fetching and
//! querying the view hierarchy, tapping and swiping resolved coordinates,
//! pressing keys, and waiting for views or activities.
//!
//! Every query re-fetches the hierarchy, so a find-then-tap sequence can race
//! with the app changing the screen in between.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use andromate_core::config::AndromateConfig;
//! use andromate_core::device::Device;
//!
//! let device = Device::from_config(AndromateConfig::load());
//! device.launch("com.example.app", None).unwrap();
//! if device.wait_for_res("login_button", Duration::from_secs(5)) {
//!     device.tap_view_by_id("login_button").unwrap();
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use crate::adb::{parse_screen_size, Adb, AdbError, DeviceChannel, ScreenSize};
use crate::config::AndromateConfig;
use crate::element::{Point, ViewNode};
use crate::hierarchy::{center_of, Hierarchy, Selector};
use crate::wait::Poll;

/// Swipe direction, named after the finger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// End point of a swipe of `delta` pixels starting at `from`, clamped
    /// to the `i32` range.
    pub fn end_point(self, from: Point, delta: i32) -> Point {
        match self {
            Direction::Up => Point::new(from.x, from.y.saturating_sub(delta)),
            Direction::Down => Point::new(from.x, from.y.saturating_add(delta)),
            Direction::Left => Point::new(from.x.saturating_sub(delta), from.y),
            Direction::Right => Point::new(from.x.saturating_add(delta), from.y),
        }
    }

    /// Default swipe distance: a third of the screen height vertically, half
    /// the screen width horizontally.
    pub fn default_delta(self, size: ScreenSize) -> i32 {
        match self {
            Direction::Up | Direction::Down => size.height / 3,
            Direction::Left | Direction::Right => size.width / 2,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        };
        f.write_str(name)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(format!(
                "Invalid swipe direction '{}'. Use: up, down, left, right",
                other
            )),
        }
    }
}

/// Android key codes sent through `input keyevent`.
pub(crate) mod keycode {
    pub const POWER: &str = "26";
    pub const ENTER: &str = "66";
    pub const BACK: &str = "KEYCODE_BACK";
    pub const HOME: &str = "KEYCODE_HOME";
    pub const APP_SWITCH: &str = "KEYCODE_APP_SWITCH";
}

/// Quotes a value for the device shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// An Android device driven through a [`DeviceChannel`].
pub struct Device<C: DeviceChannel = Adb> {
    channel: C,
    config: AndromateConfig,
}

impl Device<Adb> {
    /// Creates a device backed by the real `adb` executable.
    pub fn from_config(config: AndromateConfig) -> Self {
        Self::new(Adb::from_config(&config), config)
    }
}

impl<C: DeviceChannel> Device<C> {
    pub fn new(channel: C, config: AndromateConfig) -> Self {
        Self { channel, config }
    }

    /// Returns a reference to the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn config(&self) -> &AndromateConfig {
        &self.config
    }

    /// Runs an input-style shell command and waits the settle delay.
    pub(crate) fn run_shell(&self, command: &str) -> Result<String, AdbError> {
        let output = self.channel.shell(command)?;
        self.channel.settle(self.config.settle());
        Ok(output)
    }

    /// Runs a read-only shell command with no settle delay.
    pub(crate) fn query_shell(&self, command: &str) -> Result<String, AdbError> {
        self.channel.shell(command)
    }

    pub(crate) fn settle(&self, duration: Duration) {
        self.channel.settle(duration);
    }

    pub(crate) fn poll(&self, timeout: Duration) -> Poll {
        Poll::new(self.config.poll_interval(), timeout)
    }

    // ------------------------------------------------------------------
    // Hierarchy
    // ------------------------------------------------------------------

    /// Raw XML of the current view hierarchy.
    pub fn view_hierarchy_xml(&self) -> Result<String, AdbError> {
        self.run_shell(&format!("uiautomator dump {}", self.config.dump_path))?;
        self.query_shell(&format!("cat {}", self.config.dump_path))
    }

    /// Dumps and parses the current view hierarchy.
    pub fn view_hierarchy(&self) -> Result<Hierarchy, AdbError> {
        let xml = self.view_hierarchy_xml()?;
        Ok(Hierarchy::parse(&xml)?)
    }

    /// Returns the first view whose `selector` attribute contains `value`.
    pub fn find_view(&self, selector: Selector, value: &str) -> Result<Option<ViewNode>, AdbError> {
        let hierarchy = self.view_hierarchy()?;
        let found = hierarchy.find(selector, value).cloned();
        debug!(%selector, value, found = found.is_some(), "find view");
        Ok(found)
    }

    pub fn find_view_by_id(&self, res_id: &str) -> Result<Option<ViewNode>, AdbError> {
        self.find_view(Selector::ResourceId, res_id)
    }

    pub fn find_view_by_content_desc(&self, content_desc: &str) -> Result<Option<ViewNode>, AdbError> {
        self.find_view(Selector::ContentDesc, content_desc)
    }

    pub fn find_view_by_text(&self, text: &str) -> Result<Option<ViewNode>, AdbError> {
        self.find_view(Selector::Text, text)
    }

    /// Text of the first view whose resource id contains `res_id`.
    pub fn get_text_from_view(&self, res_id: &str) -> Result<Option<String>, AdbError> {
        Ok(self
            .find_view_by_id(res_id)?
            .and_then(|node| node.text().map(String::from)))
    }

    // ------------------------------------------------------------------
    // Taps and gestures
    // ------------------------------------------------------------------

    /// Taps the center of a view.
    ///
    /// Returns `Ok(false)` if the view has no bounds. There is no check that
    /// the tap had any effect.
    pub fn tap_view(&self, view: &ViewNode) -> Result<bool, AdbError> {
        match center_of(Some(view))? {
            Some(point) => {
                self.tap_point(point)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Finds a view and taps it. Returns `Ok(false)` if there is no such view.
    pub fn tap_view_by(&self, selector: Selector, value: &str) -> Result<bool, AdbError> {
        let span = info_span!("tap_view_by", %selector, value);
        let _enter = span.enter();
        match self.find_view(selector, value)? {
            Some(view) => self.tap_view(&view),
            None => Ok(false),
        }
    }

    pub fn tap_view_by_id(&self, res_id: &str) -> Result<bool, AdbError> {
        self.tap_view_by(Selector::ResourceId, res_id)
    }

    pub fn tap_view_by_text(&self, text: &str) -> Result<bool, AdbError> {
        self.tap_view_by(Selector::Text, text)
    }

    pub fn tap_view_by_content_desc(&self, content_desc: &str) -> Result<bool, AdbError> {
        self.tap_view_by(Selector::ContentDesc, content_desc)
    }

    /// Taps `point`, or the center of the screen when `None`. Returns the
    /// point that was tapped.
    pub fn tap(&self, point: Option<Point>) -> Result<Point, AdbError> {
        let point = match point {
            Some(p) => p,
            None => self.center_coordinates(None)?,
        };
        self.tap_point(point)?;
        Ok(point)
    }

    pub(crate) fn tap_point(&self, point: Point) -> Result<(), AdbError> {
        self.run_shell(&format!("input tap {} {}", point.x, point.y))?;
        Ok(())
    }

    /// Long presses the center of a view, as a zero-distance swipe.
    ///
    /// Returns `Ok(false)` if the view has no bounds.
    pub fn long_press_view(&self, view: &ViewNode) -> Result<bool, AdbError> {
        match center_of(Some(view))? {
            Some(point) => {
                self.long_press(point)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn long_press(&self, point: Point) -> Result<(), AdbError> {
        self.swipe_between(point, point)
    }

    /// Swipes from `from` to `to` over the configured swipe duration.
    pub fn swipe_between(&self, from: Point, to: Point) -> Result<(), AdbError> {
        self.run_shell(&format!(
            "input touchscreen swipe {} {} {} {} {}",
            from.x, from.y, to.x, to.y, self.config.swipe_duration_ms
        ))?;
        self.settle(self.config.swipe_settle());
        Ok(())
    }

    /// Swipes in `direction`, starting at the center of the view with
    /// resource id `from` (or the screen center), moving `delta` pixels (or
    /// the direction's default distance).
    pub fn swipe(&self, direction: Direction, from: Option<&str>, delta: Option<i32>) -> Result<(), AdbError> {
        let start = self.center_coordinates(from)?;
        let delta = match delta {
            Some(d) => d,
            None => direction.default_delta(self.screen_size()?),
        };
        let end = direction.end_point(start, delta);
        debug!(%direction, %start, %end, "swipe");
        self.swipe_between(start, end)
    }

    pub fn swipe_up(&self) -> Result<(), AdbError> {
        self.swipe(Direction::Up, None, None)
    }

    pub fn swipe_down(&self) -> Result<(), AdbError> {
        self.swipe(Direction::Down, None, None)
    }

    pub fn swipe_left(&self) -> Result<(), AdbError> {
        self.swipe(Direction::Left, None, None)
    }

    pub fn swipe_right(&self) -> Result<(), AdbError> {
        self.swipe(Direction::Right, None, None)
    }

    /// Center of the view with resource id `res_id`, or of the screen.
    fn center_coordinates(&self, res_id: Option<&str>) -> Result<Point, AdbError> {
        match res_id {
            None => {
                let size = self.screen_size()?;
                Ok(Point::new(size.width / 2, size.height / 2))
            }
            Some(id) => {
                let view = self.find_view_by_id(id)?;
                center_of(view.as_ref())?.ok_or_else(|| AdbError::ViewNotFound {
                    selector: Selector::ResourceId,
                    value: id.to_string(),
                })
            }
        }
    }

    /// Current screen size from `wm size`.
    pub fn screen_size(&self) -> Result<ScreenSize, AdbError> {
        parse_screen_size(&self.query_shell("wm size")?)
    }

    // ------------------------------------------------------------------
    // Keys and text
    // ------------------------------------------------------------------

    pub(crate) fn key_event(&self, code: &str) -> Result<(), AdbError> {
        self.run_shell(&format!("input keyevent {}", code))?;
        Ok(())
    }

    pub fn back(&self) -> Result<(), AdbError> {
        self.key_event(keycode::BACK)?;
        self.settle(self.config.swipe_settle());
        Ok(())
    }

    pub fn home(&self) -> Result<(), AdbError> {
        self.key_event(keycode::HOME)?;
        self.settle(self.config.swipe_settle());
        Ok(())
    }

    /// Presses enter; works whether or not the keyboard is shown.
    pub fn enter(&self) -> Result<(), AdbError> {
        self.key_event(keycode::ENTER)
    }

    /// Presses the power button. May not work on every device.
    pub fn power(&self) -> Result<(), AdbError> {
        self.key_event(keycode::POWER)
    }

    pub fn lock(&self) -> Result<(), AdbError> {
        self.power()
    }

    /// Presses power then swipes up. Only unlocks devices with no secure
    /// lock screen.
    pub fn unlock(&self) -> Result<(), AdbError> {
        self.power()?;
        self.settle(self.config.settle());
        self.swipe_up()?;
        self.settle(self.config.settle());
        Ok(())
    }

    /// Opens the recent apps overview.
    pub fn overview(&self) -> Result<(), AdbError> {
        self.key_event(keycode::APP_SWITCH)?;
        self.settle(self.config.launch_settle());
        Ok(())
    }

    /// Opens the overview and taps the app in the middle of the screen.
    pub fn latest_app_in_overview(&self) -> Result<(), AdbError> {
        self.overview()?;
        self.tap(None)?;
        self.settle(self.config.launch_settle());
        Ok(())
    }

    /// Types `value` into the focused field.
    pub fn input_text(&self, value: &str) -> Result<(), AdbError> {
        self.run_shell(&format!("input text {}", shell_quote(value)))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Waits
    // ------------------------------------------------------------------

    /// Polls until a view matching `selector`/`value` is on screen.
    ///
    /// Fetch failures count as "not there yet".
    pub fn wait_for(&self, selector: Selector, value: &str, timeout: Duration) -> bool {
        self.poll(timeout).until(
            || self.channel.now(),
            |d| self.settle(d),
            || match self.find_view(selector, value) {
                Ok(found) => found.is_some(),
                Err(e) => {
                    debug!(error = %e, "hierarchy fetch failed while waiting");
                    false
                }
            },
        )
    }

    pub fn wait_for_res(&self, res_id: &str, timeout: Duration) -> bool {
        self.wait_for(Selector::ResourceId, res_id, timeout)
    }

    pub fn wait_for_view_with_text(&self, text: &str, timeout: Duration) -> bool {
        self.wait_for(Selector::Text, text, timeout)
    }

    /// Polls until the view with resource id `res_id` shows text containing `text`.
    pub fn wait_for_text(&self, res_id: &str, text: &str, timeout: Duration) -> bool {
        self.poll(timeout).until(
            || self.channel.now(),
            |d| self.settle(d),
            || match self.get_text_from_view(res_id) {
                Ok(Some(current)) => current.contains(text),
                Ok(None) => false,
                Err(e) => {
                    debug!(error = %e, "hierarchy fetch failed while waiting");
                    false
                }
            },
        )
    }

    /// Polls until the foreground activity name contains `activity`.
    pub fn wait_for_activity(&self, activity: &str, timeout: Duration) -> bool {
        self.poll(timeout).until(
            || self.channel.now(),
            |d| self.settle(d),
            || match self.current_activity_name() {
                Ok(current) => current.contains(activity),
                Err(e) => {
                    debug!(error = %e, "activity query failed while waiting");
                    false
                }
            },
        )
    }

    /// Waits for the runtime permission prompt and accepts it.
    pub fn accept_permission(&self, timeout: Duration) -> Result<(), AdbError> {
        const ALLOW_BUTTON: &str = "permission_allow_button";
        if !self.wait_for_res(ALLOW_BUTTON, timeout) {
            return Err(AdbError::PermissionPromptMissing);
        }
        if !self.tap_view_by_id(ALLOW_BUTTON)? {
            return Err(AdbError::PermissionPromptMissing);
        }
        Ok(())
    }
}
