//! App lifecycle, device state, logs and capture.
//!
//! These operations are thin command dispatches on top of
//! [`Device`]; the parsing of their output lives in [`crate::adb`].

use std::path::Path;
use std::time::Duration;

use chrono::Local;
use tracing::{info, warn};

use crate::adb::{
    parse_airplane_mode, parse_api_level, parse_display_height, parse_ls, parse_top_activity,
    AdbError, DeviceChannel, TopActivity,
};
use crate::device::{shell_quote, Device};

/// Default wait used by [`Device::launch_deeplink`] when an activity is expected.
pub const DEEPLINK_TIMEOUT: Duration = Duration::from_secs(5);

impl<C: DeviceChannel> Device<C> {
    /// Launches `package`, through its launcher intent or an explicit activity.
    pub fn launch(&self, package: &str, activity: Option<&str>) -> Result<(), AdbError> {
        info!(package, activity, "launching app");
        let command = match activity {
            None => format!(
                "monkey -p {} -c android.intent.category.LAUNCHER 1",
                package
            ),
            Some(activity) => format!("am start -n {}/{}", package, activity),
        };
        self.run_shell(&command)?;
        self.settle(self.config().launch_settle());
        Ok(())
    }

    pub fn stop(&self, package: &str) -> Result<(), AdbError> {
        self.run_shell(&format!("am force-stop {}", package))?;
        Ok(())
    }

    /// Clears an app's data. Kills the app if it is running.
    pub fn clear(&self, package: &str) -> Result<(), AdbError> {
        self.run_shell(&format!("pm clear {}", package))?;
        self.settle(self.config().launch_settle());
        Ok(())
    }

    /// Installs an APK. A failed install is an error.
    pub fn install(&self, apk: &Path) -> Result<(), AdbError> {
        let apk = apk.to_string_lossy().to_string();
        info!(apk = %apk, "installing");
        self.channel().checked(&["install", apk.as_str()])?;
        self.settle(self.config().settle());
        Ok(())
    }

    /// Uninstalls a package. Returns whether `adb` reported success; a
    /// package that is not installed is not an error.
    pub fn uninstall(&self, package: &str) -> Result<bool, AdbError> {
        let output = self.channel().run(&["uninstall", package])?;
        if !output.success() {
            warn!(package, stderr = %output.stderr.trim(), "uninstall failed");
        }
        self.settle(self.config().settle());
        Ok(output.success())
    }

    /// Opens `url` with a VIEW intent. When `expected_activity` is given,
    /// waits for it to come to the foreground and returns whether it did.
    pub fn launch_deeplink(&self, url: &str, expected_activity: Option<&str>) -> Result<bool, AdbError> {
        self.run_shell(&format!(
            "am start -a android.intent.action.VIEW -d {}",
            shell_quote(url)
        ))?;
        Ok(match expected_activity {
            None => true,
            Some(activity) => self.wait_for_activity(activity, DEEPLINK_TIMEOUT),
        })
    }

    /// Foreground package and activity.
    pub fn top_activity(&self) -> Result<TopActivity, AdbError> {
        parse_top_activity(&self.query_shell("dumpsys activity top")?)
    }

    pub fn current_app_name(&self) -> Result<String, AdbError> {
        Ok(self.top_activity()?.package)
    }

    /// Foreground activity class name, without a leading `.`.
    pub fn current_activity_name(&self) -> Result<String, AdbError> {
        Ok(self.top_activity()?.activity)
    }

    /// Device API level.
    pub fn api_level(&self) -> Result<u32, AdbError> {
        parse_api_level(&self.query_shell("getprop ro.build.version.sdk")?)
    }

    /// Display height in pixels.
    ///
    /// Read from `dumpsys window`; falls back to `wm size` on releases that no
    /// longer print `displayHeight`.
    pub fn display_height(&self) -> Result<i32, AdbError> {
        let output = self.query_shell("dumpsys window")?;
        match parse_display_height(&output) {
            Some(height) => Ok(height),
            None => Ok(self.screen_size()?.height),
        }
    }

    /// Turns airplane mode on or off, or toggles it when `enabled` is `None`.
    /// Returns the requested state.
    pub fn airplane_mode(&self, enabled: Option<bool>) -> Result<bool, AdbError> {
        let enable = match enabled {
            Some(e) => e,
            None => !parse_airplane_mode(&self.query_shell("cmd connectivity airplane-mode")?)?,
        };
        let param = if enable { "enable" } else { "disable" };
        self.run_shell(&format!("cmd connectivity airplane-mode {}", param))?;
        Ok(enable)
    }

    /// Prints `message` with a time prefix and writes it to the device log.
    pub fn log(&self, message: &str) -> Result<(), AdbError> {
        println!("{} >> {}", Local::now().format("%H:%M:%S"), message);
        self.run_shell(&format!(
            "log -t {} {}",
            shell_quote(&self.config().log_tag),
            shell_quote(message)
        ))?;
        Ok(())
    }

    /// Full logcat contents.
    pub fn logcat(&self) -> Result<String, AdbError> {
        self.channel().adb(&["logcat", "-d"])
    }

    pub fn clear_logcat(&self) -> Result<(), AdbError> {
        self.channel().checked(&["logcat", "-c"])?;
        self.settle(self.config().settle());
        Ok(())
    }

    /// PNG screenshot of the current screen.
    pub fn screenshot(&self) -> Result<Vec<u8>, AdbError> {
        self.channel().exec_out("screencap -p")
    }

    /// Saves a PNG screenshot on the host.
    pub fn save_screenshot(&self, path: &Path) -> Result<(), AdbError> {
        let png = self.screenshot()?;
        std::fs::write(path, png)?;
        Ok(())
    }

    /// Lists files under `path` in a debuggable app's data directory.
    pub fn ls(&self, package: &str, path: &str) -> Result<Vec<String>, AdbError> {
        let dir = format!("/data/data/{}/{}", package, path.trim_start_matches('/'));
        let output = self
            .channel()
            .exec_out(&format!("run-as {} ls -a {}", package, shell_quote(&dir)))?;
        Ok(parse_ls(&String::from_utf8_lossy(&output)))
    }
}
