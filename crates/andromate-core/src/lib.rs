//! # andromate-core
//!
//! Core library for driving Android devices from test scripts.
//!
//! Everything goes through the `adb` command-line client: view hierarchies
//! are dumped with `uiautomator`, views are located by resource id, content
//! description or text, and taps, swipes and key events are sent with
//! `input`. Alongside device control the crate talks to an intercepting
//! proxy's HTTP control interface and maps tesseract output back to tap
//! coordinates.
//!
//! ## Modules
//!
//! - [`adb`] - The [`DeviceChannel`](adb::DeviceChannel) seam, its `adb` implementation and output parsers
//! - [`element`] - View nodes, bounds and points
//! - [`hierarchy`] - uiautomator XML parsing and view lookup
//! - [`device`] - Taps, swipes, keys, text input and waits
//! - [`apps`] - App lifecycle, device state, logs and screenshots
//! - [`wait`] - Fixed-interval polling
//! - [`proxy`] - Intercepting proxy control and session inspection
//! - [`ocr`] - Tesseract box parsing and character lookup
//! - [`config`] - Settings persisted in `~/.andromate/config.json`
//!
//! ## External Dependencies
//!
//! - **adb** from the Android platform tools, with one device attached or a serial configured
//! - **tesseract** for the OCR helpers
//! - **Charles** for the proxy helpers
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use andromate_core::config::AndromateConfig;
//! use andromate_core::device::Device;
//!
//! let device = Device::from_config(AndromateConfig::load());
//!
//! device.launch("com.example.app", None).expect("launch failed");
//! if device.wait_for_res("login_button", Duration::from_secs(5)) {
//!     device.tap_view_by_id("login_button").expect("tap failed");
//! }
//! ```

pub mod adb;
pub mod apps;
pub mod config;
pub mod device;
pub mod element;
pub mod hierarchy;
pub mod ocr;
pub mod proxy;
pub mod wait;
