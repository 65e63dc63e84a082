//! Shared test helpers for andromate-core integration tests.
//!
//! [`FakeChannel`] stands in for `adb`: it answers commands from canned
//! rules and records every call and every settle delay. [`mock_http`] is a
//! minimal HTTP responder used as the proxy listener.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use andromate_core::adb::{AdbError, CommandOutput, DeviceChannel};
use andromate_core::config::AndromateConfig;
use andromate_core::device::Device;

// ---------------------------------------------------------------------------
// Sample uiautomator dumps
// ---------------------------------------------------------------------------

pub const LOGIN_SCREEN: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.example" content-desc="" bounds="[0,0][1080,2340]">
    <node index="0" text="Welcome back" resource-id="com.example:id/title" class="android.widget.TextView" package="com.example" content-desc="" bounds="[42,100][300,170]" />
    <node index="1" text="" resource-id="com.example:id/menu" class="android.widget.ImageButton" package="com.example" content-desc="More options" bounds="[954,74][1080,200]" />
    <node index="2" text="Sign in" resource-id="com.example:id/login_button" class="android.widget.Button" package="com.example" content-desc="" bounds="[10,20][30,60]" />
    <node index="3" text="" resource-id="com.example:id/list" class="android.widget.ListView" package="com.example" content-desc="" bounds="[0,400][1080,1400]" />
  </node>
</hierarchy>"#;

pub const LOADING_SCREEN: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="Loading" resource-id="com.example:id/spinner" class="android.widget.ProgressBar" package="com.example" content-desc="" bounds="[500,1100][580,1180]" />
</hierarchy>"#;

pub const PERMISSION_PROMPT: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.android.permissioncontroller" content-desc="" bounds="[0,0][1080,2340]">
    <node index="0" text="Allow" resource-id="com.android.permissioncontroller:id/permission_allow_button" class="android.widget.Button" package="com.android.permissioncontroller" content-desc="" bounds="[100,1500][980,1620]" />
    <node index="1" text="Deny" resource-id="com.android.permissioncontroller:id/permission_deny_button" class="android.widget.Button" package="com.android.permissioncontroller" content-desc="" bounds="[100,1640][980,1760]" />
  </node>
</hierarchy>"#;

// ---------------------------------------------------------------------------
// Fake device channel
// ---------------------------------------------------------------------------

struct Rule {
    prefix: String,
    outputs: VecDeque<CommandOutput>,
}

/// A scripted [`DeviceChannel`].
///
/// A command is matched against the rules by prefix of its space-joined
/// arguments (`"shell wm size"`), first rule wins. A rule with several
/// outputs yields them in order and then keeps repeating the last one.
/// Unmatched commands succeed with empty output.
///
/// Time is virtual: the clock moves forward by every settle delay and by
/// the per-command cost set with [`with_command_cost`](Self::with_command_cost).
pub struct FakeChannel {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<String>>,
    sleeps: RefCell<Vec<Duration>>,
    epoch: Instant,
    clock: Cell<Duration>,
    command_cost: Duration,
}

impl Default for FakeChannel {
    fn default() -> Self {
        Self {
            rules: RefCell::default(),
            calls: RefCell::default(),
            sleeps: RefCell::default(),
            epoch: Instant::now(),
            clock: Cell::new(Duration::ZERO),
            command_cost: Duration::ZERO,
        }
    }
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command take `cost` of virtual time.
    pub fn with_command_cost(mut self, cost: Duration) -> Self {
        self.command_cost = cost;
        self
    }

    /// Answers commands starting with `prefix` with `stdout`.
    pub fn on(self, prefix: &str, stdout: &str) -> Self {
        self.on_sequence(prefix, vec![CommandOutput::ok(stdout)])
    }

    /// Answers commands starting with `prefix` with `output`.
    pub fn on_output(self, prefix: &str, output: CommandOutput) -> Self {
        self.on_sequence(prefix, vec![output])
    }

    pub fn on_sequence(self, prefix: &str, outputs: Vec<CommandOutput>) -> Self {
        self.rules.borrow_mut().push(Rule {
            prefix: prefix.to_string(),
            outputs: outputs.into(),
        });
        self
    }

    /// Serves a sequence of hierarchy dumps to successive `cat` calls.
    pub fn with_dumps(self, dumps: &[&str]) -> Self {
        let outputs = dumps.iter().map(|d| CommandOutput::ok(*d)).collect();
        self.on_sequence("shell cat ", outputs)
    }

    pub fn with_screen(self, width: i32, height: i32) -> Self {
        self.on("shell wm size", &format!("Physical size: {}x{}", width, height))
    }

    /// Every command run so far, as space-joined arguments.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    /// Total settle time requested.
    pub fn slept(&self) -> Duration {
        self.sleeps.borrow().iter().sum()
    }

    /// Virtual time elapsed since the channel was created.
    pub fn elapsed(&self) -> Duration {
        self.clock.get()
    }

    fn advance(&self, by: Duration) {
        self.clock.set(self.clock.get() + by);
    }
}

impl DeviceChannel for FakeChannel {
    fn run(&self, args: &[&str]) -> Result<CommandOutput, AdbError> {
        let command = args.join(" ");
        self.calls.borrow_mut().push(command.clone());
        self.advance(self.command_cost);

        let mut rules = self.rules.borrow_mut();
        let Some(rule) = rules.iter_mut().find(|r| command.starts_with(&r.prefix)) else {
            return Ok(CommandOutput::ok(Vec::new()));
        };
        let output = if rule.outputs.len() > 1 {
            rule.outputs.pop_front()
        } else {
            rule.outputs.front().cloned()
        };
        Ok(output.unwrap_or_default())
    }

    fn settle(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }

    fn now(&self) -> Instant {
        self.epoch + self.clock.get()
    }
}

/// Config with fixed, easy-to-assert delays.
pub fn test_config() -> AndromateConfig {
    AndromateConfig {
        settle_ms: 10,
        launch_settle_ms: 50,
        swipe_duration_ms: 200,
        swipe_settle_ms: 20,
        poll_interval_ms: 1000,
        log_tag: "suite".to_string(),
        ..AndromateConfig::default()
    }
}

pub fn fake_device(channel: FakeChannel) -> Device<FakeChannel> {
    Device::new(channel, test_config())
}

// ---------------------------------------------------------------------------
// Mock HTTP responder
// ---------------------------------------------------------------------------

/// Request lines received by [`mock_http`], in arrival order.
pub type RequestLog = Arc<Mutex<Vec<String>>>;

/// Start a one-connection-per-response HTTP server on a free port.
///
/// Each `(status, body)` pair answers one request, then the server thread
/// exits. The request line of every request is recorded before answering.
pub fn mock_http(responses: Vec<(u16, String)>) -> (SocketAddr, RequestLog) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let server_log = Arc::clone(&log);

    thread::spawn(move || {
        for (status, body) in responses {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                    break;
                }
            }
            server_log
                .lock()
                .unwrap()
                .push(request_line.trim_end().to_string());

            let reason = if status == 200 { "OK" } else { "Error" };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
    });

    (addr, log)
}

/// Canned 200 responses with empty bodies.
pub fn ok_responses(count: usize) -> Vec<(u16, String)> {
    (0..count).map(|_| (200, String::new())).collect()
}
