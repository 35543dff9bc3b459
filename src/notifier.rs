//! Delivers a single completion callback to a caller-supplied URL
//! (spec.md §4.4).
//!
//! `send_notification` is always called from inside the intermediate
//! process (I, see `process.rs`), after fork and after the `tokio` runtime
//! has been left behind. It therefore uses a `reqwest::blocking::Client`
//! built from scratch rather than the async client the HTTP server uses
//! for ingress — building a fresh blocking client after `fork` is safe
//! because it spins up its own runtime, not the parent's.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::runner::RunOutput;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Target and opaque token for a single run's completion callback.
#[derive(Debug, Clone)]
pub struct Notifier {
    url: String,
    token: String,
}

impl Notifier {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Notifier {
            url: url.into(),
            token: token.into(),
        }
    }

    /// POST a single form-encoded body. Network errors are logged and
    /// swallowed — they never affect the sandbox state machine.
    pub fn send_notification(&self, output: &RunOutput) {
        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("token", self.token.clone());
        form.insert("status", output.status.as_str().to_string());
        if let Some(code) = output.exit_code {
            form.insert("exit_code", code.to_string());
        }
        form.insert(
            "test_output",
            String::from_utf8_lossy(&output.test_output).into_owned(),
        );
        form.insert(
            "stdout",
            String::from_utf8_lossy(&output.stdout).into_owned(),
        );
        form.insert(
            "stderr",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        );

        let client = match reqwest::blocking::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                warn!(url = %self.url, error = %e, "failed to build notifier HTTP client");
                return;
            }
        };

        match client.post(&self.url).form(&form).send() {
            Ok(resp) => {
                // Response body is ignored per spec.md §4.4; only the
                // status is interesting for diagnostics.
                tracing::debug!(url = %self.url, status = %resp.status(), "notification delivered");
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "notification POST failed; swallowing");
            }
        }
    }
}
