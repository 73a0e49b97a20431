//! User notification sinks.

use std::process::Command;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::NotificationMode;
use crate::process::run_with_timeout;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers a short message to the developer. Delivery failures are logged
/// and never reach the caller.
pub trait Notifier: Send {
    fn notify(&self, title: &str, message: &str);
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(title = %title, "notification: {message}");
    }
}

/// Native desktop notifications: `osascript` on macOS, `notify-send` elsewhere.
#[derive(Debug, Default, Clone)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    fn command(title: &str, message: &str) -> Command {
        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification {} with title {}",
                applescript_string(message),
                applescript_string(title)
            );
            let mut cmd = Command::new("osascript");
            cmd.arg("-e").arg(script);
            cmd
        } else {
            let mut cmd = Command::new("notify-send");
            cmd.arg("--app-name=intervene").arg(title).arg(message);
            cmd
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(title = %title, "notification: {message}");
        let mut cmd = Self::command(title, message);
        match run_with_timeout(&mut cmd, NOTIFY_TIMEOUT) {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(error = %output.error_text(), "desktop notification failed"),
            Err(e) => warn!(error = %e, "desktop notification unavailable"),
        }
    }
}

pub fn for_mode(mode: NotificationMode) -> Box<dyn Notifier> {
    match mode {
        NotificationMode::Desktop => Box::new(DesktopNotifier),
        NotificationMode::Log => Box::new(LogNotifier),
    }
}

/// Quote `value` as an AppleScript string literal.
fn applescript_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Collects notifications for assertions.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl RecordingNotifier {
        pub fn titles(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, message: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((title.to_string(), message.to_string()));
        }
    }

    #[test]
    fn applescript_quoting_escapes_quotes_and_backslashes() {
        assert_eq!(applescript_string("plain"), "\"plain\"");
        assert_eq!(applescript_string(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(applescript_string(r"a\b"), r#""a\\b""#);
    }

    #[test]
    fn desktop_command_passes_text_as_arguments() {
        let cmd = DesktopNotifier::command("Title", "it's $(dangerous)");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.iter().any(|a| a.contains("it's $(dangerous)")));
    }

    #[test]
    fn recording_notifier_collects() {
        let notifier = RecordingNotifier::default();
        let boxed: Box<dyn Notifier> = Box::new(notifier.clone());
        boxed.notify("a", "1");
        boxed.notify("b", "2");
        assert_eq!(notifier.titles(), vec!["a", "b"]);
    }
}
