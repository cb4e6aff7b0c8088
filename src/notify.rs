/// Desktop notification sink. The insight engine requests one on `urgent`
/// or `warning` severity, per `spec.md` §4.8.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// `notify-rust`-backed default, same crate the teacher uses for desktop
/// notifications.
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) {
        if let Err(e) = notify_rust::Notification::new()
            .summary(title)
            .body(body)
            .appname("Mnemosyne")
            .show()
        {
            log::warn!("desktop notification failed: {e}");
        }
    }
}

/// Logs instead of showing a notification. Used in headless/test contexts
/// and whenever `insights.desktop_notifications` is disabled.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        log::info!("notification suppressed: {title} - {body}");
    }
}
