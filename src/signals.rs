use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tokio::sync::mpsc;

/// What should we do when the user stops this program?
///
/// SIGINT and SIGTERM are forwarded to the returned channel, which the
/// observer listens on to begin shutting down.
pub fn handle_termination() -> std::io::Result<mpsc::UnboundedReceiver<i32>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        for signal in signals.forever() {
            log::info!("Received signal {signal}, shutting down");
            if tx.send(signal).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Tells systemd we are up. Does nothing when not running under systemd.
pub fn notify_ready() {
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);
}

pub fn notify_stopping() {
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
}
