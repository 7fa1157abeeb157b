use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Listens for 'q' (or Ctrl-C, which raw mode turns into a key) and cancels
/// `cancel` when it is pressed.
pub struct InputHandle {
    done: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InputHandle {
    pub fn start(cancel: CancellationToken) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);

        let thread = thread::spawn(move || {
            if let Err(e) = enable_raw_mode() {
                warn!("Key listener unavailable: {e}");
                return;
            }
            while !flag.load(Ordering::Relaxed) && !cancel.is_cancelled() {
                match event::poll(POLL_INTERVAL) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        debug!("Key listener stopped: {e}");
                        break;
                    }
                }
                if let Ok(Event::Key(key_event)) = event::read() {
                    let is_q = key_event.code == KeyCode::Char('q');
                    let is_ctrl_c = key_event.code == KeyCode::Char('c')
                        && key_event.modifiers.contains(KeyModifiers::CONTROL);

                    if (is_q || is_ctrl_c) && key_event.kind == KeyEventKind::Press {
                        cancel.cancel();
                        break;
                    }
                }
            }
            let _ = disable_raw_mode();
        });

        Self {
            done,
            thread: Some(thread),
        }
    }
}

impl Drop for InputHandle {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let _ = disable_raw_mode();
    }
}
