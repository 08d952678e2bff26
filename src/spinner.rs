//! Animated stderr spinner shown while a model round trip is in flight.

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Spinner animation frames - braille pattern spinner
const FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

const FRAME_DURATION: Duration = Duration::from_millis(80);

/// A spinner that animates on a background thread until stopped. Dropping
/// the handle stops it and clears the line.
pub struct Spinner {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Spinner {
    /// Start spinning with a message (hides the cursor).
    pub fn start(message: impl Into<String>) -> Self {
        let message = message.into();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::spawn(move || {
            let _ = execute!(io::stderr(), Hide);
            let mut frame = 0usize;
            while !stop_flag.load(Ordering::Relaxed) {
                render(FRAMES[frame], &message);
                frame = (frame + 1) % FRAMES.len();
                thread::sleep(FRAME_DURATION);
            }
            let _ = execute!(io::stderr(), MoveToColumn(0), Clear(ClearType::CurrentLine), Show);
        });

        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Stop the spinner and clear the line.
    pub fn stop(mut self) {
        self.halt();
    }

    /// Stop the spinner and leave a completion line behind.
    pub fn finish_with_message(mut self, msg: &str) {
        self.halt();
        let _ = execute!(
            io::stderr(),
            SetForegroundColor(Color::Rgb { r: 140, g: 140, b: 140 }),
            Print("  ✓ "),
            SetForegroundColor(Color::Rgb { r: 180, g: 180, b: 180 }),
            Print(msg),
            ResetColor,
            Print("\n")
        );
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.halt();
    }
}

fn render(frame: char, message: &str) {
    let _ = execute!(
        io::stderr(),
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        SetForegroundColor(Color::Rgb { r: 140, g: 140, b: 140 }),
        Print(format!("  {} ", frame)),
        SetForegroundColor(Color::Rgb { r: 180, g: 180, b: 180 }),
        Print(message),
        ResetColor
    );
    let _ = io::stderr().flush();
}
