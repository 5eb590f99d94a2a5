// crates/cli/src/printer.rs
//! Terminal observer: streams progress text to stdout as it grows and
//! reports connection changes on stderr.

use std::io::{self, Write};
use std::sync::Mutex;

use jobwatch_core::{StateObserver, TrackerError, TrackerView};
use jobwatch_types::JobState;

struct PrinterState<W> {
    out: W,
    /// Bytes of progress text already written.
    printed: usize,
    last_message: Option<String>,
}

pub struct ProgressPrinter<W> {
    inner: Mutex<PrinterState<W>>,
}

impl ProgressPrinter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ProgressPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: Mutex::new(PrinterState {
                out,
                printed: 0,
                last_message: None,
            }),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        match self.inner.into_inner() {
            Ok(state) => state.out,
            Err(poisoned) => poisoned.into_inner().out,
        }
    }

    fn with_state(&self, f: impl FnOnce(&mut PrinterState<W>)) {
        match self.inner.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl<W: Write + Send> StateObserver for ProgressPrinter<W> {
    fn on_state(&self, view: &TrackerView) {
        self.with_state(|st| {
            let text = view.state.progress_text();
            // Progress only grows, so the printed prefix is always intact.
            if let Some(fresh) = text.get(st.printed..) {
                if !fresh.is_empty() {
                    let _ = st.out.write_all(fresh.as_bytes());
                    let _ = st.out.flush();
                }
                st.printed = text.len();
            }

            if view.connection_message != st.last_message {
                if let Some(message) = &view.connection_message {
                    eprintln!("[{message}]");
                }
                st.last_message = view.connection_message.clone();
            }
        });
    }

    fn on_terminal(&self, state: &JobState) {
        self.with_state(|st| {
            if st.printed > 0 {
                let _ = writeln!(st.out);
            }
        });
        eprintln!("Job {} finished: {}", state.id(), state.status());
    }

    fn on_error(&self, error: &TrackerError) {
        eprintln!("error: {error}");
    }
}
