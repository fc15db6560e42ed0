use std::{cell::RefCell, fs::File, io::BufWriter, io::Write, path::Path};

use crate::{ScenarioRecord, monitoring::Monitor};

/// A monitor that records finished scenarios to a file in JSON Lines format.
///
/// Each [`ScenarioRecord`] is written as a JSON object on its own line as
/// soon as the scenario finishes, so a crashed run still leaves the
/// scenarios that completed. Lines are flushed immediately.
///
/// # Example
///
/// ```ignore
/// let recorder = Recorder::new("chat-window.jsonl")?;
/// let report = Runner::new("chat", ctx).monitor(recorder).run().await;
/// ```
#[derive(Debug)]
pub struct Recorder {
    writer: RefCell<BufWriter<File>>,
}

impl Recorder {
    /// Create a new recorder that writes to the specified path.
    ///
    /// # Errors
    ///
    /// Returns [`std::io::Error`] if the file cannot be created.
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: RefCell::new(BufWriter::new(file)),
        })
    }
}

impl Monitor for Recorder {
    fn on_scenario_finish(&self, record: &ScenarioRecord) {
        let Ok(mut writer) = self.writer.try_borrow_mut() else {
            tracing::warn!("Recorder failed to borrow writer");
            return;
        };
        if let Err(e) = serde_json::to_writer(&mut *writer, record) {
            tracing::warn!("Recorder failed to serialize scenario: {}", e);
        }
        let _ = writer.write_all(b"\n");
        let _ = writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outcome;
    use std::{io::Read, time::Duration};

    #[test]
    fn writes_one_line_per_scenario() {
        let path = std::env::temp_dir().join("parley_recorder_test.jsonl");
        let recorder = Recorder::new(&path).expect("Failed to create recorder");

        for name in ["open chat", "close chat"] {
            recorder.on_scenario_finish(&ScenarioRecord {
                name: name.into(),
                mode: None,
                outcome: Outcome::Passed,
                duration: Duration::from_millis(5),
                checks: Vec::new(),
                errors: Vec::new(),
            });
        }

        let mut file = File::open(&path).expect("Failed to open log file");
        let mut content = String::new();
        file.read_to_string(&mut content)
            .expect("Failed to read log file");

        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("open chat"));
        assert!(content.contains("\"passed\""));

        let _ = std::fs::remove_file(&path);
    }
}
