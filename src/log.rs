use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::err::{Error, SysErr};
use crate::vm::{EventKind, HandlerId, SequenceId, TickSource};

/// What the scheduler did to a sequence or handler
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Record {
    Spawned {
        sequence: SequenceId,
        handler: Option<HandlerId>,
        parent: Option<SequenceId>,
    },
    Resumed {
        sequence: SequenceId,
    },
    Suspended {
        sequence: SequenceId,
        ticks: i64,
    },
    Terminated {
        sequence: SequenceId,
    },
    Faulted {
        sequence: SequenceId,
        error: String,
    },
    Deactivated {
        sequence: SequenceId,
    },
    Fired {
        event: EventKind,
        user_id: Option<i64>,
        spawned: usize,
    },
    Printed {
        sequence: SequenceId,
        text: String,
    },
}

impl Record {
    pub fn tag(&self) -> &'static str {
        match *self {
            Record::Spawned { .. } => "spawned",
            Record::Resumed { .. } => "resumed",
            Record::Suspended { .. } => "suspended",
            Record::Terminated { .. } => "terminated",
            Record::Faulted { .. } => "faulted",
            Record::Deactivated { .. } => "deactivated",
            Record::Fired { .. } => "fired",
            Record::Printed { .. } => "printed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogMessage {
    pub tick: i64,
    pub source: Option<TickSource>,
    pub tag: &'static str,
    pub data: Record,
}

pub trait LogBackend {
    fn run_forever(&self, channel: Receiver<LogMessage>) -> Result<JoinHandle<()>, Error>;
}

#[derive(Debug, Default)]
pub struct ConsoleLogger;

impl ConsoleLogger {
    pub fn new() -> ConsoleLogger {
        ConsoleLogger {}
    }
}

impl LogBackend for ConsoleLogger {
    fn run_forever(&self, channel: Receiver<LogMessage>) -> Result<JoinHandle<()>, Error> {
        Ok(thread::spawn(move || {
            while let Ok(msg) = channel.recv() {
                let source = msg.source.map_or("-", |s| match s {
                    TickSource::Audio => "audio",
                    TickSource::Frame => "frame",
                });
                println!("{}, {}, {}, {:?}", msg.tick, source, msg.tag, msg.data);
            }
        }))
    }
}

/// Writes each message as a line of JSON to a file that does not exist yet
#[derive(Debug)]
pub struct FileLogger {
    pattern: String,
}

impl FileLogger {
    pub fn new(pattern: &str) -> FileLogger {
        FileLogger {
            pattern: String::from(pattern),
        }
    }
}

impl Default for FileLogger {
    fn default() -> FileLogger {
        FileLogger::new("lockstep.log")
    }
}

fn unique_filename(pattern: &str) -> OsString {
    let orig = Path::new(pattern);
    let stem = orig
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("lockstep");
    let ext = orig.extension().and_then(|s| s.to_str()).unwrap_or("log");

    let mut i = 1;
    let mut buff = PathBuf::from(pattern);
    while buff.exists() {
        buff.set_file_name(format!("{}-{}.{}", stem, i, ext));
        i += 1;
    }
    buff.into_os_string()
}

impl LogBackend for FileLogger {
    fn run_forever(&self, channel: Receiver<LogMessage>) -> Result<JoinHandle<()>, Error> {
        let filename = unique_filename(&self.pattern);
        let mut file = fs::File::create(&filename)?;
        log::debug!(target: "lockstep::log", "tracing to {:?}", filename);
        Ok(thread::spawn(move || {
            while let Ok(msg) = channel.recv() {
                let line = match serde_json::to_string(&msg) {
                    Ok(line) => line + "\n",
                    Err(err) => {
                        log::warn!(target: "lockstep::log", "unserialisable trace: {}", err);
                        continue;
                    }
                };
                if let Err(err) = file.write_all(line.as_bytes()) {
                    log::warn!(target: "lockstep::log", "trace write failed: {}", err);
                    break;
                }
            }
        }))
    }
}

#[derive(Clone, Debug)]
pub struct Logger {
    channel: Sender<LogMessage>,
}

impl Logger {
    pub fn new(channel: Sender<LogMessage>) -> Logger {
        Logger { channel: channel }
    }

    pub fn log(&self, tick: i64, source: Option<TickSource>, data: Record) {
        let msg = LogMessage {
            tick: tick,
            source: source,
            tag: data.tag(),
            data: data,
        };
        // A dropped receiver only means nobody is listening
        let _ = self.channel.send(msg);
    }
}

/// Feed recorded messages through a backend, returning once it has handled
/// all of them
pub fn replay(backend: &dyn LogBackend, messages: &[LogMessage]) -> Result<usize, Error> {
    let (tx, rx) = channel();
    let handle = backend.run_forever(rx)?;
    for msg in messages {
        if tx.send(msg.clone()).is_err() {
            break;
        }
    }
    drop(tx);
    handle
        .join()
        .map_err(|_| Error::from(SysErr::ThreadPanicked))?;
    Ok(messages.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_logger_tags() {
        let (tx, rx) = channel();
        let logger = Logger::new(tx);
        logger.log(3, Some(TickSource::Audio), Record::Terminated { sequence: 9 });
        let msg = rx.recv().unwrap();
        assert_eq!(msg.tag, "terminated");
        assert_eq!(msg.tick, 3);
    }

    #[test]
    fn test_logger_outlives_receiver() {
        let (tx, rx) = channel();
        drop(rx);
        Logger::new(tx).log(0, None, Record::Resumed { sequence: 1 });
    }

    #[test]
    fn test_file_logger() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("trace.log");
        fs::write(&pattern, b"taken").unwrap();

        let (tx, rx) = channel();
        let handle = FileLogger::new(pattern.to_str().unwrap())
            .run_forever(rx)
            .unwrap();
        Logger::new(tx).log(
            12,
            Some(TickSource::Frame),
            Record::Printed {
                sequence: 2,
                text: String::from("hi"),
            },
        );
        handle.join().unwrap();

        let mut text = String::new();
        fs::File::open(dir.path().join("trace-1.log"))
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        let line: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["tick"], 12);
        assert_eq!(line["source"], "frame");
        assert_eq!(line["data"]["printed"]["text"], "hi");
    }

    #[test]
    fn test_replay() {
        let messages = vec![
            LogMessage {
                tick: 0,
                source: None,
                tag: "resumed",
                data: Record::Resumed { sequence: 1 },
            },
            LogMessage {
                tick: 4,
                source: Some(TickSource::Audio),
                tag: "terminated",
                data: Record::Terminated { sequence: 1 },
            },
        ];
        assert_eq!(replay(&ConsoleLogger::new(), &messages).unwrap(), 2);

        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("replay.log");
        let backend = FileLogger::new(pattern.to_str().unwrap());
        assert_eq!(replay(&backend, &messages).unwrap(), 2);
        let text = fs::read_to_string(&pattern).unwrap();
        let tags: Vec<String> = text
            .lines()
            .map(|line| {
                let line: serde_json::Value = serde_json::from_str(line).unwrap();
                String::from(line["tag"].as_str().unwrap())
            })
            .collect();
        assert_eq!(tags, vec!["resumed", "terminated"]);
    }
}
