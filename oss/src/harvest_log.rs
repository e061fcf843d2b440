// OSS — HARVEST LOG
// One line per reaped worker. Each line is flushed immediately: the
// watchdog path ends in abort(), which skips destructors.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::engine::clock::LogicalTime;

/// One harvested worker, as recorded by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Harvest {
    pub pid: u32,
    pub slot: usize,
    /// Orchestrator clock at harvest time.
    pub at: LogicalTime,
    /// What the worker left in the mailbox, if anything.
    pub reported: Option<LogicalTime>,
}

pub struct HarvestLog<W: Write> { out: W, lines: u64 }

impl HarvestLog<BufWriter<File>> {
    /// Create (truncate) the log file.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(HarvestLog::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> HarvestLog<W> {
    pub fn new(out: W) -> Self { HarvestLog { out, lines: 0 } }

    pub fn record(&mut self, h: &Harvest) -> io::Result<()> {
        match h.reported {
            Some(r) => writeln!(
                self.out,
                "Master: Child pid {} is terminating at my time {} because it reached {} in user",
                h.pid, h.at, r,
            )?,
            None => writeln!(
                self.out,
                "Master: Child pid {} is terminating at my time {} without reporting",
                h.pid, h.at,
            )?,
        }
        self.lines += 1;
        self.out.flush()
    }

    #[inline(always)] pub fn lines(&self) -> u64 { self.lines }

    pub fn into_inner(self) -> W { self.out }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_reported_and_silent_workers() {
        let mut log = HarvestLog::new(Vec::new());
        log.record(&Harvest { pid: 42, slot: 0, at: LogicalTime::new(1, 20), reported: Some(LogicalTime::new(1, 10)) }).unwrap();
        log.record(&Harvest { pid: 43, slot: 1, at: LogicalTime::new(2, 0), reported: None }).unwrap();
        assert_eq!(log.lines(), 2);
        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Master: Child pid 42 is terminating at my time 1.000000020 because it reached 1.000000010 in user");
        assert_eq!(lines[1], "Master: Child pid 43 is terminating at my time 2.000000000 without reporting");
    }

    #[test]
    fn file_log_is_readable_without_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oss.out");
        let mut log = HarvestLog::create(&path).unwrap();
        log.record(&Harvest { pid: 7, slot: 0, at: LogicalTime::new(0, 9), reported: Some(LogicalTime::new(0, 8)) }).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Child pid 7"));
        drop(log);
    }
}
