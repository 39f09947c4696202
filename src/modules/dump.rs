//! Hex-dump logging module.
//!
//! Appends one block per chunk to `dump-<pid>.log`:
//!
//! ```text
//! [2026-01-16 10:42:07] 203.0.113.5:51000 --> 10.0.0.1:443 TCP
//! 00000000  66 6c 61 67 7b 68 65 6c 6c 6f 77 6f 72 6c 64 7d  flag{helloworld}
//! 00000010  0a 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00  ..
//! ```
//!
//! Arguments: `[0]` directory for the log file (default: system temp dir).
//! The file is opened on first use and stays open for the whole process,
//! so only the first call's directory counts. `close()` flushes it.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::inspect::module::{Module, ModuleArgument};
use crate::inspect::record::{StatusCode, TransferRecord};

const BYTES_PER_LINE: usize = 16;

struct DumpSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Process-wide dump log.
#[derive(Default)]
pub struct DumpModule {
    sink: Mutex<Option<DumpSink>>,
}

impl DumpModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the open log file, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.sink
            .lock()
            .ok()
            .and_then(|sink| sink.as_ref().map(|s| s.path.clone()))
    }

    fn open(dir: &Path) -> std::io::Result<DumpSink> {
        let path = dir.join(format!("dump-{}.log", std::process::id()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(path = %path.display(), "Dump log opened");
        Ok(DumpSink {
            path,
            writer: BufWriter::new(file),
        })
    }
}

impl Module for DumpModule {
    fn process(&self, record: &TransferRecord<'_>, args: &[ModuleArgument]) -> StatusCode {
        let Ok(mut guard) = self.sink.lock() else {
            return StatusCode::ModuleError;
        };

        if guard.is_none() {
            let dir = args
                .first()
                .and_then(ModuleArgument::as_str)
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir);
            match Self::open(&dir) {
                Ok(sink) => *guard = Some(sink),
                Err(e) => {
                    tracing::error!(dir = %dir.display(), error = %e, "Failed to open dump log");
                    return StatusCode::FileError;
                }
            }
        }

        let Some(sink) = guard.as_mut() else {
            return StatusCode::ModuleError;
        };

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let block = render_block(record, &timestamp);

        match sink
            .writer
            .write_all(block.as_bytes())
            .and_then(|_| sink.writer.flush())
        {
            Ok(()) => StatusCode::Ok,
            Err(e) => {
                tracing::error!(path = %sink.path.display(), error = %e, "Failed to write dump log");
                StatusCode::FileError
            }
        }
    }

    fn close(&self) {
        let Ok(mut guard) = self.sink.lock() else {
            return;
        };
        if let Some(mut sink) = guard.take() {
            if let Err(e) = sink.writer.flush() {
                tracing::warn!(path = %sink.path.display(), error = %e, "Failed to flush dump log");
            }
            tracing::info!(path = %sink.path.display(), "Dump log closed");
        }
    }
}

/// Header line plus hex lines for one record, followed by a blank line.
pub fn render_block(record: &TransferRecord<'_>, timestamp: &str) -> String {
    let tuple = record.tuple();
    let mut out = format!(
        "[{}] {}:{} --> {}:{} {}\n",
        timestamp,
        tuple.src_ip(),
        tuple.src_port,
        tuple.dst_ip(),
        tuple.dst_port,
        record.protocol()
    );
    out.push_str(&hex_dump(record.payload()));
    out.push('\n');
    out
}

/// 16 bytes per line; the last line is padded with `00`.
pub fn hex_dump(payload: &[u8]) -> String {
    let mut out = String::new();

    for (line, bytes) in payload.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(out, "{:08x} ", line * BYTES_PER_LINE);
        for i in 0..BYTES_PER_LINE {
            let _ = write!(out, " {:02x}", bytes.get(i).copied().unwrap_or(0));
        }
        out.push_str("  ");
        out.extend(bytes.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::tuple::{EndpointTuple, Protocol};
    use std::net::Ipv4Addr;

    fn tuple() -> EndpointTuple {
        EndpointTuple {
            src_addr: u32::from(Ipv4Addr::new(203, 0, 113, 5)),
            dst_addr: u32::from(Ipv4Addr::new(10, 0, 0, 1)),
            src_port: 51000,
            dst_port: 443,
        }
    }

    #[test]
    fn test_flag_payload_two_lines() {
        let payload = b"flag{helloworld}\n\0";
        assert_eq!(payload.len(), 18);

        let dump = hex_dump(payload);
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "00000000  66 6c 61 67 7b 68 65 6c 6c 6f 77 6f 72 6c 64 7d  flag{helloworld}"
        );
        assert_eq!(
            lines[1],
            "00000010  0a 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00  .."
        );
    }

    #[test]
    fn test_block_header() {
        let record = TransferRecord::new(tuple(), Protocol::Udp, b"hi").unwrap();
        let block = render_block(&record, "2026-01-16 10:42:07");
        let header = block.lines().next().unwrap();
        assert_eq!(
            header,
            "[2026-01-16 10:42:07] 203.0.113.5:51000 --> 10.0.0.1:443 UDP"
        );
        assert!(block.ends_with("\n\n"));
    }

    #[test]
    fn test_empty_payload_has_header_only() {
        let record = TransferRecord::new(tuple(), Protocol::Tcp, b"").unwrap();
        let block = render_block(&record, "t");
        assert_eq!(block, "[t] 203.0.113.5:51000 --> 10.0.0.1:443 TCP\n\n");
    }

    #[test]
    fn test_writes_to_directory_argument() {
        let dir = std::env::temp_dir().join(format!("stream-inspect-dump-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let module = DumpModule::new();
        let record = TransferRecord::new(tuple(), Protocol::Tcp, b"GET / HTTP/1.1\r\n").unwrap();
        let args = [ModuleArgument::new(dir.to_str().unwrap()).unwrap()];

        assert_eq!(module.process(&record, &args), StatusCode::Ok);
        assert_eq!(module.process(&record, &args), StatusCode::Ok);

        let path = module.path().unwrap();
        module.close();
        assert!(module.path().is_none());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("-->").count(), 2);
        assert!(contents.contains("GET / HTTP/1.1.."));

        std::fs::remove_dir_all(&dir).unwrap_or_default();
    }

    #[test]
    fn test_unwritable_directory_is_file_error() {
        let module = DumpModule::new();
        let record = TransferRecord::new(tuple(), Protocol::Tcp, b"x").unwrap();
        let args = [ModuleArgument::new("/nonexistent/stream-inspect/dir").unwrap()];
        assert_eq!(module.process(&record, &args), StatusCode::FileError);
    }
}
