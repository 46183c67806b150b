//! Writers for capturing log output in tests.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::ServiceIdentity;

pub fn test_identity() -> Arc<ServiceIdentity> {
    Arc::new(ServiceIdentity {
        service: "test-service".to_string(),
        short_name: "test".to_string(),
        version: "0.0.1".to_string(),
        environment: "test".to_string(),
        deployment_id: None,
        git_commit: "deadbee".to_string(),
    })
}

#[derive(Clone)]
pub struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl BufferWriter {
    pub fn new() -> (Self, CapturedLogs) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                buffer: buffer.clone(),
            },
            CapturedLogs { buffer },
        )
    }
}

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
    }

    pub fn json_lines(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MakeWriter<'_> for BufferWriter {
    type Writer = BufferWriter;

    fn make_writer(&self) -> Self::Writer {
        self.clone()
    }
}

/// A sink that rejects every write.
pub struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MakeWriter<'_> for FailingWriter {
    type Writer = FailingWriter;

    fn make_writer(&self) -> Self::Writer {
        FailingWriter
    }
}
