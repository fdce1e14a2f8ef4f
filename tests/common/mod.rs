#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::Dispatch;
use waggle::Request;

/// A subscriber writing plain-text logs into memory.
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn dispatch(&self) -> Dispatch {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        Dispatch::new(subscriber)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn get(uri: &str) -> Request {
    request(http::Request::get(uri))
}

pub fn request(builder: http::request::Builder) -> Request {
    let req = builder
        .header("host", "bees.example")
        .header("user-agent", "waggle-test")
        .body(Bytes::new())
        .unwrap();
    Request::from_http(req, Some("192.0.2.10:40000".parse().unwrap())).unwrap()
}
