//! Thin seam over russh channels.
//!
//! Exec and shell logic is written against these two traits rather than the
//! concrete channel types, so it can be driven by scripted message sequences
//! in tests.

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, ChannelReadHalf, ChannelWriteHalf};

use super::error::RemoteError;
use super::shell::TerminalSize;

/// Source of incoming channel messages. `None` means the channel is gone.
#[async_trait]
pub trait ChannelEvents: Send {
    async fn next_event(&mut self) -> Option<ChannelMsg>;
}

/// Outgoing half of a channel.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send_data(&self, data: &[u8]) -> Result<(), String>;
    async fn send_eof(&self) -> Result<(), String>;
    async fn resize(&self, size: TerminalSize) -> Result<(), String>;
    async fn close(&self) -> Result<(), String>;
}

#[async_trait]
impl ChannelEvents for Channel<Msg> {
    async fn next_event(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }
}

#[async_trait]
impl ChannelEvents for ChannelReadHalf {
    async fn next_event(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }
}

#[async_trait]
impl ChannelSink for ChannelWriteHalf<Msg> {
    async fn send_data(&self, data: &[u8]) -> Result<(), String> {
        self.data(data)
            .await
            .map_err(|e| format!("Failed to write to channel: {}", e))
    }

    async fn send_eof(&self) -> Result<(), String> {
        self.eof()
            .await
            .map_err(|e| format!("Failed to send EOF: {}", e))
    }

    async fn resize(&self, size: TerminalSize) -> Result<(), String> {
        self.window_change(size.cols, size.rows, size.pix_width, size.pix_height)
            .await
            .map_err(|e| format!("Failed to resize terminal: {}", e))
    }

    async fn close(&self) -> Result<(), String> {
        ChannelWriteHalf::close(self)
            .await
            .map_err(|e| format!("Failed to close channel: {}", e))
    }
}

/// Wait for the server's answer to a request sent with `want_reply = true`.
///
/// Returns `Ok(true)` on success, `Ok(false)` on refusal. Window adjustments
/// and other bookkeeping messages that arrive first are skipped.
pub(crate) async fn await_reply<E: ChannelEvents + ?Sized>(
    events: &mut E,
) -> Result<bool, RemoteError> {
    loop {
        match events.next_event().await {
            Some(ChannelMsg::Success) => return Ok(true),
            Some(ChannelMsg::Failure) => return Ok(false),
            Some(ChannelMsg::Close) | None => return Err(RemoteError::ConnectionClosed),
            Some(_) => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted channel doubles shared by the exec and shell tests.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use russh::{ChannelMsg, CryptoVec};
    use tokio::sync::mpsc;

    use super::{ChannelEvents, ChannelSink};
    use crate::remote::shell::TerminalSize;

    /// Plays back queued messages, then reports the channel as gone once the
    /// sender side is dropped. Stays pending while the sender is alive.
    pub struct ScriptedEvents {
        rx: mpsc::UnboundedReceiver<ChannelMsg>,
    }

    impl ScriptedEvents {
        pub fn new() -> (mpsc::UnboundedSender<ChannelMsg>, Self) {
            let (tx, rx) = mpsc::unbounded_channel();
            (tx, Self { rx })
        }

        pub fn from_messages(messages: Vec<ChannelMsg>) -> Self {
            let (tx, events) = Self::new();
            for msg in messages {
                let _ = tx.send(msg);
            }
            events
        }
    }

    #[async_trait]
    impl ChannelEvents for ScriptedEvents {
        async fn next_event(&mut self) -> Option<ChannelMsg> {
            self.rx.recv().await
        }
    }

    pub fn data(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::Data {
            data: CryptoVec::from_slice(bytes),
        }
    }

    pub fn stderr(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(bytes),
            ext: 1,
        }
    }

    pub fn exit(status: u32) -> ChannelMsg {
        ChannelMsg::ExitStatus {
            exit_status: status,
        }
    }

    /// Everything written to the sink, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Data(Vec<u8>),
        Eof,
        Resize(TerminalSize),
        Close,
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<Sent>>,
        pub fail_writes: bool,
    }

    impl RecordingSink {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_writes: true,
            }
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn data(&self) -> Vec<u8> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Data(d) => Some(d),
                    _ => None,
                })
                .flatten()
                .collect()
        }

        fn record(&self, sent: Sent) {
            self.sent.lock().unwrap().push(sent);
        }
    }

    #[async_trait]
    impl ChannelSink for RecordingSink {
        async fn send_data(&self, data: &[u8]) -> Result<(), String> {
            if self.fail_writes {
                return Err("channel write refused".to_string());
            }
            self.record(Sent::Data(data.to_vec()));
            Ok(())
        }

        async fn send_eof(&self) -> Result<(), String> {
            self.record(Sent::Eof);
            Ok(())
        }

        async fn resize(&self, size: TerminalSize) -> Result<(), String> {
            self.record(Sent::Resize(size));
            Ok(())
        }

        async fn close(&self) -> Result<(), String> {
            self.record(Sent::Close);
            Ok(())
        }
    }
}
