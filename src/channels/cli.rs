//! CLI bus — stdin/stdout REPL for local use.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channels::bus::{BusContext, InboundMessage, MessageBus, MessageStream};
use crate::error::BusError;

const PLATFORM: &str = "cli";
const LOCAL_USER: &str = "local-user";

type InputSource = Arc<dyn Fn() -> Box<dyn AsyncRead + Send + Unpin> + Send + Sync>;

/// A bus that reads lines from stdin and writes replies to stdout.
///
/// When input reaches EOF (stdin at /dev/null under a service manager) the
/// stream stays open and idle rather than ending.
pub struct CliBus {
    input: InputSource,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl CliBus {
    pub fn new() -> Self {
        Self::with_input(tokio::io::stdin)
    }

    /// Read from another source. `open` is called on every start.
    pub fn with_input<R, F>(open: F) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self {
            input: Arc::new(move || Box::new(open()) as Box<dyn AsyncRead + Send + Unpin>),
            reader: Mutex::new(None),
        }
    }

    fn abort_reader(&self) {
        if let Ok(mut reader) = self.reader.lock()
            && let Some(handle) = reader.take()
        {
            handle.abort();
        }
    }
}

impl Default for CliBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for CliBus {
    fn name(&self) -> &str {
        PLATFORM
    }

    async fn start(&self) -> Result<MessageStream, BusError> {
        // A restart replaces the previous reader so only one task owns stdin.
        self.abort_reader();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let input = (self.input)();

        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(input).lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let msg = InboundMessage::new(BusContext::new(PLATFORM, LOCAL_USER), line);
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("CLI input closed, no longer reading");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
            // Idle until the consumer goes away.
            tx.closed().await;
        });

        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(handle);
        }

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn is_allowed(&self, _context: &BusContext) -> bool {
        true
    }

    async fn reply(&self, content: &str, _context: &BusContext) -> Result<(), BusError> {
        println!("\n{}\n", content);
        eprint!("> ");
        Ok(())
    }

    async fn post(&self, content: &str, _target: Option<&str>) -> Result<(), BusError> {
        println!("\n[notice] {}\n", content);
        eprint!("> ");
        Ok(())
    }

    async fn send_status(&self, status: &str, _context: &BusContext) -> Result<(), BusError> {
        eprintln!("⏳ {}", status);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BusError> {
        self.abort_reader();
        Ok(())
    }
}
