//! Broadcast + history store for captured output.

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock},
};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::LogMsg;

/// Default history size limit (8 MB).
const HISTORY_BYTES: usize = 8 * 1024 * 1024;

/// Live messages buffered per listener before it starts missing lines.
const BROADCAST_CAPACITY: usize = 1024;

#[derive(Clone)]
struct StoredMsg {
    msg: LogMsg,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredMsg>,
    total_bytes: usize,
}

/// Append-only sink for captured lines.
///
/// Several producers (stdout, stderr, relay logs) push concurrently; each
/// push stores one whole line, so lines never interleave mid-text. Listeners
/// either read the history or follow the live broadcast.
pub struct OutputStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<LogMsg>,
}

impl Default for OutputStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStore {
    /// Create a new output store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Push a message to both live listeners and history.
    pub fn push(&self, msg: LogMsg) {
        let _ = self.sender.send(msg.clone());
        let bytes = msg.approx_bytes();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredMsg { msg, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Push a stdout line.
    pub fn push_stdout<S: Into<String>>(&self, s: S) {
        self.push(LogMsg::Stdout(s.into()));
    }

    /// Push a stderr line.
    pub fn push_stderr<S: Into<String>>(&self, s: S) {
        self.push(LogMsg::Stderr(s.into()));
    }

    /// Push a log line reported over the relay.
    pub fn push_relay<S: Into<String>>(&self, s: S) {
        self.push(LogMsg::Relay(s.into()));
    }

    /// Push finished notification.
    pub fn push_finished(&self) {
        self.push(LogMsg::Finished);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<LogMsg> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<LogMsg> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.msg.clone())
            .collect()
    }

    /// Stream that yields history first, then live updates, until `Finished`.
    ///
    /// A line pushed while the snapshot is being taken can appear twice. A
    /// listener that falls behind gets a [`LogMsg::Dropped`] marker in place
    /// of the lines it missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, LogMsg> {
        let rx = self.get_receiver();
        let history = self.get_history();

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).map(|res| match res {
            Ok(msg) => msg,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Output listener fell behind");
                LogMsg::Dropped(skipped)
            }
        });

        hist.chain(live)
            .take_while(|msg| futures::future::ready(!matches!(msg, LogMsg::Finished)))
            .boxed()
    }

    /// Forward a stream of lines into this store.
    ///
    /// Stream errors are recorded as stderr lines; the forwarder ends when
    /// the stream does.
    pub fn spawn_forwarder<S, E>(self: Arc<Self>, stream: S) -> tokio::task::JoinHandle<()>
    where
        S: Stream<Item = Result<LogMsg, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::pin!(stream);

            while let Some(next) = stream.next().await {
                match next {
                    Ok(msg) => self.push(msg),
                    Err(e) => {
                        tracing::warn!("Output stream error: {e}");
                        self.push(LogMsg::Stderr(format!("stream error: {e}")));
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_push_order() {
        let store = OutputStore::new();
        store.push_stdout("one");
        store.push_stderr("two");
        store.push_relay("three");

        assert_eq!(
            store.get_history(),
            vec![
                LogMsg::Stdout("one".into()),
                LogMsg::Stderr("two".into()),
                LogMsg::Relay("three".into()),
            ]
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let store = OutputStore::new();
        let line = "x".repeat(1024 * 1024);
        for _ in 0..12 {
            store.push_stdout(line.clone());
        }

        let history = store.get_history();
        assert!(history.len() < 12);
        assert!(!history.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_forwarders_keep_lines_whole() {
        let store = Arc::new(OutputStore::new());

        let out = futures::stream::iter(
            (0..200).map(|i| Ok::<_, std::io::Error>(LogMsg::Stdout(format!("out line {i}")))),
        );
        let err = futures::stream::iter(
            (0..200).map(|i| Ok::<_, std::io::Error>(LogMsg::Stderr(format!("err line {i}")))),
        );

        let a = Arc::clone(&store).spawn_forwarder(out);
        let b = Arc::clone(&store).spawn_forwarder(err);
        a.await.unwrap();
        b.await.unwrap();

        let history = store.get_history();
        assert_eq!(history.len(), 400);

        let stdout: Vec<_> = history
            .iter()
            .filter_map(|m| match m {
                LogMsg::Stdout(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        let expected: Vec<_> = (0..200).map(|i| format!("out line {i}")).collect();
        assert_eq!(stdout, expected);
    }

    #[tokio::test]
    async fn test_history_plus_stream_stops_at_finished() {
        let store = Arc::new(OutputStore::new());
        store.push_stdout("before");

        let stream = store.history_plus_stream();
        store.push_stderr("after");
        store.push_finished();
        store.push_stdout("ignored");

        let lines: Vec<_> = stream.collect().await;
        assert_eq!(
            lines,
            vec![LogMsg::Stdout("before".into()), LogMsg::Stderr("after".into())]
        );
    }

    #[tokio::test]
    async fn test_slow_listener_sees_dropped_marker() {
        let store = OutputStore::new();
        let stream = store.history_plus_stream();

        let total = BROADCAST_CAPACITY + 100;
        for i in 0..total {
            store.push_stdout(format!("line {i}"));
        }
        store.push_finished();

        let lines: Vec<_> = stream.collect().await;
        let dropped: u64 = lines
            .iter()
            .filter_map(|m| match m {
                LogMsg::Dropped(n) => Some(*n),
                _ => None,
            })
            .sum();
        let kept = lines.iter().filter(|m| matches!(m, LogMsg::Stdout(_))).count();

        assert!(dropped > 0);
        assert_eq!(kept as u64 + dropped, total as u64);
        assert_eq!(lines.last(), Some(&LogMsg::Stdout(format!("line {}", total - 1))));
        assert_eq!(store.get_history().len(), total + 1);
    }
}
