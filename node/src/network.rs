pub mod codec;
pub mod constants;

use crate::errors::ChannelError;
use crate::metrics;
use crate::primitives::{Label, WireMessage};
use crate::tracking::{self, AutoAbortTask};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Sending side of the link to the peer. Sends are expected to be quick; the
/// session only calls this from its dedicated send task.
#[async_trait::async_trait]
pub trait MessageTransportSender: Send + Sync + 'static {
    /// Returns an error only if the link is unusable. A successful send does
    /// not mean the peer has processed the message.
    async fn send(&self, message: WireMessage) -> anyhow::Result<()>;
}

/// Receiving side of the link to the peer. The session runs a loop calling
/// `receive()` and stores every message in its inbox.
#[async_trait::async_trait]
pub trait MessageTransportReceiver: Send + 'static {
    async fn receive(&mut self) -> anyhow::Result<WireMessage>;
}

/// Both halves of a link to the peer.
pub struct Transport {
    pub sender: Arc<dyn MessageTransportSender>,
    pub receiver: Box<dyn MessageTransportReceiver>,
}

#[derive(Default)]
struct InboxState {
    messages: HashMap<String, String>,
    /// Labels already taken during this session. Re-deliveries are dropped.
    consumed: HashSet<String>,
    failure: Option<String>,
}

/// Labelled message store with blocking retrieval. Only the receive task
/// writes to it; the channel state machine is the only reader.
pub struct MessageInbox {
    state: Mutex<InboxState>,
    notify: Notify,
    cancel: CancellationToken,
}

impl Default for MessageInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageInbox {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InboxState::default()),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stores a message. Returns false if it was dropped as a replay or a
    /// duplicate of a message still waiting to be taken. The `over` label
    /// cancels the session instead of being stored.
    pub fn deliver(&self, message: WireMessage) -> bool {
        if message.is_over() {
            tracing::debug!("peer closed the session");
            self.cancel.cancel();
            self.notify.notify_waiters();
            return true;
        }
        let accepted = {
            let mut state = self.state.lock().unwrap();
            if state.consumed.contains(&message.label)
                || state.messages.contains_key(&message.label)
            {
                false
            } else {
                state.messages.insert(message.label.clone(), message.payload);
                true
            }
        };
        if accepted {
            metrics::ZCHANNEL_MESSAGES_RECEIVED.inc();
            self.notify.notify_waiters();
        } else {
            metrics::ZCHANNEL_MESSAGES_DROPPED.inc();
            tracing::warn!(label = %message.label, "dropping replayed message");
        }
        accepted
    }

    /// Removes and returns the payload for `label` if present.
    pub fn take(&self, label: &str) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        let payload = state.messages.remove(label)?;
        state.consumed.insert(label.to_string());
        Some(payload)
    }

    /// Marks the link as broken; the next wait that finds nothing reports it.
    pub fn record_failure(&self, error: &anyhow::Error) {
        self.state.lock().unwrap().failure = Some(format!("{:#}", error));
        self.notify.notify_waiters();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Waits until a message with `label` arrives and takes it. Messages that
    /// arrived before the peer's `over` are still returned.
    pub async fn wait_for(&self, label: &str, timeout: Duration) -> Result<String, ChannelError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.take(label) {
                return Ok(payload);
            }
            let failure = self.state.lock().unwrap().failure.clone();
            if let Some(failure) = failure {
                return Err(anyhow::anyhow!("transport failed: {}", failure).into());
            }
            if self.cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ChannelError::Timeout {
                        label: label.to_string(),
                    });
                }
            }
        }
    }
}

/// One session's view of the link: an inbox fed by the receive task and an
/// outbox drained by the send task. Dropping it aborts both tasks.
pub struct Messenger {
    inbox: Arc<MessageInbox>,
    outbox: mpsc::UnboundedSender<WireMessage>,
    wait_timeout: Duration,
    send_task: AutoAbortTask<()>,
    _receive_task: AutoAbortTask<()>,
}

impl Messenger {
    pub fn start(transport: Transport, wait_timeout: Duration) -> Self {
        let inbox = Arc::new(MessageInbox::new());
        let (outbox, outbox_receiver) = mpsc::unbounded_channel();
        let send_task = tracking::spawn_checked(
            "send messages",
            run_send_loop(transport.sender, outbox_receiver, inbox.clone()),
        );
        let receive_task = tracking::spawn_checked(
            "receive messages",
            run_receive_loop(transport.receiver, inbox.clone()),
        );
        Self {
            inbox,
            outbox,
            wait_timeout,
            send_task,
            _receive_task: receive_task,
        }
    }

    /// Enqueues a message for the peer. Never blocks.
    pub fn send(&self, label: &Label, payload: impl Into<String>) -> Result<(), ChannelError> {
        let message = WireMessage::new(label, payload)
            .map_err(|err| ChannelError::malformed(label, err))?;
        tracing::debug!(label = %message.label, "sending");
        self.outbox
            .send(message)
            .map_err(|_| anyhow::anyhow!("outbox closed"))?;
        metrics::ZCHANNEL_MESSAGES_SENT.inc();
        Ok(())
    }

    /// Waits for the peer's (or the ledger's) message with `label`, up to the
    /// session's wait timeout.
    pub async fn wait_for(&self, label: &Label) -> Result<String, ChannelError> {
        let label = label.to_string();
        tracing::debug!(%label, "waiting");
        self.inbox.wait_for(&label, self.wait_timeout).await
    }

    /// Puts a message directly into the local inbox, as if the peer sent it.
    pub fn deliver_local(&self, label: &Label, payload: impl Into<String>) -> bool {
        self.inbox.deliver(WireMessage {
            label: label.to_string(),
            payload: payload.into(),
        })
    }

    /// Tells the peer this session is over, flushes everything queued so far
    /// and stops both tasks.
    pub async fn shutdown(self) {
        let Messenger {
            inbox,
            outbox,
            wait_timeout,
            send_task,
            _receive_task,
        } = self;
        outbox.send(WireMessage::over()).ok();
        drop(outbox);
        if tokio::time::timeout(wait_timeout, send_task).await.is_err() {
            tracing::warn!("timed out flushing outbox on shutdown");
        }
        inbox.cancel();
    }

    #[cfg(test)]
    pub fn inbox(&self) -> &MessageInbox {
        &self.inbox
    }
}

async fn run_send_loop(
    sender: Arc<dyn MessageTransportSender>,
    mut outbox: mpsc::UnboundedReceiver<WireMessage>,
    inbox: Arc<MessageInbox>,
) -> anyhow::Result<()> {
    while let Some(message) = outbox.recv().await {
        let over = message.is_over();
        if let Err(err) = sender.send(message).await {
            if over {
                tracing::debug!("peer went away before our over was sent");
                break;
            }
            inbox.record_failure(&err);
            return Err(err);
        }
        if over {
            break;
        }
    }
    Ok(())
}

async fn run_receive_loop(
    mut receiver: Box<dyn MessageTransportReceiver>,
    inbox: Arc<MessageInbox>,
) -> anyhow::Result<()> {
    loop {
        let message = tokio::select! {
            message = receiver.receive() => message,
            _ = inbox.cancelled() => return Ok(()),
        };
        match message {
            Ok(message) => {
                let over = message.is_over();
                inbox.deliver(message);
                if over {
                    return Ok(());
                }
            }
            Err(err) => {
                inbox.record_failure(&err);
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::{MessageTransportReceiver, MessageTransportSender, Transport};
    use crate::primitives::WireMessage;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    pub struct TestTransportSender {
        sender: mpsc::UnboundedSender<WireMessage>,
    }

    pub struct TestTransportReceiver {
        receiver: mpsc::UnboundedReceiver<WireMessage>,
    }

    #[async_trait::async_trait]
    impl MessageTransportSender for TestTransportSender {
        async fn send(&self, message: WireMessage) -> anyhow::Result<()> {
            self.sender
                .send(message)
                .map_err(|_| anyhow::anyhow!("Channel closed"))
        }
    }

    #[async_trait::async_trait]
    impl MessageTransportReceiver for TestTransportReceiver {
        async fn receive(&mut self) -> anyhow::Result<WireMessage> {
            self.receiver
                .recv()
                .await
                .ok_or_else(|| anyhow::anyhow!("Channel closed"))
        }
    }

    /// Two in-memory transports wired to each other.
    pub fn new_test_transports() -> (Transport, Transport) {
        let (to_first, first_inbound) = mpsc::unbounded_channel();
        let (to_second, second_inbound) = mpsc::unbounded_channel();
        let first = Transport {
            sender: Arc::new(TestTransportSender { sender: to_second }),
            receiver: Box::new(TestTransportReceiver {
                receiver: first_inbound,
            }),
        };
        let second = Transport {
            sender: Arc::new(TestTransportSender { sender: to_first }),
            receiver: Box::new(TestTransportReceiver {
                receiver: second_inbound,
            }),
        };
        (first, second)
    }

    /// A transport whose peer is the test itself: returns the transport along
    /// with the handles to inject and observe messages.
    pub fn new_scripted_transport() -> (
        Transport,
        mpsc::UnboundedSender<WireMessage>,
        mpsc::UnboundedReceiver<WireMessage>,
    ) {
        let (inject, inbound) = mpsc::unbounded_channel();
        let (outbound, observe) = mpsc::unbounded_channel();
        let transport = Transport {
            sender: Arc::new(TestTransportSender { sender: outbound }),
            receiver: Box::new(TestTransportReceiver { receiver: inbound }),
        };
        (transport, inject, observe)
    }

    /// A pair of messengers connected to each other.
    pub fn new_test_messengers(
        wait_timeout: std::time::Duration,
    ) -> (super::Messenger, super::Messenger) {
        let (first, second) = new_test_transports();
        (
            super::Messenger::start(first, wait_timeout),
            super::Messenger::start(second, wait_timeout),
        )
    }
}
