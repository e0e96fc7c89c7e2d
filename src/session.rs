//! Per-connection session loop
//!
//! One session owns one transport and one handler and runs as a single
//! task: decode inbound frames, assemble messages, dispatch handler
//! callbacks, write replies. Besides socket readability it waits on its
//! mailbox, which carries externally delivered messages and inactivity
//! timer firings.

use std::any::type_name;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::Request;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::error::{Error, Result, Terminate};
use crate::frame::{encode_close_frame, encode_frame, FrameDecoder, OpCode};
use crate::handler::{Init, Reaction, WebSocketHandler};
use crate::handshake::{
    build_accept_response, build_reject_response, generate_accept_key, validate_upgrade,
};
use crate::protocol::{Message, MessageAssembler};
use crate::transport::Transport;
use crate::{SessionConfig, MAX_FRAME_HEADER_SIZE};

/// Mailbox events multiplexed with socket readability
enum Mail<I> {
    /// Externally delivered application message
    Info(I),
    /// Inactivity timer fired; the tag is the generation it was armed with
    TimerFired(u64),
}

/// What woke the session loop
enum Wakeup<I> {
    /// Bytes were appended to the receive buffer
    SocketData,
    /// A mailbox event arrived
    Mail(Mail<I>),
}

/// Result of writing one outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendStatus {
    /// Frame written and flushed
    Sent,
    /// A close frame went out; the session must end and nothing may follow
    Shutdown,
}

/// Sender half for delivering external messages to a running session
///
/// Values sent here arrive at the handler's `on_info` in send order.
pub struct SessionHandle<I> {
    tx: mpsc::UnboundedSender<Mail<I>>,
}

impl<I> Clone for SessionHandle<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<I> SessionHandle<I> {
    /// Deliver a message to the session's handler.
    ///
    /// Returns false if the session has already terminated.
    pub fn send(&self, info: I) -> bool {
        self.tx.send(Mail::Info(info)).is_ok()
    }
}

/// A live WebSocket session
///
/// Produced by [`Session::upgrade`] after a successful handshake; consumed
/// by [`Session::run`], which drives the connection to termination.
pub struct Session<T: Transport, H: WebSocketHandler> {
    transport: T,
    handler: H,
    recv_buffer: BytesMut,
    decoder: FrameDecoder,
    assembler: MessageAssembler,
    /// Inactivity bound from the handler's init, if any
    timeout: Option<Duration>,
    /// Generation of the currently armed timer; older firings are stale
    timer_gen: u64,
    timer_task: Option<JoinHandle<()>>,
    /// Park cheaply at the next wait point
    hibernate: bool,
    /// Once true, no further frame is written
    close_sent: bool,
    events_tx: mpsc::UnboundedSender<Mail<H::Info>>,
    events_rx: mpsc::UnboundedReceiver<Mail<H::Info>>,
}

impl<T: Transport, H: WebSocketHandler> Session<T, H> {
    /// Validate the upgrade request and switch the connection to WebSocket.
    ///
    /// On success the 101 response has been flushed and the returned
    /// session is ready for [`run`](Session::run). On failure a 400
    /// response is written (best effort) and no session exists. The
    /// handler's `init` decides acceptance and the session's timeout and
    /// hibernate settings; a panicking `init` counts as rejection.
    pub async fn upgrade(
        mut transport: T,
        request: Request<()>,
        mut handler: H,
        config: SessionConfig,
    ) -> Result<(Self, SessionHandle<H::Info>)> {
        let key = match validate_upgrade(&request) {
            Ok(key) => key.to_owned(),
            Err(e) => {
                debug!(transport = transport.name(), error = %e, "upgrade rejected");
                let _ = transport.write_all(&build_reject_response()).await;
                return Err(e);
            }
        };

        let name = transport.name();
        let init = match catch_unwind(AssertUnwindSafe(|| handler.init(name, &request))) {
            Ok(init) => init,
            Err(payload) => {
                error!(
                    handler = type_name::<H>(),
                    callback = "init",
                    panic = panic_message(payload.as_ref()),
                    "handler panicked"
                );
                Init::Reject
            }
        };

        let (timeout, hibernate) = match init {
            Init::Accept { timeout, hibernate } => (timeout, hibernate),
            Init::Reject => {
                debug!(transport = name, "upgrade rejected by handler");
                let _ = transport.write_all(&build_reject_response()).await;
                return Err(Error::HandshakeFailed("rejected by handler"));
            }
        };

        let accept = generate_accept_key(&key);
        transport.write_all(&build_accept_response(&accept)).await?;
        transport.flush().await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            tx: events_tx.clone(),
        };

        Ok((
            Self {
                transport,
                handler,
                recv_buffer: BytesMut::with_capacity(config.recv_buffer_size),
                decoder: FrameDecoder::new(config.max_frame_size),
                assembler: MessageAssembler::new(config.max_message_size),
                timeout,
                timer_gen: 0,
                timer_task: None,
                hibernate,
                close_sent: false,
                events_tx,
                events_rx,
            },
            handle,
        ))
    }

    /// Drive the session until it terminates. Returns the reason, which is
    /// also delivered to the handler's `on_terminate`.
    pub async fn run(mut self) -> Terminate {
        if self.timeout.is_some() {
            self.arm_timer();
        }
        let reason = self.event_loop().await;
        self.finish(reason).await
    }

    async fn event_loop(&mut self) -> Terminate {
        loop {
            if self.hibernate {
                self.park().await;
            }

            let wakeup = tokio::select! {
                res = self.transport.read_buf(&mut self.recv_buffer) => match res {
                    Ok(0) => return Terminate::Closed,
                    Ok(_) => Wakeup::SocketData,
                    Err(e) => return Terminate::Transport(e),
                },
                mail = self.events_rx.recv() => match mail {
                    Some(mail) => Wakeup::Mail(mail),
                    // The session holds a sender for its timers, so the
                    // mailbox cannot close while the loop runs
                    None => continue,
                },
            };

            let outcome = match wakeup {
                Wakeup::SocketData => self.drain_frames().await,
                Wakeup::Mail(Mail::Info(info)) => self.invoke_on_info(info).await,
                Wakeup::Mail(Mail::TimerFired(gen)) => {
                    if gen == self.timer_gen {
                        Some(Terminate::Timeout)
                    } else {
                        // Stale timer from before a rearm; ignore
                        None
                    }
                }
            };

            if let Some(reason) = outcome {
                return reason;
            }
        }
    }

    /// Decode and dispatch everything currently buffered.
    async fn drain_frames(&mut self) -> Option<Terminate> {
        loop {
            let frame = match self.decoder.decode(&mut self.recv_buffer) {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(e) => return Some(self.protocol_failure(e)),
            };

            // Each valid inbound frame rearms the inactivity timer
            self.arm_timer();

            let message = match self.assembler.assemble(frame) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => return Some(self.protocol_failure(e)),
            };

            if let Some(reason) = self.dispatch(message).await {
                return Some(reason);
            }
        }
    }

    async fn dispatch(&mut self, message: Message) -> Option<Terminate> {
        match message {
            Message::Close(_) => Some(Terminate::Remote),
            Message::Ping(payload) => {
                // The pong must be on the wire before the handler sees
                // the ping
                if let Err(reason) = self.send_pong(&payload).await {
                    return Some(reason);
                }
                self.invoke_on_message(Message::Ping(payload)).await
            }
            message => self.invoke_on_message(message).await,
        }
    }

    async fn send_pong(&mut self, payload: &Bytes) -> std::result::Result<(), Terminate> {
        if self.close_sent {
            return Ok(());
        }
        let mut buf = BytesMut::with_capacity(MAX_FRAME_HEADER_SIZE + payload.len());
        if let Err(e) = encode_frame(&mut buf, OpCode::Pong, payload, true) {
            return Err(self.protocol_failure(e));
        }
        self.write_all_flush(&buf)
            .await
            .map_err(Terminate::Transport)
    }

    async fn invoke_on_message(&mut self, message: Message) -> Option<Terminate> {
        let reaction = match catch_unwind(AssertUnwindSafe(|| self.handler.on_message(message))) {
            Ok(reaction) => reaction,
            Err(payload) => {
                error!(
                    handler = type_name::<H>(),
                    callback = "on_message",
                    panic = panic_message(payload.as_ref()),
                    "handler panicked"
                );
                return Some(Terminate::HandlerError);
            }
        };
        self.apply_reaction(reaction).await
    }

    async fn invoke_on_info(&mut self, info: H::Info) -> Option<Terminate> {
        let reaction = match catch_unwind(AssertUnwindSafe(|| self.handler.on_info(info))) {
            Ok(reaction) => reaction,
            Err(payload) => {
                error!(
                    handler = type_name::<H>(),
                    callback = "on_info",
                    panic = panic_message(payload.as_ref()),
                    "handler panicked"
                );
                return Some(Terminate::HandlerError);
            }
        };
        self.apply_reaction(reaction).await
    }

    async fn apply_reaction(&mut self, reaction: Reaction) -> Option<Terminate> {
        let (frames, hibernate) = match reaction {
            Reaction::Continue => return None,
            Reaction::ContinueHibernate => {
                self.hibernate = true;
                return None;
            }
            Reaction::Reply(frames) => (frames, false),
            Reaction::ReplyHibernate(frames) => (frames, true),
            Reaction::Shutdown => return Some(Terminate::Shutdown),
        };

        if hibernate {
            self.hibernate = true;
        }

        match self.send_many(&frames).await {
            Ok(SendStatus::Sent) => {
                // A flushed reply also rearms the inactivity timer
                self.arm_timer();
                None
            }
            Ok(SendStatus::Shutdown) => Some(Terminate::Shutdown),
            Err(Error::Io(e)) => Some(Terminate::Transport(e)),
            Err(Error::ConnectionClosed) => Some(Terminate::Closed),
            Err(e) => Some(self.protocol_failure(e)),
        }
    }

    /// Write one outbound frame. Any close frame reports `Shutdown` and
    /// flips `close_sent`; after that nothing else is written.
    async fn send_frame(&mut self, message: &Message) -> Result<SendStatus> {
        if self.close_sent {
            return Ok(SendStatus::Shutdown);
        }

        let mut buf = BytesMut::with_capacity(MAX_FRAME_HEADER_SIZE + message.as_bytes().len());
        let status = match message {
            Message::Text(b) => {
                encode_frame(&mut buf, OpCode::Text, b, true)?;
                SendStatus::Sent
            }
            Message::Binary(b) => {
                encode_frame(&mut buf, OpCode::Binary, b, true)?;
                SendStatus::Sent
            }
            Message::Ping(b) => {
                encode_frame(&mut buf, OpCode::Ping, b, true)?;
                SendStatus::Sent
            }
            Message::Pong(b) => {
                encode_frame(&mut buf, OpCode::Pong, b, true)?;
                SendStatus::Sent
            }
            Message::Close(None) => {
                encode_frame(&mut buf, OpCode::Close, &[], true)?;
                SendStatus::Shutdown
            }
            Message::Close(Some((code, reason))) => {
                encode_close_frame(&mut buf, *code, reason)?;
                SendStatus::Shutdown
            }
        };

        self.write_all_flush(&buf).await?;
        if status == SendStatus::Shutdown {
            self.close_sent = true;
        }
        Ok(status)
    }

    /// Write a batch of frames in order, stopping at the first close frame.
    /// Frames queued after a close are dropped.
    async fn send_many(&mut self, frames: &[Message]) -> Result<SendStatus> {
        for message in frames {
            if self.send_frame(message).await? == SendStatus::Shutdown {
                return Ok(SendStatus::Shutdown);
            }
        }
        Ok(SendStatus::Sent)
    }

    async fn write_all_flush(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.transport.write_all(bytes).await?;
        self.transport.flush().await
    }

    /// Arm or rearm the inactivity timer.
    ///
    /// The previous timer task is aborted, but one that already fired may
    /// still have posted its tag; the generation check in the loop discards
    /// such stale firings instead of racing the abort.
    fn arm_timer(&mut self) {
        let Some(timeout) = self.timeout else {
            return;
        };

        self.timer_gen = self.timer_gen.wrapping_add(1);
        let gen = self.timer_gen;
        let tx = self.events_tx.clone();

        if let Some(task) = self.timer_task.take() {
            task.abort();
        }
        self.timer_task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Mail::TimerFired(gen));
        }));
    }

    /// Hibernate hint: release spare buffer capacity and yield before the
    /// next wait. Only memory behavior changes.
    async fn park(&mut self) {
        if self.recv_buffer.capacity() > self.recv_buffer.len() {
            let kept = BytesMut::from(&self.recv_buffer[..]);
            self.recv_buffer = kept;
        }
        tokio::task::yield_now().await;
        self.hibernate = false;
    }

    /// Terminal path: best-effort close frame where policy allows one, then
    /// the single `on_terminate` delivery.
    async fn finish(&mut self, reason: Terminate) -> Terminate {
        if let Some(task) = self.timer_task.take() {
            task.abort();
        }

        // Only transport failures get no outbound bytes; a bare TCP close
        // still gets the close-frame attempt, like a peer close frame
        let close_allowed = !matches!(reason, Terminate::Transport(_));
        if close_allowed && !self.close_sent {
            let mut buf = BytesMut::with_capacity(2);
            if encode_frame(&mut buf, OpCode::Close, &[], true).is_ok() {
                let _ = self.write_all_flush(&buf).await;
            }
            self.close_sent = true;
        }

        trace!(transport = self.transport.name(), reason = %reason, "session terminated");

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.handler.on_terminate(&reason)))
        {
            error!(
                handler = type_name::<H>(),
                callback = "on_terminate",
                panic = panic_message(payload.as_ref()),
                "handler panicked"
            );
        }

        reason
    }

    fn protocol_failure(&mut self, error: Error) -> Terminate {
        match error {
            Error::Protocol(msg) => Terminate::BadFrame(msg),
            Error::FrameTooLarge => Terminate::BadFrame("frame too large"),
            Error::MessageTooLarge => Terminate::BadFrame("message too large"),
            Error::HandshakeFailed(msg) => Terminate::BadFrame(msg),
            Error::Io(e) => Terminate::Transport(e),
            Error::ConnectionClosed => Terminate::Closed,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "opaque panic payload"
    }
}
