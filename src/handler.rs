//! The application handler contract
//!
//! A session drives exactly one handler. Callbacks run sequentially on the
//! session task and never concurrently with themselves; handler state is
//! whatever the handler stores in itself, mutated through `&mut self`.

use std::time::Duration;

use http::Request;

use crate::error::Terminate;
use crate::protocol::Message;

/// Decision returned by [`WebSocketHandler::init`]
#[derive(Debug, Clone)]
pub enum Init {
    /// Accept the upgrade and start the session
    Accept {
        /// Inactivity timeout; `None` means the session never times out
        timeout: Option<Duration>,
        /// Start with the hibernate hint set
        hibernate: bool,
    },
    /// Refuse the upgrade; the client receives 400 Bad Request
    Reject,
}

impl Init {
    /// Accept with defaults: no timeout, no hibernate
    pub fn accept() -> Self {
        Init::Accept {
            timeout: None,
            hibernate: false,
        }
    }

    /// Refuse the upgrade
    pub fn reject() -> Self {
        Init::Reject
    }

    /// Set the inactivity timeout
    pub fn timeout(self, timeout: Duration) -> Self {
        match self {
            Init::Accept { hibernate, .. } => Init::Accept {
                timeout: Some(timeout),
                hibernate,
            },
            reject => reject,
        }
    }

    /// Set the hibernate hint
    pub fn hibernate(self) -> Self {
        match self {
            Init::Accept { timeout, .. } => Init::Accept {
                timeout,
                hibernate: true,
            },
            reject => reject,
        }
    }
}

/// Reaction returned by [`WebSocketHandler::on_message`] and
/// [`WebSocketHandler::on_info`]
///
/// Reply frames are written in order before the session waits again. Any
/// close frame among them ends the session after it is flushed; frames
/// queued after it are dropped.
#[derive(Debug)]
pub enum Reaction {
    /// Keep the session running
    Continue,
    /// Keep running and set the hibernate hint
    ContinueHibernate,
    /// Send frames, then keep running
    Reply(Vec<Message>),
    /// Send frames, keep running, set the hibernate hint
    ReplyHibernate(Vec<Message>),
    /// Send a close frame and end the session
    Shutdown,
}

impl Reaction {
    /// Reply with a single frame
    pub fn reply(message: Message) -> Self {
        Reaction::Reply(vec![message])
    }
}

/// Per-connection application callbacks
///
/// The session owns the handler for the connection lifetime and invokes it
/// for every decoded message, every externally delivered info value, and
/// once at termination. A panic in any callback ends the session with
/// [`Terminate::HandlerError`].
pub trait WebSocketHandler: Send + 'static {
    /// Externally delivered message type, sent through a
    /// [`SessionHandle`](crate::session::SessionHandle)
    type Info: Send + 'static;

    /// Called once before the 101 response is written.
    ///
    /// `transport` is the transport name (for example `"tcp"`); `request`
    /// is the validated upgrade request.
    fn init(&mut self, transport: &'static str, request: &Request<()>) -> Init;

    /// Called for every complete inbound message: text, binary, ping, or
    /// pong. Pings have already been answered on the wire when this runs.
    fn on_message(&mut self, message: Message) -> Reaction;

    /// Called for every value delivered through the session handle.
    fn on_info(&mut self, info: Self::Info) -> Reaction;

    /// Called exactly once when the session ends. Errors here are logged
    /// and swallowed.
    fn on_terminate(&mut self, _reason: &Terminate) {}
}

impl<H: WebSocketHandler + ?Sized> WebSocketHandler for Box<H> {
    type Info = H::Info;

    fn init(&mut self, transport: &'static str, request: &Request<()>) -> Init {
        (**self).init(transport, request)
    }

    fn on_message(&mut self, message: Message) -> Reaction {
        (**self).on_message(message)
    }

    fn on_info(&mut self, info: Self::Info) -> Reaction {
        (**self).on_info(info)
    }

    fn on_terminate(&mut self, reason: &Terminate) {
        (**self).on_terminate(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_builder() {
        assert!(matches!(
            Init::accept(),
            Init::Accept {
                timeout: None,
                hibernate: false
            }
        ));

        let init = Init::accept()
            .timeout(Duration::from_secs(30))
            .hibernate();
        match init {
            Init::Accept { timeout, hibernate } => {
                assert_eq!(timeout, Some(Duration::from_secs(30)));
                assert!(hibernate);
            }
            Init::Reject => panic!("expected accept"),
        }

        // Builders are inert on a rejection
        assert!(matches!(
            Init::reject().timeout(Duration::from_secs(1)).hibernate(),
            Init::Reject
        ));
    }

    #[test]
    fn test_reaction_reply() {
        match Reaction::reply(Message::text("hi")) {
            Reaction::Reply(frames) => assert_eq!(frames.len(), 1),
            _ => panic!("expected reply"),
        }
    }
}
