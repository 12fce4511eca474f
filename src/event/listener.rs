//! Arbitration of the port between the listener and scripted operations.
//!
//! The port is always owned by exactly one side:
//!
//! ```text
//!              acquire()
//!   Listening ───────────▶ Exchanging
//!       ▲                      │
//!       └──────────────────────┘
//!          PortGuard dropped
//! ```
//!
//! In `Listening` a background task forwards device output as
//! [`Event::Data`]. [`PortArbiter::acquire`] stops that task, takes the port
//! back and hands it out as a [`PortGuard`]. Dropping the guard, on any exit
//! path, starts a new listener with the port.

use std::ops::{Deref, DerefMut};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::transport::{Port, Transport};

/// Read size of the listener.
const LISTEN_BUFFER_SIZE: usize = 1024;

enum State<T> {
    /// No listener running; the port is idle.
    Parked(Port<T>),
    /// A listener task owns the port until told to stop.
    Listening {
        stop: oneshot::Sender<()>,
        task: JoinHandle<Port<T>>,
    },
    /// The port was handed out or closed.
    Vacant,
}

/// Owns the port and lends it to one scripted operation at a time.
pub struct PortArbiter<T> {
    state: State<T>,
    dispatcher: EventDispatcher,
}

impl<T: Transport> PortArbiter<T> {
    /// Takes ownership of an open port and starts listening on it.
    pub fn new(port: Port<T>, dispatcher: EventDispatcher) -> Self {
        let mut arbiter = Self {
            state: State::Vacant,
            dispatcher,
        };
        arbiter.attach(port);
        arbiter
    }

    /// Returns true while the listener owns the port.
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        matches!(self.state, State::Listening { .. })
    }

    /// Returns true once the port has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, State::Vacant)
    }

    /// Detaches the listener and lends the port out.
    pub async fn acquire(&mut self) -> Result<PortGuard<'_, T>> {
        let port = self.detach().await?;
        Ok(PortGuard {
            arbiter: self,
            port: Some(port),
        })
    }

    /// Detaches the listener and gives the port up for good.
    pub async fn release(&mut self) -> Result<Port<T>> {
        self.detach().await
    }

    async fn detach(&mut self) -> Result<Port<T>> {
        let port = match std::mem::replace(&mut self.state, State::Vacant) {
            State::Parked(port) => port,
            State::Listening { stop, task } => {
                // The task may already be waiting after a read error.
                let _ = stop.send(());
                task.await.map_err(|e| {
                    tracing::error!("listener task failed: {}", e);
                    Error::ListenerLost
                })?
            }
            State::Vacant => return Err(Error::NotConnected),
        };

        tracing::trace!("listener detached");
        self.dispatcher.dispatch(Event::ListenerDetached);
        Ok(port)
    }

    /// Hands the port back to a new listener task.
    fn attach(&mut self, mut port: Port<T>) {
        // Anything read ahead but not consumed belongs to the observer.
        let pending = port.take_pending();
        if !pending.is_empty() {
            self.dispatcher.dispatch(Event::Data(pending.freeze()));
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (stop, stop_rx) = oneshot::channel();
                let task = handle.spawn(listen(port, stop_rx, self.dispatcher.clone()));
                self.state = State::Listening { stop, task };
                tracing::trace!("listener attached");
                self.dispatcher.dispatch(Event::ListenerAttached);
            }
            Err(_) => {
                tracing::debug!("no runtime available, port parked without listener");
                self.state = State::Parked(port);
            }
        }
    }
}

/// Forwards device output until told to stop, then returns the port.
async fn listen<T: Transport>(
    mut port: Port<T>,
    mut stop: oneshot::Receiver<()>,
    dispatcher: EventDispatcher,
) -> Port<T> {
    let mut buf = [0u8; LISTEN_BUFFER_SIZE];

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => return port,
            result = port.read_chunk(&mut buf) => match result {
                Ok(0) => {
                    tracing::debug!("serial port closed");
                    dispatcher.dispatch(Event::Disconnected);
                    break;
                }
                Ok(n) => {
                    tracing::trace!("received {} unsolicited bytes", n);
                    dispatcher.dispatch(Event::Data(bytes::Bytes::copy_from_slice(&buf[..n])));
                }
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    tracing::error!("serial read error: {}", e);
                    dispatcher.dispatch(Event::ReadError {
                        message: e.to_string(),
                    });
                    break;
                }
            },
        }
    }

    // Nothing more to read; hold the port until it is reclaimed.
    let _ = stop.await;
    port
}

/// Exclusive loan of the port to one scripted operation.
///
/// Dropping the guard re-attaches the listener.
pub struct PortGuard<'a, T: Transport> {
    arbiter: &'a mut PortArbiter<T>,
    port: Option<Port<T>>,
}

impl<T: Transport> Deref for PortGuard<'_, T> {
    type Target = Port<T>;

    fn deref(&self) -> &Port<T> {
        // Only taken in drop
        self.port.as_ref().expect("port is held until the guard drops")
    }
}

impl<T: Transport> DerefMut for PortGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Port<T> {
        self.port.as_mut().expect("port is held until the guard drops")
    }
}

impl<T: Transport> Drop for PortGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(port) = self.port.take() {
            self.arbiter.attach(port);
        }
    }
}
