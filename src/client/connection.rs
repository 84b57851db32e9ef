// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client connection
//!
//! A single task owns the [`StateMachine`] and applies all events to it
//! in the order they arrive. Handles only communicate with this task
//! through a channel, so no transition is ever lost.

use std::{fmt, io, sync::Arc};

use futures_util::SinkExt as _;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
};
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::state::{Action, ChannelId, Event, StateMachine};
use crate::{
    codec::{self, SilenceDelimited},
    transport::Connector,
    Error,
};

/// Protocol specific handling of a live channel.
pub(crate) trait Link: Send + Sync + 'static {
    type Frame: Send + 'static;
    type Codec: Decoder<Error = io::Error>
        + SilenceDelimited
        + Encoder<Self::Frame, Error = io::Error>
        + Send
        + Unpin
        + 'static;

    /// A fresh codec for every channel.
    fn codec(&self) -> Self::Codec;

    /// Dispatch a received frame.
    fn on_frame(&self, item: <Self::Codec as Decoder>::Item);

    /// The channel has been closed.
    fn on_closed(&self);
}

type Waiter = oneshot::Sender<Result<(), Error>>;

type Ack = oneshot::Sender<Result<(), Error>>;

enum Command<F> {
    Connect(Waiter),
    Disconnect(oneshot::Sender<()>),
    Send { frame: F, ack: Ack },
    IsConnected(oneshot::Sender<bool>),
}

enum Notice<S> {
    Opened {
        channel: ChannelId,
        result: io::Result<S>,
    },
    Closed {
        channel: ChannelId,
    },
}

struct Outbound<F> {
    frame: F,
    ack: Ack,
}

/// Handle of a client connection.
pub(crate) struct Connection<F> {
    commands: mpsc::UnboundedSender<Command<F>>,
}

impl<F> Clone for Connection<F> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<F> fmt::Debug for Connection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl<F> Connection<F>
where
    F: Send + 'static,
{
    /// Spawn the connection task, initially disconnected.
    ///
    /// The task terminates after all handles have been dropped.
    pub(crate) fn spawn<C, L>(connector: C, link: Arc<L>) -> Self
    where
        C: Connector,
        L: Link<Frame = F>,
        <L::Codec as Decoder>::Item: Send,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let actor = Actor {
            connector: Arc::new(connector),
            link,
            machine: StateMachine::default(),
            active: None,
            notices,
        };
        tokio::spawn(actor.run(command_rx, notice_rx));
        Self { commands }
    }

    fn command(&self, command: Command<F>) -> Result<(), Error> {
        self.commands
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Connect unless already connected.
    pub(crate) async fn connect(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Connect(tx))?;
        rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    pub(crate) async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.command(Command::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub(crate) async fn is_connected(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.command(Command::IsConnected(tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Write a frame to the live channel.
    pub(crate) async fn send(&self, frame: F) -> Result<(), Error> {
        let (ack, rx) = oneshot::channel();
        self.command(Command::Send { frame, ack })?;
        rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }
}

struct Actor<C: Connector, L: Link> {
    connector: Arc<C>,
    link: Arc<L>,
    machine: StateMachine<Waiter>,
    active: Option<(ChannelId, mpsc::UnboundedSender<Outbound<L::Frame>>)>,
    notices: mpsc::UnboundedSender<Notice<C::Stream>>,
}

impl<C, L> Actor<C, L>
where
    C: Connector,
    L: Link,
    <L::Codec as Decoder>::Item: Send,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<L::Frame>>,
        mut notices: mpsc::UnboundedReceiver<Notice<C::Stream>>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(notice) = notices.recv() => self.on_notice(notice),
            }
        }
        log::debug!("All connection handles dropped");
        let actions = self.machine.handle(Event::DisconnectRequested);
        self.apply(actions, None);
    }

    fn on_command(&mut self, command: Command<L::Frame>) {
        match command {
            Command::Connect(waiter) => {
                let actions = self.machine.handle(Event::ConnectRequested(waiter));
                self.apply(actions, None);
            }
            Command::Disconnect(done) => {
                let actions = self.machine.handle(Event::DisconnectRequested);
                self.apply(actions, None);
                let _ = done.send(());
            }
            Command::Send { frame, ack } => {
                let Some((_, outbound)) = &self.active else {
                    let _ = ack.send(Err(Error::NotConnected));
                    return;
                };
                if let Err(mpsc::error::SendError(outbound)) =
                    outbound.send(Outbound { frame, ack })
                {
                    let _ = outbound.ack.send(Err(Error::ConnectionClosed));
                }
            }
            Command::IsConnected(tx) => {
                let _ = tx.send(self.machine.state().is_connected());
            }
        }
    }

    fn on_notice(&mut self, notice: Notice<C::Stream>) {
        match notice {
            Notice::Opened {
                channel,
                result: Ok(stream),
            } => {
                let actions = self.machine.handle(Event::ChannelOpenSuccess { channel });
                self.apply(actions, Some((channel, stream)));
            }
            Notice::Opened {
                channel,
                result: Err(err),
            } => {
                log::warn!("Failed to connect: {err}");
                let actions = self.machine.handle(Event::ChannelOpenFailure {
                    channel,
                    error: err.into(),
                });
                self.apply(actions, None);
            }
            Notice::Closed { channel } => {
                self.deactivate(channel);
                let actions = self.machine.handle(Event::ChannelClosed { channel });
                self.apply(actions, None);
            }
        }
    }

    fn apply(&mut self, actions: Vec<Action<Waiter>>, mut opened: Option<(ChannelId, C::Stream)>) {
        for action in actions {
            match action {
                Action::Open { channel } => self.open(channel),
                Action::Activate { channel } => match opened.take() {
                    Some((id, stream)) if id == channel => self.activate(channel, stream),
                    other => opened = other,
                },
                Action::Close { channel } => {
                    if matches!(opened, Some((id, _)) if id == channel) {
                        log::debug!("Closing abandoned channel {channel}");
                        opened = None;
                    }
                    // The I/O task terminates when its queue is closed.
                    self.deactivate(channel);
                }
                Action::Notify { waiters, result } => {
                    for waiter in waiters {
                        let result = match &result {
                            Ok(()) => Ok(()),
                            Err(err) => Err(err.duplicate()),
                        };
                        let _ = waiter.send(result);
                    }
                }
            }
        }
    }

    fn open(&self, channel: ChannelId) {
        log::debug!("Opening channel {channel}");
        let connector = Arc::clone(&self.connector);
        let notices = self.notices.clone();
        tokio::spawn(async move {
            let result = connector.connect().await;
            let _ = notices.send(Notice::Opened { channel, result });
        });
    }

    fn activate(&mut self, channel: ChannelId, stream: C::Stream) {
        log::info!("Connected");
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.active = Some((channel, outbound));
        let framed = Framed::new(stream, self.link.codec());
        let link = Arc::clone(&self.link);
        let notices = self.notices.clone();
        tokio::spawn(async move {
            run_channel(&*link, framed, outbound_rx).await;
            let _ = notices.send(Notice::Closed { channel });
        });
    }

    /// Release the live channel and fail everything still waiting on it.
    fn deactivate(&mut self, channel: ChannelId) {
        if !matches!(self.active, Some((active, _)) if active == channel) {
            return;
        }
        log::info!("Disconnected");
        self.active = None;
        self.link.on_closed();
    }
}

/// Exchange frames until either side closes the channel.
async fn run_channel<T, L>(
    link: &L,
    mut framed: Framed<T, L::Codec>,
    mut outbound: mpsc::UnboundedReceiver<Outbound<L::Frame>>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
    L: Link,
{
    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(Outbound { frame, ack }) = next else {
                    // disconnect requested
                    break;
                };
                let result = framed.send(frame).await;
                let failed = result.is_err();
                let _ = ack.send(result.map_err(Error::from));
                if failed {
                    log::warn!("Closing channel after send failure");
                    break;
                }
            }
            item = codec::next_frame(&mut framed) => match item {
                Some(Ok(item)) => link.on_frame(item),
                Some(Err(err)) => {
                    log::warn!("Closing channel after receive failure: {err}");
                    break;
                }
                None => {
                    log::info!("Channel closed by peer");
                    break;
                }
            },
        }
    }
}
