// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection lifecycle
//!
//! A pure state machine: every transition consumes the current state and
//! yields the next one together with the side effects that the owner
//! must carry out. Every (state, event) pair is defined.

use std::mem;

use crate::Error;

/// Identifies a single connect attempt and the channel opened by it.
pub(crate) type ChannelId = u64;

#[derive(Debug)]
pub(crate) enum State<W> {
    Disconnected,
    Connecting {
        channel: ChannelId,
        /// Awaiting the outcome of the connect attempt.
        waiters: Vec<W>,
    },
    Connected {
        channel: ChannelId,
    },
}

#[derive(Debug)]
pub(crate) enum Event<W> {
    ConnectRequested(W),
    ChannelOpenSuccess { channel: ChannelId },
    ChannelOpenFailure { channel: ChannelId, error: Error },
    DisconnectRequested,
    ChannelClosed { channel: ChannelId },
}

#[derive(Debug)]
pub(crate) enum Action<W> {
    /// Start opening a new channel.
    Open { channel: ChannelId },
    /// Start exchanging frames on the opened channel.
    Activate { channel: ChannelId },
    /// Close an opened or active channel.
    Close { channel: ChannelId },
    /// Report the outcome of connecting.
    Notify {
        waiters: Vec<W>,
        result: Result<(), Error>,
    },
}

impl<W> State<W> {
    #[must_use]
    pub(crate) const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub(crate) const fn connected_channel(&self) -> Option<ChannelId> {
        match self {
            Self::Connected { channel } => Some(*channel),
            Self::Disconnected | Self::Connecting { .. } => None,
        }
    }

    fn on_event(
        self,
        event: Event<W>,
        next_channel: &mut ChannelId,
    ) -> (Self, Vec<Action<W>>) {
        use self::{Action::*, Event::*, State::*};
        match (self, event) {
            (Disconnected, ConnectRequested(waiter)) => {
                let channel = *next_channel;
                *next_channel += 1;
                (
                    Connecting {
                        channel,
                        waiters: vec![waiter],
                    },
                    vec![Open { channel }],
                )
            }
            (
                Connecting {
                    channel,
                    mut waiters,
                },
                ConnectRequested(waiter),
            ) => {
                waiters.push(waiter);
                (Connecting { channel, waiters }, vec![])
            }
            (Connected { channel }, ConnectRequested(waiter)) => (
                Connected { channel },
                vec![Notify {
                    waiters: vec![waiter],
                    result: Ok(()),
                }],
            ),

            (Connecting { channel, waiters }, ChannelOpenSuccess { channel: opened })
                if channel == opened =>
            {
                (
                    Connected { channel },
                    vec![
                        Activate { channel },
                        Notify {
                            waiters,
                            result: Ok(()),
                        },
                    ],
                )
            }
            // The attempt has been abandoned in the meantime.
            (state, ChannelOpenSuccess { channel }) => (state, vec![Close { channel }]),

            (
                Connecting { channel, waiters },
                ChannelOpenFailure {
                    channel: failed,
                    error,
                },
            ) if channel == failed => (
                Disconnected,
                vec![Notify {
                    waiters,
                    result: Err(error),
                }],
            ),
            (state, ChannelOpenFailure { .. }) => (state, vec![]),

            (Connecting { channel: _, waiters }, DisconnectRequested) => (
                Disconnected,
                vec![Notify {
                    waiters,
                    result: Err(Error::NotConnected),
                }],
            ),
            (Connected { channel }, DisconnectRequested) => {
                (Disconnected, vec![Close { channel }])
            }
            (Disconnected, DisconnectRequested) => (Disconnected, vec![]),

            (Connected { channel }, ChannelClosed { channel: closed }) if channel == closed => {
                (Disconnected, vec![])
            }
            (state, ChannelClosed { .. }) => (state, vec![]),
        }
    }
}

/// Owner of the current [`State`].
#[derive(Debug)]
pub(crate) struct StateMachine<W> {
    state: State<W>,
    next_channel: ChannelId,
}

impl<W> Default for StateMachine<W> {
    fn default() -> Self {
        Self {
            state: State::Disconnected,
            next_channel: 0,
        }
    }
}

impl<W> StateMachine<W> {
    pub(crate) const fn state(&self) -> &State<W> {
        &self.state
    }

    /// Replace the current state by its successor.
    pub(crate) fn handle(&mut self, event: Event<W>) -> Vec<Action<W>> {
        let state = mem::replace(&mut self.state, State::Disconnected);
        let (next, actions) = state.on_event(event, &mut self.next_channel);
        self.state = next;
        actions
    }
}
