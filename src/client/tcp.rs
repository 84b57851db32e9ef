// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client connections

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;

use super::{
    connection::{Connection, Link},
    encode_request, into_result,
    transaction::{TcpTransactions, TimeoutScheduler, TokioScheduler},
    Client,
};
use crate::{
    codec::tcp::TcpCodec,
    config::ClientConfig,
    frame::{
        tcp::{Frame, Header},
        Request, Response,
    },
    transport::{Connector, TcpConnector},
    unit::{UnitContext, UnitId},
    Error, Result,
};

struct TcpLink {
    transactions: Arc<TcpTransactions>,
}

impl Link for TcpLink {
    type Frame = Frame;
    type Codec = TcpCodec;

    fn codec(&self) -> TcpCodec {
        TcpCodec
    }

    fn on_frame(&self, frame: Frame) {
        let Frame { header, pdu } = frame;
        self.transactions
            .correlator()
            .complete(header.transaction_id, header.unit_id, pdu);
    }

    fn on_closed(&self) {
        self.transactions
            .correlator()
            .fail_all(&Error::ConnectionClosed);
    }
}

/// _Modbus_ TCP client
///
/// Requests may be issued concurrently from clones of the client. They
/// are pipelined on a single connection and correlated by their
/// transaction id.
#[derive(Debug, Clone)]
pub struct TcpClient {
    connection: Connection<Frame>,
    transactions: Arc<TcpTransactions>,
    config: ClientConfig,
}

impl TcpClient {
    /// Create a disconnected client.
    ///
    /// Must be called within the context of a _Tokio_ runtime.
    pub fn new<C: Connector>(connector: C, config: ClientConfig) -> Self {
        Self::with_scheduler(connector, config, Arc::new(TokioScheduler))
    }

    /// Create a disconnected client that arms request timeouts with
    /// a custom scheduler.
    pub fn with_scheduler<C: Connector>(
        connector: C,
        config: ClientConfig,
        scheduler: Arc<dyn TimeoutScheduler>,
    ) -> Self {
        let transactions = Arc::new(TcpTransactions::new(scheduler));
        let link = Arc::new(TcpLink {
            transactions: Arc::clone(&transactions),
        });
        let connection = Connection::spawn(connector, link);
        Self {
            connection,
            transactions,
            config,
        }
    }

    /// Establish a connection to a TCP device with the default configuration.
    pub async fn connect(socket_addr: SocketAddr) -> std::result::Result<Self, Error> {
        Self::connect_with(socket_addr, ClientConfig::default()).await
    }

    /// Establish a connection to a TCP device.
    pub async fn connect_with(
        socket_addr: SocketAddr,
        config: ClientConfig,
    ) -> std::result::Result<Self, Error> {
        let client = Self::new(TcpConnector::new(socket_addr), config);
        client.connection.connect().await?;
        Ok(client)
    }

    /// Open the connection explicitly.
    pub async fn open(&self) -> std::result::Result<(), Error> {
        self.connection.connect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.transactions.correlator().len()
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl UnitContext for TcpClient {
    fn set_unit_id(&mut self, unit_id: UnitId) {
        self.config.unit_id = unit_id;
    }
}

#[async_trait]
impl Client for TcpClient {
    async fn call(&self, request: Request<'_>) -> Result<Response> {
        let function = request.function_code();
        let pdu = encode_request(&request)?;
        let unit_id = self.config.unit_id;
        if self.config.auto_connect {
            self.connection.connect().await?;
        }
        let (transaction_id, reply) =
            self.transactions
                .register(function, unit_id, self.config.request_timeout)?;
        log::debug!("Sending request {transaction_id} for unit {unit_id}: {function}");
        let frame = Frame {
            header: Header::new(transaction_id, unit_id),
            pdu,
        };
        if let Err(err) = self.connection.send(frame).await {
            self.transactions.correlator().remove(transaction_id);
            return Err(err);
        }
        let response = reply.await.map_err(|_| Error::ConnectionClosed)??;
        Ok(into_result(response))
    }

    async fn disconnect(&self) {
        self.connection.disconnect().await;
    }
}
