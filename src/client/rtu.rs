// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU client connections

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    connection::{Connection, Link},
    encode_request, into_result,
    transaction::{RtuTransactions, TimeoutScheduler, TokioScheduler},
    Client,
};
use crate::{
    codec::rtu::{RtuCodec, RtuItem},
    config::{ClientConfig, RtuConfig},
    error::MalformedPdu,
    frame::{rtu::Frame, Request, Response},
    transport::Connector,
    unit::{self, UnitContext, UnitId},
    Error, Result,
};

struct RtuLink {
    transactions: Arc<RtuTransactions>,
    inter_frame_silence: Option<Duration>,
}

impl Link for RtuLink {
    type Frame = Frame;
    type Codec = RtuCodec;

    fn codec(&self) -> RtuCodec {
        RtuCodec::client(self.inter_frame_silence)
    }

    fn on_frame(&self, item: RtuItem) {
        let correlator = self.transactions.correlator();
        match item {
            Ok(Frame { unit_id, pdu }) => {
                correlator.complete((), unit_id, pdu);
            }
            Err(mismatch) => {
                correlator.fail((), mismatch.into());
            }
        }
    }

    fn on_closed(&self) {
        self.transactions
            .correlator()
            .fail_all(&Error::ConnectionClosed);
    }
}

/// _Modbus_ RTU client
///
/// The serial line is half-duplex: concurrent calls are queued and
/// executed one after another.
#[derive(Debug, Clone)]
pub struct RtuClient {
    connection: Connection<Frame>,
    transactions: Arc<RtuTransactions>,
    line: Arc<Mutex<()>>,
    config: ClientConfig,
}

impl RtuClient {
    /// Create a disconnected client.
    ///
    /// Must be called within the context of a _Tokio_ runtime.
    pub fn new<C: Connector>(connector: C, config: ClientConfig, rtu_config: RtuConfig) -> Self {
        Self::with_scheduler(connector, config, rtu_config, Arc::new(TokioScheduler))
    }

    /// Create a disconnected client that arms request timeouts with
    /// a custom scheduler.
    pub fn with_scheduler<C: Connector>(
        connector: C,
        config: ClientConfig,
        rtu_config: RtuConfig,
        scheduler: Arc<dyn TimeoutScheduler>,
    ) -> Self {
        let transactions = Arc::new(RtuTransactions::new(scheduler));
        let link = Arc::new(RtuLink {
            transactions: Arc::clone(&transactions),
            inter_frame_silence: rtu_config.inter_frame_silence,
        });
        Self {
            connection: Connection::spawn(connector, link),
            transactions,
            line: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Open the connection explicitly.
    pub async fn open(&self) -> std::result::Result<(), Error> {
        self.connection.connect().await
    }

    /// Whether the serial line is currently open.
    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Number of requests awaiting a response, either 0 or 1.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.transactions.correlator().len()
    }

    /// The configuration the client was created with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl UnitContext for RtuClient {
    fn set_unit_id(&mut self, unit_id: UnitId) {
        self.config.unit_id = unit_id;
    }
}

/// The response that a broadcast write would have been answered with.
///
/// Devices never respond to broadcasts.
fn broadcast_response(request: &Request<'_>) -> std::result::Result<Response, MalformedPdu> {
    use crate::frame::Request::*;
    let quantity = |len: usize| {
        u16::try_from(len).map_err(|_| MalformedPdu::new(format!("invalid quantity: {len}")))
    };
    match request {
        WriteSingleCoil(address, coil) => Ok(Response::WriteSingleCoil(*address, *coil)),
        WriteSingleRegister(address, word) => Ok(Response::WriteSingleRegister(*address, *word)),
        WriteMultipleCoils(address, coils) => Ok(Response::WriteMultipleCoils(
            *address,
            quantity(coils.len())?,
        )),
        WriteMultipleRegisters(address, words) => Ok(Response::WriteMultipleRegisters(
            *address,
            quantity(words.len())?,
        )),
        MaskWriteRegister(address, and_mask, or_mask) => Ok(Response::MaskWriteRegister(
            *address, *and_mask, *or_mask,
        )),
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadHoldingRegisters(_, _)
        | ReadInputRegisters(_, _)
        | Unsupported(_) => Err(MalformedPdu::new(format!(
            "{} cannot be broadcast",
            request.function_code()
        ))),
    }
}

#[async_trait]
impl Client for RtuClient {
    async fn call(&self, request: Request<'_>) -> Result<Response> {
        let function = request.function_code();
        let pdu = encode_request(&request)?;
        let unit_id = self.config.unit_id;
        let broadcast = if unit::is_broadcast(unit_id) {
            Some(broadcast_response(&request)?)
        } else {
            None
        };

        let _line = self.line.lock().await;
        if self.config.auto_connect {
            self.connection.connect().await?;
        }
        let frame = Frame { unit_id, pdu };

        if let Some(response) = broadcast {
            log::debug!("Broadcasting request: {function}");
            self.connection.send(frame).await?;
            return Ok(Ok(response));
        }

        let reply = self
            .transactions
            .register(function, unit_id, self.config.request_timeout)?;
        log::debug!("Sending request to unit {unit_id}: {function}");
        if let Err(err) = self.connection.send(frame).await {
            self.transactions.correlator().remove(());
            return Err(err);
        }
        let response = reply.await.map_err(|_| Error::ConnectionClosed)??;
        Ok(into_result(response))
    }

    async fn disconnect(&self) {
        self.connection.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::{SinkExt as _, StreamExt as _};
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _, DuplexStream},
        time::Instant,
    };
    use tokio_util::codec::Framed;

    use super::*;
    use crate::{
        client::{Reader as _, Writer as _},
        transport::StreamConnector,
    };

    const SILENCE: Duration = Duration::from_millis(2);

    fn client(unit_id: UnitId) -> (RtuClient, DuplexStream) {
        let (stream, peer) = tokio::io::duplex(1024);
        let client = RtuClient::new(
            StreamConnector::new(stream),
            ClientConfig::default().with_unit_id(unit_id),
            RtuConfig::default().with_inter_frame_silence(Some(SILENCE)),
        );
        (client, peer)
    }

    fn device(peer: DuplexStream) -> Framed<DuplexStream, RtuCodec> {
        Framed::new(peer, RtuCodec::server(None))
    }

    #[tokio::test]
    async fn read_holding_registers() {
        let (client, peer) = client(0x01);
        let mut device = device(peer);
        tokio::spawn(async move {
            let request = device.next().await.unwrap().unwrap().unwrap();
            assert_eq!(request.unit_id, 0x01);
            assert_eq!(&request.pdu[..], &[0x03, 0x08, 0x2B, 0x00, 0x02]);
            let response = Frame {
                unit_id: 0x01,
                pdu: Bytes::from_static(&[0x03, 0x04, 0x89, 0x02, 0x42, 0xC7]),
            };
            device.send(response).await.unwrap();
            device
        });
        let words = client.read_holding_registers(0x082B, 2).await.unwrap().unwrap();
        assert_eq!(words, vec![0x8902, 0x42C7]);
    }

    #[tokio::test]
    async fn exception_response() {
        let (client, mut peer) = client(0x66);
        tokio::spawn(async move {
            let mut request = [0; 8];
            peer.read_exact(&mut request).await.unwrap();
            peer.write_all(&[0x66, 0x82, 0x03, 0xB1, 0x7E]).await.unwrap();
            peer
        });
        let result = client.read_discrete_inputs(0, 1).await.unwrap();
        assert_eq!(result, Err(crate::ExceptionCode::IllegalDataValue));
    }

    #[tokio::test]
    async fn crc_mismatch_fails_request() {
        let (client, mut peer) = client(0x01);
        tokio::spawn(async move {
            let mut request = [0; 8];
            peer.read_exact(&mut request).await.unwrap();
            peer.write_all(&[0x01, 0x03, 0x02, 0x00, 0x01, 0x00, 0x00])
                .await
                .unwrap();
            peer
        });
        let err = client.read_holding_registers(0, 1).await.unwrap_err();
        assert!(matches!(err, Error::Crc(_)));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn concurrent_calls_are_serialized() {
        let (client, peer) = client(0x01);
        let mut device = device(peer);
        tokio::spawn(async move {
            while let Some(Ok(Ok(request))) = device.next().await {
                let value = request.pdu[2];
                let response = Frame {
                    unit_id: request.unit_id,
                    pdu: Bytes::copy_from_slice(&[0x04, 0x02, 0x00, value]),
                };
                device.send(response).await.unwrap();
            }
        });
        let (a, b) = tokio::join!(
            client.read_input_registers(7, 1),
            client.read_input_registers(9, 1)
        );
        assert_eq!(a.unwrap().unwrap(), vec![7]);
        assert_eq!(b.unwrap().unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn broadcast_write_returns_immediately() {
        let (client, peer) = client(unit::BROADCAST);
        let mut device = device(peer);
        client.write_single_coil(0x00AC, true).await.unwrap().unwrap();
        let request = device.next().await.unwrap().unwrap().unwrap();
        assert_eq!(request.unit_id, 0);
        assert_eq!(&request.pdu[..], &[0x05, 0x00, 0xAC, 0xFF, 0x00]);
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn broadcast_read_is_rejected() {
        let (client, _peer) = client(unit::BROADCAST);
        let err = client.read_coils(0, 1).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[tokio::test]
    async fn unknown_length_response_is_delimited_by_silence() {
        let (client, mut peer) = client(0x01);
        tokio::spawn(async move {
            let mut request = [0; 4];
            peer.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..2], &[0x01, 0x2B]);
            let mut response = bytes::BytesMut::from(&[0x01, 0x2B, 0x0E, 0x01][..]);
            crate::codec::crc::append_crc(&mut response);
            peer.write_all(&response).await.unwrap();
            peer
        });
        let response = client.call(Request::Unsupported(0x2B)).await.unwrap();
        assert_eq!(response, Ok(Response::Unsupported(0x2B)));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout() {
        let (mut client, _peer) = client(0x01);
        client.config.request_timeout = Duration::from_millis(500);
        let started = Instant::now();
        let err = client.read_coils(0, 1).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(client.pending_requests(), 0);
    }
}
