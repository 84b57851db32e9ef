// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered request dispatch
//!
//! The frames of a connection are queued and executed one at a time by
//! a single worker, so responses are written in the order the requests
//! arrived, even if the service completes them asynchronously.

use std::{io, sync::Arc};

use bytes::Bytes;
use futures_util::SinkExt as _;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::Service;
use crate::{
    codec::{self, rtu::RtuItem, SilenceDelimited},
    error::ExecutionError,
    frame::{rtu, tcp, ExceptionResponse, Request, ResponsePdu, UnitRequest},
    unit::{self, UnitId},
    Error, ExceptionCode,
};

/// Number of requests that may be queued before reading is paused.
const QUEUE_CAPACITY: usize = 16;

/// A request frame that carries the addressing of its reply.
pub(crate) trait RequestFrame: Send + Sized + 'static {
    fn unit_id(&self) -> UnitId;

    fn pdu(&self) -> &Bytes;

    /// Broadcasts are executed without replying.
    fn expects_reply(&self) -> bool {
        true
    }

    fn reply(&self, pdu: Bytes) -> Self;
}

impl RequestFrame for tcp::Frame {
    fn unit_id(&self) -> UnitId {
        self.header.unit_id
    }

    fn pdu(&self) -> &Bytes {
        &self.pdu
    }

    fn reply(&self, pdu: Bytes) -> Self {
        tcp::Frame::reply(self, pdu)
    }
}

impl RequestFrame for rtu::Frame {
    fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    fn pdu(&self) -> &Bytes {
        &self.pdu
    }

    fn expects_reply(&self) -> bool {
        !unit::is_broadcast(self.unit_id)
    }

    fn reply(&self, pdu: Bytes) -> Self {
        rtu::Frame::reply(self, pdu)
    }
}

/// An item produced by a server codec.
pub(crate) trait Inbound {
    type Frame: RequestFrame;

    /// The request to execute, if any.
    fn into_request(self) -> Option<Self::Frame>;
}

impl Inbound for tcp::Frame {
    type Frame = Self;

    fn into_request(self) -> Option<Self> {
        Some(self)
    }
}

impl Inbound for RtuItem {
    type Frame = rtu::Frame;

    fn into_request(self) -> Option<rtu::Frame> {
        match self {
            Ok(frame) => Some(frame),
            Err(mismatch) => {
                // The codec already logged the mismatch.
                log::debug!("Discarding {} bytes", mismatch.frame.len());
                None
            }
        }
    }
}

/// Execute a single request.
///
/// Returns the reply frame, or `None` if the request is swallowed.
pub(crate) async fn dispatch<S, F>(service: &S, frame: F) -> Result<Option<F>, Error>
where
    S: Service,
    F: RequestFrame,
{
    let unit_id = frame.unit_id();
    let request = codec::decode_request(frame.pdu().clone())?;
    if !service.is_known_unit(unit_id) {
        log::debug!("Ignoring request for unknown unit {unit_id}");
        return Ok(None);
    }
    let function = request.function_code();
    log::debug!("Received request for unit {unit_id}: {function}");
    let response: ResponsePdu = if let Request::Unsupported(_) = request {
        ExceptionResponse {
            function,
            exception: ExceptionCode::IllegalFunction,
        }
        .into()
    } else {
        match service
            .call(UnitRequest { unit_id, request })
            .await
            .map_err(Into::into)
        {
            Ok(response) => response.into(),
            Err(ExecutionError::Exception(exception)) => {
                ExceptionResponse { function, exception }.into()
            }
            Err(err @ ExecutionError::Failure(_)) => return Err(err.into()),
        }
    };
    if !frame.expects_reply() {
        log::debug!("Executed broadcast request: {function}");
        return Ok(None);
    }
    let pdu = codec::encode_response(&response)?;
    Ok(Some(frame.reply(pdu)))
}

/// Serve requests on a byte stream until the peer disconnects.
///
/// Requests received before the peer stopped sending are still answered.
/// Every failure is fatal for the connection.
pub(crate) async fn serve<T, C, S>(stream: T, codec: C, service: Arc<S>) -> Result<(), Error>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: Decoder<Error = io::Error>
        + SilenceDelimited
        + Encoder<<C::Item as Inbound>::Frame, Error = io::Error>
        + Send
        + Unpin
        + 'static,
    C::Item: Inbound,
    S: Service,
{
    let mut framed = Framed::new(stream, codec);
    let (queue, mut requests) = mpsc::channel::<<C::Item as Inbound>::Frame>(QUEUE_CAPACITY);
    let (outcomes, mut replies) = mpsc::unbounded_channel();

    let worker = tokio::spawn(async move {
        while let Some(frame) = requests.recv().await {
            let outcome = dispatch(&*service, frame).await;
            let fatal = outcome.is_err();
            if outcomes.send(outcome).is_err() || fatal {
                break;
            }
        }
    });

    let result = loop {
        tokio::select! {
            item = codec::next_frame(&mut framed) => match item {
                None => break Ok(()),
                Some(Err(err)) => break Err(err.into()),
                Some(Ok(item)) => {
                    let Some(frame) = item.into_request() else {
                        continue;
                    };
                    if queue.send(frame).await.is_err() {
                        // The worker stopped after a fatal failure.
                        continue;
                    }
                }
            },
            Some(outcome) = replies.recv() => match outcome {
                Ok(Some(reply)) => {
                    if let Err(err) = framed.send(reply).await {
                        break Err(err.into());
                    }
                }
                Ok(None) => {}
                Err(err) => break Err(err),
            },
        }
    };
    if result.is_err() {
        worker.abort();
        return result;
    }
    // The peer stopped sending, answer everything that is still queued.
    drop(queue);
    while let Some(outcome) = replies.recv().await {
        if let Some(reply) = outcome? {
            framed.send(reply).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        future::{self, Future},
        pin::Pin,
        time::Duration,
    };

    use futures_util::{SinkExt as _, StreamExt as _};

    use super::*;
    use crate::{
        codec::{rtu::RtuCodec, tcp::TcpCodec},
        frame::{tcp::Header, Response},
    };

    struct Echo;

    impl Service for Echo {
        type Exception = ExceptionCode;
        type Future = future::Ready<Result<Response, ExceptionCode>>;

        fn call(&self, req: UnitRequest<'static>) -> Self::Future {
            future::ready(match req.request {
                Request::ReadHoldingRegisters(address, quantity) => Ok(
                    Response::ReadHoldingRegisters(vec![address; quantity.into()]),
                ),
                Request::WriteSingleRegister(address, word) => {
                    Ok(Response::WriteSingleRegister(address, word))
                }
                _ => Err(ExceptionCode::IllegalDataAddress),
            })
        }

        fn is_known_unit(&self, unit_id: UnitId) -> bool {
            unit_id != 0x13
        }
    }

    fn tcp_request(transaction_id: u16, unit_id: UnitId, pdu: &'static [u8]) -> tcp::Frame {
        tcp::Frame {
            header: Header::new(transaction_id, unit_id),
            pdu: Bytes::from_static(pdu),
        }
    }

    #[tokio::test]
    async fn dispatch_response() {
        let reply = dispatch(&Echo, tcp_request(1, 1, &[0x03, 0x00, 0x07, 0x00, 0x02]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.header, Header::new(1, 1));
        assert_eq!(&reply.pdu[..], &[0x03, 0x04, 0x00, 0x07, 0x00, 0x07]);
    }

    #[tokio::test]
    async fn dispatch_exception() {
        let reply = dispatch(&Echo, tcp_request(2, 1, &[0x01, 0x00, 0x00, 0x00, 0x01]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply.pdu[..], &[0x81, 0x02]);
    }

    #[tokio::test]
    async fn dispatch_unsupported_function() {
        let reply = dispatch(&Echo, tcp_request(3, 1, &[0x2B, 0x0E, 0x01, 0x00]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply.pdu[..], &[0xAB, 0x01]);
    }

    #[tokio::test]
    async fn unknown_unit_is_swallowed() {
        let reply = dispatch(&Echo, tcp_request(4, 0x13, &[0x03, 0x00, 0x00, 0x00, 0x01]))
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn malformed_request_is_fatal() {
        let err = dispatch(&Echo, tcp_request(5, 1, &[0x03, 0x00]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[tokio::test]
    async fn rtu_broadcast_is_not_answered() {
        let frame = rtu::Frame {
            unit_id: unit::BROADCAST,
            pdu: Bytes::from_static(&[0x06, 0x00, 0x01, 0x00, 0x02]),
        };
        assert!(dispatch(&Echo, frame).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn service_failure_is_fatal() {
        struct Failing;

        impl Service for Failing {
            type Exception = ExecutionError;
            type Future = future::Ready<Result<Response, ExecutionError>>;

            fn call(&self, _: UnitRequest<'static>) -> Self::Future {
                future::ready(Err(ExecutionError::Failure("storage offline".into())))
            }
        }

        let err = dispatch(&Failing, tcp_request(6, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(ExecutionError::Failure(_))));
    }

    /// Completes requests for low addresses later than for high ones.
    struct Delayed;

    impl Service for Delayed {
        type Exception = ExceptionCode;
        type Future = Pin<Box<dyn Future<Output = Result<Response, ExceptionCode>> + Send>>;

        fn call(&self, req: UnitRequest<'static>) -> Self::Future {
            Box::pin(async move {
                let Request::ReadHoldingRegisters(address, _) = req.request else {
                    return Err(ExceptionCode::IllegalFunction);
                };
                tokio::time::sleep(Duration::from_millis(100 - u64::from(address))).await;
                Ok(Response::ReadHoldingRegisters(vec![address]))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn responses_keep_request_order() {
        let (stream, peer) = tokio::io::duplex(1024);
        tokio::spawn(serve(stream, TcpCodec, Arc::new(Delayed)));
        let mut client = Framed::new(peer, TcpCodec);
        for (transaction_id, address) in [(1, 10), (2, 50), (3, 90)] {
            let pdu = Bytes::copy_from_slice(&[0x03, 0x00, address, 0x00, 0x01]);
            let frame = tcp::Frame {
                header: Header::new(transaction_id, 1),
                pdu,
            };
            client.send(frame).await.unwrap();
        }
        for (transaction_id, address) in [(1, 10), (2, 50), (3, 90)] {
            let reply = client.next().await.unwrap().unwrap();
            assert_eq!(reply.header.transaction_id, transaction_id);
            assert_eq!(&reply.pdu[..], &[0x03, 0x02, 0x00, address]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn queued_requests_are_answered_after_half_close() {
        use tokio::io::AsyncWriteExt as _;

        let (stream, peer) = tokio::io::duplex(1024);
        let server = tokio::spawn(serve(stream, TcpCodec, Arc::new(Delayed)));
        let mut client = Framed::new(peer, TcpCodec);
        for (transaction_id, address) in [(1, 10), (2, 50)] {
            let pdu = Bytes::copy_from_slice(&[0x03, 0x00, address, 0x00, 0x01]);
            let frame = tcp::Frame {
                header: Header::new(transaction_id, 1),
                pdu,
            };
            client.send(frame).await.unwrap();
        }
        client.get_mut().shutdown().await.unwrap();

        for transaction_id in [1, 2] {
            let reply = client.next().await.unwrap().unwrap();
            assert_eq!(reply.header.transaction_id, transaction_id);
        }
        assert!(server.await.unwrap().is_ok());
        assert!(client.next().await.is_none());
    }

    #[tokio::test]
    async fn malformed_request_closes_connection() {
        let (stream, peer) = tokio::io::duplex(1024);
        let server = tokio::spawn(serve(stream, TcpCodec, Arc::new(Echo)));
        let mut client = Framed::new(peer, TcpCodec);
        client.send(tcp_request(1, 1, &[0x03, 0x00])).await.unwrap();
        assert!(client.next().await.is_none());
        assert!(matches!(server.await.unwrap(), Err(Error::Malformed(_))));
    }

    #[tokio::test]
    async fn rtu_crc_mismatch_is_discarded() {
        let (stream, peer) = tokio::io::duplex(1024);
        tokio::spawn(serve(stream, RtuCodec::server(None), Arc::new(Echo)));
        let mut client = Framed::new(peer, RtuCodec::client(None));
        {
            use tokio::io::AsyncWriteExt as _;
            let raw = client.get_mut();
            raw.write_all(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00])
                .await
                .unwrap();
        }
        let request = rtu::Frame {
            unit_id: 0x01,
            pdu: Bytes::from_static(&[0x06, 0x00, 0x01, 0x00, 0x03]),
        };
        client.send(request).await.unwrap();
        let reply = client.next().await.unwrap().unwrap().unwrap();
        assert_eq!(&reply.pdu[..], &[0x06, 0x00, 0x01, 0x00, 0x03]);
    }
}
