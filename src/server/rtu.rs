// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU server

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use super::{dispatch, Service};
use crate::{codec::rtu::RtuCodec, config::RtuConfig, transport::Connector, Error};

/// Serves requests on a serial line or any other byte stream.
///
/// Requests addressed to the broadcast unit are executed without replying.
#[derive(Debug)]
pub struct RtuServer<S> {
    service: Arc<S>,
    config: RtuConfig,
}

impl<S: Service> RtuServer<S> {
    #[must_use]
    pub fn new(service: S, config: RtuConfig) -> Self {
        Self {
            service: Arc::new(service),
            config,
        }
    }

    /// Serve requests until the stream is closed or a fatal error occurs.
    pub async fn serve<T>(&self, stream: T) -> Result<(), Error>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = RtuCodec::server(self.config.inter_frame_silence);
        let result = dispatch::serve(stream, codec, Arc::clone(&self.service)).await;
        if let Err(err) = &result {
            log::error!("Stopped serving: {err}");
        }
        result
    }

    /// Open the stream and serve requests on it.
    pub async fn connect_and_serve<C: Connector>(&self, connector: &C) -> Result<(), Error> {
        let stream = connector.connect().await?;
        log::info!("Serving requests");
        self.serve(stream).await
    }
}
