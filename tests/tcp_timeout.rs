// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Requests to a silent device time out and are cleaned up.

#![cfg(feature = "tcp")]

use std::time::Duration;

use modbus_engine::{
    client::tcp::TcpClient, config::ClientConfig, prelude::*, transport::TcpConnector,
};
use tokio::{io::AsyncReadExt as _, net::TcpListener};

#[tokio::test]
async fn silent_device() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server_addr = listener.local_addr()?;
    // Accept and read requests, but never respond.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;
        let mut buf = [0; 256];
        while stream.read(&mut buf).await? > 0 {}
        anyhow::Ok(())
    });

    let config = ClientConfig::default().with_request_timeout(Duration::from_millis(200));
    let client = TcpClient::new(TcpConnector::new(server_addr), config);

    let err = client.read_coils(0, 8).await.unwrap_err();
    assert!(
        matches!(err, Error::Timeout { elapsed } if elapsed >= Duration::from_millis(200)),
        "{err}"
    );
    assert_eq!(client.pending_requests(), 0);

    // The connection survives the timeout.
    assert!(client.is_connected().await);
    Ok(())
}

#[tokio::test]
async fn connection_refused() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server_addr = listener.local_addr()?;
    drop(listener);

    let client = TcpClient::new(TcpConnector::new(server_addr), ClientConfig::default());
    let err = client.read_coils(0, 8).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err}");
    assert!(!client.is_connected().await);
    Ok(())
}
