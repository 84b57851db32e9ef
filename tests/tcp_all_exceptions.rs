// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg(feature = "tcp")]

mod exception;

use modbus_engine::{client::tcp::TcpClient, server::tcp::TcpServer};

use crate::exception::{check_client, TestService};

#[tokio::test]
async fn all_exceptions() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = TcpServer::new(TestService {});
    let socket_addr = server.bind("127.0.0.1:0".parse()?).await?;
    println!("Started up server on {socket_addr}");

    let client = TcpClient::connect(socket_addr).await?;
    check_client(&client).await;

    server.unbind().await?;
    Ok(())
}
