// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [Modbus](https://en.wikipedia.org/wiki/Modbus) protocol engine
//! based on [tokio](https://tokio.rs).
//!
//! Modbus is based on a [master/slave](https://en.wikipedia.org/wiki/Master/slave_(technology))
//! model.
//! To avoid confusions with the tokio terminology the master is called *client*
//! and the slave is called *server* in this library.
//!
//! ## Features
//!
//! - PDU codec for the common data access function codes
//! - Modbus TCP (MBAP header) and RTU (unit id + CRC16) framing
//! - Pipelined TCP requests correlated by transaction id
//! - Request timeouts and automatic (re-)connects
//! - TCP and RTU servers with strictly ordered request dispatch
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! modbus-engine = "*"
//! ```
//!
//! If you like to use Modbus RTU on a serial port, enable the `rtu-serial` feature.
//!
//! ```toml
//! [dependencies]
//! modbus-engine = { version = "*", features = ["rtu-serial"] }
//! ```
//!
//! # Examples
//!
//! ## TCP client
//!
//! ```rust,no_run
//! # #[cfg(feature = "tcp")]
//! # async fn read() -> Result<(), Box<dyn std::error::Error>> {
//! use modbus_engine::prelude::*;
//!
//! let socket_addr = "192.168.0.222:502".parse()?;
//! let mut client = tcp::TcpClient::connect(socket_addr).await?;
//! client.set_unit_id(0x01);
//! let data = client.read_input_registers(0x1000, 7).await??;
//! println!("Response is '{data:?}'");
//! # Ok(())
//! # }
//! ```
//!
//! ## TCP server
//!
//! ```rust,no_run
//! # #[cfg(feature = "tcp")]
//! # async fn serve() -> std::io::Result<()> {
//! use modbus_engine::prelude::*;
//! use modbus_engine::server::{tcp::TcpServer, HandlerService, RequestHandler};
//!
//! struct Counter;
//!
//! impl RequestHandler for Counter {
//!     fn read_input_registers(
//!         &self,
//!         _: UnitId,
//!         address: Address,
//!         quantity: Quantity,
//!     ) -> Result<Vec<Word>, ExceptionCode> {
//!         Ok((address..).take(quantity.into()).collect())
//!     }
//! }
//!
//! let server = TcpServer::new(HandlerService::new(Counter));
//! let local_addr = server.bind("0.0.0.0:502".parse().unwrap()).await?;
//! println!("Listening on {local_addr}");
//! # server.unbind().await
//! # }
//! ```

pub mod prelude;

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod server;
pub mod transport;
pub mod unit;

pub use self::frame::{
    Address, Coil, ExceptionCode, ExceptionResponse, FunctionCode, Quantity, Request, RequestPdu,
    Response, ResponsePdu, UnitRequest, Word,
};

pub use self::error::{Error, Result};
