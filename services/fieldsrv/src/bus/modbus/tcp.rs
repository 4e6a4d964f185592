//! Modbus TCP register bus
//!
//! MBAP-framed Modbus client over a single `tokio::net::TcpStream`.
//! Transactions are strictly sequential (the physical link is half-duplex
//! from the bridge's point of view); every response read is bounded by the
//! configured response timeout. Responses whose transaction id does not
//! match the outstanding request are late answers from an earlier, already
//! timed-out cycle; they are drained and discarded, never applied.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::pdu::{
    build_read_request, build_write_multiple_request, build_write_single_request,
    parse_read_response, parse_write_response, ModbusPdu,
};
use super::{FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE};
use crate::bus::{BusError, BusResult, RegisterBus};

const MBAP_HEADER_LEN: usize = 7;
/// Stale responses drained per transaction before giving up
const MAX_STALE_FRAMES: usize = 8;

/// Modbus TCP connection settings
#[derive(Debug, Clone)]
pub struct ModbusTcpConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for ModbusTcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            connect_timeout: Duration::from_secs(3),
            response_timeout: Duration::from_secs(1),
        }
    }
}

/// Modbus TCP client implementing [`RegisterBus`]
#[derive(Debug)]
pub struct ModbusTcpBus {
    config: ModbusTcpConfig,
    stream: Option<TcpStream>,
    next_transaction_id: u16,
}

impl ModbusTcpBus {
    pub fn new(config: ModbusTcpConfig) -> Self {
        Self {
            config,
            stream: None,
            next_transaction_id: 0,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Execute one request/response transaction
    async fn transact(&mut self, unit_id: u8, request: &ModbusPdu) -> BusResult<ModbusPdu> {
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);

        let endpoint = self.endpoint();
        let response_timeout = self.config.response_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| BusError::ConnectionLost(format!("{endpoint}: not connected")))?;

        // MBAP: transaction id, protocol id (0), length (unit + PDU), unit id
        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + request.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&((request.len() + 1) as u16).to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(request.as_slice());

        if let Err(e) = stream.write_all(&frame).await {
            self.stream = None;
            return Err(BusError::ConnectionLost(format!("{endpoint}: {e}")));
        }
        trace!(unit_id, transaction_id, len = frame.len(), "request sent");

        for _ in 0..MAX_STALE_FRAMES {
            let mut header = [0u8; MBAP_HEADER_LEN];
            match timeout(response_timeout, stream.read_exact(&mut header)).await {
                Err(_) => {
                    return Err(BusError::Timeout(format!(
                        "{endpoint}: no response within {response_timeout:?}"
                    )))
                }
                Ok(Err(e)) => {
                    self.stream = None;
                    return Err(BusError::ConnectionLost(format!("{endpoint}: {e}")));
                }
                Ok(Ok(_)) => {}
            }

            let response_id = u16::from_be_bytes([header[0], header[1]]);
            let protocol_id = u16::from_be_bytes([header[2], header[3]]);
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            if protocol_id != 0 || length < 2 || length > MAX_PDU_SIZE + 1 {
                self.stream = None;
                return Err(BusError::Protocol(format!(
                    "{endpoint}: malformed MBAP header (protocol {protocol_id}, length {length})"
                )));
            }

            let mut pdu_bytes = vec![0u8; length - 1];
            match timeout(response_timeout, stream.read_exact(&mut pdu_bytes)).await {
                Err(_) => {
                    return Err(BusError::Timeout(format!(
                        "{endpoint}: response body timed out"
                    )))
                }
                Ok(Err(e)) => {
                    self.stream = None;
                    return Err(BusError::ConnectionLost(format!("{endpoint}: {e}")));
                }
                Ok(Ok(_)) => {}
            }

            if response_id != transaction_id {
                // Late answer to a request that already timed out.
                debug!(
                    expected = transaction_id,
                    got = response_id,
                    "discarding stale response frame"
                );
                continue;
            }

            return ModbusPdu::from_slice(&pdu_bytes);
        }

        Err(BusError::Protocol(format!(
            "{endpoint}: gave up after {MAX_STALE_FRAMES} stale frames"
        )))
    }
}

#[async_trait]
impl RegisterBus for ModbusTcpBus {
    fn bus_type(&self) -> &'static str {
        "modbus-tcp"
    }

    async fn connect(&mut self) -> BusResult<()> {
        let endpoint = self.endpoint();
        match timeout(self.config.connect_timeout, TcpStream::connect(&endpoint)).await {
            Err(_) => Err(BusError::ConnectionFailed(format!(
                "{endpoint}: connect timed out"
            ))),
            Ok(Err(e)) => Err(BusError::ConnectionFailed(format!("{endpoint}: {e}"))),
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(%endpoint, error = %e, "failed to set TCP_NODELAY");
                }
                debug!(%endpoint, "connected");
                self.stream = Some(stream);
                Ok(())
            }
        }
    }

    async fn disconnect(&mut self) -> BusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(endpoint = %self.endpoint(), "disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn read_registers(
        &mut self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> BusResult<Vec<u16>> {
        let request = build_read_request(start, count)?;
        let response = self.transact(unit_id, &request).await?;
        parse_read_response(&response, count)
    }

    async fn write_registers(&mut self, unit_id: u8, start: u16, words: &[u16]) -> BusResult<()> {
        let (request, expected_fc) = if words.len() == 1 {
            (build_write_single_request(start, words[0])?, FC_WRITE_SINGLE_REGISTER)
        } else {
            (build_write_multiple_request(start, words)?, FC_WRITE_MULTIPLE_REGISTERS)
        };
        let response = self.transact(unit_id, &request).await?;
        parse_write_response(&response, expected_fc)
    }
}
