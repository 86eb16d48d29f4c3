//! # Host-side pdebug client
//!
//! [`PdebugClient`] owns one byte stream to the target agent and runs the
//! request/response state machine on top of [`crate::frame`].
//!
//! ## Channel selection
//!
//! A one-byte frame switches the channel for every frame after it, in that
//! direction. The client tracks the channel it last selected for sending and
//! the channel the peer last selected, and only emits a switch when needed.
//! A one-byte `0xff` frame is a NAK: the peer wants the last frame again.
//!
//! ## Ordering
//!
//! Only one debug-channel request is outstanding at a time. While waiting
//! for its reply the client may see:
//!
//! - notifications, which are acknowledged with `DSrMsg_ok` (same message
//!   id) and queued for [`PdebugClient::next_notification`]
//! - console text, which is buffered for [`PdebugClient::take_console`]
//! - stale replies with a different message id, which are dropped

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};

use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, Result};
use crate::frame::{encode_frame, FrameDecoder};
use crate::header::{Channel, Command, DsHeader, Endian, HEADER_SIZE};
use crate::messages::{
    Request, Response, ResponseMode, PDEBUG_PROTOVER_MAJOR, PDEBUG_PROTOVER_MINOR,
};
use crate::notify::Notification;
use crate::text::{TextCommand, TextMessage};

/// Transmission attempts per frame before giving up.
pub const MAX_TRANSMIT_ATTEMPTS: u32 = 3;

/// Request/response driver over any byte stream.
pub struct PdebugClient<T>
{
    transport: T,
    decoder: FrameDecoder,
    endian: Endian,
    next_mid: u8,
    tx_channel: Option<Channel>,
    rx_channel: Channel,
    last_frame: Option<(Channel, Vec<u8>)>,
    notifications: VecDeque<Notification>,
    console: Vec<u8>,
    rx_buf: [u8; 256],
    rx_len: usize,
    rx_pos: usize,
}

impl<T: Read + Write> PdebugClient<T>
{
    /// Wrap a connected stream. Payloads are encoded in `endian`.
    pub fn new(transport: T, endian: Endian) -> Self
    {
        Self {
            transport,
            decoder: FrameDecoder::new(),
            endian,
            next_mid: 0,
            tx_channel: None,
            rx_channel: Channel::Debug,
            last_frame: None,
            notifications: VecDeque::new(),
            console: Vec::new(),
            rx_buf: [0; 256],
            rx_len: 0,
            rx_pos: 0,
        }
    }

    #[must_use]
    pub fn endian(&self) -> Endian
    {
        self.endian
    }

    /// Change the payload byte order, e.g. once the target CPU is known.
    pub fn set_endian(&mut self, endian: Endian)
    {
        self.endian = endian;
    }

    pub fn transport_mut(&mut self) -> &mut T
    {
        &mut self.transport
    }

    pub fn into_inner(self) -> T
    {
        self.transport
    }

    fn alloc_mid(&mut self) -> u8
    {
        let mid = self.next_mid;
        self.next_mid = self.next_mid.wrapping_add(1);
        mid
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()>
    {
        self.transport.write_all(bytes)?;
        self.transport.flush()?;
        Ok(())
    }

    fn select_channel(&mut self, channel: Channel) -> Result<()>
    {
        if self.tx_channel != Some(channel) {
            trace!(channel = ?channel, "selecting channel");
            self.write_raw(&encode_frame(&[channel.as_u8()]))?;
            self.tx_channel = Some(channel);
        }
        Ok(())
    }

    fn send_frame(&mut self, channel: Channel, payload: &[u8]) -> Result<()>
    {
        self.select_channel(channel)?;
        trace!(channel = ?channel, len = payload.len(), "tx frame");
        self.write_raw(&encode_frame(payload))?;
        self.last_frame = Some((channel, payload.to_vec()));
        Ok(())
    }

    fn send_nak(&mut self) -> Result<()>
    {
        debug!("sending NAK");
        self.write_raw(&encode_frame(&[Channel::Nak.as_u8()]))?;
        self.tx_channel = Some(Channel::Nak);
        Ok(())
    }

    fn retransmit(&mut self) -> Result<()>
    {
        let Some((channel, payload)) = self.last_frame.clone() else {
            warn!("NAK received with nothing to retransmit");
            return Ok(());
        };
        self.tx_channel = None;
        self.select_channel(channel)?;
        trace!(channel = ?channel, len = payload.len(), "retransmit frame");
        self.write_raw(&encode_frame(&payload))
    }

    fn read_byte(&mut self) -> Result<u8>
    {
        if self.rx_pos == self.rx_len {
            let n = match self.transport.read(&mut self.rx_buf) {
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(ProtocolError::Timeout);
                }
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(ProtocolError::Disconnected);
            }
            self.rx_len = n;
            self.rx_pos = 0;
        }
        let byte = self.rx_buf[self.rx_pos];
        self.rx_pos += 1;
        Ok(byte)
    }

    /// Read the next frame with a valid checksum, NAKing bad ones.
    fn read_frame(&mut self) -> Result<Vec<u8>>
    {
        let mut bad_frames = 0;
        loop {
            let byte = self.read_byte()?;
            match self.decoder.push(byte) {
                None => {}
                Some(Ok(frame)) => return Ok(frame),
                Some(Err(err @ (ProtocolError::Checksum { .. } | ProtocolError::FrameTooLong { .. }))) => {
                    bad_frames += 1;
                    warn!(error = %err, bad_frames, "dropping bad frame");
                    if bad_frames >= MAX_TRANSMIT_ATTEMPTS {
                        return Err(ProtocolError::TooManyRetries(bad_frames));
                    }
                    self.send_nak()?;
                }
                Some(Err(e)) => return Err(e),
            }
        }
    }

    /// Handle one incoming frame that is not the reply we wait for.
    ///
    /// Returns the debug-channel header and payload when the frame is a
    /// response, so the caller can match it.
    fn dispatch_frame(&mut self, frame: Vec<u8>, attempts: &mut u32) -> Result<Option<(DsHeader, Vec<u8>)>>
    {
        if frame.len() == 1 {
            match Channel::from_u8(frame[0]) {
                Some(Channel::Nak) => {
                    *attempts += 1;
                    if *attempts > MAX_TRANSMIT_ATTEMPTS {
                        return Err(ProtocolError::TooManyRetries(*attempts - 1));
                    }
                    debug!(attempt = *attempts, "peer NAK, retransmitting");
                    self.retransmit()?;
                }
                Some(Channel::Reset) => {
                    debug!("peer reset channel; restarting message ids");
                    self.next_mid = 0;
                    self.rx_channel = Channel::Reset;
                }
                Some(channel) => self.rx_channel = channel,
                None => warn!(byte = frame[0], "ignoring unknown channel selector"),
            }
            return Ok(None);
        }

        match self.rx_channel {
            Channel::Debug => {
                let header = DsHeader::parse(&frame)?;
                let payload = frame[HEADER_SIZE..].to_vec();
                if header.command == Command::Notify {
                    let notification = Notification::decode(&header, &payload)?;
                    debug!(
                        pid = notification.pid,
                        tid = notification.tid,
                        event = ?notification.event.kind(),
                        "notification"
                    );
                    let ack = Response::Ok.encode(notification.mid, self.endian)?;
                    self.send_frame(Channel::Debug, &ack)?;
                    self.notifications.push_back(notification);
                    return Ok(None);
                }
                Ok(Some((header, payload)))
            }
            Channel::Text => {
                let message = TextMessage::decode(&frame)?;
                match message.command {
                    TextCommand::Text => self.console.extend_from_slice(&message.data),
                    other => trace!(command = ?other, "text channel control"),
                }
                Ok(None)
            }
            Channel::Reset | Channel::Nak => {
                trace!(len = frame.len(), "ignoring frame on inactive channel");
                Ok(None)
            }
        }
    }

    /// Send a request and, in [`ResponseMode::Expected`], wait for its reply.
    ///
    /// Error replies are returned as [`Response::Err`]; use [`Self::request`]
    /// to turn them into errors. In suppressed mode the result is
    /// [`Response::Ok`] without waiting.
    ///
    /// # Errors
    ///
    /// Transport failures, retry exhaustion, malformed replies.
    pub fn transact(&mut self, request: &Request, mode: ResponseMode) -> Result<Response>
    {
        let mid = self.alloc_mid();
        let bytes = request.encode(mid, self.endian, mode)?;
        trace!(cmd = %request.command(), mid, len = bytes.len(), "request");
        self.send_frame(Channel::Debug, &bytes)?;

        if mode == ResponseMode::Suppressed {
            return Ok(Response::Ok);
        }

        let mut attempts = 1;
        loop {
            let frame = self.read_frame()?;
            let Some((header, payload)) = self.dispatch_frame(frame, &mut attempts)? else {
                continue;
            };
            if !header.command.is_response() {
                warn!(cmd = %header.command, "unexpected request from target");
                continue;
            }
            if header.mid != mid {
                warn!(expected = mid, got = header.mid, "dropping stale reply");
                continue;
            }
            let response = Response::decode(&header, &payload)?;
            trace!(cmd = %header.command, mid, "response");
            return Ok(response);
        }
    }

    /// Send a request expecting a reply; `DSrMsg_err` becomes an error.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Target`] for an error reply plus all transport errors.
    pub fn request(&mut self, request: &Request) -> Result<Response>
    {
        self.transact(request, ResponseMode::Expected)?.into_result()
    }

    /// Like [`Self::request`] but requires `okdata`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnexpectedResponse`] for any other success reply.
    pub fn request_data(&mut self, request: &Request) -> Result<Vec<u8>>
    {
        match self.request(request)? {
            Response::OkData(data) => Ok(data),
            other => Err(ProtocolError::UnexpectedResponse(format!(
                "expected okdata for {}, got {other:?}",
                request.command()
            ))),
        }
    }

    /// Like [`Self::request`] but requires `okstatus`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnexpectedResponse`] for any other success reply.
    pub fn request_status(&mut self, request: &Request) -> Result<i32>
    {
        match self.request(request)? {
            Response::OkStatus(status) => Ok(status),
            other => Err(ProtocolError::UnexpectedResponse(format!(
                "expected okstatus for {}, got {other:?}",
                request.command()
            ))),
        }
    }

    /// Reset the link and open a debug session.
    ///
    /// # Errors
    ///
    /// Transport errors or a refused connect.
    pub fn connect(&mut self) -> Result<()>
    {
        self.tx_channel = None;
        self.select_channel(Channel::Reset)?;
        self.next_mid = 0;
        self.request(&Request::Connect {
            major: PDEBUG_PROTOVER_MAJOR,
            minor: PDEBUG_PROTOVER_MINOR,
        })?;
        debug!("connected to pdebug");
        Ok(())
    }

    /// Negotiate the protocol version; returns the agent's `(major, minor)`.
    ///
    /// # Errors
    ///
    /// Transport errors or an error reply (old agents do not know `protover`).
    pub fn protocol_version(&mut self) -> Result<(u8, u8)>
    {
        let status = self.request_status(&Request::ProtoVersion {
            major: PDEBUG_PROTOVER_MAJOR,
            minor: PDEBUG_PROTOVER_MINOR,
        })?;
        let major = ((status >> 8) & 0xff) as u8;
        let minor = (status & 0xff) as u8;
        debug!(major, minor, "target protocol version");
        Ok((major, minor))
    }

    /// # Errors
    ///
    /// Transport errors.
    pub fn disconnect(&mut self) -> Result<()>
    {
        self.request(&Request::Disconnect)?;
        Ok(())
    }

    /// Pop a queued notification without blocking.
    pub fn poll_notification(&mut self) -> Option<Notification>
    {
        self.notifications.pop_front()
    }

    /// Block until a notification arrives (or return a queued one).
    ///
    /// # Errors
    ///
    /// Transport errors, including [`ProtocolError::Timeout`].
    pub fn next_notification(&mut self) -> Result<Notification>
    {
        let mut attempts = 1;
        loop {
            if let Some(notification) = self.notifications.pop_front() {
                return Ok(notification);
            }
            let frame = self.read_frame()?;
            if let Some((header, _)) = self.dispatch_frame(frame, &mut attempts)? {
                warn!(cmd = %header.command, mid = header.mid, "unsolicited reply while waiting");
            }
        }
    }

    /// Send console input to the inferior.
    ///
    /// # Errors
    ///
    /// Transport errors.
    pub fn send_text(&mut self, console: u8, data: &[u8]) -> Result<()>
    {
        self.send_frame(Channel::Text, &TextMessage::text(console, data).encode())
    }

    /// Drain buffered console output.
    pub fn take_console(&mut self) -> Vec<u8>
    {
        std::mem::take(&mut self.console)
    }
}
