//! DNP3 master session.
//!
//! A [`DeviceSession`] owns one connection to one outstation and runs one
//! request/response exchange at a time:
//!
//! ```text
//! Idle -> Sent -> AwaitingResponse -> Completed
//!                                  -> TimedOut (retry or NoResponse)
//!                                  -> Failed
//! ```
//!
//! Sequence counters live in the session and are only touched from the
//! `&mut self` request path, so two requests can never interleave.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::LinkCodec;
use crate::error::{ApplicationDecodeError, MappingError, ProtocolError, Result, SessionError};
use crate::mapping::{ObjectAddress, ObjectMapper, PointType, TagMapping};
use crate::parser::{find_point, parse_response, DecodeOptions, FloatByteOrder};
use crate::transport::{segment, Reassembler, DEFAULT_MAX_FRAGMENT_SIZE, MAX_SEGMENT_PAYLOAD};
use crate::types::{
    next_app_seq, Fragment, FunctionCode, Iin, LinkControl, LinkFrame, LinkFunction,
    ObjectBlock, ObjectPoint, PointValue, Value, Variation, GROUP_IIN, IIN_RESTART_INDEX,
};
use crate::writer::ObjectWriter;

/// Default DNP3 TCP port.
pub const DEFAULT_PORT: u16 = 20000;

/// Default master link address.
pub const DEFAULT_LOCAL_ADDR: u16 = 1;

/// Default outstation link address.
pub const DEFAULT_REMOTE_ADDR: u16 = 10;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// Default response timeout in milliseconds.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Default retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// How writes to output points are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperateMode {
    /// DIRECT_OPERATE, echo checked
    #[default]
    DirectOperate,
    /// SELECT then OPERATE, both echoes checked
    SelectBeforeOperate,
    /// DIRECT_OPERATE_NR, no response expected
    DirectOperateNoAck,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outstation address (host:port)
    pub address: String,
    /// Master link address
    pub local_addr: u16,
    /// Outstation link address
    pub remote_addr: u16,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Time to wait for each response fragment
    pub response_timeout: Duration,
    /// Retries after the first attempt
    pub retries: u32,
    /// Set CON on requests
    pub request_confirm: bool,
    /// Transport segment payload size
    pub segment_size: usize,
    /// Largest reassembled fragment accepted
    pub max_fragment_size: usize,
    /// Float byte order of the device
    pub float_byte_order: FloatByteOrder,
    /// How output writes are carried out
    pub operate_mode: OperateMode,
    /// Point type to object mapping
    pub mapper: ObjectMapper,
    /// Send RESET_LINK_STATES after connecting
    pub reset_link_on_open: bool,
    /// Token that cancels the session; a fresh one when unset
    pub cancellation_token: Option<CancellationToken>,
}

impl SessionConfig {
    /// Create a new configuration with the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            local_addr: DEFAULT_LOCAL_ADDR,
            remote_addr: DEFAULT_REMOTE_ADDR,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT),
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            retries: DEFAULT_RETRIES,
            request_confirm: false,
            segment_size: MAX_SEGMENT_PAYLOAD,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            float_byte_order: FloatByteOrder::default(),
            operate_mode: OperateMode::default(),
            mapper: ObjectMapper::default(),
            reset_link_on_open: false,
            cancellation_token: None,
        }
    }

    /// Set master link address.
    pub fn local_addr(mut self, addr: u16) -> Self {
        self.local_addr = addr;
        self
    }

    /// Set outstation link address.
    pub fn remote_addr(mut self, addr: u16) -> Self {
        self.remote_addr = addr;
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set response timeout.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set retry budget.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Request application confirms from the outstation.
    pub fn request_confirm(mut self, enabled: bool) -> Self {
        self.request_confirm = enabled;
        self
    }

    /// Set transport segment payload size (clamped to 1..=249).
    pub fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = size.clamp(1, MAX_SEGMENT_PAYLOAD);
        self
    }

    /// Set the largest reassembled fragment accepted.
    pub fn max_fragment_size(mut self, size: usize) -> Self {
        self.max_fragment_size = size;
        self
    }

    /// Set float byte order.
    pub fn float_byte_order(mut self, order: FloatByteOrder) -> Self {
        self.float_byte_order = order;
        self
    }

    /// Set operate mode.
    pub fn operate_mode(mut self, mode: OperateMode) -> Self {
        self.operate_mode = mode;
        self
    }

    /// Set object mapper.
    pub fn mapper(mut self, mapper: ObjectMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Reset the link after connecting.
    pub fn reset_link_on_open(mut self, enabled: bool) -> Self {
        self.reset_link_on_open = enabled;
        self
    }

    /// Cancel the session through `token`, e.g. a child of a service
    /// shutdown token.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions::with_float_byte_order(self.float_byte_order)
    }
}

/// State of the current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// No exchange started
    Idle,
    /// Request written to the socket
    Sent,
    /// Waiting for the response
    AwaitingResponse,
    /// Response received
    Completed,
    /// Attempt timed out
    TimedOut,
    /// Exchange ended with an error
    Failed,
}

/// A complete (possibly multi-fragment) response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    /// IIN accumulated over all fragments
    pub iin: Iin,
    /// Decoded object blocks in arrival order
    pub blocks: Vec<ObjectBlock>,
}

/// Session shared between tasks; the mutex serializes requests.
pub type SharedSession<T = TcpStream> = Arc<Mutex<DeviceSession<T>>>;

/// DNP3 master session with one outstation.
pub struct DeviceSession<T = TcpStream> {
    config: SessionConfig,
    framed: Framed<T, LinkCodec>,
    reassembler: Reassembler,
    app_seq: u8,
    transport_seq: u8,
    state: ExchangeState,
    last_iin: Iin,
    cancel: CancellationToken,
    closed: bool,
}

impl DeviceSession<TcpStream> {
    /// Connect to an outstation.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| SessionError::ConnectTimeout)??;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true).ok();

        info!(
            address = %config.address,
            local = config.local_addr,
            remote = config.remote_addr,
            "DNP3 session opened"
        );

        let reset = config.reset_link_on_open;
        let mut session = Self::from_io(stream, config);
        if reset {
            session.reset_link().await?;
        }
        Ok(session)
    }
}

impl<T> DeviceSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Run a session over an established byte stream.
    pub fn from_io(io: T, config: SessionConfig) -> Self {
        Self {
            reassembler: Reassembler::new(config.max_fragment_size),
            framed: Framed::new(io, LinkCodec::new()),
            cancel: config.cancellation_token.clone().unwrap_or_default(),
            config,
            app_seq: 0,
            transport_seq: 0,
            state: ExchangeState::Idle,
            last_iin: Iin::default(),
            closed: false,
        }
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the state of the last exchange.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Sequence number the next request will use.
    pub fn app_seq(&self) -> u8 {
        self.app_seq
    }

    /// IIN from the last completed response.
    pub fn last_iin(&self) -> Iin {
        self.last_iin
    }

    /// Frames dropped by the link layer so far.
    pub fn rejected_frames(&self) -> u64 {
        self.framed.codec().rejected_frames()
    }

    /// Check if the session has terminated.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Token that cancels the session when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wrap the session for use from several tasks.
    pub fn into_shared(self) -> SharedSession<T> {
        Arc::new(Mutex::new(self))
    }

    /// Read one point.
    pub async fn read_point(&mut self, point_type: PointType, index: u16) -> Result<PointValue> {
        let address = self.config.mapper.read_address(point_type, index)?;
        let objects = ObjectWriter::new()
            .read_single(address.object(), address.index)
            .finish();

        let response = self.request(FunctionCode::Read, objects).await?;
        let point = find_point(&response.blocks, address.group, address.index)
            .ok_or_else(|| missing(address))?;
        Ok(PointValue::from_object(point_type, index, point))
    }

    /// Read a contiguous range of points.
    ///
    /// Points the outstation did not return are absent from the result.
    pub async fn read_range(
        &mut self,
        point_type: PointType,
        start: u16,
        stop: u16,
    ) -> Result<Vec<PointValue>> {
        if stop < start {
            return Err(MappingError::IndexOutOfRange {
                index: stop as i64,
                index_offset: self.config.mapper.index_offset(),
            }
            .into());
        }
        let first = self.config.mapper.read_address(point_type, start)?;
        let last = self.config.mapper.read_address(point_type, stop)?;
        let objects = ObjectWriter::new()
            .read_range(first.object(), first.index, last.index)
            .finish();

        let response = self.request(FunctionCode::Read, objects).await?;
        let mapper = &self.config.mapper;
        let values = response
            .blocks
            .iter()
            .filter(|block| block.header.variation.group == first.group)
            .flat_map(|block| block.points.iter())
            .filter(|point| (first.index..=last.index).contains(&point.index))
            .filter_map(|point| {
                let logical = mapper.logical_index(point.index).ok()?;
                Some(PointValue::from_object(point_type, logical, point))
            })
            .collect();
        Ok(values)
    }

    /// Read all static data (class 0).
    ///
    /// Objects of groups with no point type (e.g. g80) are skipped.
    pub async fn integrity_poll(&mut self) -> Result<Vec<PointValue>> {
        let objects = ObjectWriter::new().read_all(Variation::CLASS_0).finish();
        let response = self.request(FunctionCode::Read, objects).await?;

        let mut values = Vec::new();
        for block in &response.blocks {
            let Some(point_type) = ObjectMapper::point_type_for_group(block.header.variation.group)
            else {
                debug!(object = %block.header, "skipping unmapped object in integrity poll");
                continue;
            };
            for point in &block.points {
                match self.config.mapper.logical_index(point.index) {
                    Ok(logical) => values.push(PointValue::from_object(point_type, logical, point)),
                    Err(err) => debug!(error = %err, "skipping point outside logical range"),
                }
            }
        }
        Ok(values)
    }

    /// Write or operate one output point.
    pub async fn write_point(
        &mut self,
        point_type: PointType,
        index: u16,
        value: Value,
    ) -> Result<()> {
        let address = self.config.mapper.write_address(point_type, index)?;
        let value = self.config.mapper.command_value(point_type, value)?;
        let objects = ObjectWriter::with_float_byte_order(self.config.float_byte_order)
            .indexed(address.object(), &[ObjectPoint::new(address.index, value)])?
            .finish();

        match self.config.operate_mode {
            OperateMode::DirectOperate => {
                let response = self.request(FunctionCode::DirectOperate, objects).await?;
                check_echo(&response, address)
            }
            OperateMode::SelectBeforeOperate => {
                let response = self.request(FunctionCode::Select, objects.clone()).await?;
                check_echo(&response, address)?;
                let response = self.request(FunctionCode::Operate, objects).await?;
                check_echo(&response, address)
            }
            OperateMode::DirectOperateNoAck => {
                self.request(FunctionCode::DirectOperateNoResponse, objects)
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Clear the outstation's DEVICE_RESTART indication.
    pub async fn clear_restart(&mut self) -> Result<()> {
        let objects = ObjectWriter::new()
            .range(
                Variation::new(GROUP_IIN, 1),
                IIN_RESTART_INDEX,
                &[ObjectPoint::new(IIN_RESTART_INDEX, Value::Bool(false))],
            )?
            .finish();
        self.request(FunctionCode::Write, objects).await?;
        Ok(())
    }

    /// Read a tag, returning its value in engineering units.
    pub async fn read_tag(&mut self, tag: &TagMapping) -> Result<PointValue> {
        let mut value = self.read_point(tag.point_type, tag.index).await?;
        value.value = tag.to_engineering(value.value);
        Ok(value)
    }

    /// Write a tag from a value in engineering units.
    pub async fn write_tag(&mut self, tag: &TagMapping, value: Value) -> Result<()> {
        let raw = tag.to_raw(value)?;
        self.write_point(tag.point_type, tag.index, raw).await
    }

    /// Send RESET_LINK_STATES and wait for the ACK.
    ///
    /// Transport and application sequence numbers restart from zero.
    pub async fn reset_link(&mut self) -> Result<()> {
        self.ensure_open()?;
        let frame = LinkFrame::reset_link_states(
            true,
            self.config.remote_addr,
            self.config.local_addr,
        );

        let attempts = self.config.retries.saturating_add(1);
        for attempt in 1..=attempts {
            self.send_link(frame.clone()).await?;
            let deadline = Instant::now() + self.config.response_timeout;

            loop {
                let reply = match self.next_frame(deadline).await {
                    Ok(reply) => reply,
                    Err(err) => return Err(self.fail(err)),
                };
                let Some(reply) = reply else {
                    warn!(attempt, "no reply to link reset");
                    break;
                };
                if reply.control.prm() {
                    debug!(frame = %reply, "ignoring primary frame during link reset");
                    continue;
                }
                return match reply.control.function() {
                    Some(LinkFunction::Ack) => {
                        self.transport_seq = 0;
                        self.app_seq = 0;
                        self.reassembler.reset();
                        info!(remote = self.config.remote_addr, "link reset");
                        Ok(())
                    }
                    _ => Err(SessionError::BadLinkResponse {
                        function: reply.control.function_code(),
                    }
                    .into()),
                };
            }
        }

        Err(SessionError::NoResponse {
            attempts,
            last_frame_error: self.framed.codec_mut().take_last_error(),
        }
        .into())
    }

    /// Close the session. Further calls fail with `SessionError::Closed`.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state = ExchangeState::Idle;
        self.framed.get_mut().shutdown().await.ok();
        info!(remote = self.config.remote_addr, "DNP3 session closed");
        Ok(())
    }

    /// Run one request/response exchange.
    ///
    /// READ retries reuse the sequence number so a late answer to an
    /// earlier attempt still matches; other functions take a new sequence
    /// per attempt so the outstation never re-executes a stale command.
    pub async fn request(&mut self, function: FunctionCode, objects: Bytes) -> Result<Response> {
        self.ensure_open()?;

        let attempts = self.config.retries.saturating_add(1);
        let mut seq = self.app_seq;

        for attempt in 1..=attempts {
            if attempt > 1 && !function.is_read() {
                seq = next_app_seq(seq);
            }
            let request = Fragment::request(
                function,
                seq,
                self.config.request_confirm,
                objects.clone(),
            );

            debug!(%request, attempt, "sending request");
            if let Err(err) = self.send_fragment(&request).await {
                return Err(self.fail(err));
            }
            self.state = ExchangeState::Sent;

            if function == FunctionCode::DirectOperateNoResponse {
                self.app_seq = next_app_seq(seq);
                self.state = ExchangeState::Completed;
                return Ok(Response::default());
            }

            self.state = ExchangeState::AwaitingResponse;
            match self.await_response(seq).await {
                Ok(Some(response)) => {
                    self.app_seq = next_app_seq(seq);
                    self.state = ExchangeState::Completed;
                    return self.check_iin(response);
                }
                Ok(None) => {
                    self.state = ExchangeState::TimedOut;
                    warn!(%function, seq, attempt, attempts, "response timeout");
                }
                Err(err) => {
                    self.app_seq = next_app_seq(seq);
                    return Err(self.fail(err));
                }
            }
        }

        self.app_seq = next_app_seq(seq);
        Err(SessionError::NoResponse {
            attempts,
            last_frame_error: self.framed.codec_mut().take_last_error(),
        }
        .into())
    }

    /// Collect the response to request `seq`.
    ///
    /// Returns `None` when a fragment does not arrive in time.
    async fn await_response(&mut self, seq: u8) -> Result<Option<Response>> {
        let opts = self.config.decode_options();
        let mut deadline = Instant::now() + self.config.response_timeout;
        let mut expected = seq;
        let mut response: Option<Response> = None;

        loop {
            let Some(fragment) = self.next_fragment(deadline).await? else {
                return Ok(None);
            };

            match fragment.function {
                FunctionCode::Response => {}
                FunctionCode::UnsolicitedResponse => {
                    debug!(%fragment, "unsolicited response ignored");
                    if fragment.control.con {
                        self.send_fragment(&Fragment::confirm(fragment.control.seq, true))
                            .await?;
                    }
                    continue;
                }
                _ => {
                    debug!(%fragment, "unexpected fragment ignored");
                    continue;
                }
            }

            if fragment.control.seq != expected {
                let stale = SessionError::StaleResponse {
                    expected,
                    actual: fragment.control.seq,
                };
                debug!(error = %stale, "discarding response");
                continue;
            }
            if fragment.control.fir {
                response = Some(Response::default());
            }
            let Some(current) = response.as_mut() else {
                debug!(%fragment, "continuation without first fragment discarded");
                continue;
            };

            let blocks = parse_response(&fragment, &opts)?;
            if fragment.control.con {
                self.send_fragment(&Fragment::confirm(fragment.control.seq, false))
                    .await?;
            }

            current.iin.merge(fragment.iin.unwrap_or_default());
            current.blocks.extend(blocks);

            if fragment.control.fin {
                return Ok(response);
            }
            expected = next_app_seq(expected);
            deadline = Instant::now() + self.config.response_timeout;
        }
    }

    fn check_iin(&mut self, response: Response) -> Result<Response> {
        let iin = response.iin;
        self.last_iin = iin;
        if iin.device_restart() {
            info!(%iin, "outstation reports restart");
        }
        if iin.is_request_error() {
            return Err(SessionError::Rejected { iin }.into());
        }
        Ok(response)
    }

    /// Next reassembled fragment from the outstation, handling link
    /// services on the way.
    async fn next_fragment(&mut self, deadline: Instant) -> Result<Option<Fragment>> {
        loop {
            let Some(frame) = self.next_frame(deadline).await? else {
                return Ok(None);
            };

            if !frame.control.prm() {
                debug!(%frame, "ignoring secondary frame");
                continue;
            }
            match frame.control.function() {
                Some(LinkFunction::UnconfirmedUserData) => {}
                Some(LinkFunction::ConfirmedUserData) => {
                    self.send_link_reply(LinkFunction::Ack).await?;
                }
                Some(LinkFunction::ResetLinkStates | LinkFunction::TestLinkStates) => {
                    self.send_link_reply(LinkFunction::Ack).await?;
                    continue;
                }
                Some(LinkFunction::RequestLinkStatus) => {
                    self.send_link_reply(LinkFunction::LinkStatus).await?;
                    continue;
                }
                _ => {
                    debug!(%frame, "unsupported link function");
                    continue;
                }
            }
            if !frame.has_user_data() {
                continue;
            }

            match self.reassembler.push(&frame.payload) {
                Ok(Some(data)) => match Fragment::parse(&data) {
                    Ok(fragment) => return Ok(Some(fragment)),
                    Err(err) => warn!(error = %err, "undecodable fragment discarded"),
                },
                Ok(None) => {}
                Err(err) => warn!(error = %err, "transport segment discarded"),
            }
        }
    }

    /// Next link frame addressed from the outstation to this master.
    async fn next_frame(&mut self, deadline: Instant) -> Result<Option<LinkFrame>> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled.into()),
                _ = sleep_until(deadline) => return Ok(None),
                frame = self.framed.next() => frame,
            };

            match frame {
                None => return Err(SessionError::ConnectionClosed.into()),
                Some(Err(err)) => return Err(err),
                Some(Ok(frame)) => {
                    if frame.source != self.config.remote_addr
                        || frame.destination != self.config.local_addr
                    {
                        debug!(%frame, "ignoring frame for another station");
                        continue;
                    }
                    return Ok(Some(frame));
                }
            }
        }
    }

    async fn send_fragment(&mut self, fragment: &Fragment) -> Result<()> {
        let segments = segment(
            &fragment.encode(),
            self.config.segment_size,
            &mut self.transport_seq,
        );
        for payload in segments {
            let frame = LinkFrame::unconfirmed_user_data(
                true,
                self.config.remote_addr,
                self.config.local_addr,
                payload,
            );
            self.framed.feed(frame).await?;
        }
        self.framed.flush().await
    }

    async fn send_link_reply(&mut self, function: LinkFunction) -> Result<()> {
        let frame = LinkFrame::new(
            LinkControl::new(true, function),
            self.config.remote_addr,
            self.config.local_addr,
            Bytes::new(),
        );
        self.send_link(frame).await
    }

    async fn send_link(&mut self, frame: LinkFrame) -> Result<()> {
        if let Err(err) = self.framed.send(frame).await {
            return Err(self.fail(err));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SessionError::Closed.into());
        }
        Ok(())
    }

    /// Record a failed exchange; terminal errors close the session.
    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.state = ExchangeState::Failed;
        if err.is_terminal() && !self.closed {
            self.closed = true;
            warn!(error = %err, remote = self.config.remote_addr, "DNP3 session terminated");
        }
        err
    }
}

fn missing(address: ObjectAddress) -> ProtocolError {
    ApplicationDecodeError::PointMissing {
        group: address.group,
        variation: address.variation,
        index: address.index,
    }
    .into()
}

/// Check the outstation's echo of a command.
fn check_echo(response: &Response, address: ObjectAddress) -> Result<()> {
    let echo = find_point(&response.blocks, address.group, address.index)
        .ok_or_else(|| missing(address))?;
    match echo.status {
        Some(status) if status != 0 => Err(SessionError::CommandFailed {
            index: address.index,
            status,
        }
        .into()),
        _ => Ok(()),
    }
}

/// Connect to an outstation with default settings apart from addressing,
/// timeout and retries.
///
/// `timeout` bounds both the TCP connect and each response wait.
pub async fn open_session(
    local_addr: u16,
    remote_addr: u16,
    host: &str,
    port: u16,
    timeout: Duration,
    retries: u32,
) -> Result<DeviceSession> {
    let config = SessionConfig::new(format!("{}:{}", host, port))
        .local_addr(local_addr)
        .remote_addr(remote_addr)
        .connect_timeout(timeout)
        .response_timeout(timeout)
        .retries(retries);
    DeviceSession::connect(config).await
}

/// Read one point through a session.
pub async fn read_point<T>(
    session: &mut DeviceSession<T>,
    point_type: PointType,
    index: u16,
) -> Result<PointValue>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    session.read_point(point_type, index).await
}

/// Write one point through a session.
pub async fn write_point<T>(
    session: &mut DeviceSession<T>,
    point_type: PointType,
    index: u16,
    value: Value,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    session.write_point(point_type, index, value).await
}

/// Close a session and release its connection.
pub async fn close_session<T>(mut session: DeviceSession<T>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    session.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectHeader, Qualifier, Range};

    #[test]
    fn test_session_config() {
        let config = SessionConfig::new("192.168.1.100:20000")
            .local_addr(3)
            .remote_addr(1024)
            .response_timeout(Duration::from_millis(500))
            .retries(0)
            .segment_size(4000);

        assert_eq!(config.address, "192.168.1.100:20000");
        assert_eq!(config.local_addr, 3);
        assert_eq!(config.remote_addr, 1024);
        assert_eq!(config.response_timeout, Duration::from_millis(500));
        assert_eq!(config.retries, 0);
        assert_eq!(config.segment_size, MAX_SEGMENT_PAYLOAD);
        assert_eq!(config.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(config.max_fragment_size, DEFAULT_MAX_FRAGMENT_SIZE);
        assert_eq!(config.operate_mode, OperateMode::DirectOperate);
    }

    #[test]
    fn test_session_initial_state() {
        let (io, _peer) = tokio::io::duplex(64);
        let session = DeviceSession::from_io(io, SessionConfig::new("test"));
        assert_eq!(session.state(), ExchangeState::Idle);
        assert_eq!(session.app_seq(), 0);
        assert!(!session.is_closed());
    }

    fn echo(status: Option<u8>) -> Response {
        let header = ObjectHeader {
            variation: Variation::new(41, 1),
            qualifier: Qualifier::CountAndPrefix8,
            range: Range::Count(1),
        };
        Response {
            iin: Iin::default(),
            blocks: vec![ObjectBlock {
                header,
                points: vec![ObjectPoint {
                    index: 2,
                    value: Value::Int(5),
                    flags: None,
                    status,
                }],
            }],
        }
    }

    #[test]
    fn test_check_echo() {
        let address = ObjectAddress {
            group: 41,
            variation: 1,
            index: 2,
        };
        assert!(check_echo(&echo(Some(0)), address).is_ok());
        assert!(matches!(
            check_echo(&echo(Some(4)), address),
            Err(ProtocolError::Session(SessionError::CommandFailed {
                index: 2,
                status: 4
            }))
        ));
        assert!(matches!(
            check_echo(&Response::default(), address),
            Err(ProtocolError::Decode(ApplicationDecodeError::PointMissing { .. }))
        ));
    }
}
