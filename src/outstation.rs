//! Minimal DNP3 outstation.
//!
//! Answers READ, WRITE and control requests from a point database using the
//! same link, transport and object codec as the master. It exists to drive
//! the master end to end, including the faults a master must survive:
//! silence, stale sequence numbers, corrupted frames and unsolicited
//! traffic.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut database = Database::new();
//! database.insert(PointType::AnalogInput, 8, Value::Int(255));
//!
//! let outstation = Outstation::new(OutstationConfig::default(), database);
//! let (master_io, outstation_io) = tokio::io::duplex(4096);
//! let task = tokio::spawn(outstation.run(outstation_io));
//! ```

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::LinkCodec;
use crate::error::{MappingError, Result};
use crate::mapping::PointType;
use crate::parser::{parse_headers, parse_objects, DecodeOptions};
use crate::session::{DEFAULT_LOCAL_ADDR, DEFAULT_REMOTE_ADDR};
use crate::transport::{segment, Reassembler, DEFAULT_MAX_FRAGMENT_SIZE, MAX_SEGMENT_PAYLOAD};
use crate::types::{
    next_app_seq, status, AppControl, Fragment, FunctionCode, Iin, LinkControl, LinkFrame,
    LinkFunction, ObjectHeader, ObjectPoint, PointEncoding, Range, Value, Variation, FLAG_ONLINE,
    GROUP_ANALOG_INPUT, GROUP_ANALOG_OUTPUT, GROUP_ANALOG_OUTPUT_STATUS, GROUP_BINARY_INPUT,
    GROUP_BINARY_OUTPUT, GROUP_CLASS_DATA, GROUP_COUNTER, GROUP_CROB, GROUP_IIN,
    IIN_RESTART_INDEX,
};
use crate::writer::ObjectWriter;

/// Static groups served by class 0 reads, in response order.
const STATIC_GROUPS: [u8; 5] = [
    GROUP_BINARY_INPUT,
    GROUP_BINARY_OUTPUT,
    GROUP_COUNTER,
    GROUP_ANALOG_INPUT,
    GROUP_ANALOG_OUTPUT_STATUS,
];

/// Outstation configuration.
#[derive(Debug, Clone)]
pub struct OutstationConfig {
    /// Outstation link address
    pub local_addr: u16,
    /// Master link address
    pub remote_addr: u16,
    /// Initial internal indications
    pub iin: Iin,
    /// Set CON on every response
    pub request_confirm: bool,
    /// Transport segment payload size
    pub segment_size: usize,
    /// Largest response fragment; longer responses are split
    pub max_fragment_size: usize,
    /// Never answer requests
    pub silent: bool,
    /// Number of requests answered first with a wrong sequence number
    pub stale_responses: usize,
    /// Number of responses sent with a corrupted data block
    pub corrupt_responses: usize,
    /// Send an unsolicited response ahead of every response
    pub unsolicited_before_response: bool,
}

impl Default for OutstationConfig {
    fn default() -> Self {
        Self {
            local_addr: DEFAULT_REMOTE_ADDR,
            remote_addr: DEFAULT_LOCAL_ADDR,
            iin: Iin::default(),
            request_confirm: false,
            segment_size: MAX_SEGMENT_PAYLOAD,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            silent: false,
            stale_responses: 0,
            corrupt_responses: 0,
            unsolicited_before_response: false,
        }
    }
}

impl OutstationConfig {
    /// Set link addresses.
    pub fn addresses(mut self, local_addr: u16, remote_addr: u16) -> Self {
        self.local_addr = local_addr;
        self.remote_addr = remote_addr;
        self
    }

    /// Set the initial IIN.
    pub fn iin(mut self, iin: Iin) -> Self {
        self.iin = iin;
        self
    }

    /// Set CON on every response.
    pub fn request_confirm(mut self, enabled: bool) -> Self {
        self.request_confirm = enabled;
        self
    }

    /// Set transport segment payload size (clamped to 1..=249).
    pub fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = size.clamp(1, MAX_SEGMENT_PAYLOAD);
        self
    }

    /// Set the largest response fragment.
    pub fn max_fragment_size(mut self, size: usize) -> Self {
        self.max_fragment_size = size;
        self
    }

    /// Never answer.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Answer the next `count` requests with a stale sequence first.
    pub fn stale_responses(mut self, count: usize) -> Self {
        self.stale_responses = count;
        self
    }

    /// Corrupt the next `count` responses on the wire.
    pub fn corrupt_responses(mut self, count: usize) -> Self {
        self.corrupt_responses = count;
        self
    }

    /// Precede each response with an unsolicited response.
    pub fn unsolicited_before_response(mut self, enabled: bool) -> Self {
        self.unsolicited_before_response = enabled;
        self
    }
}

/// Points held by the outstation, keyed by static group and index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Database {
    points: BTreeMap<(u8, u16), ObjectPoint>,
}

impl Database {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an online point.
    pub fn insert(&mut self, point_type: PointType, index: u16, value: Value) {
        self.insert_with_flags(point_type, index, value, FLAG_ONLINE);
    }

    /// Insert a point with explicit quality flags.
    pub fn insert_with_flags(
        &mut self,
        point_type: PointType,
        index: u16,
        value: Value,
        flags: u8,
    ) {
        self.points.insert(
            (static_group(point_type), index),
            ObjectPoint::with_flags(index, value, flags),
        );
    }

    /// Look up a point.
    pub fn get(&self, point_type: PointType, index: u16) -> Option<&ObjectPoint> {
        self.points.get(&(static_group(point_type), index))
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn group(&self, group: u8) -> impl Iterator<Item = &ObjectPoint> {
        self.points
            .range((group, 0)..=(group, u16::MAX))
            .map(|(_, point)| point)
    }
}

/// Traffic observed by the outstation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutstationStats {
    /// Requests received (confirms excluded)
    pub requests: usize,
    /// Function and sequence of each request, in order
    pub received: Vec<(FunctionCode, u8)>,
    /// Sequence numbers of solicited confirms
    pub confirms: Vec<u8>,
    /// Sequence numbers of unsolicited confirms
    pub unsolicited_confirms: Vec<u8>,
    /// Link resets received
    pub link_resets: usize,
}

/// DNP3 outstation serving one master connection.
#[derive(Debug)]
pub struct Outstation {
    config: OutstationConfig,
    database: Database,
    iin: Iin,
    stats: OutstationStats,
    reassembler: Reassembler,
    transport_seq: u8,
    unsolicited_seq: u8,
    selected: Vec<(u8, u16, Value)>,
    stale_remaining: usize,
    corrupt_remaining: usize,
}

impl Outstation {
    /// Create an outstation over `database`.
    pub fn new(config: OutstationConfig, database: Database) -> Self {
        Self {
            iin: config.iin,
            reassembler: Reassembler::new(config.max_fragment_size),
            stale_remaining: config.stale_responses,
            corrupt_remaining: config.corrupt_responses,
            config,
            database,
            stats: OutstationStats::default(),
            transport_seq: 0,
            unsolicited_seq: 0,
            selected: Vec::new(),
        }
    }

    /// Current point database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Traffic seen so far.
    pub fn stats(&self) -> &OutstationStats {
        &self.stats
    }

    /// Current internal indications.
    pub fn iin(&self) -> Iin {
        self.iin
    }

    /// Serve requests until the master disconnects, then hand the
    /// outstation back for inspection.
    pub async fn run<T>(mut self, io: T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(io, LinkCodec::new());

        while let Some(frame) = framed.next().await {
            let frame = frame?;
            if frame.destination != self.config.local_addr {
                debug!(%frame, "frame for another outstation ignored");
                continue;
            }
            if !frame.control.prm() {
                continue;
            }

            match frame.control.function() {
                Some(LinkFunction::UnconfirmedUserData) => {}
                Some(LinkFunction::ConfirmedUserData) => {
                    self.link_reply(&mut framed, LinkFunction::Ack).await?;
                }
                Some(LinkFunction::ResetLinkStates) => {
                    self.stats.link_resets += 1;
                    self.transport_seq = 0;
                    self.reassembler.reset();
                    self.link_reply(&mut framed, LinkFunction::Ack).await?;
                    continue;
                }
                Some(LinkFunction::TestLinkStates) => {
                    self.link_reply(&mut framed, LinkFunction::Ack).await?;
                    continue;
                }
                Some(LinkFunction::RequestLinkStatus) => {
                    self.link_reply(&mut framed, LinkFunction::LinkStatus).await?;
                    continue;
                }
                _ => {
                    self.link_reply(&mut framed, LinkFunction::NotSupported).await?;
                    continue;
                }
            }

            let data = match self.reassembler.push(&frame.payload) {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "outstation dropped segment");
                    continue;
                }
            };
            match Fragment::parse(&data) {
                Ok(request) => self.handle_request(&mut framed, request).await?,
                Err(err) => warn!(error = %err, "outstation dropped fragment"),
            }
        }

        Ok(self)
    }

    async fn handle_request<T>(
        &mut self,
        framed: &mut Framed<T, LinkCodec>,
        request: Fragment,
    ) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let seq = request.control.seq;
        if request.function == FunctionCode::Confirm {
            if request.control.uns {
                self.stats.unsolicited_confirms.push(seq);
            } else {
                self.stats.confirms.push(seq);
            }
            return Ok(());
        }

        debug!(%request, "outstation request");
        self.stats.requests += 1;
        self.stats.received.push((request.function, seq));

        let (iin2, blocks) = match request.function {
            FunctionCode::Read => self.read(&request.objects),
            FunctionCode::Write => (self.write(&request.objects), Vec::new()),
            FunctionCode::Select
            | FunctionCode::Operate
            | FunctionCode::DirectOperate
            | FunctionCode::DirectOperateNoResponse => {
                self.control(request.function, &request.objects)
            }
            _ => (Iin::NO_FUNC_CODE_SUPPORT, Vec::new()),
        };

        if self.config.silent || request.function == FunctionCode::DirectOperateNoResponse {
            if self.stale_remaining > 0 {
                self.stale_remaining -= 1;
                let stale = self.fragments(seq.wrapping_add(8), iin2, blocks);
                self.send_fragments(framed, &stale).await?;
            }
            return Ok(());
        }

        if self.config.unsolicited_before_response {
            let unsolicited = Fragment {
                control: AppControl {
                    fir: true,
                    fin: true,
                    con: true,
                    uns: true,
                    seq: self.unsolicited_seq,
                },
                function: FunctionCode::UnsolicitedResponse,
                iin: Some(self.iin),
                objects: Bytes::new(),
            };
            self.unsolicited_seq = next_app_seq(self.unsolicited_seq);
            self.send_fragments(framed, &[unsolicited]).await?;
        }

        if self.stale_remaining > 0 {
            self.stale_remaining -= 1;
            let stale = self.fragments(seq.wrapping_add(8), iin2, blocks.clone());
            self.send_fragments(framed, &stale).await?;
        }

        let response = self.fragments(seq, iin2, blocks);
        self.send_fragments(framed, &response).await
    }

    /// Build response fragments, splitting between object blocks.
    fn fragments(&self, seq: u8, iin2: u8, blocks: Vec<Bytes>) -> Vec<Fragment> {
        let limit = self.config.max_fragment_size.saturating_sub(4).max(1);
        let mut chunks = Vec::new();
        let mut current = BytesMut::new();
        for block in blocks {
            if !current.is_empty() && current.len() + block.len() > limit {
                chunks.push(current.split().freeze());
            }
            current.extend_from_slice(&block);
        }
        chunks.push(current.freeze());

        let iin = Iin::new(self.iin.iin1, self.iin.iin2 | iin2);
        let count = chunks.len();
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, objects)| {
                let control = AppControl {
                    fir: i == 0,
                    fin: i + 1 == count,
                    con: self.config.request_confirm || i + 1 < count,
                    uns: false,
                    seq: seq.wrapping_add(i as u8) & 0x0F,
                };
                Fragment::response(control, iin, objects)
            })
            .collect()
    }

    async fn send_fragments<T>(
        &mut self,
        framed: &mut Framed<T, LinkCodec>,
        fragments: &[Fragment],
    ) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let corrupt = self.corrupt_remaining > 0;
        if corrupt {
            self.corrupt_remaining -= 1;
        }

        for fragment in fragments {
            debug!(%fragment, "outstation response");
            let segments = segment(
                &fragment.encode(),
                self.config.segment_size,
                &mut self.transport_seq,
            );
            for payload in segments {
                let frame = LinkFrame::unconfirmed_user_data(
                    false,
                    self.config.remote_addr,
                    self.config.local_addr,
                    payload,
                );
                if corrupt {
                    // Flip a user data bit so the block CRC fails
                    let mut bytes = BytesMut::from(&frame.encode()?[..]);
                    bytes[10] ^= 0x01;
                    framed.get_mut().write_all(&bytes).await?;
                } else {
                    framed.feed(frame).await?;
                }
            }
        }
        framed.flush().await
    }

    async fn link_reply<T>(
        &self,
        framed: &mut Framed<T, LinkCodec>,
        function: LinkFunction,
    ) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let frame = LinkFrame::new(
            LinkControl::new(false, function),
            self.config.remote_addr,
            self.config.local_addr,
            Bytes::new(),
        );
        framed.send(frame).await
    }

    /// Answer a READ. Returns IIN2 bits and encoded object blocks.
    fn read(&self, objects: &[u8]) -> (u8, Vec<Bytes>) {
        let headers = match parse_headers(objects, 2) {
            Ok(headers) => headers,
            Err(err) => {
                debug!(error = %err, "unreadable READ request");
                return (Iin::OBJECT_UNKNOWN, Vec::new());
            }
        };

        let mut iin2 = 0;
        let mut blocks = Vec::new();
        for header in headers {
            if header.variation.group == GROUP_CLASS_DATA {
                if header.variation != Variation::CLASS_0 {
                    // Event classes: nothing buffered
                    continue;
                }
                for group in STATIC_GROUPS {
                    let points: Vec<ObjectPoint> = self.database.group(group).copied().collect();
                    if points.is_empty() {
                        continue;
                    }
                    match encode_block(default_variation(group), &points, true) {
                        Ok(encoded) => blocks.extend(encoded),
                        Err(bits) => iin2 |= bits,
                    }
                }
                continue;
            }

            if !STATIC_GROUPS.contains(&header.variation.group) {
                iin2 |= Iin::OBJECT_UNKNOWN;
                continue;
            }

            let group = self.database.group(header.variation.group);
            let points: Vec<ObjectPoint> = match &header.range {
                Range::StartStop { start, stop } => group
                    .filter(|p| (*start..=*stop).contains(&p.index))
                    .copied()
                    .collect(),
                Range::Indexed(indices) => indices
                    .iter()
                    .filter_map(|index| {
                        self.database
                            .points
                            .get(&(header.variation.group, *index))
                            .copied()
                    })
                    .collect(),
                Range::Count(count) => group.filter(|p| p.index < *count).copied().collect(),
                Range::All => group.copied().collect(),
            };
            if points.is_empty() {
                iin2 |= Iin::PARAMETER_ERROR;
                continue;
            }

            let indexed = matches!(header.range, Range::Indexed(_));
            match encode_block(header.variation, &points, !indexed) {
                Ok(encoded) => blocks.extend(encoded),
                Err(bits) => iin2 |= bits,
            }
        }

        (iin2, blocks)
    }

    /// Apply a WRITE. Only clearing DEVICE_RESTART is supported.
    fn write(&mut self, objects: &[u8]) -> u8 {
        let blocks = match parse_objects(objects, 2, &DecodeOptions::default()) {
            Ok(blocks) => blocks,
            Err(err) => {
                debug!(error = %err, "unreadable WRITE request");
                return Iin::PARAMETER_ERROR;
            }
        };

        let mut iin2 = 0;
        for block in blocks {
            if block.header.variation != Variation::new(GROUP_IIN, 1) {
                iin2 |= Iin::OBJECT_UNKNOWN;
                continue;
            }
            for point in block.points {
                if point.index == IIN_RESTART_INDEX && point.value == Value::Bool(false) {
                    self.iin.iin1 &= !Iin::DEVICE_RESTART;
                } else {
                    iin2 |= Iin::PARAMETER_ERROR;
                }
            }
        }
        iin2
    }

    /// Handle SELECT / OPERATE / DIRECT_OPERATE, echoing every object with
    /// its control status.
    fn control(&mut self, function: FunctionCode, objects: &[u8]) -> (u8, Vec<Bytes>) {
        let blocks = match parse_objects(objects, 2, &DecodeOptions::default()) {
            Ok(blocks) => blocks,
            Err(err) => {
                debug!(error = %err, "unreadable control request");
                return (Iin::PARAMETER_ERROR, Vec::new());
            }
        };

        let mut iin2 = 0;
        let mut echoes = Vec::new();
        for block in blocks {
            let target = match block.header.variation.group {
                GROUP_ANALOG_OUTPUT => GROUP_ANALOG_OUTPUT_STATUS,
                GROUP_CROB => GROUP_BINARY_OUTPUT,
                _ => {
                    iin2 |= Iin::OBJECT_UNKNOWN;
                    continue;
                }
            };

            let mut echoed = Vec::with_capacity(block.points.len());
            for mut point in block.points {
                let key = (target, point.index);
                let status = if !self.database.points.contains_key(&key) {
                    status::NOT_SUPPORTED
                } else {
                    match function {
                        FunctionCode::Select => {
                            self.selected.push((target, point.index, point.value));
                            status::SUCCESS
                        }
                        FunctionCode::Operate => {
                            if self.selected.contains(&(target, point.index, point.value)) {
                                self.apply(key, point.value);
                                status::SUCCESS
                            } else {
                                status::NO_SELECT
                            }
                        }
                        _ => {
                            self.apply(key, point.value);
                            status::SUCCESS
                        }
                    }
                };
                point.status = Some(status);
                echoed.push(point);
            }

            match ObjectWriter::new().indexed(block.header.variation, &echoed) {
                Ok(writer) => echoes.push(writer.finish()),
                Err(err) => {
                    debug!(error = %err, "cannot echo control");
                    iin2 |= Iin::PARAMETER_ERROR;
                }
            }
        }

        if function == FunctionCode::Operate {
            self.selected.clear();
        }
        (iin2, echoes)
    }

    fn apply(&mut self, key: (u8, u16), value: Value) {
        if let Some(point) = self.database.points.get_mut(&key) {
            point.value = value;
        }
    }
}

/// Encode points of one variation, as a start/stop range when the indices
/// allow it and `prefer_range` is set, otherwise with index prefixes.
/// Packed bits are always sent as ranges, one per contiguous run.
fn encode_block(
    variation: Variation,
    points: &[ObjectPoint],
    prefer_range: bool,
) -> std::result::Result<Vec<Bytes>, u8> {
    let packed = variation.encoding() == Some(PointEncoding::PackedBit);
    let runs = contiguous_runs(points);
    let mut writer = ObjectWriter::new();
    let mut blocks = Vec::new();

    let result = if packed || (prefer_range && runs.len() == 1) {
        runs.iter().try_for_each(|run| {
            writer.range(variation, run[0].index, run)?;
            blocks.push(writer.finish());
            Ok::<(), MappingError>(())
        })
    } else {
        writer.indexed(variation, points).map(|writer| {
            blocks.push(writer.finish());
        })
    };

    result.map(|_| blocks).map_err(|err| {
        debug!(error = %err, object = %ObjectHeader::all(variation), "cannot encode points");
        Iin::PARAMETER_ERROR
    })
}

/// Split points into runs of consecutive indices.
fn contiguous_runs(points: &[ObjectPoint]) -> Vec<&[ObjectPoint]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=points.len() {
        if i == points.len() || points[i].index != points[i - 1].index.wrapping_add(1) {
            runs.push(&points[start..i]);
            start = i;
        }
    }
    runs
}

const fn static_group(point_type: PointType) -> u8 {
    match point_type {
        PointType::AnalogInput => GROUP_ANALOG_INPUT,
        PointType::AnalogOutput => GROUP_ANALOG_OUTPUT_STATUS,
        PointType::BinaryInput => GROUP_BINARY_INPUT,
        PointType::BinaryOutput => GROUP_BINARY_OUTPUT,
        PointType::Counter => GROUP_COUNTER,
    }
}

/// Variation reported for a group in class 0 responses.
const fn default_variation(group: u8) -> Variation {
    match group {
        GROUP_BINARY_INPUT | GROUP_BINARY_OUTPUT => Variation::new(group, 2),
        _ => Variation::new(group, 1),
    }
}
