//! Master sessions driven against the in-crate outstation and against
//! scripted byte streams.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use voltage_dnp3::{
    AppControl, ApplicationDecodeError, Database, DeviceSession, ExchangeState, FrameError,
    Fragment, FunctionCode, Iin, LinkCodec, LinkFrame, ObjectMapper, ObjectPoint, ObjectWriter,
    OperateMode, Outstation, OutstationConfig, PointType, ProtocolError, Reassembler,
    SessionConfig, SessionError, TagMapping, Value, Variation,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn database() -> Database {
    let mut db = Database::new();
    for index in 0..5 {
        db.insert(PointType::AnalogInput, index, Value::Int(100 + index as i64));
    }
    db.insert(PointType::AnalogInput, 8, Value::Int(255));
    db.insert(PointType::BinaryInput, 3, Value::Bool(true));
    db.insert(PointType::BinaryOutput, 4, Value::Bool(false));
    db.insert(PointType::AnalogOutput, 2, Value::Int(0));
    db.insert(PointType::Counter, 1, Value::Int(7));
    db
}

fn session_config() -> SessionConfig {
    SessionConfig::new("outstation")
        .response_timeout(Duration::from_millis(500))
        .retries(2)
}

fn start(
    outstation: OutstationConfig,
    config: SessionConfig,
) -> (
    DeviceSession<DuplexStream>,
    JoinHandle<voltage_dnp3::Result<Outstation>>,
) {
    init_tracing();
    let (master_io, outstation_io) = tokio::io::duplex(8192);
    let task = tokio::spawn(Outstation::new(outstation, database()).run(outstation_io));
    (DeviceSession::from_io(master_io, config), task)
}

async fn finish(
    mut session: DeviceSession<DuplexStream>,
    task: JoinHandle<voltage_dnp3::Result<Outstation>>,
) -> Outstation {
    session.close().await.unwrap();
    drop(session);
    task.await.unwrap().unwrap()
}

fn encode_frames(fragment: &Fragment, from_master: bool) -> Vec<u8> {
    if from_master {
        encode_frames_between(fragment, true, 10, 1)
    } else {
        encode_frames_between(fragment, false, 1, 10)
    }
}

fn encode_frames_between(
    fragment: &Fragment,
    from_master: bool,
    destination: u16,
    source: u16,
) -> Vec<u8> {
    let mut seq = 0;
    let mut codec = LinkCodec::new();
    let mut out = BytesMut::new();
    for payload in voltage_dnp3::segment(&fragment.encode(), 249, &mut seq) {
        let frame = LinkFrame::unconfirmed_user_data(from_master, destination, source, payload);
        codec.encode(frame, &mut out).unwrap();
    }
    out.to_vec()
}

fn read_request(index: u16) -> Fragment {
    Fragment::request(
        FunctionCode::Read,
        0,
        false,
        ObjectWriter::new()
            .read_single(Variation::new(30, 1), index)
            .finish(),
    )
}

fn analog_response(control: AppControl, index: u16, value: i64) -> Fragment {
    Fragment::response(
        control,
        Iin::default(),
        ObjectWriter::new()
            .indexed(
                Variation::new(30, 1),
                &[ObjectPoint::with_flags(index, Value::Int(value), 0x01)],
            )
            .unwrap()
            .finish(),
    )
}

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_read_analog_input() {
    let (mut session, task) = start(OutstationConfig::default(), session_config());

    let point = session.read_point(PointType::AnalogInput, 8).await.unwrap();
    assert_eq!(point.value, Value::Int(255));
    assert!(point.online);
    assert_eq!(point.to_string(), "AI[8] = 255");
    assert_eq!(session.app_seq(), 1);
    assert_eq!(session.state(), ExchangeState::Completed);

    let outstation = finish(session, task).await;
    assert_eq!(outstation.stats().received, vec![(FunctionCode::Read, 0)]);
}

#[tokio::test]
async fn test_read_matches_reference_bytes() {
    // READ g30v2 index 8 from master 1 to outstation 10, and its answer
    let request = hex("05640dc40a00010075bac0c0011e0217010869c3");
    let response = hex("0564124401000a0073c7c0c08100001e0217010801ff007375");
    let mock = tokio_test::io::Builder::new()
        .write(&request)
        .read(&response)
        .build();

    let mapper = ObjectMapper::default()
        .with_read_variation(PointType::AnalogInput, 2)
        .unwrap();
    let mut session = DeviceSession::from_io(mock, SessionConfig::new("mock").mapper(mapper));

    let point = session.read_point(PointType::AnalogInput, 8).await.unwrap();
    assert_eq!(point.value, Value::Int(255));
    assert!(point.online);
}

#[tokio::test]
async fn test_missing_point_in_range_response() {
    let request = Fragment::request(
        FunctionCode::Read,
        0,
        false,
        ObjectWriter::new()
            .read_single(Variation::new(30, 1), 8)
            .finish(),
    );
    let values = [0x0159, 0x0144, 0x0136, 0x015D, 0x0001];
    let points: Vec<ObjectPoint> = values
        .iter()
        .enumerate()
        .map(|(i, v)| ObjectPoint::with_flags(i as u16, Value::Int(*v), 0x01))
        .collect();
    let response = Fragment::response(
        AppControl::single(0, false, false),
        Iin::default(),
        ObjectWriter::new()
            .range(Variation::new(30, 1), 0, &points)
            .unwrap()
            .finish(),
    );

    let mock = tokio_test::io::Builder::new()
        .write(&encode_frames(&request, true))
        .read(&encode_frames(&response, false))
        .build();
    let mut session = DeviceSession::from_io(mock, SessionConfig::new("mock"));

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Decode(ApplicationDecodeError::PointMissing {
            group: 30,
            variation: 1,
            index: 8,
        })
    ));
    assert!(!session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_read_range_and_integrity_poll() {
    let (mut session, task) = start(OutstationConfig::default(), session_config());

    let values = session
        .read_range(PointType::AnalogInput, 0, 9)
        .await
        .unwrap();
    let indices: Vec<u16> = values.iter().map(|v| v.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 8]);
    assert_eq!(values[3].value, Value::Int(103));

    let all = session.integrity_poll().await.unwrap();
    assert_eq!(all.len(), 10);
    assert!(all
        .iter()
        .any(|v| v.point_type == PointType::Counter && v.value == Value::Int(7)));
    assert!(all
        .iter()
        .any(|v| v.point_type == PointType::BinaryInput && v.value == Value::Bool(true)));

    finish(session, task).await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_point_is_rejected() {
    let (mut session, task) = start(OutstationConfig::default(), session_config());

    let err = session
        .read_point(PointType::AnalogInput, 50)
        .await
        .unwrap_err();
    match err {
        ProtocolError::Session(SessionError::Rejected { iin }) => assert!(iin.parameter_error()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!session.is_closed());

    finish(session, task).await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_response_is_discarded() {
    let outstation = OutstationConfig::default().stale_responses(1);
    let (mut session, task) = start(outstation, session_config());

    let point = session.read_point(PointType::AnalogInput, 8).await.unwrap();
    assert_eq!(point.value, Value::Int(255));

    let outstation = finish(session, task).await;
    assert_eq!(outstation.stats().requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_only_stale_responses_time_out() {
    let outstation = OutstationConfig::default()
        .silent(true)
        .stale_responses(10);
    let (mut session, task) = start(outstation, session_config().retries(0));

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Session(SessionError::NoResponse { attempts: 1, .. })
    ));

    finish(session, task).await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_outstation_exhausts_retries() {
    let outstation = OutstationConfig::default().silent(true);
    let (mut session, task) = start(outstation, session_config());

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Session(SessionError::NoResponse {
            attempts: 3,
            last_frame_error: None,
        })
    ));
    assert!(err.is_retryable());
    assert!(!session.is_closed());
    assert_eq!(session.app_seq(), 1);
    assert_eq!(session.state(), ExchangeState::TimedOut);

    let outstation = finish(session, task).await;
    // READ retries reuse the sequence number
    assert_eq!(
        outstation.stats().received,
        vec![
            (FunctionCode::Read, 0),
            (FunctionCode::Read, 0),
            (FunctionCode::Read, 0),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_responses_report_frame_error() {
    let outstation = OutstationConfig::default().corrupt_responses(2);
    let (mut session, task) = start(outstation, session_config().retries(1));

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    match err {
        ProtocolError::Session(SessionError::NoResponse {
            attempts,
            last_frame_error,
        }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(
                last_frame_error,
                Some(FrameError::BadBlockCrc { block: 0, .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.rejected_frames(), 2);

    // Later responses are intact
    let point = session.read_point(PointType::AnalogInput, 8).await.unwrap();
    assert_eq!(point.value, Value::Int(255));

    finish(session, task).await;
}

#[tokio::test(start_paused = true)]
async fn test_writes_advance_sequence() {
    let (mut session, task) = start(OutstationConfig::default(), session_config());

    session
        .write_point(PointType::BinaryOutput, 4, Value::Bool(true))
        .await
        .unwrap();
    session
        .write_point(PointType::AnalogOutput, 2, Value::Int(42))
        .await
        .unwrap();
    assert_eq!(session.app_seq(), 2);

    let echo = session.read_point(PointType::AnalogOutput, 2).await.unwrap();
    assert_eq!(echo.value, Value::Int(42));

    let outstation = finish(session, task).await;
    assert_eq!(
        outstation.stats().received,
        vec![
            (FunctionCode::DirectOperate, 0),
            (FunctionCode::DirectOperate, 1),
            (FunctionCode::Read, 2),
        ]
    );
    assert_eq!(
        outstation
            .database()
            .get(PointType::BinaryOutput, 4)
            .unwrap()
            .value,
        Value::Bool(true)
    );
}

#[tokio::test(start_paused = true)]
async fn test_select_before_operate() {
    let config = session_config().operate_mode(OperateMode::SelectBeforeOperate);
    let (mut session, task) = start(OutstationConfig::default(), config);

    session
        .write_point(PointType::AnalogOutput, 2, Value::Int(-12))
        .await
        .unwrap();

    let err = session
        .write_point(PointType::AnalogOutput, 9, Value::Int(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Session(SessionError::CommandFailed {
            index: 9,
            status: 4
        })
    ));

    let outstation = finish(session, task).await;
    assert_eq!(
        outstation.stats().received,
        vec![
            (FunctionCode::Select, 0),
            (FunctionCode::Operate, 1),
            (FunctionCode::Select, 2),
        ]
    );
    assert_eq!(
        outstation
            .database()
            .get(PointType::AnalogOutput, 2)
            .unwrap()
            .value,
        Value::Int(-12)
    );
}

#[tokio::test(start_paused = true)]
async fn test_direct_operate_no_ack() {
    let config = session_config().operate_mode(OperateMode::DirectOperateNoAck);
    let (mut session, task) = start(OutstationConfig::default(), config);

    session
        .write_point(PointType::BinaryOutput, 4, Value::Int(1))
        .await
        .unwrap();
    assert_eq!(session.app_seq(), 1);

    let outstation = finish(session, task).await;
    assert_eq!(
        outstation.stats().received,
        vec![(FunctionCode::DirectOperateNoResponse, 0)]
    );
    assert_eq!(
        outstation
            .database()
            .get(PointType::BinaryOutput, 4)
            .unwrap()
            .value,
        Value::Bool(true)
    );
}

#[tokio::test(start_paused = true)]
async fn test_tags_scale_values() {
    let (mut session, task) = start(OutstationConfig::default(), session_config());

    let input =
        TagMapping::new("feeder.current", PointType::AnalogInput, 8).with_scaling(0.5, -5.0);
    let value = session.read_tag(&input).await.unwrap();
    assert_eq!(value.value, Value::Float(122.5));

    let output =
        TagMapping::new("feeder.setpoint", PointType::AnalogOutput, 2).with_scaling(0.5, -5.0);
    session.write_tag(&output, Value::Float(495.0)).await.unwrap();

    let outstation = finish(session, task).await;
    let raw = outstation
        .database()
        .get(PointType::AnalogOutput, 2)
        .unwrap()
        .value;
    assert_eq!(raw.as_f64(), 1000.0);
}

#[tokio::test(start_paused = true)]
async fn test_confirms_requested_responses() {
    let outstation = OutstationConfig::default()
        .request_confirm(true)
        .unsolicited_before_response(true);
    let (mut session, task) = start(outstation, session_config());

    session.read_point(PointType::AnalogInput, 8).await.unwrap();
    session.read_point(PointType::AnalogInput, 0).await.unwrap();

    let outstation = finish(session, task).await;
    assert_eq!(outstation.stats().confirms, vec![0, 1]);
    assert_eq!(outstation.stats().unsolicited_confirms, vec![0, 1]);
    assert_eq!(outstation.stats().requests, 2);
}

#[tokio::test(start_paused = true)]
async fn test_multi_fragment_response() {
    let outstation = OutstationConfig::default()
        .max_fragment_size(20)
        .segment_size(8);
    let (mut session, task) = start(outstation, session_config());

    let all = session.integrity_poll().await.unwrap();
    assert_eq!(all.len(), 10);

    let outstation = finish(session, task).await;
    // Non-final fragments always ask for confirmation
    assert!(!outstation.stats().confirms.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_clear_restart() {
    let outstation = OutstationConfig::default().iin(Iin::new(Iin::DEVICE_RESTART, 0));
    let (mut session, task) = start(outstation, session_config());

    session.read_point(PointType::AnalogInput, 8).await.unwrap();
    assert!(session.last_iin().device_restart());

    session.clear_restart().await.unwrap();
    assert!(!session.last_iin().device_restart());

    let outstation = finish(session, task).await;
    assert!(!outstation.iin().device_restart());
}

#[tokio::test(start_paused = true)]
async fn test_link_reset() {
    let (mut session, task) = start(OutstationConfig::default(), session_config());

    session.read_point(PointType::AnalogInput, 8).await.unwrap();
    session.reset_link().await.unwrap();
    assert_eq!(session.app_seq(), 0);
    session.read_point(PointType::AnalogInput, 8).await.unwrap();

    let outstation = finish(session, task).await;
    assert_eq!(outstation.stats().link_resets, 1);
    assert_eq!(
        outstation.stats().received,
        vec![(FunctionCode::Read, 0), (FunctionCode::Read, 0)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_terminates_session() {
    let outstation = OutstationConfig::default().silent(true);
    let (mut session, task) = start(outstation, session_config());

    let token = session.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Session(SessionError::Cancelled)
    ));
    assert!(session.is_closed());
    assert_eq!(session.state(), ExchangeState::Failed);

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Session(SessionError::Closed)));

    drop(session);
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_is_terminal() {
    init_tracing();
    let (master_io, outstation_io) = tokio::io::duplex(1024);
    drop(outstation_io);
    let mut session = DeviceSession::from_io(master_io, session_config());

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    assert!(err.is_terminal());
    assert!(session.is_closed());
    assert_eq!(session.state(), ExchangeState::Failed);

    let err = session
        .write_point(PointType::BinaryOutput, 4, Value::Bool(true))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Session(SessionError::Closed)));

    // Closing an already terminated session is harmless
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_link_only_and_foreign_frames_are_skipped() {
    let mut codec = LinkCodec::new();
    let mut incoming = BytesMut::new();
    // Link-only ACK from the outstation carries no data
    codec
        .encode(LinkFrame::ack(false, 1, 10), &mut incoming)
        .unwrap();
    incoming.extend_from_slice(&encode_frames_between(
        &analog_response(AppControl::single(0, false, false), 8, 99),
        false,
        1,
        11,
    ));
    incoming.extend_from_slice(&encode_frames_between(
        &analog_response(AppControl::single(0, false, false), 8, 98),
        false,
        2,
        10,
    ));
    incoming.extend_from_slice(&encode_frames(
        &analog_response(AppControl::single(0, false, false), 8, 7),
        false,
    ));

    let mock = tokio_test::io::Builder::new()
        .write(&encode_frames(&read_request(8), true))
        .read(&incoming)
        .build();
    let mut session = DeviceSession::from_io(mock, SessionConfig::new("mock"));

    let point = session.read_point(PointType::AnalogInput, 8).await.unwrap();
    assert_eq!(point.value, Value::Int(7));
    assert_eq!(session.state(), ExchangeState::Completed);
    assert_eq!(session.rejected_frames(), 0);
}

#[tokio::test]
async fn test_undecodable_response_is_not_confirmed() {
    let response = Fragment::response(
        AppControl::single(0, true, false),
        Iin::default(),
        Bytes::from_static(&[99, 1, 0x06]),
    );
    // No CONFIRM is scripted: writing one would fail the mock
    let mock = tokio_test::io::Builder::new()
        .write(&encode_frames(&read_request(8), true))
        .read(&encode_frames(&response, false))
        .build();
    let mut session = DeviceSession::from_io(mock, SessionConfig::new("mock"));

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Decode(ApplicationDecodeError::UnknownObject {
            group: 99,
            variation: 1,
            ..
        })
    ));
    assert_eq!(session.state(), ExchangeState::Failed);
    assert!(!session.is_closed());
}

#[tokio::test]
async fn test_accepted_response_is_confirmed_after_decoding() {
    let mock = tokio_test::io::Builder::new()
        .write(&encode_frames(&read_request(8), true))
        .read(&encode_frames(
            &analog_response(AppControl::single(0, true, false), 8, 255),
            false,
        ))
        .write(&encode_frames_confirm(0))
        .build();
    let mut session = DeviceSession::from_io(mock, SessionConfig::new("mock"));

    let point = session.read_point(PointType::AnalogInput, 8).await.unwrap();
    assert_eq!(point.value, Value::Int(255));
}

/// CONFIRM for `seq`, carried in the master's second transport segment.
fn encode_frames_confirm(seq: u8) -> Vec<u8> {
    let mut transport_seq = 1;
    let mut codec = LinkCodec::new();
    let mut out = BytesMut::new();
    let confirm = Fragment::confirm(seq, false);
    for payload in voltage_dnp3::segment(&confirm.encode(), 249, &mut transport_seq) {
        let frame = LinkFrame::unconfirmed_user_data(true, 10, 1, payload);
        codec.encode(frame, &mut out).unwrap();
    }
    out.to_vec()
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_retries() {
    let config = session_config().retries(u32::MAX);
    let (mut session, task) = start(OutstationConfig::default(), config);
    let point = session.read_point(PointType::AnalogInput, 8).await.unwrap();
    assert_eq!(point.value, Value::Int(255));
    finish(session, task).await;

    // A silent device is retried until the caller gives up
    let token = CancellationToken::new();
    let config = session_config()
        .retries(u32::MAX)
        .cancellation_token(token.clone());
    let (mut session, task) = start(OutstationConfig::default().silent(true), config);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1600)).await;
        token.cancel();
    });

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Session(SessionError::Cancelled)
    ));
    drop(session);
    let outstation = task.await.unwrap().unwrap();
    assert!(outstation.stats().requests >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_caller_supplied_cancellation_token() {
    let shutdown = CancellationToken::new();
    let config = session_config().cancellation_token(shutdown.child_token());
    let (mut session, task) = start(OutstationConfig::default().silent(true), config);
    assert!(!session.cancellation_token().is_cancelled());

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = session
        .read_point(PointType::AnalogInput, 8)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Session(SessionError::Cancelled)
    ));
    assert!(session.cancellation_token().is_cancelled());
    assert!(session.is_closed());

    drop(session);
    task.await.unwrap().unwrap();
}

#[test]
fn test_stack_round_trip() {
    let mut codec = LinkCodec::new();
    let mut reassembler = Reassembler::new(4096);
    let mut seq = 0;

    for len in 0..=4096usize {
        let payload: Vec<u8> = (0..len).map(|i| (i * 31 + len) as u8).collect();

        let mut wire = BytesMut::new();
        for segment in voltage_dnp3::segment(&payload, 249, &mut seq) {
            let frame = LinkFrame::unconfirmed_user_data(true, 10, 1, segment);
            codec.encode(frame, &mut wire).unwrap();
        }

        let mut result: Option<Bytes> = None;
        while let Some(frame) = codec.decode(&mut wire).unwrap() {
            assert_eq!(frame.destination, 10);
            if let Some(data) = reassembler.push(&frame.payload).unwrap() {
                result = Some(data);
            }
        }
        assert!(wire.is_empty());
        assert_eq!(result.as_deref(), Some(&payload[..]), "length {len}");
    }
    assert_eq!(codec.rejected_frames(), 0);
}
