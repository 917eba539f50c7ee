//! Trigger recording through a scan context.

mod common;

use galvo_scan::command_list::ListState;
use galvo_scan::hardware::MockTransport;
use galvo_scan::prelude::*;
use galvo_scan::recording::{ColumnValues, CsvExporter, SharedSession};

use common::{mock_context, mock_context_with, polyline};

fn options() -> RecordingOptions {
    RecordingOptions {
        chunk_size: 1024,
        ..RecordingOptions::default()
    }
}

fn record_layer(ctx: &mut ScanContext, session: &SharedSession) -> u64 {
    let layer = MemoryLayer::new(1.0).with_segment(polyline(&[(0.0, 0.0), (5.0, 5.0)]));
    let mut session = session.lock();
    ctx.start_list(1, 0).unwrap();
    session.enable_recording(RecordingFrequency::Khz10).unwrap();
    ctx.add_layer_to_list(&layer).unwrap();
    session.disable_recording().unwrap();
    ctx.end_list().unwrap();
    session.execute_list_with_recording(1).unwrap()
}

#[test]
fn ring_wraparound_is_drained_completely() {
    let mock = MockTransport::new().with_ring_size(1000);
    mock.set_measurement_plan(2500, 200);
    let (_mock, mut ctx) = mock_context_with(mock);
    let shared = ctx.prepare_recording(options()).unwrap();
    {
        let mut session = shared.lock();
        assert_eq!(session.add_channel("laser", ChannelType::LaserOn).unwrap(), 1);
        assert_eq!(session.add_channel("X", ChannelType::TargetX).unwrap(), 2);
    }

    assert_eq!(record_layer(&mut ctx, &shared), 2500);
    assert_eq!(ctx.list_state().unwrap(), ListState::Idle);

    let session = shared.lock();
    assert_eq!(session.channel_record_count("laser").unwrap(), 2500);
    assert_eq!(session.channel_record_count("x").unwrap(), 2500);
    for index in [0, 999, 1000, 1023, 1024, 2047, 2499] {
        assert_eq!(
            session.channel_value("laser", index).unwrap(),
            MockTransport::sample_value(1, index)
        );
        assert_eq!(
            session.channel_value("x", index).unwrap(),
            MockTransport::sample_value(2, index)
        );
    }
    assert!(matches!(
        session.channel_value("laser", 2500),
        Err(ScanError::RecordIndexOutOfRange { index: 2500, count: 2500 })
    ));
}

#[test]
fn session_is_kept_by_the_context() {
    let (_mock, mut ctx) = mock_context();
    let shared = ctx.prepare_recording(options()).unwrap();
    let id = shared.lock().id();
    assert!(ctx.recordings().contains(id));
    assert!(ctx.find_recording(id).is_ok());
    ctx.remove_recording(id).unwrap();
    assert!(matches!(ctx.find_recording(id), Err(ScanError::SessionNotFound(_))));
}

#[test]
fn eight_channels_at_most() {
    let (_mock, mut ctx) = mock_context();
    let shared = ctx.prepare_recording(options()).unwrap();
    let mut session = shared.lock();
    let types = [
        ChannelType::LaserOn,
        ChannelType::TargetX,
        ChannelType::TargetY,
        ChannelType::TargetZ,
        ChannelType::FreeVariable(0),
        ChannelType::FreeVariable(1),
        ChannelType::FreeVariable(2),
        ChannelType::Timestamp,
    ];
    for (i, channel_type) in types.into_iter().enumerate() {
        session.add_channel(&format!("c{i}"), channel_type).unwrap();
    }
    assert!(matches!(
        session.add_channel("c8", ChannelType::FreeVariable(3)),
        Err(ScanError::NoChannelAvailable)
    ));

    session.remove_channel("c2").unwrap();
    assert_eq!(session.add_channel("c8", ChannelType::FreeVariable(3)).unwrap(), 3);
}

#[test]
fn records_export_to_tables() {
    let mock = MockTransport::new();
    mock.set_measurement_plan(300, 100);
    let (_mock, mut ctx) = mock_context_with(mock);
    let shared = ctx.prepare_recording(options()).unwrap();
    {
        let mut session = shared.lock();
        session.add_channel("laser", ChannelType::LaserOn).unwrap();
        session.add_channel("tx", ChannelType::TargetX).unwrap();
        session.add_channel("ty", ChannelType::TargetY).unwrap();
    }
    assert_eq!(record_layer(&mut ctx, &shared), 300);

    let session = shared.lock();
    let mut table = MemoryDataTable::new();
    session
        .add_records_to_table("laser", &mut table, "laser", "laser on signal")
        .unwrap();
    session.add_target_xy_to_table(&mut table, "x_mm", "y_mm").unwrap();
    assert_eq!(table.row_count(), 300);
    match &table.column("x_mm").unwrap().values {
        ColumnValues::Double(values) => {
            let expected = f64::from(MockTransport::sample_value(2, 10)) / 10_000.0;
            assert!((values[10] - expected).abs() < 1e-9);
        }
        other => panic!("unexpected column {other:?}"),
    }
    assert!(matches!(
        session.add_backtransformed_xy_to_table(&mut table, "bx", "by"),
        Err(ScanError::BacktransformationNotEnabled)
    ));

    let dir = tempfile::tempdir().unwrap();
    let json = dir.path().join("table.json");
    table.write_json(&json).unwrap();
    let restored = MemoryDataTable::read_json(&json).unwrap();
    let identifiers: Vec<&str> = restored.columns().iter().map(|c| c.identifier.as_str()).collect();
    assert_eq!(identifiers, ["laser", "x_mm", "y_mm"]);
    assert_eq!(restored.row_count(), 300);
    assert_eq!(restored.column("laser"), table.column("laser"));

    if cfg!(feature = "storage_csv") {
        let csv = dir.path().join("table.csv");
        CsvExporter::new().write(&table, &csv).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        let rows: Vec<&str> = text.lines().filter(|line| !line.starts_with('#')).collect();
        assert_eq!(rows[0], "laser,x_mm,y_mm");
        assert_eq!(rows.len(), 301);
    }
}
