//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use galvo_scan::config::{CommunicationTimeouts, DelaySettings, LaserSettings};
use galvo_scan::prelude::*;

/// Serial number of the card created by [`mock_context`].
pub const SERIAL: u32 = 4711;

/// A context on a fresh mock card, ready to draw with 400 W full scale.
pub fn mock_context() -> (Arc<MockTransport>, ScanContext) {
    mock_context_with(MockTransport::new())
}

/// [`mock_context`] on a preconfigured mock.
pub fn mock_context_with(mock: MockTransport) -> (Arc<MockTransport>, ScanContext) {
    let mock = Arc::new(mock);
    mock.add_card(SERIAL);
    let selector = CardSelector::new(mock.clone(), CardCapabilities::rtc6());
    let mut context = selector.acquire_card(1).expect("acquire mock card");
    context.set_poll_control(fast_poll());
    context.set_max_laser_power(400.0).expect("max laser power");
    (mock, context)
}

/// Poll control that never sleeps but still gives up eventually.
pub fn fast_poll() -> PollControl {
    PollControl::new(Duration::ZERO).with_timeout(Duration::from_secs(5))
}

pub fn profile(power_w: f64) -> SegmentProfile {
    SegmentProfile {
        speed: 800.0,
        jump_speed: 3000.0,
        laser_power: power_w,
        focus: 0.0,
    }
}

pub fn points(coords: &[(f64, f64)]) -> Vec<Point2D> {
    coords.iter().map(|&(x, y)| Point2D::new(x, y)).collect()
}

pub fn polyline(coords: &[(f64, f64)]) -> MemorySegment {
    MemorySegment::new(SegmentKind::Polyline, points(coords), profile(200.0))
}

pub fn hatch(coords: &[(f64, f64)]) -> MemorySegment {
    MemorySegment::new(SegmentKind::Hatch, points(coords), profile(200.0))
}

/// Resources for [`preset`].
pub fn resources() -> MemoryResources {
    MemoryResources::new()
        .with("firmware", vec![1, 2, 3, 4])
        .with("fpga", vec![5, 6])
        .with("aux", vec![7])
        .with("correction", vec![0xAA; 64])
}

/// Local card preset using the resources from [`resources`].
pub fn preset(name: &str, serial: u32) -> ConfigurationPreset {
    ConfigurationPreset {
        name: name.to_string(),
        ip_address: None,
        netmask: None,
        search_timeout_ms: 250,
        serial_number: serial,
        timeouts: CommunicationTimeouts::default(),
        firmware_resource: "firmware".into(),
        fpga_resource: "fpga".into(),
        auxiliary_resource: "aux".into(),
        correction_resource: "correction".into(),
        correction_table: 1,
        correction_dimension: 2,
        head_a_table: 1,
        head_b_table: 0,
        delays: DelaySettings::default(),
        laser: LaserSettings::default(),
        laser_index: 0,
    }
}
