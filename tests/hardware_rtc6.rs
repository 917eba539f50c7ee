//! Tests against an attached RTC6 card.
//!
//! Run with: cargo test --features rtc6_hardware,hardware_tests --test hardware_rtc6 -- --ignored
#![cfg(all(feature = "hardware_tests", feature = "rtc6_hardware"))]

use std::sync::Arc;

use galvo_scan::hardware::Rtc6Transport;
use galvo_scan::prelude::*;

fn selector() -> CardSelector {
    CardSelector::new(Arc::new(Rtc6Transport::new()), CardCapabilities::rtc6())
}

#[test]
#[ignore]
fn rtc6_card_is_found() {
    let count = selector().card_count().unwrap();
    assert!(count > 0, "no RTC6 card on the local bus");
}

#[test]
#[ignore]
fn rtc6_first_card_is_acquired_and_released() {
    let selector = selector();
    let context = selector.acquire_card(1).unwrap();
    assert_eq!(context.card_no().unwrap(), 1);
    drop(context);
    assert!(selector.registry().is_empty());
}
