//! Decoding of HID data reports from FNB48/FNB58/C1 testers

mod common;
use common::*;

use approx::assert_abs_diff_eq;
use fnirsi_lib::diagnostics::DropReason;
use fnirsi_lib::usb::parse_report;

#[test]
fn test_data_report_yields_four_samples() {
    let report = hex_to_bytes(FNB58_DATA_REPORT);
    assert_eq!(report.len(), 64);

    let mut decoder = UsbDecoder::new();
    let readings = decoder.decode(&report);
    assert_eq!(readings.len(), 4);

    let first = &readings[0];
    assert_abs_diff_eq!(first.voltage, 5.08068, epsilon = 1e-9);
    assert_abs_diff_eq!(first.current, 0.49112, epsilon = 1e-9);
    assert_abs_diff_eq!(first.dp, 0.020, epsilon = 1e-9);
    assert_abs_diff_eq!(first.dn, 0.019, epsilon = 1e-9);
    assert_abs_diff_eq!(first.temperature, 28.3, epsilon = 1e-9);

    for (i, reading) in readings.iter().enumerate() {
        assert_eq!(reading.sample, i as u64);
        assert_eq!(reading.timestamp, first.timestamp);
    }
    assert_eq!(decoder.counters().readings, 4);
}

#[test]
fn test_power_is_product_of_voltage_and_current() {
    let report = hex_to_bytes(FNB58_DATA_REPORT);
    for reading in UsbDecoder::new().decode(&report) {
        assert_abs_diff_eq!(reading.power, reading.voltage * reading.current, epsilon = 1e-4);
    }
}

#[test]
fn test_built_report_scales_raw_units() {
    let report = usb_report(&[
        usb_sample(900_000, 200_000, 600, 300, 350),
        usb_sample(2_000_000, 325_000, 0, 0, 412),
        usb_sample(500_000, 0, 2700, 2700, 0),
        usb_sample(0, 0, 0, 0, 0),
    ]);
    let readings = UsbDecoder::new().decode_at(&report, Local::now());

    assert_abs_diff_eq!(readings[0].voltage, 9.0);
    assert_abs_diff_eq!(readings[0].current, 2.0);
    assert_abs_diff_eq!(readings[0].power, 18.0);
    assert_abs_diff_eq!(readings[0].dp, 0.6);
    assert_abs_diff_eq!(readings[0].dn, 0.3);
    assert_abs_diff_eq!(readings[0].temperature, 35.0);

    assert_abs_diff_eq!(readings[1].voltage, 20.0);
    assert_abs_diff_eq!(readings[1].power, 65.0, epsilon = 1e-9);
    assert_abs_diff_eq!(readings[1].temperature, 41.2, epsilon = 1e-9);

    assert_abs_diff_eq!(readings[2].dp, 2.7);
    assert_abs_diff_eq!(readings[2].power, 0.0);

    assert_abs_diff_eq!(readings[3].voltage, 0.0);
}

#[test]
fn test_non_data_report_is_ignored() {
    let mut report = hex_to_bytes(FNB58_DATA_REPORT);
    report[1] = 0x03;

    let mut decoder = UsbDecoder::new();
    assert!(decoder.decode(&report).is_empty());
    assert_eq!(decoder.counters().not_data, 1);
    assert_eq!(parse_report(&report, Local::now()), Err(DropReason::NotData));
}

#[test]
fn test_short_report_is_ignored() {
    let report = hex_to_bytes(FNB58_DATA_REPORT);
    let mut decoder = UsbDecoder::new();

    assert!(decoder.decode(&report[..63]).is_empty());
    assert!(decoder.decode(&[]).is_empty());
    assert_eq!(decoder.counters().too_short, 2);
    assert_eq!(decoder.counters().readings, 0);
}

#[test]
fn test_sample_index_restarts_per_report() {
    let report = hex_to_bytes(FNB58_DATA_REPORT);
    let mut decoder = UsbDecoder::new();
    decoder.decode(&report);
    let second = decoder.decode(&report);
    assert_eq!(second[0].sample, 0);
    assert_eq!(decoder.counters().readings, 8);
}

#[test]
fn test_implausible_voltage_slots_are_dropped() {
    let report = usb_report(&[
        usb_sample(500_000, 100_000, 0, 0, 250),
        usb_sample(20_000_000, 100_000, 0, 0, 250),
        usb_sample(15_000_000, 100_000, 0, 0, 250),
        usb_sample(u32::MAX, 0, 0, 0, 0),
    ]);

    let mut decoder = UsbDecoder::new();
    let readings = decoder.decode(&report);

    let kept: Vec<(u64, f64)> = readings.iter().map(|r| (r.sample, r.voltage)).collect();
    assert_eq!(kept, vec![(0, 5.0), (2, 150.0)]);
    assert_eq!(decoder.counters().out_of_range, 2);
    assert_eq!(decoder.counters().readings, 2);
}
