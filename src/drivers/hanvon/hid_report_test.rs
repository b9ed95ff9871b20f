use std::error::Error;

use packed_struct::PackedStruct;

use crate::drivers::hanvon::hid_report::{PackedPenReport, PEN_EVENT};

// Pen hovering with the tip down:
// 02 81 01 02 00 10 04 00 05 06
#[test]
fn test_unpack_pen_report() -> Result<(), Box<dyn Error>> {
    let buf: [u8; 10] = [0x02, 0x81, 0x01, 0x02, 0x00, 0x10, 0x04, 0x00, 0x05, 0x06];
    let report = PackedPenReport::unpack(&buf)?;
    println!("Report: {report}");

    assert_eq!(report.msg_type, PEN_EVENT);
    assert!(report.proximity);
    assert!(report.touching);
    assert!(!report.lingering);
    assert!(!report.eraser);
    assert!(!report.stylus);
    assert_eq!(report.x, 0x0102);
    assert_eq!(report.y, 0x0010);
    assert_eq!(report.pressure, 0x0400);
    assert_eq!(report.scaled_pressure(), 16);
    assert_eq!(report.tilt_x, 5);
    assert_eq!(report.tilt_y, 6);
    assert!(report.is_active());

    Ok(())
}

#[test]
fn test_unpack_status_bits() -> Result<(), Box<dyn Error>> {
    let mut buf = [0u8; 10];
    buf[0] = PEN_EVENT;
    buf[1] = 0x32;
    let report = PackedPenReport::unpack(&buf)?;

    assert!(report.eraser);
    assert!(report.lingering);
    assert!(report.stylus);
    assert!(!report.proximity);
    assert!(!report.touching);
    assert!(report.is_active());

    buf[1] = 0x00;
    let report = PackedPenReport::unpack(&buf)?;
    assert!(!report.is_active());

    Ok(())
}

#[test]
fn test_pressure_keeps_top_bits() -> Result<(), Box<dyn Error>> {
    let report = PackedPenReport {
        msg_type: PEN_EVENT,
        pressure: 0xffff,
        ..Default::default()
    };
    assert_eq!(report.scaled_pressure(), 1023);

    let packed = report.pack()?;
    assert_eq!(packed[6], 0xff);
    assert_eq!(packed[7], 0xff);

    Ok(())
}
