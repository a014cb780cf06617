//! 170 controller memory map

/// PROM version (major, minor)
pub const PROM_VERSION: u16 = 0xFFF6;

/// Ramp meter data block
pub const RAMP_METER_DATA: u16 = 0x010C;

/// Remote metering rate, relative to a meter data block
pub const OFF_REMOTE_RATE: u16 = 0x05;

pub const METER_1_TIMING_TABLE: u16 = 0x0140;
pub const METER_2_TIMING_TABLE: u16 = 0x0180;

/// PM timing table, relative to a meter timing table
pub const OFF_PM_TIMING_TABLE: u16 = 0x1B;

/// Red time array (one BCD16 entry per rate), relative to a timing table
pub const OFF_RED_TIME: u16 = 0x08;

/// 30-second volume and scan buffer
pub const DATA_BUFFER_30_SECOND: u16 = 0x0300;

/// Detector inputs sampled by one controller
pub const DETECTOR_INPUTS: usize = 24;

/// Metering rates written to the remote rate byte
pub mod meter_rate {
    pub const FLASH: u8 = 0;
    pub const CENTRAL: u8 = 1;
    pub const TOD: u8 = 2;
    pub const FORCED_FLASH: u8 = 7;
}

/// Address of the red time for `meter` (1 or 2) at the central rate
pub fn red_time(meter: u8, afternoon: bool) -> Option<u16> {
    let table = match meter {
        1 => METER_1_TIMING_TABLE,
        2 => METER_2_TIMING_TABLE,
        _ => return None,
    };
    let pm = if afternoon { OFF_PM_TIMING_TABLE } else { 0 };
    Some(table + pm + OFF_RED_TIME + u16::from(meter_rate::CENTRAL) * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_red_time_address() {
        assert_eq!(red_time(1, false), Some(0x014A));
        assert_eq!(red_time(2, true), Some(0x01A5));
        assert_eq!(red_time(3, false), None);
    }
}
