use crate::fix::{FixQuality, FixSource, RawSample};
use crate::prelude::AcquisitionError;
use chrono::NaiveDate;
use log::debug;
use nmea0183::{ParseResult, Parser, GGA, RMC};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

const KNOTS_TO_MPS: f64 = 0.514_444;

/// Fix source reading NMEA 0183 sentences from a line-oriented stream.
///
/// `GGA` sentences update the current fix mode; each `RMC` sentence yields
/// one sample. Other sentences, and sentences failing their checksum, are
/// skipped.
pub struct NmeaSource<R> {
    lines: Lines<R>,
    parser: Parser,
    mode: Option<FixQuality>,
}

impl<R: AsyncBufRead + Unpin> NmeaSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            parser: Parser::new(),
            mode: None,
        }
    }

    /// Feeds one line to the parser and returns its last complete sentence.
    fn parse_line(&mut self, line: &str) -> Option<ParseResult> {
        let mut sentence = line.trim_end().as_bytes().to_vec();
        sentence.extend_from_slice(b"\r\n");
        let mut parsed = None;
        for result in self.parser.parse_from_bytes(&sentence) {
            match result {
                Ok(result) => parsed = Some(result),
                Err(err) => debug!("skipping NMEA sentence {:?}: {}", line, err),
            }
        }
        parsed
    }

    fn sample_from_rmc(&self, rmc: &RMC) -> RawSample {
        RawSample {
            latitude: rmc.latitude.as_f64(),
            longitude: rmc.longitude.as_f64(),
            quality: self.mode.unwrap_or(FixQuality::TwoD),
            speed: Some(f64::from(rmc.speed.as_knots()) * KNOTS_TO_MPS),
            track: rmc.course.as_ref().map(|course| f64::from(course.degrees)),
            timestamp: epoch_seconds(rmc),
        }
    }
}

impl<R: AsyncBufRead + Unpin> FixSource for NmeaSource<R> {
    async fn next_sample(&mut self) -> Result<RawSample, AcquisitionError> {
        while let Some(line) = self.lines.next_line().await? {
            match self.parse_line(&line) {
                Some(ParseResult::GGA(Some(gga))) => self.mode = Some(mode_from_gga(&gga)),
                Some(ParseResult::GGA(None)) => self.mode = Some(FixQuality::NoFix),
                Some(ParseResult::RMC(Some(rmc))) => return Ok(self.sample_from_rmc(&rmc)),
                Some(ParseResult::RMC(None)) => {
                    return Ok(RawSample::without_fix(FixQuality::NoFix))
                }
                _ => {}
            }
        }
        Err(AcquisitionError::Unavailable("NMEA stream ended".into()))
    }
}

/// Fix mode implied by a GGA sentence: an altitude means a 3D solution.
fn mode_from_gga(gga: &GGA) -> FixQuality {
    match &gga.altitude {
        altitude if altitude.meters.abs() > 0.01 => FixQuality::ThreeD,
        _ => FixQuality::TwoD,
    }
}

/// RMC date and time as Unix seconds (UTC).
fn epoch_seconds(rmc: &RMC) -> Option<f64> {
    let date = &rmc.datetime.date;
    let time = &rmc.datetime.time;
    let year = match i32::from(date.year) {
        two_digit @ 0..=99 => 2000 + two_digit,
        year => year,
    };
    let whole = NaiveDate::from_ymd_opt(year, u32::from(date.month), u32::from(date.day))?
        .and_hms_opt(u32::from(time.hours), u32::from(time.minutes), 0)?
        .and_utc()
        .timestamp();
    Some(whole as f64 + f64::from(time.seconds))
}
