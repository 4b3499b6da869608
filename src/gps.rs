//! Live position of a mobile receiving station, read from gpsd.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

use crate::locations::Coordinates;

/// Decimal places reported for the receiver position.
pub const GPS_DECIMALS: i32 = 4;

#[derive(Debug, Error)]
pub enum GpsError {
    #[error("gpsd i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gpsd address {0} did not resolve")]
    Address(String),

    #[error("no position fix")]
    NoFix,

    #[error("gpsd did not report a position within {0:?}")]
    Timeout(Duration),
}

/// Source of the receiving station's current coordinates.
pub trait PositionSource {
    fn current_position(&mut self) -> Result<Coordinates, GpsError>;
}

#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    tpv: Vec<Fix>,
    #[serde(flatten)]
    fix: Fix,
}

#[derive(Debug, Default, Deserialize)]
struct Fix {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl Fix {
    /// Needs at least a 2D fix.
    fn coordinates(&self) -> Option<Coordinates> {
        match (self.mode, self.lat, self.lon) {
            (mode, Some(lat), Some(lon)) if mode >= 2 => Some(Coordinates::new(lat, lon).rounded(GPS_DECIMALS)),
            _ => None,
        }
    }
}

/// gpsd JSON client: one short-lived connection per query.
#[derive(Debug, Clone)]
pub struct GpsdSource {
    address: String,
    timeout: Duration,
}

impl GpsdSource {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

impl PositionSource for GpsdSource {
    fn current_position(&mut self) -> Result<Coordinates, GpsError> {
        let addr = self
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| GpsError::Address(self.address.clone()))?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut writer = stream.try_clone()?;
        writer.write_all(b"?WATCH={\"enable\":true,\"json\":true};\n?POLL;\n")?;

        let deadline = Instant::now() + self.timeout;
        read_position(BufReader::new(stream), deadline, self.timeout)
    }
}

fn read_position<R: BufRead>(reader: R, deadline: Instant, timeout: Duration) -> Result<Coordinates, GpsError> {
    for line in reader.lines() {
        let line = line?;
        if let Ok(report) = serde_json::from_str::<Report>(&line) {
            trace!("gpsd {} report", report.class);
            match report.class.as_str() {
                "POLL" => return report.tpv.iter().find_map(Fix::coordinates).ok_or(GpsError::NoFix),
                "TPV" => {
                    if let Some(position) = report.fix.coordinates() {
                        return Ok(position);
                    }
                }
                _ => {}
            }
        }
        if Instant::now() >= deadline {
            return Err(GpsError::Timeout(timeout));
        }
    }
    Err(GpsError::NoFix)
}
