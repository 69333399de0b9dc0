// Errors are typed so the handler can log and drop a bad line without
// tearing down the connection.
use thiserror::Error;

/// Channel id of the thermocouple probe.
pub const SENSOR_THERMOCOUPLE: i32 = 0;

/// Channel id of the cold-junction (internal) sensor.
pub const SENSOR_INTERNAL: i32 = 1;

/// Reserved channel id that asks the consumer to stop.
pub const SENSOR_TERMINATE: i32 = -1;

/// Decimal places written for the two floating-point fields.
pub const FLOAT_PRECISION: usize = 5;

/// One decoded sensor reading.
///
/// Records are immutable once decoded. `elapsed_seconds` is normally
/// non-decreasing per sensor, but nothing here relies on it: out-of-order
/// records pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub sensor_id: i32,
    pub elapsed_seconds: f64,
    pub value: f64,
}

impl Record {
    pub fn new(sensor_id: i32, elapsed_seconds: f64, value: f64) -> Self {
        Record {
            sensor_id,
            elapsed_seconds,
            value,
        }
    }

    /// The termination sentinel, `-1,0.00000,0.00000`.
    pub fn termination() -> Self {
        Record::new(SENSOR_TERMINATE, 0.0, 0.0)
    }

    pub fn is_termination(&self) -> bool {
        self.sensor_id == SENSOR_TERMINATE
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("malformed line {line:?}: {reason}")]
    Malformed { line: String, reason: String },
}

impl DecodeError {
    fn malformed(line: &str, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

/// Decode one line of the form `<sensorId>,<elapsedSeconds>,<value>`.
///
/// The line terminator (`\n` or `\r\n`) is optional. A sensor id of `-1`
/// always yields the termination sentinel: its two trailing fields must be
/// present, but their contents are not validated.
pub fn decode_line(bytes: &[u8]) -> Result<Record, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        DecodeError::malformed(&String::from_utf8_lossy(bytes), format!("not ASCII: {}", e))
    })?;
    let line = text.trim_end_matches(['\r', '\n']);

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 3 {
        return Err(DecodeError::malformed(
            line,
            format!("expected 3 fields, found {}", fields.len()),
        ));
    }

    let sensor_id = fields[0]
        .trim()
        .parse::<i32>()
        .map_err(|e| DecodeError::malformed(line, format!("sensor id: {}", e)))?;

    if sensor_id == SENSOR_TERMINATE {
        // Senders conventionally send zeros here; anything is accepted.
        let elapsed_seconds = fields[1].trim().parse::<f64>().unwrap_or(0.0);
        let value = fields[2].trim().parse::<f64>().unwrap_or(0.0);
        return Ok(Record::new(SENSOR_TERMINATE, elapsed_seconds, value));
    }

    let elapsed_seconds = fields[1]
        .trim()
        .parse::<f64>()
        .map_err(|e| DecodeError::malformed(line, format!("elapsed time: {}", e)))?;
    let value = fields[2]
        .trim()
        .parse::<f64>()
        .map_err(|e| DecodeError::malformed(line, format!("value: {}", e)))?;

    Ok(Record::new(sensor_id, elapsed_seconds, value))
}

/// Encode a record as one newline-terminated line with 5-digit precision.
pub fn encode_record(record: &Record) -> Vec<u8> {
    format!(
        "{},{:.prec$},{:.prec$}\n",
        record.sensor_id,
        record.elapsed_seconds,
        record.value,
        prec = FLOAT_PRECISION
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_plain_reading() {
        let record = decode_line(b"0,1.00000,23.50000\n").expect("valid line");
        assert_eq!(record, Record::new(0, 1.0, 23.5));
        assert!(!record.is_termination());
    }

    #[test]
    fn encode_uses_five_decimal_places() {
        let line = encode_record(&Record::new(1, 0.05, 21.125));
        assert_eq!(line, b"1,0.05000,21.12500\n");
    }

    #[test]
    fn encoded_records_decode_back() {
        for record in [
            Record::new(SENSOR_THERMOCOUPLE, 0.0, 0.0),
            Record::new(SENSOR_INTERNAL, 12.75, -3.5),
            Record::new(7, 1234.56789, 99.25),
        ] {
            assert_eq!(decode_line(&encode_record(&record)), Ok(record));
        }
    }

    #[test]
    fn rejects_wrong_field_count() {
        for line in [&b"0 1.0 2.0\n"[..], b"0,1.0\n", b"0,1.0,2.0,3.0\n", b"\n"] {
            assert!(matches!(decode_line(line), Err(DecodeError::Malformed { .. })));
        }
    }

    #[test]
    fn rejects_non_numeric_fields() {
        for line in [&b"x,1.0,2.0\n"[..], b"0,soon,2.0\n", b"0,1.0,warm\n", b"1.5,1.0,2.0\n"] {
            assert!(matches!(decode_line(line), Err(DecodeError::Malformed { .. })));
        }
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert!(decode_line(&[0xff, b',', b'1', b',', b'2']).is_err());
    }

    #[test]
    fn sentinel_ignores_trailing_field_contents() {
        let record = decode_line(b"-1,0.00000,0.00000\n").expect("sentinel");
        assert_eq!(record, Record::termination());

        let record = decode_line(b"-1,garbage,\n").expect("lenient sentinel");
        assert!(record.is_termination());
        assert_eq!(record.value, 0.0);
    }

    #[test]
    fn sentinel_still_needs_three_fields() {
        assert!(decode_line(b"-1\n").is_err());
        assert!(decode_line(b"-1,0.0\n").is_err());
    }

    #[test]
    fn accepts_crlf_and_padding() {
        let record = decode_line(b" 1 , 2.5 , 30.0\r\n").expect("padded line");
        assert_eq!(record, Record::new(1, 2.5, 30.0));
    }
}
