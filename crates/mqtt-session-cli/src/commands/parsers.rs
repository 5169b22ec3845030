use mqtt_session::ProtocolVersion;

/// Bare numbers are milliseconds; anything else goes through humantime.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_duration_millis(s: &str) -> Result<u64, String> {
    if let Ok(millis) = s.parse::<u64>() {
        return Ok(millis);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| e.to_string())
}

pub fn parse_duration_secs(s: &str) -> Result<u16, String> {
    let secs = if let Ok(secs) = s.parse::<u64>() {
        secs
    } else {
        humantime::parse_duration(s)
            .map(|d| d.as_secs())
            .map_err(|e| e.to_string())?
    };
    u16::try_from(secs).map_err(|_| format!("{s} exceeds the 65535 second keep-alive limit"))
}

pub fn parse_protocol_version(s: &str) -> Result<ProtocolVersion, String> {
    match s {
        "3.1.1" | "311" | "4" => Ok(ProtocolVersion::V311),
        "5" | "5.0" => Ok(ProtocolVersion::V5),
        _ => Err(format!("Invalid protocol version: {s}. Use '3.1.1' or '5'")),
    }
}
