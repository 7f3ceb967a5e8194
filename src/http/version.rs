use crate::base::neterror::NetError;
use std::fmt;

/// HTTP protocol version encoded as `major << 16 | minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    pub const HTTP_1_0: ProtocolVersion = ProtocolVersion(0x10000);
    pub const HTTP_1_1: ProtocolVersion = ProtocolVersion(0x10001);

    pub const fn new(major: u16, minor: u16) -> Self {
        ProtocolVersion(((major as u32) << 16) | minor as u32)
    }

    pub const fn from_u32(raw: u32) -> Self {
        ProtocolVersion(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn minor(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Parse `HTTP/<major>.<minor>`; the digits start at offset 5.
    pub fn parse(s: &str) -> Result<Self, NetError> {
        let rest = s
            .get(..5)
            .filter(|p| p.eq_ignore_ascii_case("HTTP/"))
            .and_then(|_| s.get(5..))
            .ok_or(NetError::InvalidResponse)?;
        let (major, minor) = rest.split_once('.').ok_or(NetError::InvalidResponse)?;
        let digits = |d: &str| {
            if d.is_empty() || !d.bytes().all(|b| b.is_ascii_digit()) {
                return Err(NetError::InvalidResponse);
            }
            d.parse::<u16>().map_err(|_| NetError::InvalidResponse)
        };
        Ok(Self::new(digits(major)?, digits(minor)?))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major(), self.minor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding() {
        assert_eq!(ProtocolVersion::HTTP_1_0.as_u32(), 0x10000);
        assert_eq!(ProtocolVersion::HTTP_1_1.as_u32(), 0x10001);
        assert_eq!(ProtocolVersion::new(1, 1), ProtocolVersion::HTTP_1_1);
        assert!(ProtocolVersion::HTTP_1_0 < ProtocolVersion::HTTP_1_1);
        assert!(ProtocolVersion::new(2, 0) > ProtocolVersion::HTTP_1_1);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            ProtocolVersion::parse("HTTP/1.1").unwrap(),
            ProtocolVersion::HTTP_1_1
        );
        assert_eq!(
            ProtocolVersion::parse("HTTP/1.0").unwrap(),
            ProtocolVersion::HTTP_1_0
        );
        assert_eq!(ProtocolVersion::parse("HTTP/1.12").unwrap().minor(), 12);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ProtocolVersion::parse("HTTP/1").is_err());
        assert!(ProtocolVersion::parse("HTTX/1.1").is_err());
        assert!(ProtocolVersion::parse("HTTP/a.1").is_err());
        assert!(ProtocolVersion::parse("HTTP/").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProtocolVersion::HTTP_1_0.to_string(), "HTTP/1.0");
    }
}
