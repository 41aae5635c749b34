use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{check_int_size, Pickler, PicklerConfig, DEFAULT_PICKLER_INT_SIZE};
use crate::{Error, PickleError, Result};

/// Character encodings supported by [`TextPickler`].
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "utf-16le")]
    Utf16Le,
    #[serde(rename = "utf-16be")]
    Utf16Be,
    /// ISO-8859-1; only code points up to U+00FF are encodable.
    #[serde(rename = "latin-1")]
    Latin1,
}

impl TextEncoding {
    pub fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
            Self::Latin1 => "latin-1",
        }
    }

    fn encode(self, text: &str) -> std::result::Result<Cow<'_, [u8]>, PickleError> {
        let bytes: Vec<u8> = match self {
            Self::Utf8 => return Ok(Cow::Borrowed(text.as_bytes())),
            Self::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Self::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
            Self::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(c).map_err(|_| {
                        PickleError::Unencodable(format!("{c:?} is not representable in latin-1"))
                    })
                })
                .collect::<std::result::Result<Vec<u8>, _>>()?,
        };
        Ok(Cow::Owned(bytes))
    }

    fn decode(self, data: &[u8]) -> std::result::Result<String, PickleError> {
        match self {
            Self::Utf8 => std::str::from_utf8(data)
                .map(str::to_string)
                .map_err(|e| PickleError::Decode(e.to_string())),
            Self::Utf16Le | Self::Utf16Be => {
                if data.len() % 2 != 0 {
                    return Err(PickleError::Decode(format!(
                        "odd length {} for {}",
                        data.len(),
                        self.name()
                    )));
                }
                let units = data.chunks_exact(2).map(|pair| {
                    let pair = [pair[0], pair[1]];
                    if self == Self::Utf16Le {
                        u16::from_le_bytes(pair)
                    } else {
                        u16::from_be_bytes(pair)
                    }
                });
                char::decode_utf16(units)
                    .collect::<std::result::Result<String, _>>()
                    .map_err(|e| PickleError::Decode(e.to_string()))
            }
            Self::Latin1 => Ok(data.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TextEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16le" | "utf16le" => Ok(Self::Utf16Le),
            "utf-16be" | "utf16be" => Ok(Self::Utf16Be),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Self::Latin1),
            _ => Err(Error::InvalidMetadata(format!("unsupported encoding: {s}"))),
        }
    }
}

/// Pickler for strings stored in a given character encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPickler {
    int_size: u8,
    encoding: TextEncoding,
}

impl Default for TextPickler {
    fn default() -> Self {
        Self::new(TextEncoding::Utf8)
    }
}

impl TextPickler {
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            int_size: DEFAULT_PICKLER_INT_SIZE,
            encoding,
        }
    }

    pub fn with_int_size(mut self, int_size: u8) -> Self {
        self.int_size = int_size;
        self
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }
}

impl Pickler for TextPickler {
    type Item = String;

    fn from_config(config: &PicklerConfig) -> Result<Self> {
        match config {
            PicklerConfig::Text { int_size, encoding } => {
                Ok(Self::new(*encoding).with_int_size(check_int_size(*int_size)?))
            }
            other => Err(Error::PicklerMismatch {
                expected: "text",
                found: other.name().to_string(),
            }),
        }
    }

    fn config(&self) -> PicklerConfig {
        PicklerConfig::Text {
            int_size: self.int_size,
            encoding: self.encoding,
        }
    }

    fn int_size(&self) -> u8 {
        self.int_size
    }

    fn set_int_size(&mut self, int_size: u8) {
        self.int_size = int_size;
    }

    fn item_bytes<'a>(&self, item: &'a String) -> std::result::Result<Cow<'a, [u8]>, PickleError> {
        self.encoding.encode(item)
    }

    fn decode_item(&self, data: &[u8]) -> std::result::Result<String, PickleError> {
        self.encoding.decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(encoding: TextEncoding, text: &str) -> usize {
        let pickler = TextPickler::new(encoding).with_int_size(1);
        let mut out = Vec::new();
        pickler.dump_single(&text.to_string(), &mut out).unwrap();
        let (decoded, next) = pickler.load_single(&out, 0).unwrap();
        assert_eq!(decoded, text);
        assert_eq!(next, out.len());
        out.len() - 1
    }

    #[test]
    fn test_encodings() {
        assert_eq!(round_trip(TextEncoding::Utf8, "größe"), 7);
        assert_eq!(round_trip(TextEncoding::Utf16Le, "größe"), 10);
        assert_eq!(round_trip(TextEncoding::Utf16Be, "𝄞"), 4);
        assert_eq!(round_trip(TextEncoding::Latin1, "größe"), 5);
    }

    #[test]
    fn test_unencodable_is_fatal() {
        let pickler = TextPickler::new(TextEncoding::Latin1);
        let err = pickler
            .dump_single(&"€uro".to_string(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, PickleError::Unencodable(_)));
        assert!(!err.is_resumable());
    }

    #[test]
    fn test_invalid_utf8() {
        let pickler = TextPickler::default().with_int_size(1);
        let err = pickler.load_single(&[2, 0xc3, 0x28], 0).unwrap_err();
        assert!(matches!(err, PickleError::Decode(_)));

        let pickler = TextPickler::new(TextEncoding::Utf16Le).with_int_size(1);
        let err = pickler.load_single(&[3, 0x41, 0x00, 0x42], 0).unwrap_err();
        assert!(matches!(err, PickleError::Decode(_)));
    }

    #[test]
    fn test_parse_encoding() {
        assert_eq!("UTF-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("utf_16le".parse::<TextEncoding>().unwrap(), TextEncoding::Utf16Le);
        assert_eq!("iso-8859-1".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        "ebcdic".parse::<TextEncoding>().unwrap_err();
        assert_eq!(TextEncoding::Utf16Be.to_string(), "utf-16be");
    }
}
