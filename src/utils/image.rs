use anyhow::{Context, Result};
use base64::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Serialized as { mime_type, data: base64 }.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mime_type = sniff_mime_type(&bytes).to_string();
        Self { mime_type, bytes }
    }

    pub fn from_base64(mime_type: &str, data: &str) -> Result<Self> {
        let bytes = BASE64_STANDARD
            .decode(data.trim())
            .context("Failed to decode base64 image data")?;
        Ok(Self::new(mime_type, bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.bytes)
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}

#[derive(Serialize, Deserialize)]
struct EncodedImage {
    mime_type: String,
    data: String,
}

impl Serialize for ImageData {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        EncodedImage {
            mime_type: self.mime_type.clone(),
            data: self.to_base64(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ImageData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = EncodedImage::deserialize(deserializer)?;
        ImageData::from_base64(&encoded.mime_type, &encoded.data)
            .map_err(serde::de::Error::custom)
    }
}
