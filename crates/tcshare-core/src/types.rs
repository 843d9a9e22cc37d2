use serde::{Deserialize, Serialize};

/// Client → server frame meaning "no more data".
///
/// Never a valid segment: additional data, the metadata block and the final
/// body chunk are all longer than one byte.
pub const END_OF_UPLOAD: &[u8] = &[0];

/// Plaintext description of a shared file. Sealed inside the metadata block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    /// Base64 password salt, duplicated from the header when a password is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

impl FileMetadata {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| anyhow::anyhow!("metadata serialization: {e}"))
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(data).map_err(|e| anyhow::anyhow!("metadata deserialization: {e}"))
    }
}

/// Outcome of a send. Both fields are empty when the upload was cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub id: String,
    pub key_fragment: String,
    /// Shareable link captured from the object store, when it can presign reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
}

impl SendResult {
    pub fn canceled() -> Self {
        Self::default()
    }

    pub fn is_canceled(&self) -> bool {
        self.id.is_empty() && self.key_fragment.is_empty()
    }
}

/// Server → client control frame on the upload channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Ready for the next segment (`{"status":200}`)
    Ready { status: u16 },
    /// Terminal: upload accepted and persisted (`{"id":"..."}`)
    Accepted { id: String },
    /// Terminal: session aborted, partial object removed (`{"error":"..."}`)
    Error { error: String },
}

impl ServerMessage {
    pub fn ready() -> Self {
        Self::Ready { status: 200 }
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| anyhow::anyhow!("server message serialization: {e}"))
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| anyhow::anyhow!("server message deserialization: {e}"))
    }
}

/// Body of `GET /api/size/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeResponse {
    pub size: u64,
}
