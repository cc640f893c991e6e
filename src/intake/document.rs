use bytes::Bytes;

/// One document of an inbound batch, already parsed by the bus adapter down
/// to its routing attributes and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDocument {
    pub id: String,
    pub category: String,
    pub subtype: String,
    pub recipient: String,
    pub payload: Bytes,
}

impl InboundDocument {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        subtype: impl Into<String>,
        recipient: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            subtype: subtype.into(),
            recipient: recipient.into(),
            payload: payload.into(),
        }
    }
}
