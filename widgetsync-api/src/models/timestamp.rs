use serde::{Deserializer, Serializer};
use time::{OffsetDateTime, UtcOffset};

/// RFC 3339, normalised to UTC. Use with `#[serde(with = "crate::models::timestamp")]`.
pub fn serialize<S: Serializer>(
    value: &OffsetDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    time::serde::rfc3339::serialize(&value.to_offset(UtcOffset::UTC), serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<OffsetDateTime, D::Error> {
    time::serde::rfc3339::deserialize(deserializer).map(|value| value.to_offset(UtcOffset::UTC))
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<OffsetDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        time::serde::rfc3339::option::serialize(
            &value.map(|value| value.to_offset(UtcOffset::UTC)),
            serializer,
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<OffsetDateTime>, D::Error> {
        let value: Option<OffsetDateTime> =
            time::serde::rfc3339::option::deserialize(deserializer)?;
        Ok(value.map(|value| value.to_offset(UtcOffset::UTC)))
    }
}
