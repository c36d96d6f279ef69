use crate::error::Result;
use geolayer_types::entity::GeoEntity;

/// Byte codec for entity bodies.
///
/// The stream stores whatever the codec produces as an opaque, length-prefixed
/// body and never looks inside it.
pub trait EntityCodec: Send + Sync {
    fn encode(&self, entity: &GeoEntity, out: &mut Vec<u8>) -> Result<()>;

    fn decode(&self, bytes: &[u8]) -> Result<GeoEntity>;
}

/// Default codec: `bincode` over the serde representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl EntityCodec for BincodeCodec {
    fn encode(&self, entity: &GeoEntity, out: &mut Vec<u8>) -> Result<()> {
        bincode::serialize_into(out, entity)?;
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<GeoEntity> {
        Ok(bincode::deserialize(bytes)?)
    }
}
