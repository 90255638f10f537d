//! # Fastlane Downstream Messages
//!
//! The message shapes the session pipeline emits toward the portal and the
//! analytics warehouse. Each message is a framed binary record with a
//! leading version byte; analytics messages additionally map themselves to
//! a columnar row for the warehouse writer.
//!
//! Messages cross a process boundary over the pub/sub bus, so the binary
//! form is the contract: field order here is append-only.

pub mod analytics;
pub mod portal;

pub use analytics::*;
pub use portal::*;

use codec::{CodecResult, ReadStream, WriteStream};

/// One relay's ping sample as reported by the SDK.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelaySample {
    pub relay_id: u64,
    pub rtt: u8,
    pub jitter: u8,
    pub packet_loss: f32,
    pub routable: bool,
}

pub(crate) fn write_relay_samples(
    stream: &mut WriteStream<'_>,
    samples: &[RelaySample],
) -> CodecResult<()> {
    stream.write_u32("num relays", samples.len() as u32)?;
    for sample in samples {
        stream.write_u64("relay id", sample.relay_id)?;
        stream.write_u8("relay rtt", sample.rtt)?;
        stream.write_u8("relay jitter", sample.jitter)?;
        stream.write_f32("relay packet loss", sample.packet_loss)?;
        stream.write_bool("relay routable", sample.routable)?;
    }
    Ok(())
}

pub(crate) fn read_relay_samples(stream: &mut ReadStream<'_>) -> CodecResult<Vec<RelaySample>> {
    let count = stream.read_u32("num relays")? as usize;
    if count > 256 {
        return Err(codec::CodecError::LengthOverflow {
            field: "num relays",
            got: count,
            limit: 256,
        });
    }
    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        samples.push(RelaySample {
            relay_id: stream.read_u64("relay id")?,
            rtt: stream.read_u8("relay rtt")?,
            jitter: stream.read_u8("relay jitter")?,
            packet_loss: stream.read_f32("relay packet loss")?,
            routable: stream.read_bool("relay routable")?,
        });
    }
    Ok(samples)
}

pub(crate) fn write_relay_ids(stream: &mut WriteStream<'_>, ids: &[u64]) -> CodecResult<()> {
    stream.write_u32("num route relays", ids.len() as u32)?;
    for id in ids {
        stream.write_u64("route relay id", *id)?;
    }
    Ok(())
}

pub(crate) fn read_relay_ids(stream: &mut ReadStream<'_>) -> CodecResult<Vec<u64>> {
    let count = stream.read_u32("num route relays")? as usize;
    if count > 256 {
        return Err(codec::CodecError::LengthOverflow {
            field: "num route relays",
            got: count,
            limit: 256,
        });
    }
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(stream.read_u64("route relay id")?);
    }
    Ok(ids)
}
