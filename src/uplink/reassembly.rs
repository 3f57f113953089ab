//! # Uplink Reassembly
//!
//! Rebuilds whole DMP responses from the sparse, out-of-order unicast
//! uplinks a device emits after a request. Frames are deduplicated by their
//! store timestamp, totally ordered by LoRaWAN frame counter, and stitched
//! together until a message carrying the expected header identity is
//! complete. A quiet device is nudged with a tiny downlink to open class-A
//! uplink opportunities.

use crate::constants::{NUDGE_FPORT, NUDGE_PAYLOAD, NUDGE_QUIET_TICKS, POLL_TICK};
use crate::dmp::header::{DmpHeader, ExpectedResponseIdentity};
use crate::error::FuotaError;
use crate::registry::DeviceRegistry;
use crate::uplink::store::{MessageStore, UplinkFrame};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Per-receive view over the message store and the downlink queue.
pub struct UplinkReassembler<'a> {
    store: &'a dyn MessageStore,
    queue: &'a dyn DeviceRegistry,
    expected: ExpectedResponseIdentity,
    f_port: u8,
}

/// Outcome of one pass over an ordered frame list.
struct Assembly {
    /// The complete message, when one was found
    message: Option<Vec<u8>>,
    /// Frames to carry into the next tick's pending list
    carry: Vec<UplinkFrame>,
}

impl<'a> UplinkReassembler<'a> {
    pub fn new(
        store: &'a dyn MessageStore,
        queue: &'a dyn DeviceRegistry,
        expected: ExpectedResponseIdentity,
        f_port: u8,
    ) -> Self {
        UplinkReassembler {
            store,
            queue,
            expected,
            f_port,
        }
    }

    /// Polls the message store until a complete response with the expected
    /// identity is assembled, or `timeout` elapses (`Ok(None)`).
    pub async fn receive(
        &self,
        dev_eui: &str,
        after: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, FuotaError> {
        let device_id = self.store.resolve_device_id(dev_eui).await?;
        debug!("Receiving for {dev_eui} (store id {device_id}) after {after}");

        let started = Instant::now();
        let mut processed: HashSet<String> = HashSet::new();
        let mut pending: Vec<UplinkFrame> = Vec::new();
        let mut cursor = after;
        let mut quiet_ticks = 0u32;

        while started.elapsed() < timeout {
            if quiet_ticks >= NUDGE_QUIET_TICKS {
                debug!("No uplinks from {dev_eui} for {quiet_ticks} ticks, nudging");
                if let Err(e) = self
                    .queue
                    .enqueue_downlink(dev_eui, NUDGE_FPORT, NUDGE_PAYLOAD)
                    .await
                {
                    warn!("Nudge downlink for {dev_eui} failed: {e}");
                }
                quiet_ticks = 0;
            }

            let mut frames = self.store.uplinks_after(&device_id, self.f_port, cursor).await?;
            frames.sort_by_key(|frame| frame.f_cnt);

            let mut fresh: Vec<UplinkFrame> = Vec::new();
            for frame in frames {
                match DateTime::parse_from_rfc3339(&frame.timestamp) {
                    Ok(seen) => {
                        let seen = seen.with_timezone(&Utc);
                        if seen > cursor {
                            cursor = seen;
                        }
                    }
                    Err(e) => warn!("Uplink timestamp {:?} unparseable: {e}", frame.timestamp),
                }
                if processed.contains(&frame.timestamp) {
                    continue;
                }
                fresh.push(frame);
            }
            if fresh.is_empty() {
                quiet_ticks += 1;
            } else {
                quiet_ticks = 0;
            }

            let mut combined = pending.clone();
            combined.extend(fresh.iter().cloned());
            let assembly = self.assemble(&combined)?;
            if let Some(message) = assembly.message {
                debug!("Assembled {} B response for {dev_eui}", message.len());
                return Ok(Some(message));
            }
            // pending frames were marked in an earlier tick
            for frame in &fresh {
                processed.insert(frame.timestamp.clone());
            }
            pending = assembly.carry;

            sleep(POLL_TICK).await;
        }

        Ok(None)
    }

    /// One pass over an ordered frame list.
    ///
    /// A frame starting a message must carry at least a full header with a
    /// DMP op. A complete single-frame message either matches the expected
    /// identity and wins, or is consumed and forgotten (a stale response).
    /// A partial message accumulates follow-up frames until its declared
    /// length is reached; frames that are themselves self-contained messages
    /// for another (group, command) are foreign traffic and are carried past
    /// the accumulation untouched. Frames not consumed by the time the list
    /// is exhausted are carried into the next tick.
    fn assemble(&self, frames: &[UplinkFrame]) -> Result<Assembly, FuotaError> {
        let mut header: Option<DmpHeader> = None;
        let mut expected_total = 0usize;
        let mut buffer: Vec<u8> = Vec::new();
        let mut in_buffer: Vec<usize> = Vec::new();
        let mut consumed = vec![false; frames.len()];

        for (index, frame) in frames.iter().enumerate() {
            let bytes = BASE64.decode(&frame.payload).map_err(|e| {
                FuotaError::MalformedResponse(format!(
                    "uplink at fCnt {} is not base64: {e}",
                    frame.f_cnt
                ))
            })?;

            match header {
                None => {
                    if bytes.len() < DmpHeader::SIZE {
                        return Err(FuotaError::MalformedResponse(format!(
                            "uplink of {} B is shorter than a DMP header",
                            bytes.len()
                        )));
                    }
                    let parsed = DmpHeader::parse(&bytes)?;
                    let total = parsed.total_len();
                    if bytes.len() > total {
                        return Err(FuotaError::MalformedResponse(format!(
                            "uplink of {} B overruns its declared {} B message",
                            bytes.len(),
                            total
                        )));
                    }
                    if bytes.len() == total {
                        if self.expected.matches(&parsed) {
                            return Ok(Assembly {
                                message: Some(bytes),
                                carry: frames[index + 1..].to_vec(),
                            });
                        }
                        // a stale or foreign complete message is dropped,
                        // the scan continues at the next frame
                        debug!(
                            "Dropping complete frame for group {} command {} (expected {} / {})",
                            parsed.group_id,
                            parsed.command_id,
                            self.expected.group_id,
                            self.expected.command_id
                        );
                        consumed[index] = true;
                        continue;
                    }
                    if self.expected.matches_request(&parsed) {
                        expected_total = total;
                        buffer = bytes;
                        in_buffer.push(index);
                        header = Some(parsed);
                    }
                    // otherwise: a partial foreign message; leave it in the
                    // carry and keep scanning for our header
                }
                Some(current) => {
                    if is_foreign_complete(&bytes, &current) {
                        continue;
                    }
                    buffer.extend_from_slice(&bytes);
                    in_buffer.push(index);
                    if buffer.len() > expected_total {
                        return Err(FuotaError::MalformedResponse(format!(
                            "reassembled {} B exceeds the declared {} B message",
                            buffer.len(),
                            expected_total
                        )));
                    }
                    if buffer.len() == expected_total {
                        if current.sequence == self.expected.sequence {
                            return Ok(Assembly {
                                message: Some(buffer),
                                carry: frames[index + 1..].to_vec(),
                            });
                        }
                        // a stale sequence: the accumulated fragments are
                        // spent, the closing frame stays for the next pass
                        debug!(
                            "Dropping assembled message with sequence {} (expected {})",
                            current.sequence, self.expected.sequence
                        );
                        for &absorbed in &in_buffer {
                            if absorbed != index {
                                consumed[absorbed] = true;
                            }
                        }
                        in_buffer.clear();
                        buffer = Vec::new();
                        expected_total = 0;
                        header = None;
                    }
                }
            }
        }

        let carry = frames
            .iter()
            .enumerate()
            .filter(|(index, _)| !consumed[*index])
            .map(|(_, frame)| frame.clone())
            .collect();
        Ok(Assembly {
            message: None,
            carry,
        })
    }
}

/// True when `bytes` is a self-contained DMP message addressed to another
/// (group, command) than the message being accumulated. Continuation
/// fragments cannot satisfy this: they would need valid op bits and an
/// exactly self-consistent declared length.
fn is_foreign_complete(bytes: &[u8], current: &DmpHeader) -> bool {
    if bytes.len() < DmpHeader::SIZE {
        return false;
    }
    match DmpHeader::parse(bytes) {
        Ok(parsed) => {
            bytes.len() == parsed.total_len()
                && (parsed.group_id != current.group_id
                    || parsed.command_id != current.command_id)
        }
        Err(_) => false,
    }
}
