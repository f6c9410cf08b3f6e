//! Drains a print job's frames into the write channel.
//!
//! Frames longer than the peripheral's write size are split into consecutive
//! sub-chunks. With [`WriteMode::WithResponse`] exactly one sub-chunk is
//! outstanding at a time and the next is only issued from the acknowledgment;
//! without response everything is issued back-to-back.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::central::{Central, PeripheralInfo, WriteChannel, WriteMode};
use crate::error::PrinterError;
use crate::protocol::{Frame, chunk_data};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Waiting,
    Complete,
    Failed(PrinterError),
}

pub struct FrameTransmitter {
    frames: VecDeque<Frame>,
    /// Remaining sub-chunks of the frame being written.
    chunks: VecDeque<Vec<u8>>,
    awaiting_ack: bool,
    bytes_written: usize,
}

impl FrameTransmitter {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            chunks: VecDeque::new(),
            awaiting_ack: false,
            bytes_written: 0,
        }
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    /// Nothing left to write and nothing outstanding.
    pub fn is_drained(&self) -> bool {
        self.frames.is_empty() && self.chunks.is_empty() && !self.awaiting_ack
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn start<C: Central>(
        &mut self,
        central: &mut C,
        peripheral: &PeripheralInfo,
        channel: &WriteChannel,
    ) -> Progress {
        debug!(
            "sending {} frames to {} ({:?})",
            self.frames.len(),
            peripheral.label(),
            channel.mode
        );
        self.pump(central, peripheral, channel)
    }

    /// Handle the acknowledgment (or failure) of the outstanding write.
    pub fn on_write_completed<C: Central>(
        &mut self,
        central: &mut C,
        peripheral: &PeripheralInfo,
        channel: &WriteChannel,
        result: Result<(), String>,
    ) -> Progress {
        self.awaiting_ack = false;
        match result {
            Ok(()) => self.pump(central, peripheral, channel),
            Err(e) => {
                warn!("error writing to {}: {}", peripheral.label(), e);
                self.clear();
                Progress::Failed(PrinterError::WriteFailed(e))
            }
        }
    }

    /// Drop everything not yet written.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.chunks.clear();
        self.awaiting_ack = false;
    }

    fn pump<C: Central>(
        &mut self,
        central: &mut C,
        peripheral: &PeripheralInfo,
        channel: &WriteChannel,
    ) -> Progress {
        let max_len = central.max_write_len(peripheral, channel.mode);
        loop {
            let Some(chunk) = self.chunks.pop_front() else {
                match self.frames.pop_front() {
                    Some(frame) => {
                        self.chunks = chunk_data(frame.as_bytes(), max_len)
                            .into_iter()
                            .filter(|c| !c.is_empty())
                            .map(<[u8]>::to_vec)
                            .collect();
                        continue;
                    }
                    None => {
                        debug!("all data sent to {} ({} bytes)", peripheral.label(), self.bytes_written);
                        return Progress::Complete;
                    }
                }
            };

            trace!("writing {} bytes", chunk.len());
            central.write(peripheral, &channel.characteristic, &chunk, channel.mode);
            self.bytes_written += chunk.len();

            if channel.mode == WriteMode::WithResponse {
                self.awaiting_ack = true;
                return Progress::Waiting;
            }
        }
    }
}
