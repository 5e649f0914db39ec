//! Per-packet tracing.
//!
//! Every packet the network layer handles ends in exactly one `PacketRecord`.
//! `TraceLog` keeps the complete ordered list in memory and fans each record
//! out to the attached writers. Writers buffer their I/O errors and report the
//! first one from `flush`, so a failing disk never interrupts a run.

use serde::Serialize;
use std::io::{self, Write};
use std::net::SocketAddrV4;

use super::clock::SimTime;
use super::types::{LinkKind, Packet, PacketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketOutcome {
    Delivered,
    Dropped,
    Collided,
}

impl PacketOutcome {
    /// One-letter tag used by the ASCII trace.
    pub fn tag(&self) -> char {
        match self {
            PacketOutcome::Delivered => 'r',
            PacketOutcome::Dropped => 'd',
            PacketOutcome::Collided => 'c',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    /// Received power under the CCA threshold or SNR limit.
    BelowThreshold,
    QueueOverflow,
    /// Carrier stayed busy for more backoff rounds than allowed.
    RetryLimit,
    DeviceDown,
    NoRoute,
    /// Nothing bound to the destination port.
    NoListener,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::BelowThreshold => "below-threshold",
            DropReason::QueueOverflow => "queue-overflow",
            DropReason::RetryLimit => "retry-limit",
            DropReason::DeviceDown => "device-down",
            DropReason::NoRoute => "no-route",
            DropReason::NoListener => "no-listener",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketRecord {
    pub timestamp: SimTime,
    pub packet_id: PacketId,
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    pub size: usize,
    pub link: LinkKind,
    pub outcome: PacketOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DropReason>,
}

impl PacketRecord {
    pub fn new(timestamp: SimTime, packet: &Packet, link: LinkKind, outcome: PacketOutcome, reason: Option<DropReason>) -> Self {
        Self {
            timestamp,
            packet_id: packet.id,
            source: packet.source,
            destination: packet.destination,
            size: packet.size,
            link,
            outcome,
            reason,
        }
    }
}

/// Consumer of packet records, e.g. a file writer.
pub trait TraceSink {
    fn record(&mut self, record: &PacketRecord);
    fn flush(&mut self) -> io::Result<()>;
}

/// Line-oriented text trace, one record per line:
///
/// ```text
/// r 1.008192334 wifi 10.1.1.1:49153 > 10.1.1.2:10 512 id=0
/// d 2.016384000 wifi 10.1.1.3:49160 > 10.1.1.9:17 512 id=7 below-threshold
/// ```
pub struct AsciiTraceWriter<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> AsciiTraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TraceSink for AsciiTraceWriter<W> {
    fn record(&mut self, record: &PacketRecord) {
        if self.error.is_some() {
            return;
        }
        let result = write!(
            self.out,
            "{} {:.9} {} {} > {} {} id={}",
            record.outcome.tag(),
            record.timestamp.as_secs_f64(),
            record.link.short_name(),
            record.source,
            record.destination,
            record.size,
            record.packet_id
        )
        .and_then(|_| match record.reason {
            Some(reason) => writeln!(self.out, " {}", reason.as_str()),
            None => writeln!(self.out),
        });
        if let Err(err) = result {
            self.error = Some(err);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.out.flush()
    }
}

/// JSON-lines trace: one serialized `PacketRecord` per line.
pub struct JsonLinesTraceWriter<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> JsonLinesTraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TraceSink for JsonLinesTraceWriter<W> {
    fn record(&mut self, record: &PacketRecord) {
        if self.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut self.out, record)
            .map_err(io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"));
        if let Err(err) = result {
            self.error = Some(err);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.out.flush()
    }
}

/// Outcome counters kept alongside the record list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub delivered: u64,
    pub dropped: u64,
    pub collided: u64,
}

/// Append-only record list plus attached writers.
#[derive(Default)]
pub struct TraceLog {
    records: Vec<PacketRecord>,
    sinks: Vec<Box<dyn TraceSink>>,
    counts: OutcomeCounts,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, sink: Box<dyn TraceSink>) {
        self.sinks.push(sink);
    }

    pub fn record(&mut self, record: PacketRecord) {
        match record.outcome {
            PacketOutcome::Delivered => self.counts.delivered += 1,
            PacketOutcome::Dropped => self.counts.dropped += 1,
            PacketOutcome::Collided => self.counts.collided += 1,
        }
        log::trace!(
            "{:?} packet {} {} -> {} at {}",
            record.outcome,
            record.packet_id,
            record.source,
            record.destination,
            record.timestamp
        );
        for sink in self.sinks.iter_mut() {
            sink.record(&record);
        }
        self.records.push(record);
    }

    pub fn records(&self) -> impl Iterator<Item = &PacketRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn counts(&self) -> OutcomeCounts {
        self.counts
    }

    /// Flush every writer; all are attempted, the first error is returned.
    pub fn flush(&mut self) -> io::Result<()> {
        let mut first_error = None;
        for sink in self.sinks.iter_mut() {
            if let Err(err) = sink.flush() {
                log::error!("Failed to flush trace writer: {}", err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
