//! Packet capture in the classic pcap format.
//!
//! Packets are written as raw IPv4 (`LINKTYPE_RAW`): the IPv4 and TCP
//! headers are synthesized from the simulated packet and the payload is
//! zero filled. Checksums are only computed when asked to, the way a
//! capture taken before checksum offload shows them.

use crate::{
    packet::{Packet, Segment},
    time::SimTime,
};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

const MAGIC: u32 = 0xa1b2_c3d4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65_535;
const LINKTYPE_RAW: u32 = 101;

const TCP_SYN: u8 = 0x02;
const TCP_PSH: u8 = 0x08;
const TCP_ACK: u8 = 0x10;
const TCP_ECE: u8 = 0x40;

/// Writes one pcap file.
#[derive(Debug)]
pub struct PcapWriter<W: Write = BufWriter<File>> {
    out: W,
    path: Option<PathBuf>,
    checksum: bool,
    packets: u64,
}

impl PcapWriter {
    /// Create (or truncate) the file at `path` and write the pcap header.
    pub fn create(path: impl AsRef<Path>, checksum: bool) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = Self::new(BufWriter::new(file), checksum)?;
        writer.path = Some(path.to_path_buf());
        Ok(writer)
    }
}

impl<W: Write> PcapWriter<W> {
    pub fn new(mut out: W, checksum: bool) -> io::Result<Self> {
        out.write_all(&MAGIC.to_le_bytes())?;
        out.write_all(&VERSION_MAJOR.to_le_bytes())?;
        out.write_all(&VERSION_MINOR.to_le_bytes())?;
        // thiszone, sigfigs
        out.write_all(&0i32.to_le_bytes())?;
        out.write_all(&0u32.to_le_bytes())?;
        out.write_all(&SNAPLEN.to_le_bytes())?;
        out.write_all(&LINKTYPE_RAW.to_le_bytes())?;

        Ok(Self {
            out,
            path: None,
            checksum,
            packets: 0,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of packets written so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn write_packet(&mut self, now: SimTime, packet: &Packet) -> io::Result<()> {
        let data = encode(packet, self.checksum);
        let micros = now.as_micros();

        self.out
            .write_all(&((micros / 1_000_000) as u32).to_le_bytes())?;
        self.out
            .write_all(&((micros % 1_000_000) as u32).to_le_bytes())?;
        self.out.write_all(&(data.len() as u32).to_le_bytes())?;
        self.out.write_all(&packet.size().to_le_bytes())?;
        self.out.write_all(&data)?;
        self.packets += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Bytes of `packet` as seen on the wire: IPv4 header, TCP header and a
/// zeroed payload.
pub(crate) fn encode(packet: &Packet, checksum: bool) -> Vec<u8> {
    let total = packet.size() as usize;
    let mut data = vec![0u8; total.max(40)];

    let src = packet.src();
    let dst = packet.dst();

    // IPv4
    data[0] = 0x45;
    data[1] = packet.ecn().bits();
    data[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    data[4..6].copy_from_slice(&((packet.id().value() & 0xffff) as u16).to_be_bytes());
    // don't fragment
    data[6..8].copy_from_slice(&0x4000u16.to_be_bytes());
    data[8] = 64;
    data[9] = 6;
    data[12..16].copy_from_slice(&src.ip().octets());
    data[16..20].copy_from_slice(&dst.ip().octets());

    // TCP, the initial sequence numbers are 0 and the SYN counts for one
    let (seq, ack, flags) = match *packet.segment() {
        Segment::Syn => (0u32, 0u32, TCP_SYN),
        Segment::SynAck => (0, 1, TCP_SYN | TCP_ACK),
        Segment::Data { seq, .. } => ((seq as u32).wrapping_add(1), 1, TCP_ACK | TCP_PSH),
        Segment::Ack { ack, ece, .. } => {
            let flags = if ece { TCP_ACK | TCP_ECE } else { TCP_ACK };
            (1, (ack as u32).wrapping_add(1), flags)
        }
    };
    let tcp = &mut data[20..];
    tcp[0..2].copy_from_slice(&src.port().to_be_bytes());
    tcp[2..4].copy_from_slice(&dst.port().to_be_bytes());
    tcp[4..8].copy_from_slice(&seq.to_be_bytes());
    tcp[8..12].copy_from_slice(&ack.to_be_bytes());
    tcp[12] = 5 << 4;
    tcp[13] = flags;
    tcp[14..16].copy_from_slice(&u16::MAX.to_be_bytes());

    if checksum {
        let ip_checksum = internet_checksum(0, &data[..20]);
        data[10..12].copy_from_slice(&ip_checksum.to_be_bytes());

        let tcp_len = (total - 20) as u16;
        let mut pseudo = [0u8; 12];
        pseudo[0..4].copy_from_slice(&src.ip().octets());
        pseudo[4..8].copy_from_slice(&dst.ip().octets());
        pseudo[9] = 6;
        pseudo[10..12].copy_from_slice(&tcp_len.to_be_bytes());
        let tcp_checksum = internet_checksum(sum_words(0, &pseudo), &data[20..total]);
        data[36..38].copy_from_slice(&tcp_checksum.to_be_bytes());
    }

    data
}

fn sum_words(mut sum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

/// One's complement of the one's complement sum of `bytes`.
fn internet_checksum(initial: u32, bytes: &[u8]) -> u16 {
    let mut sum = sum_words(initial, bytes);
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Ecn, test_util::data_packet};

    #[test]
    fn header() {
        let writer = PcapWriter::new(Vec::new(), true).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&bytes[20..24], &LINKTYPE_RAW.to_le_bytes());
    }

    #[test]
    fn record() {
        let mut writer = PcapWriter::new(Vec::new(), false).unwrap();
        writer
            .write_packet(SimTime::from_micros(10_100_042), &data_packet(1, 360))
            .unwrap();
        assert_eq!(writer.packets(), 1);

        let bytes = writer.into_inner();
        let record = &bytes[24..];
        assert_eq!(&record[0..4], &10u32.to_le_bytes());
        assert_eq!(&record[4..8], &100_042u32.to_le_bytes());
        assert_eq!(&record[8..12], &400u32.to_le_bytes());
        assert_eq!(&record[12..16], &400u32.to_le_bytes());
        assert_eq!(record.len(), 16 + 400);
    }

    #[test]
    fn checksums_verify() {
        let packet = data_packet(7, 360).with_ecn(Ecn::Ect);
        let data = encode(&packet, true);

        // a header with its checksum sums to zero
        assert_eq!(internet_checksum(0, &data[..20]), 0);

        let mut pseudo = [0u8; 12];
        pseudo[0..4].copy_from_slice(&packet.src().ip().octets());
        pseudo[4..8].copy_from_slice(&packet.dst().ip().octets());
        pseudo[9] = 6;
        pseudo[10..12].copy_from_slice(&380u16.to_be_bytes());
        assert_eq!(internet_checksum(sum_words(0, &pseudo), &data[20..]), 0);

        assert_eq!(data[1], 0b10);
    }

    #[test]
    fn no_checksum() {
        let data = encode(&data_packet(7, 360), false);
        assert_eq!(&data[10..12], &[0, 0]);
        assert_eq!(&data[36..38], &[0, 0]);
    }
}
