//! Record header framing for both transports.

use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::{ContentType, ProtocolVersion, Sequence, TransportKind};
use crate::util::be_u48;

/// A parsed record header.
///
/// Stream: `type(1) version(2) length(2)`.
/// Datagram: `type(1) version(2) epoch(2) sequence(6) length(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    /// Always zero on stream transport.
    pub sequence: Sequence,
    pub length: u16,
}

impl RecordHeader {
    pub fn parse(input: &[u8], transport: TransportKind) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;

        let (input, sequence) = match transport {
            TransportKind::Stream => (input, Sequence::default()),
            TransportKind::Datagram => {
                let (input, epoch) = be_u16(input)?;
                let (input, sequence_number) = be_u48(input)?;
                (
                    input,
                    Sequence {
                        epoch,
                        sequence_number,
                    },
                )
            }
        };

        let (input, length) = be_u16(input)?;

        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                sequence,
                length,
            },
        ))
    }

    pub fn serialize(&self, transport: TransportKind, output: &mut Buf) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        if transport.is_datagram() {
            output.put_u16(self.sequence.epoch);
            output.put_u48(self.sequence.sequence_number);
        }
        output.put_u16(self.length);
    }
}
