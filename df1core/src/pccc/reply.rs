use crate::link::frame::{self, FrameBody, LinkFrame};
use crate::pccc::file::FileType;
use crate::support::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};

/// Everything the engine can pull out of the message sink. `Timeout` is
/// synthetic, produced when no reply arrives in time.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    Nak,
    Enq,
    Timeout,
    /// A 0x4F data reply.
    Data(DataReply),
    /// A data frame with a command code the client does not interpret;
    /// kept for diagnostics, still correlated by tns.
    Unknown(DataReply),
}

impl Reply {
    /// Parses an extracted wire frame into a reply.
    pub fn parse(frame_bytes: &[u8]) -> Result<Reply> {
        Ok(match frame::decode(frame_bytes)? {
            LinkFrame::Ack => Reply::Ack,
            LinkFrame::Nak => Reply::Nak,
            LinkFrame::Enq => Reply::Enq,
            LinkFrame::Data(body) if body.cmd == 0x4f => Reply::Data(DataReply::from_body(body)),
            LinkFrame::Data(body) => Reply::Unknown(DataReply::from_body(body)),
        })
    }

    /// A reply is valid when the transmitter may act on it: control frames
    /// always are, data frames iff their CRC checks out and the status
    /// byte is clear, timeouts never.
    pub fn is_valid(&self) -> bool {
        match self {
            Reply::Ack | Reply::Nak | Reply::Enq => true,
            Reply::Timeout => false,
            Reply::Data(reply) | Reply::Unknown(reply) => reply.is_valid(),
        }
    }

    /// The transaction number this reply answers, when it carries one.
    pub fn tns(&self) -> Option<u16> {
        match self {
            Reply::Data(reply) | Reply::Unknown(reply) => Some(reply.tns),
            _ => None,
        }
    }
}

/// Decoded values of a data reply, projected by the requested file type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedData {
    Words(Vec<u16>),
    Floats(Vec<f32>),
    Bytes(Vec<u8>),
}

impl TypedData {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            TypedData::Words(values) => values.len(),
            TypedData::Floats(values) => values.len(),
            TypedData::Bytes(values) => values.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An incoming PCCC data frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DataReply {
    pub src: u8,
    pub dst: u8,
    pub cmd: u8,
    pub sts: u8,
    pub tns: u16,
    data: Vec<u8>,
    crc_ok: bool,
}

impl DataReply {
    fn from_body(body: FrameBody) -> DataReply {
        DataReply {
            src: body.src,
            dst: body.dst,
            cmd: body.cmd,
            sts: body.sts,
            tns: body.tns,
            data: body.data,
            crc_ok: body.crc_ok,
        }
    }

    /// Valid iff the frame CRC matched and the controller reported no
    /// error status.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.crc_ok && self.sts == 0
    }

    /// Raw command-data bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Projects the raw bytes by file type: words for INTEGER/BIT, IEEE
    /// singles for FLOAT, plain bytes for ASCII/STATUS.
    pub fn typed_data(&self, file_type: FileType) -> Result<TypedData> {
        match file_type {
            FileType::Ascii | FileType::Status => Ok(TypedData::Bytes(self.data.clone())),
            FileType::Integer | FileType::Bit => Ok(TypedData::Words(self.words()?)),
            FileType::Float => Ok(TypedData::Floats(self.floats()?)),
            _ => Err(Error::NotImplemented(
                "only INTEGER, BIT, FLOAT, ASCII and STATUS data can be decoded",
            )),
        }
    }

    /// The data as 16-bit little-endian words.
    pub fn words(&self) -> Result<Vec<u16>> {
        if self.data.len() % 2 != 0 {
            return Err(Error::Arithmetic("word data with odd byte count"));
        }

        let mut stream = &self.data[..];
        let mut words = Vec::with_capacity(self.data.len() / 2);
        while !stream.is_empty() {
            words.push(stream.read_u16::<LittleEndian>()?);
        }

        Ok(words)
    }

    /// The data as little-endian IEEE-754 singles.
    pub fn floats(&self) -> Result<Vec<f32>> {
        if self.data.len() % 4 != 0 {
            return Err(Error::Arithmetic("float data not a multiple of 4 bytes"));
        }

        let mut stream = &self.data[..];
        let mut floats = Vec::with_capacity(self.data.len() / 4);
        while !stream.is_empty() {
            floats.push(stream.read_f32::<LittleEndian>()?);
        }

        Ok(floats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_reply(frame_bytes: &[u8]) -> DataReply {
        match Reply::parse(frame_bytes).unwrap() {
            Reply::Data(reply) => reply,
            other => panic!("Unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_parse_control_replies() {
        assert_eq!(Reply::parse(&[0x10, 0x06]).unwrap(), Reply::Ack);
        assert_eq!(Reply::parse(&[0x10, 0x15]).unwrap(), Reply::Nak);
        assert_eq!(Reply::parse(&[0x10, 0x05]).unwrap(), Reply::Enq);
    }

    #[test]
    fn test_integer_reply() {
        let reply = data_reply(&[
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x0a, 0x00, 0x10, 0x03, 0xb2, 0x3f,
        ]);

        assert_eq!(reply.tns, 0x5161);
        assert!(reply.is_valid());
        assert_eq!(
            reply.typed_data(FileType::Integer).unwrap(),
            TypedData::Words(vec![0x000a])
        );
    }

    #[test]
    fn test_two_word_reply() {
        let reply = data_reply(&[
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x0a, 0x00, 0x14, 0x00, 0x10, 0x03,
            0xc4, 0xb5,
        ]);

        assert_eq!(reply.words().unwrap(), vec![0x000a, 0x0014]);
    }

    #[test]
    fn test_float_reply() {
        let reply = data_reply(&[
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x00, 0x00, 0x80, 0x3f, 0x10, 0x03,
            0x0c, 0xa8,
        ]);

        assert_eq!(
            reply.typed_data(FileType::Float).unwrap(),
            TypedData::Floats(vec![1.0])
        );
    }

    #[test]
    fn test_status_reply_raw_bytes() {
        let reply = data_reply(&[
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x0a, 0x00, 0x14, 0x00, 0x10, 0x03,
            0xc4, 0xb5,
        ]);

        assert_eq!(
            reply.typed_data(FileType::Status).unwrap(),
            TypedData::Bytes(vec![0x0a, 0x00, 0x14, 0x00])
        );
        assert_eq!(
            reply.typed_data(FileType::Ascii).unwrap(),
            TypedData::Bytes(vec![0x0a, 0x00, 0x14, 0x00])
        );
    }

    #[test]
    fn test_odd_word_count() {
        let mut reply = data_reply(&[
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x0a, 0x00, 0x10, 0x03, 0xb2, 0x3f,
        ]);
        reply.data.pop();

        assert_eq!(
            reply.words().unwrap_err(),
            Error::Arithmetic("word data with odd byte count")
        );
    }

    #[test]
    fn test_float_length_not_multiple_of_four() {
        let mut reply = data_reply(&[
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x00, 0x00, 0x80, 0x3f, 0x10, 0x03,
            0x0c, 0xa8,
        ]);
        reply.data.pop();

        assert_eq!(
            reply.floats().unwrap_err(),
            Error::Arithmetic("float data not a multiple of 4 bytes")
        );
    }

    #[test]
    fn test_empty_float_reply() {
        let mut reply = data_reply(&[
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x00, 0x00, 0x80, 0x3f, 0x10, 0x03,
            0x0c, 0xa8,
        ]);
        reply.data.clear();

        assert_eq!(reply.floats().unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn test_timer_type_not_decodable() {
        let reply = data_reply(&[
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x0a, 0x00, 0x10, 0x03, 0xb2, 0x3f,
        ]);

        assert!(matches!(
            reply.typed_data(FileType::Timer),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_error_status_invalidates() {
        let reply = data_reply(&[
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x10, 0x10, 0x61, 0x51, 0x0a, 0x00, 0x10, 0x03, 0xb0,
            0xaf,
        ]);

        assert_eq!(reply.sts, 0x10);
        assert!(!reply.is_valid());
    }

    #[test]
    fn test_crc_mismatch_invalidates() {
        let mut frame_bytes = vec![
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x0a, 0x00, 0x10, 0x03, 0xb2, 0x3f,
        ];
        *frame_bytes.last_mut().unwrap() = 0x00;

        let reply = data_reply(&frame_bytes);
        assert!(!reply.is_valid());
    }

    #[test]
    fn test_unknown_command_kept_for_diagnostics() {
        let reply = match Reply::parse(&[
            0x10, 0x02, 0x00, 0x01, 0x41, 0x00, 0x61, 0x51, 0xaa, 0xbb, 0x10, 0x03, 0x2f, 0x2d,
        ])
        .unwrap()
        {
            Reply::Unknown(reply) => reply,
            other => panic!("Unexpected reply {:?}", other),
        };

        assert_eq!(reply.cmd, 0x41);
        assert_eq!(reply.tns, 0x5161);
        assert_eq!(reply.data(), &[0xaa, 0xbb]);
        assert!(reply.is_valid());
    }

    #[test]
    fn test_timeout_reply_invalid() {
        assert!(!Reply::Timeout.is_valid());
        assert_eq!(Reply::Timeout.tns(), None);
    }
}
