use crate::link::symbol::{self, ACK, DLE, ENQ, ETX, NAK, STX};
use crate::support::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// Replies with the high command bit set carry no function code.
const REPLY_BIT: u8 = 0x40;

/// A frame lifted off the wire, before any PCCC interpretation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LinkFrame {
    Ack,
    Nak,
    Enq,
    Data(FrameBody),
}

/// Parsed body of a `DLE STX .. DLE ETX` frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameBody {
    pub dst: u8,
    pub src: u8,
    pub cmd: u8,
    pub sts: u8,
    pub tns: u16,
    pub fnc: Option<u8>,
    pub data: Vec<u8>,
    pub crc_ok: bool,
}

/// Encodes a command frame: header and payload are CRC'd unstuffed, every
/// payload DLE is doubled, and the result is bracketed with
/// `DLE STX .. DLE ETX crc_lo crc_hi`.
pub fn encode(dst: u8, src: u8, cmd: u8, tns: u16, fnc: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(7 + payload.len());
    body.push(dst);
    body.push(src);
    body.push(cmd);
    body.push(0x00); // sts
    body.write_u16::<LittleEndian>(tns).expect("Error writing tns");
    body.push(fnc);
    body.extend_from_slice(payload);

    let crc = symbol::frame_crc(&body);

    let mut frame = Vec::with_capacity(body.len() + 6);
    frame.push(DLE);
    frame.push(STX);
    for &byte in &body {
        frame.push(byte);
        if byte == DLE {
            frame.push(DLE);
        }
    }
    frame.push(DLE);
    frame.push(ETX);
    frame.write_u16::<LittleEndian>(crc).expect("Error writing crc");

    frame
}

/// Decodes a complete frame as extracted by the receive buffer. Control
/// frames map directly; data frames are unstuffed, parsed and CRC-checked
/// (a mismatch marks the body, it does not fail the parse).
pub fn decode(frame: &[u8]) -> Result<LinkFrame> {
    match frame {
        [DLE, ACK] => return Ok(LinkFrame::Ack),
        [DLE, NAK] => return Ok(LinkFrame::Nak),
        [DLE, ENQ] => return Ok(LinkFrame::Enq),
        _ => (),
    }

    if frame.len() < 12
        || frame[..2] != [DLE, STX]
        || frame[frame.len() - 4..frame.len() - 2] != [DLE, ETX]
    {
        return Err(Error::Io(io::ErrorKind::InvalidData));
    }

    let body = unstuff(&frame[2..frame.len() - 4]);
    let wire_crc = (&frame[frame.len() - 2..]).read_u16::<LittleEndian>()?;
    let crc_ok = symbol::frame_crc(&body) == wire_crc;

    let mut stream = &body[..];
    let dst = stream.read_u8()?;
    let src = stream.read_u8()?;
    let cmd = stream.read_u8()?;
    let sts = stream.read_u8()?;
    let tns = stream.read_u16::<LittleEndian>()?;
    let fnc = if cmd & REPLY_BIT == 0 {
        Some(stream.read_u8()?)
    } else {
        None
    };

    Ok(LinkFrame::Data(FrameBody {
        dst,
        src,
        cmd,
        sts,
        tns,
        fnc,
        data: stream.to_vec(),
        crc_ok,
    }))
}

/// Collapses every stuffed `DLE DLE` pair to a single DLE.
fn unstuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;

    while i < body.len() {
        out.push(body[i]);
        if body[i] == DLE && i + 1 < body.len() && body[i + 1] == DLE {
            i += 2;
        } else {
            i += 1;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_typed_read() {
        let frame = encode(0x01, 0x00, 0x0f, 0x5161, 0xa2, &[0x02, 0x07, 0x89, 0x00, 0x00]);

        assert_eq!(
            frame,
            vec![
                0x10, 0x02, 0x01, 0x00, 0x0f, 0x00, 0x61, 0x51, 0xa2, 0x02, 0x07, 0x89, 0x00,
                0x00, 0x10, 0x03, 0x0e, 0x42,
            ]
        );
    }

    #[test]
    fn test_encode_captured_diag_status() {
        // Byte-exact against a frame captured from a MicroLogix gateway.
        let frame = encode(0x01, 0x00, 0x06, 0xefca, 0x03, &[]);

        assert_eq!(
            frame,
            vec![0x10, 0x02, 0x01, 0x00, 0x06, 0x00, 0xca, 0xef, 0x03, 0x10, 0x03, 0x8f, 0x76]
        );
    }

    #[test]
    fn test_encode_stuffs_payload_dle() {
        // Writing word 0x0010 puts a raw 0x10 in the payload; it must be
        // doubled on the wire and the CRC computed over the unstuffed form.
        let frame = encode(
            0x01,
            0x00,
            0x0f,
            0x0102,
            0xaa,
            &[0x02, 0x07, 0x89, 0x00, 0x00, 0x10, 0x00],
        );

        assert_eq!(
            frame,
            vec![
                0x10, 0x02, 0x01, 0x00, 0x0f, 0x00, 0x02, 0x01, 0xaa, 0x02, 0x07, 0x89, 0x00,
                0x00, 0x10, 0x10, 0x00, 0x10, 0x03, 0xa0, 0x51,
            ]
        );
    }

    #[test]
    fn test_decode_control_frames() {
        assert_eq!(decode(&[0x10, 0x06]).unwrap(), LinkFrame::Ack);
        assert_eq!(decode(&[0x10, 0x15]).unwrap(), LinkFrame::Nak);
        assert_eq!(decode(&[0x10, 0x05]).unwrap(), LinkFrame::Enq);
    }

    #[test]
    fn test_decode_data_reply() {
        let frame = [
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x0a, 0x00, 0x10, 0x03, 0xb2, 0x3f,
        ];

        let body = match decode(&frame).unwrap() {
            LinkFrame::Data(body) => body,
            other => panic!("Unexpected frame {:?}", other),
        };

        assert_eq!(body.dst, 0x00);
        assert_eq!(body.src, 0x01);
        assert_eq!(body.cmd, 0x4f);
        assert_eq!(body.sts, 0x00);
        assert_eq!(body.tns, 0x5161);
        assert_eq!(body.fnc, None);
        assert_eq!(body.data, vec![0x0a, 0x00]);
        assert!(body.crc_ok);
    }

    #[test]
    fn test_decode_unstuffs_body() {
        let frame = [
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x10, 0x10, 0x00, 0x10, 0x03, 0x93,
            0xf8,
        ];

        let body = match decode(&frame).unwrap() {
            LinkFrame::Data(body) => body,
            other => panic!("Unexpected frame {:?}", other),
        };

        assert_eq!(body.data, vec![0x10, 0x00]);
        assert!(body.crc_ok);
    }

    #[test]
    fn test_decode_crc_mismatch_flagged() {
        let mut frame = vec![
            0x10, 0x02, 0x00, 0x01, 0x4f, 0x00, 0x61, 0x51, 0x0a, 0x00, 0x10, 0x03, 0xb2, 0x3f,
        ];
        *frame.last_mut().unwrap() ^= 0xff;

        let body = match decode(&frame).unwrap() {
            LinkFrame::Data(body) => body,
            other => panic!("Unexpected frame {:?}", other),
        };

        assert!(!body.crc_ok);
    }

    #[test]
    fn test_decode_command_frame_has_fnc() {
        let frame = encode(0x01, 0x00, 0x0f, 0x5161, 0xa2, &[0x02, 0x07, 0x89, 0x00, 0x00]);

        let body = match decode(&frame).unwrap() {
            LinkFrame::Data(body) => body,
            other => panic!("Unexpected frame {:?}", other),
        };

        assert_eq!(body.fnc, Some(0xa2));
        assert_eq!(body.data, vec![0x02, 0x07, 0x89, 0x00, 0x00]);
        assert!(body.crc_ok);
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let payload = [0x04, 0x10, 0x89, 0x10, 0x10];
        let frame = encode(0x03, 0x02, 0x0f, 0x10aa, 0xab, &payload);

        let body = match decode(&frame).unwrap() {
            LinkFrame::Data(body) => body,
            other => panic!("Unexpected frame {:?}", other),
        };

        assert_eq!(body.dst, 0x03);
        assert_eq!(body.src, 0x02);
        assert_eq!(body.cmd, 0x0f);
        assert_eq!(body.tns, 0x10aa);
        assert_eq!(body.fnc, Some(0xab));
        assert_eq!(body.data, payload.to_vec());
        assert!(body.crc_ok);
    }

    #[test]
    fn test_decode_garbage_rejected() {
        assert!(decode(&[0x01, 0x02, 0x03]).is_err());
        assert!(decode(&[0x10, 0x02, 0x00, 0x10, 0x03, 0x00, 0x00]).is_err());
    }
}
