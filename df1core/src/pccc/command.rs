use crate::link::frame;
use crate::pccc::file::FileType;
use crate::support::{Error, Result};
use byteorder::{LittleEndian, WriteBytesExt};

/// Data supplied to the write encoders. Word types travel low-byte-first;
/// floats as little-endian IEEE-754 singles.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteData {
    Words(Vec<u16>),
    Floats(Vec<f32>),
}

/// An outgoing PCCC command. Construction validates the address fields;
/// the transaction number stays mutable so a NAK retry can re-stamp it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Command {
    pub dst: u8,
    pub src: u8,
    pub cmd: u8,
    pub fnc: u8,
    pub tns: u16,
    data: Vec<u8>,
}

impl Command {
    /// Protected typed logical read with three address fields (0F/A2).
    pub fn typed_read(
        src: u8,
        dst: u8,
        tns: u16,
        bytes_to_read: u8,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
    ) -> Result<Command> {
        check_address(table, start, start_sub)?;
        Ok(Command {
            dst,
            src,
            cmd: 0x0f,
            fnc: 0xa2,
            tns,
            data: address_payload(bytes_to_read, table, file_type, start, start_sub),
        })
    }

    /// Protected read variant carried on function code 04 (0F/04); same
    /// payload layout as the typed read.
    pub fn typed_read_fnc04(
        src: u8,
        dst: u8,
        tns: u16,
        bytes_to_read: u8,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
    ) -> Result<Command> {
        check_address(table, start, start_sub)?;
        Ok(Command {
            dst,
            src,
            cmd: 0x0f,
            fnc: 0x04,
            tns,
            data: address_payload(bytes_to_read, table, file_type, start, start_sub),
        })
    }

    /// Protected typed logical write with three address fields (0F/AA).
    pub fn typed_write(
        src: u8,
        dst: u8,
        tns: u16,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
        data: &WriteData,
    ) -> Result<Command> {
        check_address(table, start, start_sub)?;
        let bytes = serialize_write(file_type, data)?;

        let mut payload = address_payload(bytes.len() as u8, table, file_type, start, start_sub);
        payload.extend_from_slice(&bytes);

        Ok(Command {
            dst,
            src,
            cmd: 0x0f,
            fnc: 0xaa,
            tns,
            data: payload,
        })
    }

    /// Protected typed logical write with mask (0F/AB). Only bits set in
    /// the mask are modified by the controller.
    pub fn typed_write_masked(
        src: u8,
        dst: u8,
        tns: u16,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
        mask: u16,
        data: &WriteData,
    ) -> Result<Command> {
        check_address(table, start, start_sub)?;
        let bytes = serialize_write(file_type, data)?;

        let mut payload = address_payload(bytes.len() as u8, table, file_type, start, start_sub);
        payload
            .write_u16::<LittleEndian>(mask)
            .expect("Error writing mask");
        payload.extend_from_slice(&bytes);

        Ok(Command {
            dst,
            src,
            cmd: 0x0f,
            fnc: 0xab,
            tns,
            data: payload,
        })
    }

    /// Masked write of a single bit: mask `1 << bit`, data the bit value
    /// shifted into place.
    pub fn single_bit_write(
        src: u8,
        dst: u8,
        tns: u16,
        table: u16,
        file_type: FileType,
        start: u16,
        bit: u8,
        value: bool,
    ) -> Result<Command> {
        if bit > 15 {
            return Err(Error::NotImplemented("bit position above 15"));
        }

        let mask = 1u16 << bit;
        let word = if value { mask } else { 0 };

        Self::typed_write_masked(
            src,
            dst,
            tns,
            table,
            file_type,
            start,
            0,
            mask,
            &WriteData::Words(vec![word]),
        )
    }

    /// Diagnostic echo (06/00): the controller returns the payload verbatim.
    pub fn echo(src: u8, dst: u8, tns: u16, data: &[u8]) -> Command {
        Command {
            dst,
            src,
            cmd: 0x06,
            fnc: 0x00,
            tns,
            data: data.to_vec(),
        }
    }

    /// Get diagnostic status (06/03); addressed like the typed read.
    pub fn diagnostic_status(
        src: u8,
        dst: u8,
        tns: u16,
        bytes_to_read: u8,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
    ) -> Result<Command> {
        check_address(table, start, start_sub)?;
        Ok(Command {
            dst,
            src,
            cmd: 0x06,
            fnc: 0x03,
            tns,
            data: address_payload(bytes_to_read, table, file_type, start, start_sub),
        })
    }

    /// The command-data portion of the frame, after the function code.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Encodes the full wire frame for this command.
    #[inline]
    pub fn bytes(&self) -> Vec<u8> {
        frame::encode(self.dst, self.src, self.cmd, self.tns, self.fnc, &self.data)
    }
}

fn check_address(table: u16, start: u16, start_sub: u16) -> Result<()> {
    if table > 0xfe || start > 0xfe || start_sub > 0xfe {
        return Err(Error::NotImplemented("address fields above 0xfe"));
    }
    Ok(())
}

fn address_payload(
    bytes_to_read: u8,
    table: u16,
    file_type: FileType,
    start: u16,
    start_sub: u16,
) -> Vec<u8> {
    vec![
        bytes_to_read,
        table as u8,
        file_type.code(),
        start as u8,
        start_sub as u8,
    ]
}

fn serialize_write(file_type: FileType, data: &WriteData) -> Result<Vec<u8>> {
    match data {
        WriteData::Words(words) if file_type.is_word_type() => {
            let mut out = Vec::with_capacity(words.len() * 2);
            for &word in words {
                out.write_u16::<LittleEndian>(word)
                    .expect("Error writing word");
            }
            Ok(out)
        }
        WriteData::Floats(floats) if file_type == FileType::Float => {
            let mut out = Vec::with_capacity(floats.len() * 4);
            for &value in floats {
                out.write_f32::<LittleEndian>(value)
                    .expect("Error writing float");
            }
            Ok(out)
        }
        _ => Err(Error::NotImplemented("write data does not match file type")),
    }
}
