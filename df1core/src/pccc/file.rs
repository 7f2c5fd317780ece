use serde_derive::{Deserialize, Serialize};

/// PLC file table types recognised by the client. The discriminant is the
/// PCCC file-type code carried in read/write commands.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum FileType {
    Status = 0x84,
    Bit = 0x85,
    Timer = 0x86,
    Counter = 0x87,
    Control = 0x88,
    Integer = 0x89,
    Float = 0x8a,
    OutLogic = 0x8b,
    InLogic = 0x8c,
    Ascii = 0x8e,
}

impl FileType {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// True for the types whose data travels as 16-bit words.
    #[inline]
    pub fn is_word_type(self) -> bool {
        matches!(
            self,
            FileType::Integer | FileType::OutLogic | FileType::Bit | FileType::Control
        )
    }
}

/// Selects a single bit out of each word of a read, or the whole word.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BitSelect {
    All,
    Bit(u8),
}

impl BitSelect {
    /// Projects a word through the selection: the word itself, or 0/1 for
    /// the selected bit position.
    #[inline]
    pub fn project(self, word: u16) -> u16 {
        match self {
            BitSelect::All => word,
            BitSelect::Bit(position) => (word >> position) & 1,
        }
    }
}

/// Timer file fields. `Pre` and `Acc` live in sub-elements 1 and 2; the
/// status bits share sub-element 0, packed in the top nibble of the word.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimerField {
    En,
    Ti,
    Dn,
    Pre,
    Acc,
    Status,
}

impl TimerField {
    #[inline]
    pub fn sub_element(self) -> u16 {
        match self {
            TimerField::Pre => 1,
            TimerField::Acc => 2,
            _ => 0,
        }
    }

    /// Projects a raw status word to the requested field. `Pre`/`Acc`
    /// return the word unchanged; the rest derive from the `EN TI DN x`
    /// nibble.
    pub fn project(self, word: u16) -> u16 {
        let status = word >> 12;
        match self {
            TimerField::Pre | TimerField::Acc => word,
            TimerField::En => (status >> 3) & 1,
            TimerField::Ti => (status >> 2) & 1,
            TimerField::Dn => (status >> 1) & 1,
            TimerField::Status => status,
        }
    }
}

/// Counter file fields. Status bits occupy the top six bits of sub-element
/// 0 in the order `CU CD DN OV UN UA`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CounterField {
    Cu,
    Cd,
    Dn,
    Ov,
    Un,
    Ua,
    Pre,
    Acc,
    Status,
}

impl CounterField {
    #[inline]
    pub fn sub_element(self) -> u16 {
        match self {
            CounterField::Pre => 1,
            CounterField::Acc => 2,
            _ => 0,
        }
    }

    pub fn project(self, word: u16) -> u16 {
        let status = word >> 10;
        match self {
            CounterField::Pre | CounterField::Acc => word,
            CounterField::Cu => (status >> 5) & 1,
            CounterField::Cd => (status >> 4) & 1,
            CounterField::Dn => (status >> 3) & 1,
            CounterField::Ov => (status >> 2) & 1,
            CounterField::Un => (status >> 1) & 1,
            CounterField::Ua => status & 1,
            CounterField::Status => status,
        }
    }
}

/// Returns the state of `bit` within `word`, or the whole word for
/// `BitSelect::All`.
#[inline]
pub fn bit_inspect(word: u16, bit: BitSelect) -> u16 {
    bit.project(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_codes() {
        assert_eq!(FileType::Status.code(), 0x84);
        assert_eq!(FileType::Bit.code(), 0x85);
        assert_eq!(FileType::Timer.code(), 0x86);
        assert_eq!(FileType::Counter.code(), 0x87);
        assert_eq!(FileType::Control.code(), 0x88);
        assert_eq!(FileType::Integer.code(), 0x89);
        assert_eq!(FileType::Float.code(), 0x8a);
        assert_eq!(FileType::OutLogic.code(), 0x8b);
        assert_eq!(FileType::InLogic.code(), 0x8c);
        assert_eq!(FileType::Ascii.code(), 0x8e);
    }

    #[test]
    fn test_bit_select() {
        assert_eq!(BitSelect::All.project(0b1010), 0b1010);
        assert_eq!(BitSelect::Bit(1).project(0b1010), 1);
        assert_eq!(BitSelect::Bit(2).project(0b1010), 0);
        assert_eq!(BitSelect::Bit(15).project(0x8000), 1);
    }

    #[test]
    fn test_timer_fields() {
        // EN and DN set: top nibble 1010.
        let word = 0b1010_0000_0000_0000;

        assert_eq!(TimerField::En.project(word), 1);
        assert_eq!(TimerField::Ti.project(word), 0);
        assert_eq!(TimerField::Dn.project(word), 1);
        assert_eq!(TimerField::Status.project(word), 0b1010);
        assert_eq!(TimerField::Acc.project(1234), 1234);
    }

    #[test]
    fn test_timer_sub_elements() {
        assert_eq!(TimerField::Status.sub_element(), 0);
        assert_eq!(TimerField::En.sub_element(), 0);
        assert_eq!(TimerField::Pre.sub_element(), 1);
        assert_eq!(TimerField::Acc.sub_element(), 2);
    }

    #[test]
    fn test_counter_fields() {
        // CU and UA set: top six bits 100001.
        let word = 0b1000_0100_0000_0000;

        assert_eq!(CounterField::Cu.project(word), 1);
        assert_eq!(CounterField::Cd.project(word), 0);
        assert_eq!(CounterField::Ua.project(word), 1);
        assert_eq!(CounterField::Status.project(word), 0b100001);
        assert_eq!(CounterField::Pre.project(500), 500);
    }

    #[test]
    fn test_counter_sub_elements() {
        assert_eq!(CounterField::Status.sub_element(), 0);
        assert_eq!(CounterField::Pre.sub_element(), 1);
        assert_eq!(CounterField::Acc.sub_element(), 2);
    }

    #[test]
    fn test_bit_inspect() {
        assert_eq!(bit_inspect(0b100, BitSelect::Bit(2)), 1);
        assert_eq!(bit_inspect(0b100, BitSelect::Bit(0)), 0);
        assert_eq!(bit_inspect(0b100, BitSelect::All), 0b100);
    }
}
