//! Object module loader.
//!
//! An object module is line-oriented text, one record per line, tagged by its first character.
//! Fields sit in fixed columns with no delimiters:
//!
//! ```text
//! H NAME   START  LENGTH          header
//! T ADDR   LEN    BYTES...        text, LEN bytes as hex pairs
//! M OFFSET HALVES [+-SYMBOL]      modification of HALVES half-bytes
//! D NAME   ADDR   [NAME ADDR]...  exported symbols
//! R NAME   [NAME]...              imported symbols
//! E [START]                       end, entry point
//! ```
//!
//! The whole module is parsed and range-checked before any byte is written to memory.

use std::collections::BTreeMap;
use std::ops::Range;

use log::{debug, info};
use miette::{NamedSource, SourceSpan};

use crate::error::LoadError;
use crate::memory::{Memory, MAX_ADDRESS};
use crate::word::Word;

const NAME_WIDTH: usize = 6;

type Result<T> = std::result::Result<T, LoadError>;

/// Summary of a loaded program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub name: String,
    /// Address the program was loaded at.
    pub start: Word,
    pub length: Word,
    /// Address execution starts at.
    pub entry: Word,
    pub exports: Vec<(String, Word)>,
    pub imports: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Record {
    Header {
        name: String,
        start: Word,
        length: Word,
    },
    Text {
        address: Word,
        bytes: Vec<u8>,
    },
    Modification {
        offset: Word,
        half_bytes: u8,
        negative: bool,
        symbol: Option<String>,
    },
    Define(Vec<(String, Word)>),
    Refer(Vec<String>),
    End {
        entry: Option<Word>,
    },
}

/// A parsed, not yet loaded, object module.
#[derive(Clone, Debug)]
pub struct ObjectModule {
    records: Vec<Record>,
}

/// One line of the module, with its position in the source for diagnostics.
struct Line<'a> {
    text: &'a str,
    number: usize,
    offset: usize,
    kind: &'static str,
    source: &'a Source<'a>,
}

struct Source<'a> {
    name: &'a str,
    src: &'a str,
}

impl<'a> Line<'a> {
    fn error(&self, columns: Range<usize>, reason: impl Into<String>, help: &'static str) -> LoadError {
        let start = self.offset + columns.start.min(self.text.len());
        let len = columns.end.min(self.text.len()).saturating_sub(columns.start).max(1);
        LoadError::Record {
            kind: self.kind,
            line: self.number,
            reason: reason.into(),
            help,
            src: NamedSource::new(self.source.name, self.source.src.to_string()),
            span: SourceSpan::from((start, len)),
        }
    }

    fn field(&self, columns: Range<usize>, what: &str) -> Result<&'a str> {
        self.text.get(columns.clone()).ok_or_else(|| {
            self.error(
                columns,
                format!("line ends before the {what} field"),
                "fields are fixed width; check the record is not truncated",
            )
        })
    }

    fn hex(&self, columns: Range<usize>, what: &str) -> Result<Word> {
        let field = self.field(columns.clone(), what)?;
        if !field.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(self.error(
                columns,
                format!("{what} `{field}` is not hexadecimal"),
                "addresses and lengths are zero-padded hexadecimal",
            ));
        }
        // Cannot fail: at most six hex digits
        Ok(u32::from_str_radix(field, 16).unwrap_or_default())
    }

    fn rest(&self, from: usize) -> &'a str {
        self.text.get(from..).unwrap_or("")
    }
}

impl ObjectModule {
    /// Parse an object module. `name` labels diagnostics.
    pub fn parse(name: &str, src: &str) -> Result<Self> {
        let source = Source { name, src };
        let mut records = Vec::new();
        let mut offset = 0;

        for (index, raw) in src.split_inclusive('\n').enumerate() {
            let line_offset = offset;
            offset += raw.len();
            let text = raw.trim_end();
            if text.is_empty() {
                continue;
            }

            let kind = match text.as_bytes()[0] {
                b'H' => "header",
                b'T' => "text",
                b'M' => "modification",
                b'D' => "define",
                b'R' => "refer",
                b'E' => "end",
                _ => "unknown",
            };
            let line = Line {
                text,
                number: index + 1,
                offset: line_offset,
                kind,
                source: &source,
            };

            match records.last() {
                None if kind != "header" => return Err(LoadError::MissingHeader),
                Some(Record::End { .. }) => {
                    return Err(line.error(
                        0..text.len(),
                        "record follows the end record",
                        "the end record must be last",
                    ))
                }
                _ => (),
            }
            if kind == "header" && !records.is_empty() {
                return Err(line.error(0..1, "second header record", "a module has one header"));
            }

            let record = Self::parse_record(&line)?;
            debug!("Parsed {} record: {:?}", kind, record);
            records.push(record);
        }

        match records.last() {
            None => Err(LoadError::MissingHeader),
            Some(Record::End { .. }) => Ok(Self { records }),
            Some(_) => Err(LoadError::MissingEnd),
        }
    }

    fn parse_record(line: &Line) -> Result<Record> {
        let record = match line.kind {
            "header" => Record::Header {
                name: line.field(1..7, "program name")?.trim_end().to_string(),
                start: line.hex(7..13, "start address")?,
                length: line.hex(13..19, "program length")?,
            },
            "text" => {
                let address = line.hex(1..7, "load address")?;
                let count = line.hex(7..9, "byte count")? as usize;
                let data = line.rest(9);
                if data.len() != count * 2 {
                    return Err(line.error(
                        9..line.text.len(),
                        format!("expected {count} bytes, found {} hex digits", data.len()),
                        "the byte count must match the hex pairs that follow",
                    ));
                }
                let bytes = (0..count)
                    .map(|i| line.hex(9 + i * 2..11 + i * 2, "byte").map(|byte| byte as u8))
                    .collect::<Result<Vec<_>>>()?;
                Record::Text { address, bytes }
            }
            "modification" => {
                let offset = line.hex(1..7, "offset")?;
                let half_bytes = line.hex(7..9, "length")? as u8;
                if half_bytes == 0 || half_bytes > 6 {
                    return Err(line.error(
                        7..9,
                        format!("cannot modify {half_bytes} half-bytes"),
                        "modified fields are 1 to 6 half-bytes long",
                    ));
                }
                let (negative, symbol) = match line.rest(9).chars().next() {
                    None => (false, None),
                    Some(sign @ ('+' | '-')) => {
                        let symbol = line.rest(10).trim();
                        if symbol.is_empty() || symbol.len() > NAME_WIDTH {
                            return Err(line.error(
                                10..16,
                                "missing symbol name",
                                "a sign must be followed by a symbol of up to six characters",
                            ));
                        }
                        (sign == '-', Some(symbol.to_string()))
                    }
                    Some(_) => {
                        return Err(line.error(9..10, "expected `+` or `-`", "e.g. `M00000705+PROG`"))
                    }
                };
                Record::Modification {
                    offset,
                    half_bytes,
                    negative,
                    symbol,
                }
            }
            "define" => {
                let body = line.rest(1);
                let pair = NAME_WIDTH * 2;
                if body.is_empty() || body.len() % pair != 0 {
                    return Err(line.error(
                        1..line.text.len(),
                        "definitions must be name/address pairs",
                        "each pair is a six character name and a six digit address",
                    ));
                }
                let definitions = (0..body.len() / pair)
                    .map(|i| {
                        let at = 1 + i * pair;
                        let name = line.field(at..at + NAME_WIDTH, "symbol name")?;
                        let value = line.hex(at + NAME_WIDTH..at + pair, "symbol address")?;
                        Ok((name.trim_end().to_string(), value))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Record::Define(definitions)
            }
            "refer" => {
                let names = line
                    .rest(1)
                    .as_bytes()
                    .chunks(NAME_WIDTH)
                    .map(|chunk| String::from_utf8_lossy(chunk).trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect::<Vec<_>>();
                if names.is_empty() {
                    return Err(line.error(0..1, "no symbols referenced", "list at least one name"));
                }
                Record::Refer(names)
            }
            "end" => Record::End {
                entry: match line.rest(1) {
                    "" => None,
                    _ => Some(line.hex(1..7, "start address")?),
                },
            },
            _ => {
                return Err(line.error(
                    0..1,
                    format!(
                        "unknown record type `{}`",
                        line.text.chars().next().unwrap_or_default()
                    ),
                    "records are tagged H, T, M, D, R or E",
                ))
            }
        };
        Ok(record)
    }

    /// Program summary as assembled, before relocation.
    pub fn program(&self) -> Program {
        let mut program = Program::default();
        for record in &self.records {
            match record {
                Record::Header {
                    name,
                    start,
                    length,
                } => {
                    program.name = name.clone();
                    program.start = *start;
                    program.length = *length;
                    program.entry = *start;
                }
                Record::Define(definitions) => program.exports.extend(definitions.iter().cloned()),
                Record::Refer(names) => program.imports.extend(names.iter().cloned()),
                Record::End { entry: Some(entry) } => program.entry = *entry,
                _ => (),
            }
        }
        program
    }

    /// Load at the address given by the header.
    pub fn load(&self, memory: &mut Memory) -> Result<Program> {
        self.load_at(memory, self.program().start)
    }

    /// Load with the program relocated to `base`. Modification records are applied by the
    /// difference between `base` and the assembled start address.
    pub fn load_at(&self, memory: &mut Memory, base: Word) -> Result<Program> {
        let mut program = self.program();
        let delta = base as i64 - program.start as i64;
        let relocate = |address: Word| -> Result<u32> {
            let address = address as i64 + delta;
            u32::try_from(address)
                .ok()
                .filter(|address| *address <= MAX_ADDRESS)
                .ok_or(LoadError::OutOfRange(address as u32))
        };

        // Stage every write so nothing reaches memory unless the whole module fits.
        // Text bytes go to a load counter which starts at the header address and runs on
        // across records.
        let mut image: BTreeMap<u32, u8> = BTreeMap::new();
        let mut counter = program.start;
        for record in &self.records {
            if let Record::Text { address, bytes } = record {
                if *address != counter {
                    debug!(
                        "Text record for 0x{:06X} placed at load counter 0x{:06X}",
                        address, counter
                    );
                }
                for byte in bytes {
                    image.insert(relocate(counter)?, *byte);
                    counter += 1;
                }
            }
        }

        if delta != 0 {
            for record in &self.records {
                let Record::Modification {
                    offset,
                    half_bytes,
                    negative,
                    symbol,
                } = record
                else {
                    continue;
                };
                if symbol.as_ref().is_some_and(|symbol| *symbol != program.name) {
                    debug!("Skipping external reference to {:?}", symbol);
                    continue;
                }
                let address = relocate(program.start + offset)?;
                let width = (*half_bytes as u32 + 1) / 2;
                relocate(program.start + offset + width - 1)?;

                let read = |addr: u32| image.get(&addr).copied().or_else(|| memory.byte(addr).ok());
                let value = (0..width)
                    .map(|i| read(address + i).unwrap_or(0) as u32)
                    .fold(0u32, |acc, byte| (acc << 8) | byte);
                let mask = (1u32 << (4 * *half_bytes as u32)) - 1;
                let adjust = if *negative { -delta } else { delta };
                let field = ((value & mask) as i64 + adjust) as u32 & mask;
                let value = (value & !mask) | field;
                for i in 0..width {
                    let shift = 8 * (width - 1 - i);
                    image.insert(address + i, (value >> shift) as u8);
                }
            }
        }

        for (address, byte) in &image {
            // Range-checked while staging
            memory
                .set_byte(*address, *byte)
                .map_err(|_| LoadError::OutOfRange(*address))?;
        }

        program.entry = relocate(program.entry)?;
        program.start = base;
        info!(
            "Loaded {} ({} bytes) at 0x{:06X}, entry 0x{:06X}",
            program.name,
            image.len(),
            program.start,
            program.entry
        );
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<ObjectModule> {
        ObjectModule::parse("test.obj", src)
    }

    #[test]
    fn minimal_module() {
        let module = parse("HPROG  001000000003\nT0010000301020C\nE001000\n").unwrap();
        let mut memory = Memory::new();
        let program = module.load(&mut memory).unwrap();
        assert_eq!(program.name, "PROG");
        assert_eq!(program.start, 0x1000);
        assert_eq!(program.length, 3);
        assert_eq!(program.entry, 0x1000);
        assert_eq!(memory.dump(0x1000, 0x1002).unwrap(), vec![0x01, 0x02, 0x0C]);
    }

    #[test]
    fn text_records_follow_the_load_counter() {
        let src = "HPROG  000000000003\nT00000002AABB\nT0000100111\nE000000\n";
        let mut memory = Memory::new();
        let program = parse(src).unwrap().load(&mut memory).unwrap();
        assert_eq!(memory.dump(0, 2).unwrap(), vec![0xAA, 0xBB, 0x11]);
        assert_eq!(memory.byte(0x10).unwrap(), 0);
        assert_eq!(program.entry, 0);
    }

    #[test]
    fn load_counter_starts_at_the_relocated_base() {
        let src = "HPROG  001000000003\nT00100002AABB\nT0010200111\nE001000\n";
        let mut memory = Memory::new();
        let program = parse(src).unwrap().load_at(&mut memory, 0x4000).unwrap();
        assert_eq!(memory.dump(0x4000, 0x4002).unwrap(), vec![0xAA, 0xBB, 0x11]);
        assert_eq!(memory.byte(0x1000).unwrap(), 0);
        assert_eq!(program.entry, 0x4000);
    }

    #[test]
    fn end_without_address_uses_header_start() {
        let module = parse("HPROG  000300000000\r\nE\r\n").unwrap();
        assert_eq!(module.program().entry, 0x300);
    }

    #[test]
    fn symbols_are_collected() {
        let src = "HMAIN  000000000010\nDLISTA 000040ENDA  000054\nRLISTB ENDB\nE000000\n";
        let program = parse(src).unwrap().program();
        assert_eq!(
            program.exports,
            vec![("LISTA".to_string(), 0x40), ("ENDA".to_string(), 0x54)]
        );
        assert_eq!(program.imports, vec!["LISTB".to_string(), "ENDB".to_string()]);
    }

    #[test]
    fn malformed_records() {
        #[rustfmt::skip]
        let cases = [
            "HPROG  00100\nE001000\n",
            "HPROG  001000000003\nT0010000301020\nE001000\n",
            "HPROG  001000000003\nT00100003010G0C\nE001000\n",
            "HPROG  001000000003\nX\nE001000\n",
            "HPROG  001000000003\nM00000705*PROG\nE001000\n",
            "HPROG  001000000003\nE001000\nT0010000100\n",
            "HPROG  001000000003\nE00Z000\n",
        ];
        for src in cases {
            assert!(
                matches!(parse(src), Err(LoadError::Record { .. })),
                "accepted {src:?}"
            );
        }
    }

    #[test]
    fn record_errors_point_at_the_field() {
        let Err(LoadError::Record { line, span, kind, .. }) =
            parse("HPROG  001000000003\nT00100003010G0C\nE001000\n")
        else {
            panic!("expected record error");
        };
        assert_eq!(kind, "text");
        assert_eq!(line, 2);
        // Second line starts at 20; byte two is columns 11..13
        assert_eq!(span.offset(), 31);
        assert_eq!(span.len(), 2);
    }

    #[test]
    fn missing_header_or_end() {
        assert!(matches!(parse(""), Err(LoadError::MissingHeader)));
        assert!(matches!(parse("T0000000100\n"), Err(LoadError::MissingHeader)));
        assert!(matches!(
            parse("HPROG  000000000001\nT0000000100\n"),
            Err(LoadError::MissingEnd)
        ));
    }

    #[test]
    fn failed_load_writes_nothing() {
        let src = "HPROG  0FFFFE000004\nT0FFFFE0211\nT1000000422334455\nE0FFFFE\n";
        let mut memory = Memory::new();
        let module = parse(src).unwrap();
        assert!(matches!(module.load(&mut memory), Err(LoadError::OutOfRange(_))));
        assert_eq!(memory.dump(0x0F_FFFE, MAX_ADDRESS).unwrap(), vec![0; 3]);
    }

    #[test]
    fn relocation_applies_modification_records() {
        // +JSUB 0x000010 at offset 0, modified in its 5 half-byte address field
        let src = "HPROG  000000000014\nT000000044B100010\nM00000105+PROG\nE000000\n";
        let module = parse(src).unwrap();

        let mut memory = Memory::new();
        module.load(&mut memory).unwrap();
        assert_eq!(memory.dump(0, 3).unwrap(), vec![0x4B, 0x10, 0x00, 0x10]);

        let mut memory = Memory::new();
        let program = module.load_at(&mut memory, 0x2000).unwrap();
        assert_eq!(program.start, 0x2000);
        assert_eq!(program.entry, 0x2000);
        assert_eq!(memory.dump(0x2000, 0x2003).unwrap(), vec![0x4B, 0x10, 0x20, 0x10]);
    }
}
